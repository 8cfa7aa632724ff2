// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # The bloglist API Integration Tests
//!
//! Each test gets a bloglist server of its own, backed by in-memory storage & listening on an
//! ephemeral port on the loopback interface. The servers all run on one Tokio runtime, shared by
//! the test threads [libtest-mimic] spins-up.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html

use std::{future::Future, sync::{Arc, OnceLock}};

use bloglist::{
    http::{Bloglist, make_world_router},
    memory::Memory,
    metrics::Instruments,
    peppers::Peppers,
    signing_keys::SigningKeys,
};
use bloglist_test::{blogs, test_healthcheck, test_metrics, users};
use common::Test;
use libtest_mimic::{Arguments, Failed, Trial};
use snafu::prelude::*;
use tokio::{net::TcpListener, runtime::Runtime};
use url::Url;

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Failed to bind a listener: {source}"))]
    Bind { source: std::io::Error },
    #[snafu(display("Failed to build the bloglist instruments: {source}"))]
    Instruments { source: bloglist::metrics::Error },
    #[snafu(display("Failed to read the listener's address: {source}"))]
    LocalAddr { source: std::io::Error },
    #[snafu(display("Failed to build a Tokio runtime: {source}"))]
    Runtime { source: std::io::Error },
    #[snafu(display("Failed to form the server's URL: {source}"))]
    Url { source: url::ParseError },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Stand-up a fresh bloglist server; return the URL at which it's listening
async fn start_server() -> Result<Url> {
    let state = Arc::new(Bloglist {
        storage: Arc::new(Memory::new()),
        registry: prometheus::Registry::new(),
        instruments: Arc::new(Instruments::new("bloglist-test").context(InstrumentsSnafu)?),
        pepper: Peppers::default(),
        token_lifetime: chrono::Duration::seconds(3600),
        signing_keys: SigningKeys::default(),
        issuer: "localhost".to_owned(),
    });
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context(BindSnafu)?;
    let addr = listener.local_addr().context(LocalAddrSnafu)?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, make_world_router(state)).await;
    });
    Url::parse(&format!("http://{}", addr)).context(UrlSnafu)
}

/// Run `f` against a server of its own
fn with_server<F, Fut>(f: F) -> StdResult<(), Failed>
where
    F: FnOnce(Url) -> Fut,
    Fut: Future<Output = StdResult<(), Failed>>,
{
    RUNTIME
        .get()
        .ok_or("no Tokio runtime")?
        .block_on(async move { f(start_server().await?).await })
}

fn healthcheck() -> StdResult<(), Failed> {
    with_server(test_healthcheck)
}

inventory::submit!(Test {
    name: "healthcheck",
    test_fn: healthcheck,
});

fn metrics() -> StdResult<(), Failed> {
    with_server(test_metrics)
}

inventory::submit!(Test {
    name: "metrics",
    test_fn: metrics,
});

fn signup() -> StdResult<(), Failed> {
    with_server(users::test_signup)
}

inventory::submit!(Test {
    name: "signup",
    test_fn: signup,
});

fn bad_signups() -> StdResult<(), Failed> {
    with_server(users::test_bad_signups)
}

inventory::submit!(Test {
    name: "bad_signups",
    test_fn: bad_signups,
});

fn list_users() -> StdResult<(), Failed> {
    with_server(users::test_list_users)
}

inventory::submit!(Test {
    name: "list_users",
    test_fn: list_users,
});

fn add_and_get_blogs() -> StdResult<(), Failed> {
    with_server(blogs::test_blogs)
}

inventory::submit!(Test {
    name: "add_and_get_blogs",
    test_fn: add_and_get_blogs,
});

fn likes_and_deletion() -> StdResult<(), Failed> {
    with_server(blogs::test_likes_and_deletion)
}

inventory::submit!(Test {
    name: "likes_and_deletion",
    test_fn: likes_and_deletion,
});

fn stats() -> StdResult<(), Failed> {
    with_server(blogs::test_stats)
}

inventory::submit!(Test {
    name: "stats",
    test_fn: stats,
});

fn main() -> Result<()> {
    let args = Arguments::from_args();

    let _ = RUNTIME.set(Runtime::new().context(RuntimeSnafu)?);

    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<Test>
            .into_iter()
            .map(|test| Trial::test(test.name, test.test_fn))
            .collect(),
    );

    conclusion.exit();
}
