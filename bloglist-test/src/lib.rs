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

//! # The bloglist Integration Tests
//!
//! The Rust unit & integration testing framework is really oriented toward testing *libraries*, not
//! programs. There's no notion of test fixtures, nor even of simple setup & teardown operations
//! that apply to multiple tests. So, following T.J. Telan's [lead], the integration tests here
//! change-out the default *test harness*: in Cargo.toml, we opt-out of `libharness` and provide
//! our own `main()`, using [libtest-mimic] to keep the familiar command-line interface.
//!
//! [lead]: https://tjtelan.com/blog/rust-custom-test-harness/
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! # Project Structure
//!
//! The crate that owns this file produces a library (this one) and an integration test program.
//! The test logic itself lives here, written against nothing more than an URL at which a bloglist
//! server is listening, so that it can be pointed at any deployment. The fixture (standing-up a
//! server for each test) belongs to the test program in `tests`, and the test framework plumbing
//! (the `Test` struct) in `tests/common`.

use std::sync::atomic::{AtomicUsize, Ordering};

use bloglist::{entities::Username, users::LoginRsp};
use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

pub mod blogs;
pub mod users;

/// Test the `/healthcheck` endpoint
pub async fn test_healthcheck(url: Url) -> Result<(), Failed> {
    let rsp = reqwest::get(url.join("/healthcheck")?).await?;
    assert_eq!(StatusCode::OK, rsp.status());
    assert!(rsp.headers().contains_key("x-request-id"));
    assert_eq!("GOOD", rsp.text().await?);
    Ok(())
}

/// Test the `/metrics` endpoint
pub async fn test_metrics(url: Url) -> Result<(), Failed> {
    let rsp = reqwest::get(url.join("/metrics")?).await?;
    assert_eq!(StatusCode::OK, rsp.status());
    Ok(())
}

static NEXT_USER: AtomicUsize = AtomicUsize::new(0);

/// Produce a username no other test in this process will use
pub fn unique_username(prefix: &str) -> Username {
    Username::new(&format!(
        "{}-{}",
        prefix,
        NEXT_USER.fetch_add(1, Ordering::Relaxed)
    ))
    .unwrap(/* known good */)
}

/// Sign-up `username` & log them in; return their access token
pub async fn signup_and_login(
    client: &Client,
    url: &Url,
    username: &Username,
    name: &str,
    password: &str,
) -> Result<String, Failed> {
    let rsp = client
        .post(url.join("/api/users")?)
        .json(&json!({"username": username, "name": name, "password": password}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());

    let rsp = client
        .post(url.join("/api/login")?)
        .json(&json!({"username": username, "password": password}))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let body = rsp.json::<LoginRsp>().await?;
    assert_eq!(*username, body.username);
    Ok(body.token)
}
