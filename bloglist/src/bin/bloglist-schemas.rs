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

//! # bloglist-schemas
//!
//! Creates, or brings up to date, the tables the DynamoDB backend needs. Run it at install time &
//! after upgrades; the daemon itself never creates or alters tables, so it can run with
//! read/write-only permissions.
//!
//! ```text
//! bloglist-schemas ddb us-west-2
//! bloglist-schemas ddb --creds AKID,SECRET http://localhost:8000
//! ```

use std::{fmt, io};

use clap::{Arg, ArgAction, ArgMatches, Command, crate_authors, crate_version, value_parser};
use either::Either;
use snafu::prelude::*;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt};
use url::Url;

use bloglist::{
    dynamodb::{self, Location, create_client, get_current_schema_version},
    dynamodb_schemas::{self, migrate},
    util::Credentials,
};

#[derive(Snafu)]
enum Error {
    #[snafu(display("Can't connect to DynamoDB: {source}"))]
    Connect { source: dynamodb::Error },
    #[snafu(display("RUST_LOG won't parse: {source}"))]
    LogFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Can't install the log subscriber: {source}"))]
    LogInstall {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Migration failed: {source}"))]
    Migrate { source: dynamodb_schemas::Error },
    #[snafu(display("Nothing to do; try --help"))]
    NoCommand,
    #[snafu(display("Can't tell what schema version is installed: {source}"))]
    SchemaVersion { source: dynamodb::Error },
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

fn init_logging(matches: &ArgMatches) -> Result<()> {
    let level = [
        ("debug", Level::TRACE),
        ("verbose", Level::DEBUG),
        ("quiet", Level::ERROR),
    ]
    .into_iter()
    .find_map(|(flag, level)| matches.get_flag(flag).then_some(level))
    .unwrap_or(Level::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context(LogFilterSnafu)?;
    let output: Box<dyn Layer<Registry> + Send + Sync> = if matches.get_flag("plain") {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(false)
            .with_writer(io::stdout)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stdout)
            .boxed()
    };
    tracing::subscriber::set_global_default(Registry::default().with(output).with(filter))
        .context(LogInstallSnafu)
}

/// An http(s) URL is an endpoint; anything else names an AWS region
fn parse_location(text: &str) -> Location {
    Url::parse(text)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map_or_else(|| Either::Left(text.to_owned()), |url| Either::Right(vec![url]))
}

async fn ddb(mut matches: ArgMatches) -> Result<()> {
    let creds = matches.remove_one::<Credentials>("creds").map(|c| c.0);
    let location = matches
        .get_one::<String>("location")
        .map(|text| parse_location(text))
        .unwrap(/* required */);
    let client = create_client(&location, &creds)
        .await
        .context(ConnectSnafu)?;
    let current = get_current_schema_version(&client)
        .await
        .context(SchemaVersionSnafu)?;
    match current {
        Some(v) => info!("Installed schema version is {v}"),
        None => info!("No schema installed"),
    }
    let applied = migrate(&client, current).await.context(MigrateSnafu)?;
    info!("Applied {applied} migration(s)");
    Ok(())
}

fn flag(name: &'static str, short: char, env: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .action(ArgAction::SetTrue)
        .env(env)
        .help(help)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut matches = Command::new("bloglist-schemas")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Create or migrate the bloglist DynamoDB schema")
        .arg(flag("debug", 'D', "BLOGLIST_SCHEMAS_DEBUG", "log everything"))
        .arg(flag("plain", 'p', "BLOGLIST_SCHEMAS_PLAIN", "log plain text, not JSON"))
        .arg(flag("quiet", 'q', "BLOGLIST_SCHEMAS_QUIET", "log errors only"))
        .arg(flag("verbose", 'v', "BLOGLIST_SCHEMAS_VERBOSE", "log debug output"))
        .subcommand(
            Command::new("ddb")
                .about("Bring a DynamoDB (or Alternator) database up to the current schema")
                .arg(
                    Arg::new("creds")
                        .short('c')
                        .long("creds")
                        .env("BLOGLIST_SCHEMAS_CREDS")
                        .value_parser(value_parser!(Credentials))
                        .help("access key ID & secret, as \"ID,SECRET\""),
                )
                .arg(
                    Arg::new("location")
                        .required(true)
                        .env("BLOGLIST_SCHEMAS_LOCATION")
                        .help("an AWS region (us-west-2) or endpoint URL (http://localhost:8000)"),
                ),
        )
        .get_matches();

    init_logging(&matches)?;
    info!("bloglist-schemas {}", crate_version!());

    match matches.remove_subcommand() {
        Some((name, sub)) if name == "ddb" => ddb(sub).await,
        _ => NoCommandSnafu.fail(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locations() {
        assert_eq!(parse_location("eu-north-1"), Either::Left("eu-north-1".to_owned()));
        assert_eq!(
            parse_location("https://dynamodb.example.org"),
            Either::Right(vec![Url::parse("https://dynamodb.example.org").unwrap()])
        );
        // Looks like a URL to the parser, but isn't an endpoint
        assert_eq!(parse_location("us:west"), Either::Left("us:west".to_owned()));
    }
}
