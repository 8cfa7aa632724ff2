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

//! # bloglist
//!
//! The daemon. It reads configuration, sets up logging & metrics, then serves the API:
//!
//! - `SIGHUP` re-reads configuration & restarts the listener (a broken file is logged & ignored)
//! - `SIGTERM` or Ctrl-C drains in-flight requests & exits
//!
//! A minimal configuration file:
//!
//! ```toml
//! version = "1"
//! public-address = "0.0.0.0:3003"
//! public-host = "blogs.example.org"
//!
//! [storage]
//! backend = "dynamo"
//! location = "us-west-2"
//!
//! [peppers]
//! "2025-09-01" = [...] # 32 octets
//!
//! [tokens]
//! lifetime = 3600
//! [tokens.keys]
//! "2025-09-01" = [...] # 64 octets
//! ```

use std::{fmt, future::IntoFuture, io, net::SocketAddr, path::PathBuf, sync::Arc};

use chrono::Duration;
use clap::{Arg, ArgAction, ArgMatches, Command, crate_authors, crate_version, value_parser};
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use secrecy::SecretString;
use serde::Deserialize;
use snafu::{IntoError, prelude::*};
use tokio::{
    net::TcpListener,
    signal::unix::{Signal, SignalKind, signal},
    sync::oneshot,
};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt};

use bloglist::{
    dynamodb,
    http::{Bloglist, make_world_router},
    memory::Memory,
    metrics::{self, Instruments},
    peppers::Peppers,
    signing_keys::SigningKeys,
    storage::Backend as StorageBackend,
};

/// Top-level failures
///
/// `main` hands these to the `Termination` impl, which prints `Debug`; `Debug` is `Display` here
/// so that the operator gets a sentence rather than a struct dump.
#[derive(Snafu)]
enum Error {
    #[snafu(display("Can't read {}: {source}", path.display()))]
    ConfigRead { path: PathBuf, source: io::Error },
    #[snafu(display("{} is not a valid configuration: {source}", path.display()))]
    ConfigSyntax {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Can't reach DynamoDB: {source}"))]
    Dynamo { source: dynamodb::Error },
    #[snafu(display("RUST_LOG won't parse: {source}"))]
    LogFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Can't install the log subscriber: {source}"))]
    LogInstall {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Can't listen on {addr}: {source}"))]
    Listen { addr: SocketAddr, source: io::Error },
    #[snafu(display("Can't build metric instruments: {source}"))]
    Metrics { source: metrics::Error },
    #[snafu(display("Can't set up the Prometheus exporter: {source}"))]
    Prometheus {
        source: opentelemetry_sdk::metrics::MetricError,
    },
    #[snafu(display("Can't start the async runtime: {source}"))]
    Runtime { source: io::Error },
    #[snafu(display("Can't install signal handlers: {source}"))]
    Signals { source: io::Error },
    #[snafu(display("Can't resolve the working directory: {source}"))]
    WorkingDir { source: io::Error },
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

const DEFAULT_CONFIG: &str = "/etc/bloglist.toml";

/// Where to keep users & blogs
// Deserialize-only: there are secrets in here
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
enum StorageConfig {
    /// Lost on exit (though not on `SIGHUP`)
    #[default]
    Memory,
    /// DynamoDB, or anything speaking its protocol (ScyllaDB's Alternator, DynamoDB Local)
    Dynamo {
        /// Access key ID & secret; a local endpoint may not need them
        #[serde(default)]
        credentials: Option<(SecretString, SecretString)>,
        /// A region name, or endpoint URLs (only the first is used)
        #[serde(with = "either::serde_untagged")]
        location: dynamodb::Location,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct TokenConfig {
    /// Seconds
    lifetime: i64,
    keys: Option<SigningKeys>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        TokenConfig {
            lifetime: 3600,
            keys: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ConfigV1 {
    public_address: SocketAddr,
    /// Token issuer (and, prefixed with "api.", audience)
    public_host: String,
    storage: StorageConfig,
    peppers: Option<Peppers>,
    tokens: TokenConfig,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            public_address: SocketAddr::from(([0, 0, 0, 0], 3003)),
            public_host: "localhost".to_owned(),
            storage: StorageConfig::default(),
            peppers: None,
            tokens: TokenConfig::default(),
        }
    }
}

/// The file format is versioned through a top-level `version` key
#[derive(Deserialize)]
#[serde(tag = "version")]
enum VersionedConfig {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

fn parse_config_text(path: PathBuf, text: &str) -> Result<ConfigV1> {
    toml::from_str::<VersionedConfig>(text)
        .map(|VersionedConfig::V1(cfg)| cfg)
        .context(ConfigSyntaxSnafu { path })
}

/// Read configuration from `explicit`, else from [DEFAULT_CONFIG] if it exists, else use defaults
fn load_config(explicit: Option<&PathBuf>) -> Result<ConfigV1> {
    let path = explicit.cloned().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    match std::fs::read_to_string(&path) {
        Ok(text) => parse_config_text(path, &text),
        Err(err) if explicit.is_none() && err.kind() == io::ErrorKind::NotFound => {
            Ok(ConfigV1::default())
        }
        Err(err) => Err(ConfigReadSnafu { path }.into_error(err)),
    }
}

/// `-D` beats `-v` beats `-q`; the default is INFO
fn log_level(matches: &ArgMatches) -> Level {
    if matches.get_flag("debug") {
        Level::TRACE
    } else if matches.get_flag("verbose") {
        Level::DEBUG
    } else if matches.get_flag("quiet") {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// Log to stdout: JSON unless `plain`. `RUST_LOG` overrides `level`.
fn init_logging(level: Level, plain: bool) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context(LogFilterSnafu)?;
    let output: Box<dyn Layer<Registry> + Send + Sync> = if plain {
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

/// Route OTel metrics into a Prometheus registry, for `/metrics` to serve
fn init_metrics() -> Result<prometheus::Registry> {
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context(PrometheusSnafu)?;
    global::set_meter_provider(SdkMeterProvider::builder().with_reader(exporter).build());
    Ok(registry)
}

/// Build the storage backend `config` asks for
///
/// There's only ever one in-memory store per process, so that a `SIGHUP` doesn't throw the data
/// away.
async fn open_storage(
    config: &StorageConfig,
    memory: &Arc<Memory>,
) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    Ok(match config {
        StorageConfig::Memory => memory.clone(),
        StorageConfig::Dynamo {
            credentials,
            location,
        } => Arc::new(
            dynamodb::Client::new(location, credentials)
                .await
                .context(DynamoSnafu)?,
        ),
    })
}

/// Peppers & signing keys made up at startup, for configurations that don't supply their own
///
/// These live as long as the process: users who signed up, and tokens minted, under them must
/// still check out after a `SIGHUP`.
struct Generated {
    peppers: Peppers,
    keys: SigningKeys,
}

impl Generated {
    fn new() -> Generated {
        Generated {
            peppers: Peppers::default(),
            keys: SigningKeys::default(),
        }
    }
    fn peppers(&self, cfg: &ConfigV1) -> Peppers {
        cfg.peppers.clone().unwrap_or_else(|| self.peppers.clone())
    }
    fn signing_keys(&self, cfg: &ConfigV1) -> SigningKeys {
        cfg.tokens.keys.clone().unwrap_or_else(|| self.keys.clone())
    }
}

enum Next {
    Reload,
    Exit,
}

struct Signals {
    hangup: Signal,
    terminate: Signal,
}

/// Serve with one configuration until a signal says otherwise
async fn serve_once(cfg: &ConfigV1, state: Arc<Bloglist>, signals: &mut Signals) -> Result<Next> {
    let listener = TcpListener::bind(cfg.public_address)
        .await
        .context(ListenSnafu {
            addr: cfg.public_address,
        })?;
    let (stop, stopped) = oneshot::channel::<()>();
    let mut server = tokio::spawn(
        axum::serve(listener, make_world_router(state))
            .with_graceful_shutdown(async move {
                let _ = stopped.await;
            })
            .into_future(),
    );
    info!("Listening on {}", cfg.public_address);

    let next = tokio::select! {
        res = &mut server => {
            error!("The server stopped on its own ({res:?}); exiting");
            return Ok(Next::Exit);
        }
        _ = signals.hangup.recv() => {
            info!("SIGHUP: reloading configuration");
            Next::Reload
        }
        _ = signals.terminate.recv() => {
            info!("SIGTERM: shutting down");
            Next::Exit
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted: shutting down");
            Next::Exit
        }
    };
    let _ = stop.send(());
    match server.await {
        Ok(Ok(())) => (),
        Ok(Err(err)) => error!("Server error while draining: {err:?}"),
        Err(err) => error!("Server task failed: {err:?}"),
    }
    Ok(next)
}

async fn serve(
    registry: prometheus::Registry,
    config: Option<PathBuf>,
    level: Level,
    plain: bool,
) -> Result<()> {
    let mut signals = Signals {
        hangup: signal(SignalKind::hangup()).context(SignalsSnafu)?,
        terminate: signal(SignalKind::terminate()).context(SignalsSnafu)?,
    };
    // A bad configuration is fatal only at startup
    let mut cfg = load_config(config.as_ref())?;
    init_logging(level, plain)?;
    info!("bloglist {} starting", crate_version!());

    let instruments = Arc::new(Instruments::new("bloglist").context(MetricsSnafu)?);
    let memory = Arc::new(Memory::new());
    let generated = Generated::new();

    loop {
        if cfg.peppers.is_none() || cfg.tokens.keys.is_none() {
            warn!("No peppers or signing keys configured; using ones generated at startup");
        }
        let state = Arc::new(Bloglist {
            storage: open_storage(&cfg.storage, &memory).await?,
            registry: registry.clone(),
            instruments: instruments.clone(),
            pepper: generated.peppers(&cfg),
            token_lifetime: Duration::seconds(cfg.tokens.lifetime),
            signing_keys: generated.signing_keys(&cfg),
            issuer: cfg.public_host.clone(),
        });
        match serve_once(&cfg, state, &mut signals).await? {
            Next::Exit => break,
            Next::Reload => match load_config(config.as_ref()) {
                Ok(fresh) => cfg = fresh,
                Err(err) => warn!("{err}; carrying on with the previous configuration"),
            },
        }
    }
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

fn main() -> Result<()> {
    let matches = Command::new("bloglist")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Keep a shared list of blogs worth reading")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .env("BLOGLIST_CONFIG")
                .help(format!("configuration file (default {DEFAULT_CONFIG}, if present)")),
        )
        .arg(flag("debug", 'D', "BLOGLIST_DEBUG", "log everything"))
        .arg(flag("plain", 'p', "BLOGLIST_PLAIN", "log plain text rather than JSON"))
        .arg(flag("quiet", 'q', "BLOGLIST_QUIET", "log errors only"))
        .arg(flag("verbose", 'v', "BLOGLIST_VERBOSE", "log debug output"))
        .get_matches();
    // Relative paths are taken relative to the working directory at startup, not at SIGHUP
    let config = matches
        .get_one::<PathBuf>("config")
        .map(std::path::absolute)
        .transpose()
        .context(WorkingDirSnafu)?;
    let level = log_level(&matches);
    let plain = matches.get_flag("plain");
    tokio::runtime::Runtime::new()
        .context(RuntimeSnafu)?
        .block_on(serve(init_metrics()?, config, level, plain))
}

#[cfg(test)]
mod test {
    use super::*;

    use bloglist::{
        entities::{User, Username},
        token::{mint_token, verify_token},
    };
    use either::Either;
    use url::Url;

    fn parse(text: &str) -> Result<ConfigV1> {
        parse_config_text(PathBuf::from("test.toml"), text)
    }

    #[test]
    fn defaults() {
        let cfg = parse("version = \"1\"").unwrap();
        assert_eq!(cfg.public_address, "0.0.0.0:3003".parse().unwrap());
        assert_eq!(cfg.public_host, "localhost");
        assert!(matches!(cfg.storage, StorageConfig::Memory));
        assert_eq!(cfg.tokens.lifetime, 3600);
        assert!(cfg.peppers.is_none());
        assert!(cfg.tokens.keys.is_none());
    }

    #[test]
    fn everything() {
        let cfg = parse(&format!(
            r#"
version = "1"
public-address = "127.0.0.1:8080"
public-host = "blogs.example.org"

[storage]
backend = "dynamo"
credentials = ["AKIAEXAMPLE", "sekrit"]
location = ["http://localhost:8000"]

[peppers]
"2025-08-17" = {pepper:?}

[tokens]
lifetime = 600
[tokens.keys]
"2025-08-17" = {key:?}
"#,
            pepper = [1u8; 32],
            key = [2u8; 64]
        ))
        .unwrap();
        assert_eq!(cfg.public_address, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.public_host, "blogs.example.org");
        assert_eq!(cfg.tokens.lifetime, 600);
        let generated = Generated::new();
        assert_eq!(
            generated.peppers(&cfg).current_pepper().unwrap().0.to_string(),
            "2025-08-17"
        );
        assert_eq!(
            generated.signing_keys(&cfg).current().unwrap().0.to_string(),
            "2025-08-17"
        );
        let StorageConfig::Dynamo {
            credentials,
            location,
        } = cfg.storage
        else {
            panic!("expected the DynamoDB backend");
        };
        assert!(credentials.is_some());
        assert_eq!(
            location,
            Either::Right(vec![Url::parse("http://localhost:8000").unwrap()])
        );
    }

    #[test]
    fn region_without_credentials() {
        let cfg = parse(
            "version = \"1\"\n[storage]\nbackend = \"dynamo\"\nlocation = \"us-east-1\"\n",
        )
        .unwrap();
        assert!(matches!(
            cfg.storage,
            StorageConfig::Dynamo { credentials: None, location: Either::Left(ref region) }
                if region == "us-east-1"
        ));
    }

    #[test]
    fn generated_secrets_outlive_reloads() {
        let generated = Generated::new();
        let username = Username::new("mluukkai").unwrap();
        let password = || SecretString::from("salainen");

        let first = parse("version = \"1\"").unwrap();
        let (version, pepper) = generated.peppers(&first).current_pepper().unwrap();
        let user = User::new(&version, &pepper, &username, "Matti", &password()).unwrap();
        let (kid, key) = generated.signing_keys(&first).current().unwrap();
        let token = mint_token(&username, &kid, &key, "localhost", &Duration::minutes(5)).unwrap();

        // What a SIGHUP re-reads
        let second = parse("version = \"1\"\npublic-address = \"0.0.0.0:3004\"").unwrap();
        assert!(user
            .check_password(&generated.peppers(&second), password())
            .is_ok());
        assert_eq!(
            verify_token(&token, &generated.signing_keys(&second), "localhost").unwrap(),
            username
        );

        // Peppers named in the file take over from the generated ones
        let third = parse(&format!(
            "version = \"1\"\n[peppers]\n\"2025-08-17\" = {:?}\n",
            [1u8; 32]
        ))
        .unwrap();
        assert!(user
            .check_password(&generated.peppers(&third), password())
            .is_err());
    }

    #[test]
    fn bad_configs() {
        for text in [
            "version = \"2\"",
            "public-address = \"0.0.0.0:1\"",
            "version = \"1\"\n[storage]\nbackend = \"postgres\"",
            "version = \"1\"\n[peppers]\n\"v1\" = [1, 2, 3]",
        ] {
            assert!(matches!(parse(text), Err(Error::ConfigSyntax { .. })), "{text}");
        }
        assert!(matches!(
            load_config(Some(&PathBuf::from("/no/such/bloglist.toml"))),
            Err(Error::ConfigRead { .. })
        ));
    }
}
