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

//! # Password peppers
//!
//! Every password hash is salted (per user, stored with the hash) and [peppered]: mixed with a
//! server-side secret that lives only in configuration. Peppers are 32 octets, named by version:
//!
//! ```toml
//! [peppers]
//! "2025-09-01" = [81, 4, 199, ...] # 32 octets
//! ```
//!
//! A user's record notes which version they signed up under. Adding a later version (versions
//! sort as strings) moves new signups onto it while existing users keep logging in with theirs,
//! so an old version can't be dropped until nobody depends on it.
//!
//! [peppered]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#peppering

use std::{collections::BTreeMap, fmt};

use lazy_static::lazy_static;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::util::Key;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text:?} is not a usable pepper version"))]
    BadVersion { text: String, backtrace: Backtrace },
    #[snafu(display("No peppers are configured"))]
    NoPeppers { backtrace: Backtrace },
    #[snafu(display("There is no pepper version {version}"))]
    NoSuchVersion {
        version: Version,
        backtrace: Backtrace,
    },
    #[snafu(display("A pepper must be {PEPPER_LENGTH} octets, not {len}"))]
    PepperLength { len: usize, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

lazy_static! {
    static ref VERSION: Regex = Regex::new("^[0-9A-Za-z][-0-9A-Za-z_.:]{0,63}$").unwrap(/* known good */);
}

/// Names a pepper; stored in each user's record
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    pub fn new(text: &str) -> Result<Version> {
        text.to_owned().try_into()
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(text: String) -> Result<Version> {
        ensure!(VERSION.is_match(&text), BadVersionSnafu { text });
        Ok(Version(text))
    }
}

impl From<Version> for String {
    fn from(version: Version) -> String {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const PEPPER_LENGTH: usize = 32;

#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "Key")]
pub struct Pepper(Key);

impl Pepper {
    pub fn expose_secret(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl TryFrom<Key> for Pepper {
    type Error = Error;

    fn try_from(key: Key) -> Result<Pepper> {
        ensure!(key.len() == PEPPER_LENGTH, PepperLengthSnafu { len: key.len() });
        Ok(Pepper(key))
    }
}

/// Random
impl Default for Pepper {
    fn default() -> Self {
        let mut bytes = vec![0u8; PEPPER_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Pepper(Key::from(bytes))
    }
}

/// Every configured pepper, by version
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Peppers(BTreeMap<Version, Pepper>);

impl Peppers {
    /// The pepper new signups get
    pub fn current_pepper(&self) -> Result<(Version, Pepper)> {
        self.0
            .last_key_value()
            .map(|(version, pepper)| (version.clone(), pepper.clone()))
            .context(NoPeppersSnafu)
    }
    pub fn find_by_version(&self, version: &Version) -> Result<Pepper> {
        self.0.get(version).cloned().context(NoSuchVersionSnafu {
            version: version.clone(),
        })
    }
}

/// One random pepper, versioned by today's date. Users who sign up under it can't log in after a
/// restart, which is fine for development & tests but not much else.
impl Default for Peppers {
    fn default() -> Self {
        let version = Version(chrono::Utc::now().format("%Y-%m-%d").to_string());
        Peppers::from([(version, Pepper::default())])
    }
}

impl<const N: usize> From<[(Version, Pepper); N]> for Peppers {
    fn from(peppers: [(Version, Pepper); N]) -> Self {
        Peppers(BTreeMap::from(peppers))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn versions() {
        assert!(Version::new("2025-09-01").is_ok());
        assert!(Version::new("pepper-ver:20250212").is_ok());
        assert!(Version::new("").is_err());
        assert!(Version::new("two words").is_err());
        assert_eq!(
            serde_json::to_value(Version::new("v1").unwrap()).unwrap(),
            serde_json::json!("v1")
        );
        assert!(serde_json::from_value::<Version>(serde_json::json!(":nope")).is_err());
    }

    #[test]
    fn newest_wins() {
        let old = Version::new("2025-01-01").unwrap();
        let new = Version::new("2025-03-01").unwrap();
        let peppers = Peppers::from([
            (new.clone(), Pepper::default()),
            (old.clone(), Pepper::default()),
        ]);
        assert_eq!(peppers.current_pepper().unwrap().0, new);
        assert!(peppers.find_by_version(&old).is_ok());
        assert!(matches!(
            peppers.find_by_version(&Version::new("2024-12-31").unwrap()),
            Err(Error::NoSuchVersion { .. })
        ));
        assert!(matches!(
            Peppers(BTreeMap::new()).current_pepper(),
            Err(Error::NoPeppers { .. })
        ));
    }

    #[test]
    fn from_toml() {
        let peppers: Peppers =
            toml::from_str(&format!("\"2025-02-12\" = {:?}\n", [7u8; 32])).unwrap();
        let (version, pepper) = peppers.current_pepper().unwrap();
        assert_eq!(version.to_string(), "2025-02-12");
        assert_eq!(pepper.expose_secret(), &[7u8; 32]);
        assert!(matches!(
            Pepper::try_from(Key::from(vec![1, 2, 3])),
            Err(Error::PepperLength { len: 3, .. })
        ));
        assert!(toml::from_str::<Peppers>("\"2025-02-12\" = [1, 2, 3]").is_err());
    }
}
