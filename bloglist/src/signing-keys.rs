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

//! # Token signing keys
//!
//! Access tokens are MAC'd under a 64-octet key. Several keys may be configured at once, each under
//! an ID, so that keys can be rotated without logging everyone out:
//!
//! ```toml
//! [tokens.keys]
//! "2025-09-01" = [17, 201, 4, ...] # 64 octets
//! "2025-10-01" = [250, 9, 73, ...]
//! ```
//!
//! The ID that sorts last signs new tokens. Every token names the key that signed it, so a retired
//! key stays in the table until the tokens it signed have expired.

use std::{collections::BTreeMap, fmt};

use lazy_static::lazy_static;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use serde::Deserialize;
use snafu::{Backtrace, prelude::*};

use crate::util::Key;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text:?} is not a usable key ID"))]
    BadKeyId { text: String, backtrace: Backtrace },
    #[snafu(display("A signing key must be {SIGNING_KEY_LENGTH} octets, not {len}"))]
    KeyLength { len: usize, backtrace: Backtrace },
    #[snafu(display("There is no signing key {kid}"))]
    NoSuchKey { kid: KeyId, backtrace: Backtrace },
    #[snafu(display("No signing keys are configured"))]
    NoKeys { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

lazy_static! {
    static ref KEY_ID: Regex = Regex::new("^[0-9A-Za-z][-0-9A-Za-z_.:]{0,63}$").unwrap(/* known good */);
}

/// Names a signing key; carried in the `kid` header of every token
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(try_from = "String")]
pub struct KeyId(String);

impl KeyId {
    pub fn new(text: &str) -> Result<KeyId> {
        ensure!(KEY_ID.is_match(text), BadKeyIdSnafu { text });
        Ok(KeyId(text.to_owned()))
    }
}

impl TryFrom<String> for KeyId {
    type Error = Error;

    fn try_from(text: String) -> Result<KeyId> {
        ensure!(KEY_ID.is_match(&text), BadKeyIdSnafu { text });
        Ok(KeyId(text))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const SIGNING_KEY_LENGTH: usize = 64;

/// Key material of the right length for HMAC-SHA256 tokens
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "Key")]
pub struct SigningKey(Key);

impl SigningKey {
    pub fn new(bytes: Vec<u8>) -> Result<SigningKey> {
        Key::from(bytes).try_into()
    }
    /// Fresh key material from the OS RNG
    pub fn random() -> SigningKey {
        let mut bytes = vec![0u8; SIGNING_KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        SigningKey(Key::from(bytes))
    }
}

impl TryFrom<Key> for SigningKey {
    type Error = Error;

    fn try_from(key: Key) -> Result<SigningKey> {
        ensure!(
            key.len() == SIGNING_KEY_LENGTH,
            KeyLengthSnafu { len: key.len() }
        );
        Ok(SigningKey(key))
    }
}

impl AsRef<Key> for SigningKey {
    fn as_ref(&self) -> &Key {
        &self.0
    }
}

/// Every signing key we know about, by ID
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct SigningKeys(BTreeMap<KeyId, SigningKey>);

impl SigningKeys {
    /// The key new tokens get signed with
    pub fn current(&self) -> Result<(KeyId, SigningKey)> {
        self.0
            .last_key_value()
            .map(|(kid, key)| (kid.clone(), key.clone()))
            .context(NoKeysSnafu)
    }
    pub fn find_by_version(&self, kid: &KeyId) -> Result<SigningKey> {
        self.0.get(kid).cloned().context(NoSuchKeySnafu { kid: kid.clone() })
    }
}

/// A single random key, named for today's date. Tokens signed with it won't survive a restart.
impl Default for SigningKeys {
    fn default() -> Self {
        let kid = KeyId(chrono::Utc::now().format("%Y-%m-%d").to_string());
        SigningKeys::from([(kid, SigningKey::random())])
    }
}

impl<const N: usize> From<[(KeyId, SigningKey); N]> for SigningKeys {
    fn from(keys: [(KeyId, SigningKey); N]) -> Self {
        SigningKeys(BTreeMap::from(keys))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_ids() {
        for good in ["2025-10-01", "keyid:20250817", "k.v2_final"] {
            assert!(KeyId::new(good).is_ok(), "{good}");
        }
        for bad in ["", "-leading-dash", "has space", "x".repeat(65).as_str()] {
            assert!(KeyId::new(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn rotation() {
        let old = KeyId::new("2025-09-01").unwrap();
        let new = KeyId::new("2025-10-01").unwrap();
        let keys = SigningKeys::from([
            (new.clone(), SigningKey::new(vec![2; 64]).unwrap()),
            (old.clone(), SigningKey::new(vec![1; 64]).unwrap()),
        ]);
        assert_eq!(keys.current().unwrap().0, new);
        assert!(keys.find_by_version(&old).is_ok());
        assert!(matches!(
            keys.find_by_version(&KeyId::new("2024-01-01").unwrap()),
            Err(Error::NoSuchKey { .. })
        ));
        assert!(matches!(
            SigningKeys(BTreeMap::new()).current(),
            Err(Error::NoKeys { .. })
        ));
    }

    #[test]
    fn from_toml() {
        let keys: SigningKeys =
            toml::from_str(&format!("\"2025-10-01\" = {:?}\n", vec![3u8; 64])).unwrap();
        assert_eq!(keys.current().unwrap().0.to_string(), "2025-10-01");
        assert!(matches!(
            SigningKey::new(vec![0; 32]),
            Err(Error::KeyLength { len: 32, .. })
        ));
        assert!(toml::from_str::<SigningKeys>("\"bad id\" = [1]").is_err());
    }
}
