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

//! Small helpers shared by the rest of the crate.

use std::{ops::Deref, str::FromStr};

use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::Deserialize;
use serde_bytes::ByteBuf;
use snafu::prelude::*;

/// What [exactly_two] found instead of a pair
#[derive(Debug, Snafu)]
#[snafu(display("Expected a pair, but got {got}"))]
pub struct NotAPair {
    got: &'static str,
}

/// Split an iterator into its two elements, failing if it yields any other number
///
/// Shows up wherever a header or flag is "a b" or "a,b".
pub fn exactly_two<I: Iterator>(mut iter: I) -> Result<(I::Item, I::Item), NotAPair> {
    let got = match (iter.next(), iter.next()) {
        (Some(a), Some(b)) if iter.next().is_none() => return Ok((a, b)),
        (Some(_), Some(_)) => "more than two",
        (Some(_), None) => "one",
        (None, _) => "nothing",
    };
    NotAPairSnafu { got }.fail()
}

/// Secret key material, as read from configuration
///
/// Both the password peppers & the token signing keys are a [Key] plus a length check. In TOML a
/// [Key] is an array of integers in `0..=255`.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "ByteBuf")]
pub struct Key(SecretSlice<u8>);

impl Key {
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<ByteBuf> for Key {
    fn from(buf: ByteBuf) -> Self {
        Key::from(buf.into_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(SecretSlice::from(bytes))
    }
}

impl Deref for Key {
    type Target = SecretSlice<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<SecretSlice<u8>> for Key {
    fn as_ref(&self) -> &SecretSlice<u8> {
        &self.0
    }
}

/// An access key ID & secret, given on the command line as "ID,SECRET"
#[derive(Clone, Debug)]
pub struct Credentials(pub (SecretString, SecretString));

impl FromStr for Credentials {
    type Err = NotAPair;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, secret) = exactly_two(s.split(','))?;
        Ok(Credentials((id.into(), secret.into())))
    }
}
