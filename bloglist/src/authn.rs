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

//! # Authentication
//!
//! Two ways to prove who you are. `/api/login` takes a username & password; everything else
//! takes the token that login hands back, as `Authorization: Bearer <token>`.

use axum::http::{HeaderValue, header::ToStrError};
use secrecy::SecretString;
use snafu::{Backtrace, prelude::*};

use crate::{
    entities::{self, User, Username},
    peppers::Peppers,
    signing_keys::SigningKeys,
    storage::{self, Backend as StorageBackend},
    token::{self, verify_token},
    util::exactly_two,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Bearer token rejected: {source}"))]
    BadToken {
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("Authorization header isn't visible ASCII: {source}"))]
    HeaderNotText {
        source: ToStrError,
        backtrace: Backtrace,
    },
    #[snafu(display("Authorization header should be \"<scheme> <credentials>\""))]
    HeaderShape { backtrace: Backtrace },
    #[snafu(display("Storage failed looking up {username}: {source}"))]
    Lookup {
        username: Username,
        source: storage::Error,
    },
    #[snafu(display("No such user {username}"))]
    UnknownUser { username: Username },
    #[snafu(display("Only the Bearer scheme is accepted, not {scheme}"))]
    UnsupportedScheme {
        scheme: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Password check failed for {username}: {source}"))]
    WrongPassword {
        username: Username,
        #[snafu(source(from(entities::Error, Box::new)))]
        source: Box<entities::Error>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// A parsed `Authorization` header
#[derive(Clone, Debug, PartialEq)]
pub enum AuthnScheme {
    BearerToken(String),
}

impl TryFrom<&HeaderValue> for AuthnScheme {
    type Error = Error;

    fn try_from(value: &HeaderValue) -> Result<AuthnScheme> {
        let text = value.to_str().context(HeaderNotTextSnafu)?;
        let (scheme, credentials) =
            exactly_two(text.split_ascii_whitespace()).map_err(|_| HeaderShapeSnafu.build())?;
        // Scheme names are case-insensitive (RFC 9110 §11.1)
        ensure!(
            scheme.eq_ignore_ascii_case("bearer"),
            UnsupportedSchemeSnafu { scheme }
        );
        Ok(AuthnScheme::BearerToken(credentials.to_owned()))
    }
}

async fn load(storage: &(dyn StorageBackend + Send + Sync), username: &Username) -> Result<User> {
    storage
        .user_for_name(username)
        .await
        .context(LookupSnafu { username: username.clone() })?
        .context(UnknownUserSnafu { username: username.clone() })
}

/// Resolve a bearer token to the [User] it was minted for
///
/// A token that verifies but names a user we no longer have is still a failure.
pub async fn check_token(
    storage: &(dyn StorageBackend + Send + Sync),
    token_string: &str,
    keys: &SigningKeys,
    issuer: &str,
) -> Result<User> {
    let username = verify_token(token_string, keys, issuer).context(BadTokenSnafu)?;
    load(storage, &username).await
}

/// Resolve a username & password to a [User]
pub async fn check_password(
    storage: &(dyn StorageBackend + Send + Sync),
    peppers: &Peppers,
    username: &Username,
    password: SecretString,
) -> Result<User> {
    let user = load(storage, username).await?;
    user.check_password(peppers, password)
        .context(WrongPasswordSnafu { username: username.clone() })?;
    Ok(user)
}
