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

//! Access tokens.
//!
//! A successful login hands back a compact [JWT] that clients then send as a bearer credential.
//! Tokens are MAC'd with HMAC-SHA256 under whichever signing key is current; the key's ID rides in
//! the JOSE header so that tokens minted before a key rotation keep verifying until they lapse.
//!
//! Time-valued claims are NumericDates (whole seconds since the epoch), as RFC 7519 prescribes.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html

use chrono::{DateTime, Duration, Utc, serde::ts_seconds};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, Unverified, Verified, VerifyWithKey};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{Backtrace, prelude::*};

use crate::{
    entities::Username,
    signing_keys::{self, KeyId, SigningKey, SigningKeys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The token carries key ID {kid}, which isn't a valid key ID: {source}"))]
    BadKeyId {
        kid: String,
        source: signing_keys::Error,
    },
    #[snafu(display("Token signature didn't check out: {source}"))]
    BadSignature {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The token lapsed at {exp}"))]
    Expired {
        exp: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Couldn't key HMAC-SHA256: {source}"))]
    MacKey {
        source: hmac::digest::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("Not a well-formed JWT: {source}"))]
    Malformed {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The token header names no key"))]
    NoKeyId { backtrace: Backtrace },
    #[snafu(display("The token isn't good until {nbf}"))]
    Premature {
        nbf: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Couldn't sign the token: {source}"))]
    Sign {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Key {kid} isn't (or is no longer) among our signing keys: {source}"))]
    UnknownKey {
        kid: KeyId,
        source: signing_keys::Error,
    },
    #[snafu(display("The token was meant for {aud}, not us"))]
    WrongAudience { aud: String, backtrace: Backtrace },
    #[snafu(display("The token was issued by {iss}, not us"))]
    WrongIssuer { iss: String, backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// The registered claims we put in (and demand of) every access token
#[derive(Clone, Debug, Deserialize, Serialize)]
struct AccessClaims {
    sub: Username,
    iss: String,
    aud: String,
    #[serde(with = "ts_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    nbf: DateTime<Utc>,
    #[serde(with = "ts_seconds")]
    exp: DateTime<Utc>,
}

impl AccessClaims {
    fn new(sub: &Username, iss: &str, now: DateTime<Utc>, lifetime: Duration) -> AccessClaims {
        AccessClaims {
            sub: sub.clone(),
            iss: iss.to_owned(),
            aud: audience(iss),
            iat: now,
            nbf: now,
            exp: now + lifetime,
        }
    }
    /// Check the time window first, then who minted the token & for whom
    fn validate(&self, iss: &str, now: DateTime<Utc>) -> Result<()> {
        ensure!(now >= self.nbf, PrematureSnafu { nbf: self.nbf });
        ensure!(now <= self.exp, ExpiredSnafu { exp: self.exp });
        ensure!(self.iss == iss, WrongIssuerSnafu { iss: &self.iss });
        ensure!(self.aud == audience(iss), WrongAudienceSnafu { aud: &self.aud });
        Ok(())
    }
}

fn audience(iss: &str) -> String {
    format!("api.{iss}")
}

fn mac(key: &SigningKey) -> Result<Hmac<Sha256>> {
    Hmac::new_from_slice(key.as_ref().expose_secret()).context(MacKeySnafu)
}

fn sign(claims: AccessClaims, kid: &KeyId, key: &SigningKey) -> Result<String> {
    let header = Header {
        key_id: Some(kid.to_string()),
        ..Default::default()
    };
    Token::new(header, claims)
        .sign_with_key(&mac(key)?)
        .map(|signed| signed.as_str().to_owned())
        .context(SignSnafu)
}

/// Mint an access token for `username`, good for `lifetime` from now
pub fn mint_token(
    username: &Username,
    keyid: &KeyId,
    signing_key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    sign(
        AccessClaims::new(username, issuer, Utc::now(), *lifetime),
        keyid,
        signing_key,
    )
}

/// Check an access token presented to us; on success, yield the user it speaks for
pub fn verify_token(token_string: &str, keys: &SigningKeys, issuer: &str) -> Result<Username> {
    let unverified: Token<Header, AccessClaims, Unverified<'_>> =
        Token::parse_unverified(token_string).context(MalformedSnafu)?;
    let kid = unverified.header().key_id.as_deref().context(NoKeyIdSnafu)?;
    let kid = KeyId::new(kid).context(BadKeyIdSnafu { kid })?;
    let key = keys.find_by_version(&kid).context(UnknownKeySnafu { kid })?;
    let verified: Token<Header, AccessClaims, Verified> = unverified
        .verify_with_key(&mac(&key)?)
        .context(BadSignatureSnafu)?;
    let claims = verified.claims();
    claims.validate(issuer, Utc::now())?;
    Ok(claims.sub.clone())
}
