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

//! # bloglist entities
//!
//! The nouns of the service: [User]s, and the [Blog]s they've saved.

use std::{fmt, ops::Deref, str::FromStr};

use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use lazy_static::lazy_static;
use password_hash::{SaltString, rand_core::OsRng};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, IntoError, prelude::*};
use uuid::Uuid;

use crate::peppers::{self, Pepper, Peppers, Version as PepperVersion};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Couldn't set up Argon2id: {source}"))]
    Argon2Setup {
        source: argon2::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Couldn't hash the password: {source}"))]
    Hashing {
        source: password_hash::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{name:?} won't do as a username"))]
    InvalidUsername { name: String },
    #[snafu(display("Stored password digest is not a PHC string: {source}"))]
    MalformedDigest {
        source: password_hash::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{username}'s pepper has gone missing: {source}"))]
    MissingPepper {
        username: Username,
        source: peppers::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords may not start or end with whitespace"))]
    PaddedPassword { backtrace: Backtrace },
    #[snafu(display("Couldn't check {username}'s password: {source}"))]
    PasswordCheck {
        username: Username,
        source: password_hash::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords need at least {MIN_PASSWORD_LENGTH} characters"))]
    ShortPassword { backtrace: Backtrace },
    #[snafu(display("Wrong password"))]
    WrongPassword { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// Declare a UUID-backed identifier
///
/// Users & blogs are both keyed by random (v4) UUIDs; giving each its own type keeps one from being
/// passed where the other belongs. On the wire, and in storage, they're hyphenated strings.
macro_rules! uuid_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, uuid::Error> {
                s.parse().map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifies a [User]
    UserId
);
uuid_id!(
    /// Identifies a [Blog]
    BlogId
);

lazy_static! {
    // A letter, then two to sixty-three more letters, digits, or `-_.`
    static ref USERNAME: Regex = Regex::new("^[A-Za-z][-_.A-Za-z0-9]{2,63}$").unwrap(/* known good */);
}

/// A login name
///
/// Usernames are unique across the service. That's for storage to enforce; this type only checks
/// the shape.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String")]
pub struct Username(String);

impl Username {
    pub fn new(name: &str) -> Result<Username> {
        name.to_owned().try_into()
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> Result<Username> {
        ensure!(USERNAME.is_match(&name), InvalidUsernameSnafu { name });
        Ok(Username(name))
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> Result<Username> {
        Username::new(s)
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An Argon2id digest in PHC string format (`$argon2id$v=19$m=...`)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
struct PasswordDigest(String);

impl PasswordDigest {
    fn parsed(&self) -> Result<PasswordHash<'_>> {
        PasswordHash::new(&self.0).context(MalformedDigestSnafu)
    }
}

impl TryFrom<String> for PasswordDigest {
    type Error = Error;

    fn try_from(phc: String) -> Result<PasswordDigest> {
        PasswordHash::new(&phc).context(MalformedDigestSnafu)?;
        Ok(PasswordDigest(phc))
    }
}

impl From<PasswordDigest> for String {
    fn from(digest: PasswordDigest) -> String {
        digest.0
    }
}

const MIN_PASSWORD_LENGTH: usize = 3;

/// Leading or trailing whitespace is almost always a paste accident, so refuse it rather than
/// leave the user unable to log in later.
fn validate_password(password: &str) -> Result<()> {
    ensure!(password.trim() == password, PaddedPasswordSnafu);
    ensure!(
        password.chars().count() >= MIN_PASSWORD_LENGTH,
        ShortPasswordSnafu
    );
    Ok(())
}

/// Argon2id, default parameters, keyed with `pepper`
///
/// The pepper goes in as the Argon2 "secret" input; the per-user salt is stored in the digest.
fn argon2id(pepper: &Pepper) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper.expose_secret(),
        Algorithm::Argon2id,
        Version::V0x13,
        Params::default(),
    )
    .context(Argon2SetupSnafu)
}

/// Someone who can log in & save blogs
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    id: UserId,
    username: Username,
    name: String,
    #[serde(rename = "password_hash")]
    digest: PasswordDigest,
    pepper_version: PepperVersion,
}

impl User {
    /// Sign up a new user, hashing `password` under the given pepper
    pub fn new(
        pepper_version: &PepperVersion,
        pepper: &Pepper,
        username: &Username,
        name: &str,
        password: &SecretString,
    ) -> Result<User> {
        let password = password.expose_secret();
        validate_password(password)?;
        let salt = SaltString::generate(&mut OsRng);
        let phc = argon2id(pepper)?
            .hash_password(password.as_bytes(), &salt)
            .context(HashingSnafu)?
            .to_string();
        Ok(User {
            id: UserId::new(),
            username: username.clone(),
            name: name.to_owned(),
            digest: PasswordDigest(phc),
            pepper_version: pepper_version.clone(),
        })
    }
    /// Check `password` against the stored digest, using whichever pepper this user signed up under
    pub fn check_password(&self, peppers: &Peppers, password: SecretString) -> Result<()> {
        let pepper = peppers
            .find_by_version(&self.pepper_version)
            .context(MissingPepperSnafu {
                username: self.username.clone(),
            })?;
        let outcome = argon2id(&pepper)?
            .verify_password(password.expose_secret().as_bytes(), &self.digest.parsed()?);
        match outcome {
            Ok(()) => Ok(()),
            Err(password_hash::Error::Password) => WrongPasswordSnafu.fail(),
            Err(err) => Err(PasswordCheckSnafu {
                username: self.username.clone(),
            }
            .into_error(err)),
        }
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One saved blog
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Blog {
    id: BlogId,
    title: String,
    /// Optional on input
    #[serde(default)]
    author: String,
    url: String,
    #[serde(default)]
    likes: u64,
    /// Who saved it
    user: UserId,
}

impl Blog {
    pub fn new(title: &str, author: &str, url: &str, likes: u64, user: &UserId) -> Blog {
        Blog {
            id: BlogId::new(),
            title: title.to_owned(),
            author: author.to_owned(),
            url: url.to_owned(),
            likes,
            user: *user,
        }
    }
    pub fn id(&self) -> BlogId {
        self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn likes(&self) -> u64 {
        self.likes
    }
    pub fn set_likes(&mut self, likes: u64) {
        self.likes = likes;
    }
    pub fn user(&self) -> UserId {
        self.user
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;

    #[test]
    fn username_shapes() {
        for ok in ["mluukkai", "abc", "j.doe_2-x", "a".repeat(64).as_str()] {
            assert!(Username::new(ok).is_ok(), "{ok}");
        }
        for bad in ["", "ab", "2fast", "-dash", "has space", "hëllo", "a".repeat(65).as_str()] {
            assert!(
                matches!(Username::new(bad), Err(Error::InvalidUsername { .. })),
                "{bad}"
            );
        }
        assert!(serde_json::from_value::<Username>(json!("root-user")).is_ok());
        assert!(serde_json::from_value::<Username>(json!("x")).is_err());
    }

    #[test]
    fn ids_are_hyphenated_uuids() {
        let id = UserId::new();
        let text = id.to_string();
        assert_eq!(text.matches('-').count(), 4);
        assert_eq!(text.parse::<UserId>().unwrap(), id);
        assert_eq!(serde_json::to_value(id).unwrap(), json!(text));
        assert!("5".parse::<BlogId>().is_err());
    }

    #[test]
    fn signup_and_check() {
        let peppers = Peppers::default();
        let (ver, pepper) = peppers.current_pepper().unwrap();
        let hellas = Username::new("hellas").unwrap();
        let signup = |pw: &str| User::new(&ver, &pepper, &hellas, "Arto Hellas", &pw.into());

        assert!(matches!(signup(" pad"), Err(Error::PaddedPassword { .. })));
        assert!(matches!(signup("pad\n"), Err(Error::PaddedPassword { .. })));
        assert!(matches!(signup("ab"), Err(Error::ShortPassword { .. })));

        let user = signup("salainen").unwrap();
        assert_eq!(user.name(), "Arto Hellas");
        assert!(user.check_password(&peppers, "salainen".into()).is_ok());
        assert!(matches!(
            user.check_password(&peppers, "salainen!".into()),
            Err(Error::WrongPassword { .. })
        ));
        // A fresh set of peppers has never heard of this user's pepper version
        assert!(matches!(
            user.check_password(&Peppers::default(), "salainen".into()),
            Err(Error::MissingPepper { .. }) | Err(Error::WrongPassword { .. })
        ));
    }

    #[test]
    fn stored_user() {
        let peppers = Peppers::default();
        let (ver, pepper) = peppers.current_pepper().unwrap();
        let user = User::new(
            &ver,
            &pepper,
            &Username::new("mluukkai").unwrap(),
            "Matti Luukkainen",
            &"sekret".into(),
        )
        .unwrap();
        let stored = serde_json::to_value(&user).unwrap();
        assert!(stored["password_hash"].as_str().unwrap().starts_with("$argon2id$"));
        assert_eq!(serde_json::from_value::<User>(stored.clone()).unwrap(), user);

        let mut tampered = stored;
        tampered["password_hash"] = json!("plaintext");
        assert!(serde_json::from_value::<User>(tampered).is_err());
    }

    #[test]
    fn blog_defaults() {
        let owner = UserId::new();
        let blog: Blog = serde_json::from_value(json!({
            "id": BlogId::new(),
            "title": "Type wars",
            "url": "http://blog.cleancoder.com/uncle-bob/2016/05/01/TypeWars.html",
            "user": owner,
        }))
        .unwrap();
        assert_eq!((blog.likes(), blog.author(), blog.user()), (0, "", owner));
    }
}
