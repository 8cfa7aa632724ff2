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

//! # storage
//!
//! Abstractions for the bloglist storage layer.

use async_trait::async_trait;

use crate::entities::{Blog, BlogId, User, UserId, Username};

#[derive(Debug)]
pub enum Error {
    /// Someone already has this username; this is the one storage failure callers are expected to
    /// handle themselves
    UsernameClaimed { username: Username },
    /// Anything else that went wrong in the backend
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UsernameClaimed { username } => {
                write!(f, "The username {} is already claimed", username)
            }
            Error::Backend { source } => write!(f, "{}", source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UsernameClaimed { .. } => None,
            Error::Backend { source } => Some(source.as_ref()),
        }
    }
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
        }
    }
    pub fn username_claimed(username: &Username) -> Error {
        Error::UsernameClaimed {
            username: username.clone(),
        }
    }
}

#[async_trait]
pub trait Backend {
    /// Add a new [User]; fail with [Error::UsernameClaimed] if the username is taken
    async fn add_user(&self, user: &User) -> Result<(), Error>;
    /// Retrieve a [User] given a username. None means there is no user by that name.
    async fn user_for_name(&self, name: &Username) -> Result<Option<User>, Error>;
    /// Retrieve a [User] by id
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error>;
    /// Retrieve all users, in the order in which they were added
    async fn all_users(&self) -> Result<Vec<User>, Error>;
    /// Add a new [Blog]
    async fn add_blog(&self, blog: &Blog) -> Result<(), Error>;
    /// Retrieve all blogs, in the order in which they were added
    async fn all_blogs(&self) -> Result<Vec<Blog>, Error>;
    async fn blog_for_id(&self, id: &BlogId) -> Result<Option<Blog>, Error>;
    /// Retrieve all blogs belonging to `user`, in the order in which they were added
    async fn blogs_for_user(&self, user: &UserId) -> Result<Vec<Blog>, Error>;
    /// Delete a [Blog]; return true if it was there to be deleted
    async fn delete_blog(&self, id: &BlogId) -> Result<bool, Error>;
    /// Set the like count on a [Blog]; return the updated [Blog], or None if there's no such blog
    async fn update_likes(&self, id: &BlogId, likes: u64) -> Result<Option<Blog>, Error>;
}
