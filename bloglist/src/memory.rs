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

//! # memory
//!
//! An in-process [Backend] implementation. Nothing survives a restart, which makes it useful
//! for development & testing, and for little else.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    entities::{Blog, BlogId, User, UserId, Username},
    storage::{Backend, Error},
};

#[derive(Debug, Default)]
struct Tables {
    // Both kept in insertion order
    users: Vec<User>,
    blogs: Vec<Blog>,
}

#[derive(Debug, Default)]
pub struct Memory {
    tables: RwLock<Tables>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }
}

#[async_trait]
impl Backend for Memory {
    async fn add_user(&self, user: &User) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .iter()
            .any(|u| u.username() == user.username())
        {
            return Err(Error::username_claimed(user.username()));
        }
        tables.users.push(user.clone());
        Ok(())
    }
    async fn user_for_name(&self, name: &Username) -> Result<Option<User>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.username() == name)
            .cloned())
    }
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.id() == *id)
            .cloned())
    }
    async fn all_users(&self) -> Result<Vec<User>, Error> {
        Ok(self.tables.read().await.users.clone())
    }
    async fn add_blog(&self, blog: &Blog) -> Result<(), Error> {
        self.tables.write().await.blogs.push(blog.clone());
        Ok(())
    }
    async fn all_blogs(&self) -> Result<Vec<Blog>, Error> {
        Ok(self.tables.read().await.blogs.clone())
    }
    async fn blog_for_id(&self, id: &BlogId) -> Result<Option<Blog>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .blogs
            .iter()
            .find(|b| b.id() == *id)
            .cloned())
    }
    async fn blogs_for_user(&self, user: &UserId) -> Result<Vec<Blog>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .blogs
            .iter()
            .filter(|b| b.user() == *user)
            .cloned()
            .collect())
    }
    async fn delete_blog(&self, id: &BlogId) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        let before = tables.blogs.len();
        tables.blogs.retain(|b| b.id() != *id);
        Ok(tables.blogs.len() != before)
    }
    async fn update_likes(&self, id: &BlogId, likes: u64) -> Result<Option<Blog>, Error> {
        let mut tables = self.tables.write().await;
        Ok(tables.blogs.iter_mut().find(|b| b.id() == *id).map(|b| {
            b.set_likes(likes);
            b.clone()
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use secrecy::SecretString;

    use crate::peppers::Peppers;

    fn user(username: &str) -> User {
        let (version, pepper) = Peppers::default().current_pepper().unwrap();
        User::new(
            &version,
            &pepper,
            &Username::new(username).unwrap(),
            "Some One",
            &SecretString::from("sekrit"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn users() {
        let storage = Memory::new();
        let root = user("root");
        storage.add_user(&root).await.unwrap();
        assert!(matches!(
            storage.add_user(&user("root")).await,
            Err(Error::UsernameClaimed { .. })
        ));
        let other = user("other");
        storage.add_user(&other).await.unwrap();

        assert_eq!(
            storage
                .user_for_name(&Username::new("root").unwrap())
                .await
                .unwrap(),
            Some(root.clone())
        );
        assert_eq!(storage.user_for_id(&other.id()).await.unwrap(), Some(other.clone()));
        assert_eq!(storage.user_for_id(&UserId::new()).await.unwrap(), None);
        assert_eq!(storage.all_users().await.unwrap(), vec![root, other]);
    }

    #[tokio::test]
    async fn blogs() {
        let storage = Memory::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let a = Blog::new("React patterns", "Michael Chan", "https://reactpatterns.com/", 7, &alice);
        let b = Blog::new(
            "Go To Statement Considered Harmful",
            "Edsger W. Dijkstra",
            "http://www.u.arizona.edu/~rubinson/copyright_violations/Go_To_Considered_Harmful.html",
            5,
            &bob,
        );
        let c = Blog::new(
            "Canonical string reduction",
            "Edsger W. Dijkstra",
            "http://www.cs.utexas.edu/~EWD/transcriptions/EWD08xx/EWD808.html",
            12,
            &alice,
        );
        for blog in [&a, &b, &c] {
            storage.add_blog(blog).await.unwrap();
        }

        assert_eq!(
            storage.all_blogs().await.unwrap(),
            vec![a.clone(), b.clone(), c.clone()]
        );
        assert_eq!(
            storage.blogs_for_user(&alice).await.unwrap(),
            vec![a.clone(), c.clone()]
        );
        assert_eq!(storage.blog_for_id(&b.id()).await.unwrap(), Some(b.clone()));

        let updated = storage.update_likes(&a.id(), 8).await.unwrap().unwrap();
        assert_eq!(updated.likes(), 8);
        assert_eq!(
            storage.blog_for_id(&a.id()).await.unwrap().unwrap().likes(),
            8
        );
        assert_eq!(storage.update_likes(&BlogId::new(), 1).await.unwrap(), None);

        assert!(storage.delete_blog(&b.id()).await.unwrap());
        assert!(!storage.delete_blog(&b.id()).await.unwrap());
        assert_eq!(storage.blog_for_id(&b.id()).await.unwrap(), None);
        assert_eq!(storage.all_blogs().await.unwrap().len(), 2);
    }
}
