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

//! # dynamodb
//!
//! [Storage] implementation for DynamoDB.
//!
//! [Storage]: crate::storage
//!
//! Tables (see [dynamodb_schemas](crate::dynamodb_schemas)):
//!
//! - `users`, keyed by `id`, with a global secondary index `users_by_username`
//! - `unique_usernames`, keyed by `username`; exists only to make claiming a username atomic
//! - `blogs`, keyed by `id`, with a global secondary index `blogs_by_user`
//!
//! DynamoDB scans come back in no particular order, so every user & blog carries a `created`
//! attribute (microseconds since the epoch) by which we sort.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, meta::region::RegionProviderChain};
use aws_sdk_dynamodb::{
    config::Credentials,
    error::SdkError,
    types::{AttributeValue, Put, ReturnValue, TransactWriteItem},
};
use chrono::Utc;
use either::Either;
use itertools::Itertools;
use secrecy::SecretString;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, from_items, to_item};
use snafu::{Backtrace, ResultExt, Snafu};
use tap::Pipe;
use tracing::debug;
use url::Url;

use crate::{
    entities::{Blog, BlogId, User, UserId, Username},
    storage,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build a transaction item: {source}"))]
    Build {
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
    #[snafu(display("Failed to read schema_migrations: {source}"))]
    SchemaMigrations {
        #[snafu(source(from(SdkError<aws_sdk_dynamodb::operation::scan::ScanError, aws_sdk_dynamodb::config::http::HttpResponse>, Box::new)))]
        source: Box<
            SdkError<
                aws_sdk_dynamodb::operation::scan::ScanError,
                aws_sdk_dynamodb::config::http::HttpResponse,
            >,
        >,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad schema version {text}: {source}"))]
    SchemaVersion {
        text: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// Where to find DynamoDB: either an AWS region, or a list of endpoints (for a local DynamoDB or
/// an Alternator cluster, say)
pub type Location = Either<String, Vec<Url>>;

type Item = HashMap<String, AttributeValue>;

/// Build a DynamoDB client
pub async fn create_client(
    location: &Location,
    credentials: &Option<(SecretString, SecretString)>,
) -> Result<aws_sdk_dynamodb::Client> {
    use secrecy::ExposeSecret;
    let creds = credentials.as_ref().map(|(id, secret)| {
        Credentials::new(
            id.expose_secret(),
            secret.expose_secret(),
            None,
            None,
            "bloglist",
        )
    });

    let config = match location {
        Either::Left(region) => {
            let region_provider = RegionProviderChain::first_try(Some(Region::new(region.clone())))
                .or_default_provider()
                .or_else(Region::new("us-west-2"));
            let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
            if let Some(creds) = creds {
                loader = loader.credentials_provider(creds);
            }
            loader.load().await
        }
        Either::Right(endpoints) => {
            let ep_url = endpoints.first().ok_or(NoEndpointsSnafu {}.build())?;
            let mut loader =
                aws_config::defaults(BehaviorVersion::latest()).endpoint_url(ep_url.as_str());
            if let Some(creds) = creds {
                loader = loader.credentials_provider(creds);
            }
            loader.load().await
        }
    };
    Ok(aws_sdk_dynamodb::Client::new(&config))
}

/// Retrieve the most recently applied schema version, if any
pub async fn get_current_schema_version(client: &aws_sdk_dynamodb::Client) -> Result<Option<usize>> {
    let items = scan_all(client, "schema_migrations")
        .await
        .context(SchemaMigrationsSnafu)?;
    items
        .iter()
        .filter_map(|item| match item.get("version") {
            Some(AttributeValue::N(n)) => Some(n),
            _ => None,
        })
        .map(|n| {
            n.parse::<usize>()
                .context(SchemaVersionSnafu { text: n.clone() })
        })
        .collect::<Result<Vec<usize>>>()?
        .into_iter()
        .max()
        .pipe(Ok)
}

/// Scan an entire table, following `LastEvaluatedKey` until DynamoDB runs out
async fn scan_all(
    client: &aws_sdk_dynamodb::Client,
    table: &str,
) -> StdResult<
    Vec<Item>,
    SdkError<aws_sdk_dynamodb::operation::scan::ScanError, aws_sdk_dynamodb::config::http::HttpResponse>,
> {
    let mut items = Vec::new();
    let mut start: Option<Item> = None;
    loop {
        let out = client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(start)
            .send()
            .await?;
        items.extend(out.items.unwrap_or_default());
        match out.last_evaluated_key {
            Some(key) if !key.is_empty() => start = Some(key),
            _ => break,
        }
    }
    Ok(items)
}

fn created(item: &Item) -> i64 {
    match item.get("created") {
        Some(AttributeValue::N(n)) => n.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Sort raw items by their `created` attribute & deserialize them
fn in_creation_order<T: serde::de::DeserializeOwned>(
    mut items: Vec<Item>,
) -> StdResult<Vec<T>, storage::Error> {
    items.sort_by_key(created);
    from_items(items).map_err(storage::Error::new)
}

/// Serialize an entity & stamp it with its creation time
fn to_item_with_created<T: serde::Serialize>(t: &T) -> StdResult<Item, storage::Error> {
    let mut item: Item = to_item(t).map_err(storage::Error::new)?;
    item.insert(
        "created".to_owned(),
        AttributeValue::N(format!("{}", Utc::now().timestamp_micros())),
    );
    Ok(item)
}

pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
}

impl Client {
    pub async fn new(
        location: &Location,
        credentials: &Option<(SecretString, SecretString)>,
    ) -> Result<Client> {
        Ok(Client {
            client: create_client(location, credentials).await?,
        })
    }
    async fn get_by_id<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        id: String,
    ) -> StdResult<Option<T>, storage::Error> {
        self.client
            .get_item()
            .table_name(table)
            .key("id", AttributeValue::S(id))
            .send()
            .await
            .map_err(storage::Error::new)?
            .item
            .map(|item| from_item(item).map_err(storage::Error::new))
            .transpose()
    }
}

#[async_trait]
impl storage::Backend for Client {
    async fn add_user(&self, user: &User) -> StdResult<(), storage::Error> {
        // Claim the username & write the user in one transaction; if someone already has the
        // username, the first conditional check fails & neither write happens
        let claim = Put::builder()
            .table_name("unique_usernames")
            .item("username", AttributeValue::S(user.username().to_string()))
            .item("id", AttributeValue::S(user.id().to_string()))
            .condition_expression("attribute_not_exists(username)")
            .build()
            .context(BuildSnafu)
            .map_err(storage::Error::new)?;
        let put = Put::builder()
            .table_name("users")
            .set_item(Some(to_item_with_created(user)?))
            .condition_expression("attribute_not_exists(id)")
            .build()
            .context(BuildSnafu)
            .map_err(storage::Error::new)?;

        use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError::TransactionCanceledException;
        match self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(claim).build())
            .transact_items(TransactWriteItem::builder().put(put).build())
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(ref inner))
                if matches!(inner.err(), TransactionCanceledException(exc)
                            if exc.cancellation_reasons().first().and_then(|r| r.code()) == Some("ConditionalCheckFailed")) =>
            {
                debug!("username {} already claimed", user.username());
                Err(storage::Error::username_claimed(user.username()))
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }
    async fn user_for_name(&self, name: &Username) -> StdResult<Option<User>, storage::Error> {
        let gio = self
            .client
            .query()
            .table_name("users")
            .index_name("users_by_username")
            .key_condition_expression("username = :val")
            .expression_attribute_values(":val", AttributeValue::S(name.to_string()))
            .send()
            .await
            .map_err(storage::Error::new)?;
        match gio.items {
            Some(items) => {
                let users: Vec<User> = from_items(items).map_err(storage::Error::new)?;
                users
                    .into_iter()
                    .at_most_one()
                    .map_err(storage::Error::new)?
                    .pipe(Ok)
            }
            None => Ok(None),
        }
    }
    async fn user_for_id(&self, id: &UserId) -> StdResult<Option<User>, storage::Error> {
        self.get_by_id("users", id.to_string()).await
    }
    async fn all_users(&self) -> StdResult<Vec<User>, storage::Error> {
        scan_all(&self.client, "users")
            .await
            .map_err(storage::Error::new)?
            .pipe(in_creation_order)
    }
    async fn add_blog(&self, blog: &Blog) -> StdResult<(), storage::Error> {
        self.client
            .put_item()
            .table_name("blogs")
            .set_item(Some(to_item_with_created(blog)?))
            .send()
            .await
            .map_err(storage::Error::new)?;
        Ok(())
    }
    async fn all_blogs(&self) -> StdResult<Vec<Blog>, storage::Error> {
        scan_all(&self.client, "blogs")
            .await
            .map_err(storage::Error::new)?
            .pipe(in_creation_order)
    }
    async fn blog_for_id(&self, id: &BlogId) -> StdResult<Option<Blog>, storage::Error> {
        self.get_by_id("blogs", id.to_string()).await
    }
    async fn blogs_for_user(&self, user: &UserId) -> StdResult<Vec<Blog>, storage::Error> {
        let mut items = Vec::new();
        let mut start: Option<Item> = None;
        loop {
            // "user" is a DynamoDB reserved word
            let out = self
                .client
                .query()
                .table_name("blogs")
                .index_name("blogs_by_user")
                .key_condition_expression("#u = :val")
                .expression_attribute_names("#u", "user")
                .expression_attribute_values(":val", AttributeValue::S(user.to_string()))
                .set_exclusive_start_key(start)
                .send()
                .await
                .map_err(storage::Error::new)?;
            items.extend(out.items.unwrap_or_default());
            match out.last_evaluated_key {
                Some(key) if !key.is_empty() => start = Some(key),
                _ => break,
            }
        }
        in_creation_order(items)
    }
    async fn delete_blog(&self, id: &BlogId) -> StdResult<bool, storage::Error> {
        Ok(self
            .client
            .delete_item()
            .table_name("blogs")
            .key("id", AttributeValue::S(id.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(storage::Error::new)?
            .attributes
            .is_some_and(|attrs| !attrs.is_empty()))
    }
    async fn update_likes(&self, id: &BlogId, likes: u64) -> StdResult<Option<Blog>, storage::Error> {
        use aws_sdk_dynamodb::operation::update_item::UpdateItemError::ConditionalCheckFailedException;
        match self
            .client
            .update_item()
            .table_name("blogs")
            .key("id", AttributeValue::S(id.to_string()))
            .update_expression("SET likes = :likes")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":likes", AttributeValue::N(format!("{}", likes)))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
        {
            Ok(out) => out
                .attributes
                .map(|item| from_item(item).map_err(storage::Error::new))
                .transpose(),
            // The DynamoDB SDK expresses "no such blog" as a `ServiceError` wrapping a
            // `ConditionalCheckFailedException`:
            Err(err)
                if matches!(err, SdkError::ServiceError(ref inner) if matches!(inner.err(), ConditionalCheckFailedException(_))) =>
            {
                Ok(None)
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn creation_order() {
        let owner = UserId::new();
        let a = Blog::new("A", "Someone", "https://example.com/a", 1, &owner);
        let b = Blog::new("B", "Someone", "https://example.com/b", 2, &owner);
        let mut item_a: Item = to_item(&a).unwrap();
        item_a.insert("created".to_owned(), AttributeValue::N("200".to_owned()));
        let mut item_b: Item = to_item(&b).unwrap();
        item_b.insert("created".to_owned(), AttributeValue::N("100".to_owned()));

        let blogs: Vec<Blog> = in_creation_order(vec![item_a, item_b]).unwrap();
        assert_eq!(blogs, vec![b, a]);
    }

    #[test]
    fn stamped_items() {
        let blog = Blog::new("A", "Someone", "https://example.com/a", 1, &UserId::new());
        let item = to_item_with_created(&blog).unwrap();
        assert!(created(&item) > 0);
        assert_eq!(
            item.get("id"),
            Some(&AttributeValue::S(blog.id().to_string()))
        );
        assert_eq!(item.get("likes"), Some(&AttributeValue::N("1".to_owned())));
    }
}
