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

//! # DynamoDB schema
//!
//! The tables the DynamoDB backend expects, described as data, plus the machinery to bring a
//! database up to date. Each entry in [MIGRATIONS] is one schema version; applying it creates its
//! tables & records the version in `schema_migrations`.
//!
//! | table              | key                | secondary index                 |
//! |--------------------|--------------------|---------------------------------|
//! | `users`            | `id`               | `users_by_username` (username)  |
//! | `unique_usernames` | `username`         |                                 |
//! | `blogs`            | `id`               | `blogs_by_user` (user)          |
//! | `schema_migrations`| `version` (number) |                                 |

use aws_sdk_dynamodb::{
    Client,
    config::http::HttpResponse,
    error::{BuildError, SdkError},
    operation::{create_table::CreateTableError, put_item::PutItemError},
    types::{
        AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
        KeyType, Projection, ProjectionType, ScalarAttributeType,
    },
};
use chrono::Utc;
use snafu::{Backtrace, prelude::*};
use tracing::info;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Malformed table description for {table}: {source}"))]
    Describe {
        table: &'static str,
        source: BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("DynamoDB refused to create {table}: {source}"))]
    Create {
        table: &'static str,
        #[snafu(source(from(SdkError<CreateTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<CreateTableError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Couldn't record schema version {version}: {source}"))]
    Record {
        version: usize,
        #[snafu(source(from(SdkError<PutItemError, HttpResponse>, Box::new)))]
        source: Box<SdkError<PutItemError, HttpResponse>>,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A table keyed on a single hash attribute, optionally with one all-projecting secondary index
/// on a string attribute
#[derive(Clone, Copy, Debug)]
pub struct Table {
    pub name: &'static str,
    pub key: &'static str,
    pub key_is_number: bool,
    /// (index name, attribute)
    pub index: Option<(&'static str, &'static str)>,
}

const fn keyed_by_string(name: &'static str, key: &'static str) -> Table {
    Table {
        name,
        key,
        key_is_number: false,
        index: None,
    }
}

const INITIAL: &[Table] = &[
    Table {
        index: Some(("users_by_username", "username")),
        ..keyed_by_string("users", "id")
    },
    keyed_by_string("unique_usernames", "username"),
    Table {
        index: Some(("blogs_by_user", "user")),
        ..keyed_by_string("blogs", "id")
    },
    Table {
        key_is_number: true,
        ..keyed_by_string("schema_migrations", "version")
    },
];

/// Schema versions, oldest first; version `i` is `MIGRATIONS[i]`
pub const MIGRATIONS: &[&[Table]] = &[INITIAL];

fn attribute(
    table: &'static str,
    name: &str,
    ty: ScalarAttributeType,
) -> Result<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ty)
        .build()
        .context(DescribeSnafu { table })
}

fn hash_key(table: &'static str, name: &str) -> Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(KeyType::Hash)
        .build()
        .context(DescribeSnafu { table })
}

fn secondary_index(table: &'static str, index: &str, attr: &str) -> Result<GlobalSecondaryIndex> {
    GlobalSecondaryIndex::builder()
        .index_name(index)
        .key_schema(hash_key(table, attr)?)
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
        )
        .build()
        .context(DescribeSnafu { table })
}

async fn create(client: &Client, table: &Table) -> Result<()> {
    let key_type = if table.key_is_number {
        ScalarAttributeType::N
    } else {
        ScalarAttributeType::S
    };
    let mut request = client
        .create_table()
        .table_name(table.name)
        .billing_mode(BillingMode::PayPerRequest)
        .attribute_definitions(attribute(table.name, table.key, key_type)?)
        .key_schema(hash_key(table.name, table.key)?);
    if let Some((index, attr)) = table.index {
        request = request
            .attribute_definitions(attribute(table.name, attr, ScalarAttributeType::S)?)
            .global_secondary_indexes(secondary_index(table.name, index, attr)?);
    }
    request
        .send()
        .await
        .context(CreateSnafu { table: table.name })?;
    info!("Created table {}", table.name);
    Ok(())
}

/// Apply every migration after `current` (all of them if `None`); returns how many ran
pub async fn migrate(client: &Client, current: Option<usize>) -> Result<usize> {
    let first = current.map_or(0, |v| v + 1);
    for (version, tables) in MIGRATIONS.iter().enumerate().skip(first) {
        for table in tables.iter() {
            create(client, table).await?;
        }
        client
            .put_item()
            .table_name("schema_migrations")
            .item("version", AttributeValue::N(version.to_string()))
            .item("applied", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await
            .context(RecordSnafu { version })?;
        info!("Schema is now at version {version}");
    }
    Ok(MIGRATIONS.len().saturating_sub(first))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_tables() {
        let names: Vec<_> = INITIAL.iter().map(|t| t.name).collect();
        assert_eq!(names, ["users", "unique_usernames", "blogs", "schema_migrations"]);
        let numeric: Vec<_> = INITIAL.iter().filter(|t| t.key_is_number).collect();
        assert_eq!(numeric.len(), 1);
        assert_eq!(numeric[0].name, "schema_migrations");
        assert_eq!(INITIAL[2].index, Some(("blogs_by_user", "user")));
    }

    #[test]
    fn index_description() {
        let index = secondary_index("blogs", "blogs_by_user", "user").unwrap();
        assert_eq!(index.index_name(), "blogs_by_user");
        assert_eq!(index.key_schema()[0].attribute_name(), "user");
        assert_eq!(
            index.projection().and_then(|p| p.projection_type()),
            Some(&ProjectionType::All)
        );
    }
}
