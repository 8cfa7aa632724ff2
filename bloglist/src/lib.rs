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

//! # bloglist
//!
//! A small REST service for keeping a list of blogs worth reading. Users register & log in;
//! anyone can browse the list, like blogs & read statistics about it; logged-in users can add
//! blogs & delete their own.
//!
//! The library crate holds everything but process setup, so that the integration tests can run
//! the full service in-process. The aggregate statistics live in [stats].
pub mod authn;
pub mod blogs;
pub mod dynamodb;
#[path = "dynamodb-schemas.rs"]
pub mod dynamodb_schemas;
pub mod entities;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod peppers;
#[path = "signing-keys.rs"]
pub mod signing_keys;
pub mod stats;
pub mod storage;
pub mod token;
pub mod users;
pub mod util;
