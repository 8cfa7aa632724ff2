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

//! Integration tests for the user API.

use bloglist::{http::ErrorResponseBody, users::UserRsp};
use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

use crate::{signup_and_login, unique_username};

/// Test `POST /api/users` & `POST /api/login`
pub async fn test_signup(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let username = unique_username("johndoe");

    let rsp = client
        .post(url.join("/api/users")?)
        .json(&json!({"username": username, "name": "John Doe", "password": "f00 b@r"}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());
    let body = rsp.json::<UserRsp>().await?;
    assert_eq!(username, body.username);
    assert_eq!("John Doe", body.name);
    assert!(body.blogs.is_empty());

    // Same name again; should be refused
    let rsp = client
        .post(url.join("/api/users")?)
        .json(&json!({"username": username, "name": "Jane Doe", "password": "sekrit"}))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    let body = rsp.json::<ErrorResponseBody>().await?;
    assert!(body.error.contains("already claimed"));

    // OK-- now attempt to get a token for our new user
    let rsp = client
        .post(url.join("/api/login")?)
        .json(&json!({"username": username, "password": "f00 b@r"}))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());

    let rsp = client
        .post(url.join("/api/login")?)
        .json(&json!({"username": username, "password": "wrong"}))
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
    let body = rsp.json::<ErrorResponseBody>().await?;
    assert_eq!("invalid username or password", body.error);

    let rsp = client
        .post(url.join("/api/login")?)
        .json(&json!({"username": unique_username("nobody"), "password": "f00 b@r"}))
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    Ok(())
}

/// Test the ways in which signup can go wrong
pub async fn test_bad_signups(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    for body in [
        json!({"username": "ab", "name": "Too Short", "password": "f00 b@r"}),
        json!({"username": unique_username("pw"), "name": "Short Password", "password": "pw"}),
        json!({"name": "No Username", "password": "f00 b@r"}),
    ] {
        let rsp = client
            .post(url.join("/api/users")?)
            .json(&body)
            .send()
            .await?;
        assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
        assert!(!rsp.json::<ErrorResponseBody>().await?.error.is_empty());
    }

    Ok(())
}

/// Test `GET /api/users`; each user should come back with the blogs they've added
pub async fn test_list_users(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let username = unique_username("lister");
    let token = signup_and_login(&client, &url, &username, "Lister", "f00 b@r").await?;

    let rsp = client
        .post(url.join("/api/blogs")?)
        .bearer_auth(&token)
        .json(&json!({"title": "Go To Statement Considered Harmful",
                      "author": "Edsger W. Dijkstra",
                      "url": "https://homepages.cwi.nl/~storm/teaching/reader/Dijkstra68.pdf"}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());

    let rsp = client.get(url.join("/api/users")?).send().await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let users = rsp.json::<Vec<UserRsp>>().await?;
    let user = users
        .iter()
        .find(|u| u.username == username)
        .ok_or("new user not listed")?;
    assert_eq!(1, user.blogs.len());
    assert_eq!("Edsger W. Dijkstra", user.blogs[0].author);

    Ok(())
}
