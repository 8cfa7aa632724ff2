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

//! Integration tests for the blog API.

use bloglist::{blogs::{BlogRsp, StatsRsp}, http::ErrorResponseBody};
use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

use crate::{signup_and_login, unique_username};

async fn add_blog(
    client: &Client,
    url: &Url,
    token: &str,
    title: &str,
    author: &str,
    likes: u64,
) -> Result<BlogRsp, Failed> {
    let rsp = client
        .post(url.join("/api/blogs")?)
        .bearer_auth(token)
        .json(&json!({"title": title, "author": author,
                      "url": format!("https://example.com/{}", title.replace(' ', "-")),
                      "likes": likes}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());
    Ok(rsp.json::<BlogRsp>().await?)
}

/// Test adding, listing & retrieving blogs
pub async fn test_blogs(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let username = unique_username("author");
    let token = signup_and_login(&client, &url, &username, "An Author", "f00 b@r").await?;

    // No token, no blog
    let rsp = client
        .post(url.join("/api/blogs")?)
        .json(&json!({"title": "Anonymous", "url": "https://example.com/anon"}))
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
    assert_eq!(
        "token missing or invalid",
        rsp.json::<ErrorResponseBody>().await?.error
    );

    // Nor a bad token
    let rsp = client
        .post(url.join("/api/blogs")?)
        .bearer_auth("not.a.token")
        .json(&json!({"title": "Forged", "url": "https://example.com/forged"}))
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    let blog = add_blog(&client, &url, &token, "React patterns", "Michael Chan", 7).await?;
    assert_eq!(7, blog.likes);
    assert_eq!(
        username,
        blog.user.as_ref().ok_or("blog has no owner")?.username
    );

    // Likes default to zero
    let rsp = client
        .post(url.join("/api/blogs")?)
        .bearer_auth(&token)
        .json(&json!({"title": "Type wars", "author": "Robert C. Martin",
                      "url": "http://blog.cleancoder.com/uncle-bob/2016/05/01/TypeWars.html"}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());
    assert_eq!(0, rsp.json::<BlogRsp>().await?.likes);

    // Title & url are required
    let rsp = client
        .post(url.join("/api/blogs")?)
        .bearer_auth(&token)
        .json(&json!({"author": "Nobody", "url": "https://example.com/untitled"}))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = client.get(url.join("/api/blogs")?).send().await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let blogs = rsp.json::<Vec<BlogRsp>>().await?;
    assert_eq!(2, blogs.len());
    assert!(blogs.iter().any(|b| b.id == blog.id));

    let rsp = client
        .get(url.join(&format!("/api/blogs/{}", blog.id))?)
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!(blog, rsp.json::<BlogRsp>().await?);

    let rsp = client.get(url.join("/api/blogs/not-an-id")?).send().await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());
    assert_eq!(
        "malformatted id",
        rsp.json::<ErrorResponseBody>().await?.error
    );

    Ok(())
}

/// Test liking & deleting blogs
pub async fn test_likes_and_deletion(url: Url) -> Result<(), Failed> {
    let client = Client::new();
    let owner = unique_username("owner");
    let owner_token = signup_and_login(&client, &url, &owner, "Owner", "f00 b@r").await?;
    let other = unique_username("other");
    let other_token = signup_and_login(&client, &url, &other, "Other", "f00 b@r").await?;

    let blog = add_blog(&client, &url, &owner_token, "First class tests", "Robert C. Martin", 10)
        .await?;
    let blog_url = url.join(&format!("/api/blogs/{}", blog.id))?;

    let rsp = client
        .put(blog_url.clone())
        .json(&json!({"likes": 11}))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!(11, rsp.json::<BlogRsp>().await?.likes);

    // Only the owner may delete
    let rsp = client
        .delete(blog_url.clone())
        .bearer_auth(&other_token)
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());
    assert_eq!(
        "only the creator can delete a blog",
        rsp.json::<ErrorResponseBody>().await?.error
    );

    let rsp = client.delete(blog_url.clone()).send().await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    let rsp = client
        .delete(blog_url.clone())
        .bearer_auth(&owner_token)
        .send()
        .await?;
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());

    let rsp = client.get(blog_url.clone()).send().await?;
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    let rsp = client
        .put(blog_url)
        .json(&json!({"likes": 12}))
        .send()
        .await?;
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    Ok(())
}

/// Test `GET /api/blogs/stats`
///
/// Expects a server with no blogs on it but ours.
pub async fn test_stats(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    let rsp = client.get(url.join("/api/blogs/stats")?).send().await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let stats = rsp.json::<StatsRsp>().await?;
    assert_eq!(0, stats.total_likes);
    assert!(stats.favorite.is_none());
    assert!(stats.most_blogs.is_none());
    assert!(stats.most_likes.is_none());

    let username = unique_username("stats");
    let token = signup_and_login(&client, &url, &username, "Stats", "f00 b@r").await?;
    for (title, author, likes) in [
        ("React patterns", "Michael Chan", 7),
        ("Go To Statement Considered Harmful", "Edsger W. Dijkstra", 5),
        ("Canonical string reduction", "Edsger W. Dijkstra", 12),
        ("First class tests", "Robert C. Martin", 10),
        ("TDD harms architecture", "Robert C. Martin", 0),
        ("Type wars", "Robert C. Martin", 2),
    ] {
        add_blog(&client, &url, &token, title, author, likes).await?;
    }

    let rsp = client.get(url.join("/api/blogs/stats")?).send().await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let stats = rsp.json::<StatsRsp>().await?;
    assert_eq!(36, stats.total_likes);
    let favorite = stats.favorite.ok_or("no favorite")?;
    assert_eq!("Canonical string reduction", favorite.title);
    assert_eq!(12, favorite.likes);
    assert_eq!(username, favorite.user.ok_or("favorite has no owner")?.username);
    let most_blogs = stats.most_blogs.ok_or("no most_blogs")?;
    assert_eq!("Robert C. Martin", most_blogs.author);
    assert_eq!(3, most_blogs.count);
    let most_likes = stats.most_likes.ok_or("no most_likes")?;
    assert_eq!("Edsger W. Dijkstra", most_likes.author);
    assert_eq!(17, most_likes.likes);

    Ok(())
}
