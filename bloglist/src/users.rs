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

//! # The users API
//!
//! Registration, the user list & logging-in (which vends the access tokens the blogs API
//! expects).

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use opentelemetry::KeyValue;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, IntoError, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    authn::{self, check_password},
    counter_add,
    entities::{self, Blog, BlogId, User, UserId, Username},
    http::{Bloglist, ErrorResponseBody},
    metrics::{self, Sort},
    peppers::{self, Peppers},
    signing_keys,
    storage::{self, Backend as StorageBackend},
    token::{self, mint_token},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Request body rejected: {source}"))]
    Body {
        source: JsonRejection,
        backtrace: Backtrace,
    },
    #[snafu(display("{username:?} won't do as a username: {source}"))]
    InvalidUsername {
        username: String,
        source: entities::Error,
    },
    #[snafu(display("Couldn't list blogs: {source}"))]
    ListBlogs { source: storage::Error },
    #[snafu(display("Couldn't list users: {source}"))]
    ListUsers { source: storage::Error },
    #[snafu(display("Login refused: {source}"))]
    LoginFailed { source: authn::Error },
    #[snafu(display("Login as {username:?} refused: {source}"))]
    LoginName {
        username: String,
        source: entities::Error,
    },
    #[snafu(display("Couldn't mint a token for {username}: {source}"))]
    Mint {
        username: Username,
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
    #[snafu(display("Couldn't create the user: {source}"))]
    NewUser { source: entities::Error },
    #[snafu(display("No pepper to hash with: {source}"))]
    NoPepper { source: peppers::Error },
    #[snafu(display("No key to sign tokens with: {source}"))]
    NoSigningKey {
        source: signing_keys::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Couldn't store the new user: {source}"))]
    StoreUser { source: storage::Error },
    #[snafu(display("{username} is taken"))]
    UsernameClaimed { username: Username },
}

impl Error {
    /// Caller mistakes get a specific message; failed logins get the same message however they
    /// failed; our own failures get a 500
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        use StatusCode as S;
        match self {
            Error::Body { source, .. } => (S::BAD_REQUEST, source.body_text()),
            Error::InvalidUsername { username, .. } => (
                S::BAD_REQUEST,
                format!(
                    "{username} is not a valid username; usernames are 3-64 characters, begin \
                     with a letter, and contain only letters, digits, '-', '_' and '.'"
                ),
            ),
            Error::UsernameClaimed { username } => {
                (S::BAD_REQUEST, format!("{username} is already claimed"))
            }
            Error::NewUser {
                source:
                    source @ (entities::Error::ShortPassword { .. }
                    | entities::Error::PaddedPassword { .. }),
            } => (S::BAD_REQUEST, source.to_string()),

            Error::LoginFailed {
                source: authn::Error::Lookup { source, .. },
            } => (S::INTERNAL_SERVER_ERROR, format!("user lookup failed: {source}")),
            Error::LoginFailed { .. } | Error::LoginName { .. } => (
                S::UNAUTHORIZED,
                "invalid username or password".to_owned(),
            ),

            Error::NoSigningKey { .. } => (
                S::INTERNAL_SERVER_ERROR,
                "no token signing keys are configured".to_owned(),
            ),
            Error::NoPepper { .. } => (
                S::INTERNAL_SERVER_ERROR,
                "no password peppers are configured".to_owned(),
            ),
            err @ (Error::ListBlogs { .. }
            | Error::ListUsers { .. }
            | Error::Mint { .. }
            | Error::NewUser { .. }
            | Error::StoreUser { .. }) => (S::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// The bits of a [Blog] we show alongside its owner
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BlogSummary {
    pub id: BlogId,
    pub url: String,
    pub title: String,
    pub author: String,
}

impl From<&Blog> for BlogSummary {
    fn from(blog: &Blog) -> Self {
        BlogSummary {
            id: blog.id(),
            url: blog.url().to_owned(),
            title: blog.title().to_owned(),
            author: blog.author().to_owned(),
        }
    }
}

/// A [User], with their blogs filled-in (& their password hash left out)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UserRsp {
    pub id: UserId,
    pub username: Username,
    pub name: String,
    pub blogs: Vec<BlogSummary>,
}

impl UserRsp {
    fn new<'a>(user: &User, blogs: impl Iterator<Item = &'a Blog>) -> UserRsp {
        UserRsp {
            id: user.id(),
            username: user.username().clone(),
            name: user.name().to_owned(),
            blogs: blogs.map(BlogSummary::from).collect(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `POST /api/users`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("user.signups.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("user.signups.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
pub struct SignupReq {
    username: String,
    #[serde(default)]
    name: String,
    password: SecretString,
}

/// Register as a new user
///
/// Parameters:
///
/// - username: bloglist usernames begin with a letter & continue with alphanumeric characters and
///   '-', '_' & '.'; the username must be unique
///
/// - name: the user's display name; arbitrary UTF-8 (optional, defaults to nothing)
///
/// - password: at least three characters, with no leading or trailing whitespace; bloglist stores
///   only an Argon2id hash of the salted & peppered password
///
/// There is no authentication on this method.
async fn signup(
    State(state): State<Arc<Bloglist>>,
    body: StdResult<Json<SignupReq>, JsonRejection>,
) -> axum::response::Response {
    async fn signup1(
        storage: &(dyn StorageBackend + Send + Sync),
        peppers: &Peppers,
        body: StdResult<Json<SignupReq>, JsonRejection>,
    ) -> Result<UserRsp> {
        let Json(req) = body.context(BodySnafu)?;
        let username = Username::new(&req.username).context(InvalidUsernameSnafu {
            username: req.username.clone(),
        })?;
        let (pepper_ver, pepper_key) = peppers.current_pepper().context(NoPepperSnafu)?;
        let user = User::new(&pepper_ver, &pepper_key, &username, &req.name, &req.password)
            .context(NewUserSnafu)?;
        match storage.add_user(&user).await {
            Ok(_) => Ok(UserRsp::new(&user, std::iter::empty())),
            Err(storage::Error::UsernameClaimed { username }) => {
                UsernameClaimedSnafu { username }.fail()
            }
            Err(err) => Err(StoreUserSnafu.into_error(err)),
        }
    }

    match signup1(state.storage.as_ref(), &state.pepper, body).await {
        Ok(rsp) => {
            info!("Created user {}", rsp.username);
            counter_add!(state.instruments, "user.signups.successful", 1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "user.signups.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `GET /api/users`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("user.list.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("user.list.failures", Sort::IntegralCounter) }

/// List all users, each with their blogs filled-in
async fn all_users(State(state): State<Arc<Bloglist>>) -> axum::response::Response {
    async fn all_users1(storage: &(dyn StorageBackend + Send + Sync)) -> Result<Vec<UserRsp>> {
        let users = storage.all_users().await.context(ListUsersSnafu)?;
        let blogs = storage.all_blogs().await.context(ListBlogsSnafu)?;
        let mut by_user: HashMap<UserId, Vec<&Blog>> = HashMap::new();
        blogs
            .iter()
            .for_each(|blog| by_user.entry(blog.user()).or_default().push(blog));
        Ok(users
            .iter()
            .map(|user| {
                UserRsp::new(
                    user,
                    by_user
                        .get(&user.id())
                        .map(|blogs| blogs.as_slice())
                        .unwrap_or_default()
                        .iter()
                        .copied(),
                )
            })
            .collect())
    }

    match all_users1(state.storage.as_ref()).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "user.list.successful", 1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "user.list.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `POST /api/login`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("user.logins.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("user.logins.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
pub struct LoginReq {
    username: String,
    password: SecretString,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRsp {
    pub token: String,
    pub username: Username,
    pub name: String,
}

/// Trade a username & password for an access token
///
/// The token expires after the configured lifetime; present it as `Authorization: Bearer ...`.
async fn login(
    State(state): State<Arc<Bloglist>>,
    body: StdResult<Json<LoginReq>, JsonRejection>,
) -> axum::response::Response {
    async fn login1(
        state: &Bloglist,
        body: StdResult<Json<LoginReq>, JsonRejection>,
    ) -> Result<LoginRsp> {
        let Json(req) = body.context(BodySnafu)?;
        let username = Username::new(&req.username).context(LoginNameSnafu {
            username: req.username.clone(),
        })?;
        let user = check_password(
            state.storage.as_ref(),
            &state.pepper,
            &username,
            req.password,
        )
        .await
        .context(LoginFailedSnafu)?;

        let (keyid, signing_key) = state.signing_keys.current().context(NoSigningKeySnafu)?;
        let token = mint_token(
            &username,
            &keyid,
            &signing_key,
            &state.issuer,
            &state.token_lifetime,
        )
        .context(MintSnafu {
            username: username.clone(),
        })?;
        Ok(LoginRsp {
            token,
            username,
            name: user.name().to_owned(),
        })
    }

    match login1(&state, body).await {
        Ok(rsp) => {
            info!("Logged-in user {}", rsp.username);
            counter_add!(
                state.instruments,
                "user.logins.successful",
                1,
                &[KeyValue::new("username", rsp.username.to_string())]
            );
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "user.logins.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the users API
///
/// The returned [Router] will presumably be nested under `/api`.
pub fn make_router(state: Arc<Bloglist>) -> Router<Arc<Bloglist>> {
    Router::new()
        .route("/users", get(all_users).post(signup))
        .route("/login", post(login))
        // JSON unless a handler says otherwise
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    use axum::body::Body;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::{
        http::{
            make_world_router,
            test::{json_body, test_state},
        },
        token::verify_token,
    };

    fn post(uri: &str, body: serde_json::Value) -> axum::extract::Request {
        axum::extract::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn signup_and_login() {
        let state = test_state();
        let router = make_world_router(state.clone());

        let rsp = router
            .clone()
            .oneshot(post(
                "/api/users",
                json!({"username": "mluukkai", "name": "Matti Luukkainen", "password": "salainen"}),
            ))
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::CREATED);
        let created: UserRsp = serde_json::from_value(json_body(rsp).await).unwrap();
        assert_eq!(created.username.to_string(), "mluukkai");
        assert_eq!(created.name, "Matti Luukkainen");
        assert!(created.blogs.is_empty());

        // Claimed
        let rsp = router
            .clone()
            .oneshot(post(
                "/api/users",
                json!({"username": "mluukkai", "name": "Imposter", "password": "salainen"}),
            ))
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);

        let rsp = router
            .clone()
            .oneshot(post(
                "/api/login",
                json!({"username": "mluukkai", "password": "salainen"}),
            ))
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        let login: LoginRsp = serde_json::from_value(json_body(rsp).await).unwrap();
        assert_eq!(login.name, "Matti Luukkainen");
        assert_eq!(
            verify_token(&login.token, &state.signing_keys, &state.issuer).unwrap(),
            login.username
        );

        for body in [
            json!({"username": "mluukkai", "password": "wrong"}),
            json!({"username": "nobody", "password": "salainen"}),
            json!({"username": "x", "password": "salainen"}),
        ] {
            let rsp = router.clone().oneshot(post("/api/login", body)).await.unwrap();
            assert_eq!(rsp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                json_body(rsp).await,
                json!({"error": "invalid username or password"})
            );
        }
    }

    #[tokio::test]
    async fn invalid_signups() {
        let router = make_world_router(test_state());
        for body in [
            json!({"username": "ab", "name": "Too Short", "password": "salainen"}),
            json!({"username": "9lives", "name": "Digit", "password": "salainen"}),
            json!({"username": "shorty", "name": "Short Password", "password": "ab"}),
            json!({"username": "spacey", "name": "Spaces", "password": " salainen"}),
            json!({"username": "nopass", "name": "No Password"}),
        ] {
            let rsp = router
                .clone()
                .oneshot(post("/api/users", body))
                .await
                .unwrap();
            assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn list_users_with_blogs() {
        let state = test_state();
        let router = make_world_router(state.clone());

        let (version, pepper) = state.pepper.current_pepper().unwrap();
        let alice = User::new(
            &version,
            &pepper,
            &Username::new("alice").unwrap(),
            "Alice",
            &SecretString::from("sekrit"),
        )
        .unwrap();
        let bob = User::new(
            &version,
            &pepper,
            &Username::new("bob").unwrap(),
            "Bob",
            &SecretString::from("sekrit"),
        )
        .unwrap();
        state.storage.add_user(&alice).await.unwrap();
        state.storage.add_user(&bob).await.unwrap();
        let blog = Blog::new("A", "Someone", "https://example.com/a", 1, &alice.id());
        state.storage.add_blog(&blog).await.unwrap();

        let rsp = router
            .oneshot(
                axum::extract::Request::builder()
                    .uri("/api/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        let users: Vec<UserRsp> = serde_json::from_value(json_body(rsp).await).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, alice.id());
        assert_eq!(users[0].blogs, vec![BlogSummary::from(&blog)]);
        assert_eq!(users[1].id, bob.id());
        assert!(users[1].blogs.is_empty());
    }
}
