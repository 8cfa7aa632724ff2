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

//! # The blogs API
//!
//! Anyone may list, read & like blogs. Adding a blog requires an authenticated user, who then
//! owns it & is the only one who may delete it.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use axum::{
    Extension, Json, Router,
    extract::{
        Path, State,
        rejection::{ExtensionRejection, JsonRejection},
    },
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::get,
};
use itertools::Itertools;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{debug, error, info};

use crate::{
    authn::{self, AuthnScheme, check_token},
    counter_add,
    entities::{Blog, BlogId, User, UserId, Username},
    gauge_set,
    http::{Bloglist, ErrorResponseBody},
    metrics::{self, Sort},
    signing_keys::SigningKeys,
    stats::{self, AuthorBlogs, AuthorLikes},
    storage::{self, Backend as StorageBackend},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add blog: {source}"))]
    AddBlog { source: storage::Error },
    #[snafu(display("Failed to retrieve blogs: {source}"))]
    AllBlogs { source: storage::Error },
    #[snafu(display("Failed to retrieve users: {source}"))]
    AllUsers { source: storage::Error },
    #[snafu(display("{text} is not a valid blog id: {source}"))]
    BadBlogId {
        text: String,
        source: uuid::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad request body: {source}"))]
    BadRequestBody {
        source: JsonRejection,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to lookup blog {id}: {source}"))]
    BlogLookup { id: BlogId, source: storage::Error },
    #[snafu(display("Failed to delete blog {id}: {source}"))]
    DeleteBlog { id: BlogId, source: storage::Error },
    #[snafu(display("Invalid credentials: {source}"))]
    InvalidCredentials { source: authn::Error },
    #[snafu(display("The field {field} is required"))]
    MissingField {
        field: &'static str,
        backtrace: Backtrace,
    },
    #[snafu(display("Multiple Authorization headers were supplied; only one is accepted."))]
    MultipleAuthnHeaders,
    #[snafu(display("No Authorization header"))]
    NoAuthToken { backtrace: Backtrace },
    #[snafu(display("No blog with id {id}"))]
    NoSuchBlog { id: BlogId, backtrace: Backtrace },
    #[snafu(display("This request requires an authenticated user"))]
    NoUser { backtrace: Backtrace },
    #[snafu(display("{username} does not own blog {id}"))]
    NotOwner {
        username: Username,
        id: BlogId,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to update likes on blog {id}: {source}"))]
    UpdateLikes { id: BlogId, source: storage::Error },
    #[snafu(display("Failed to lookup user {id}: {source}"))]
    UserLookup { id: UserId, source: storage::Error },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadBlogId { .. } => (StatusCode::BAD_REQUEST, "malformatted id".to_owned()),
            Error::BadRequestBody { source, .. } => (StatusCode::BAD_REQUEST, source.body_text()),
            Error::MissingField { field, .. } => {
                (StatusCode::BAD_REQUEST, format!("{} is required", field))
            }
            Error::MultipleAuthnHeaders => (
                StatusCode::BAD_REQUEST,
                "Multiple authorization headers".to_owned(),
            ),
            Error::NoSuchBlog { id, .. } => {
                (StatusCode::NOT_FOUND, format!("No blog with id {}", id))
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authorization failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::InvalidCredentials { .. } | Error::NoAuthToken { .. } | Error::NoUser { .. } => (
                StatusCode::UNAUTHORIZED,
                "token missing or invalid".to_owned(),
            ),
            Error::NotOwner { .. } => (
                StatusCode::UNAUTHORIZED,
                "only the creator can delete a blog".to_owned(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddBlog { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to add blog: {source}"),
            ),
            Error::AllBlogs { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to retrieve blogs: {source}"),
            ),
            Error::AllUsers { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to retrieve users: {source}"),
            ),
            Error::BlogLookup { id, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to lookup blog {id}: {source}"),
            ),
            Error::DeleteBlog { id, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to delete blog {id}: {source}"),
            ),
            Error::UpdateLikes { id, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update blog {id}: {source}"),
            ),
            Error::UserLookup { id, source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to lookup user {id}: {source}"),
            ),
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

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     Response representations                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The bits of a [User] we're willing to show alongside one of their blogs
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: Username,
    pub name: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id(),
            username: user.username().clone(),
            name: user.name().to_owned(),
        }
    }
}

/// A [Blog], with its owner filled-in
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BlogRsp {
    pub id: BlogId,
    pub title: String,
    pub author: String,
    pub url: String,
    pub likes: u64,
    pub user: Option<UserSummary>,
}

impl BlogRsp {
    fn new(blog: &Blog, user: Option<&User>) -> BlogRsp {
        BlogRsp {
            id: blog.id(),
            title: blog.title().to_owned(),
            author: blog.author().to_owned(),
            url: blog.url().to_owned(),
            likes: blog.likes(),
            user: user.map(UserSummary::from),
        }
    }
}

async fn blog_rsp(storage: &(dyn StorageBackend + Send + Sync), blog: &Blog) -> Result<BlogRsp> {
    let user = storage
        .user_for_id(&blog.user())
        .await
        .context(UserLookupSnafu { id: blog.user() })?;
    Ok(BlogRsp::new(blog, user.as_ref()))
}

fn parse_blog_id(text: &str) -> Result<BlogId> {
    BlogId::from_str(text).context(BadBlogIdSnafu { text })
}

async fn lookup_blog(storage: &(dyn StorageBackend + Send + Sync), id: &BlogId) -> Result<Blog> {
    storage
        .blog_for_id(id)
        .await
        .context(BlogLookupSnafu { id: *id })?
        .context(NoSuchBlogSnafu { id: *id })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Authorization                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.auth.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.auth.failures", Sort::IntegralCounter) }

/// Authenticate a request to the blogs API
///
/// Insert the [User] into the request's extensions on success. Requests with no credentials at
/// all are let through, so handlers can't use the [Extension] extractor directly (we'd 500 if the
/// handler is invoked un-authenticated); they take a `Result<Extension<User>, _>` instead.
///
/// This is function-based axum [middleware].
///
/// [middleware]: https://docs.rs/axum/latest/axum/middleware/index.html
async fn authenticate(
    State(state): State<Arc<Bloglist>>,
    headers: axum::http::HeaderMap,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    async fn authenticate1(
        headers: axum::http::HeaderMap,
        storage: &(dyn StorageBackend + Send + Sync),
        keys: &SigningKeys,
        issuer: &str,
    ) -> Result<User> {
        let scheme = match headers
            .get_all("authorization")
            .into_iter()
            .at_most_one()
            .map_err(|_| Error::MultipleAuthnHeaders)?
        {
            Some(header_val) => {
                AuthnScheme::try_from(header_val).context(InvalidCredentialsSnafu)?
            }
            None => {
                return NoAuthTokenSnafu.fail();
            }
        };

        match scheme {
            AuthnScheme::BearerToken(token_string) => {
                check_token(storage, &token_string, keys, issuer)
                    .await
                    .context(InvalidCredentialsSnafu)
            }
        }
    }

    match authenticate1(
        headers,
        state.storage.as_ref(),
        &state.signing_keys,
        &state.issuer,
    )
    .await
    {
        Ok(user) => {
            debug!("bloglist authenticated user {}", user.id());
            request.extensions_mut().insert(user);
            counter_add!(state.instruments, "blogs.auth.successes", 1, &[]);
            next.run(request).await
        }
        Err(Error::NoAuthToken { .. }) => next.run(request).await,
        Err(err) => {
            info!("bloglist failed to authenticate this request: {}", err);
            counter_add!(state.instruments, "blogs.auth.failures", 1, &[]);
            err.into_response()
        }
    }
}

/// Pull the authenticated [User] out of the request, or fail
fn require_user(user: StdResult<Extension<User>, ExtensionRejection>) -> Result<User> {
    user.map(|Extension(user)| user)
        .map_err(|_| NoUserSnafu.build())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `GET /api/blogs`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.list.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.list.failures", Sort::IntegralCounter) }

/// List all blogs, each with their owner filled-in
async fn all_blogs(State(state): State<Arc<Bloglist>>) -> axum::response::Response {
    async fn all_blogs1(storage: &(dyn StorageBackend + Send + Sync)) -> Result<Vec<BlogRsp>> {
        let blogs = storage.all_blogs().await.context(AllBlogsSnafu)?;
        let users = storage.all_users().await.context(AllUsersSnafu)?;
        let users: HashMap<UserId, &User> = users.iter().map(|u| (u.id(), u)).collect();
        Ok(blogs
            .iter()
            .map(|blog| BlogRsp::new(blog, users.get(&blog.user()).copied()))
            .collect())
    }

    match all_blogs1(state.storage.as_ref()).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "blogs.list.successful", 1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "blogs.list.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `POST /api/blogs`                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.creations.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.creations.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewBlogReq {
    pub title: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub likes: Option<u64>,
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .context(MissingFieldSnafu { field })
}

/// Add a blog on behalf of the authenticated user
///
/// `title` & `url` are required; `author` defaults to the empty string & `likes` to zero.
async fn create_blog(
    State(state): State<Arc<Bloglist>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    body: StdResult<Json<NewBlogReq>, JsonRejection>,
) -> axum::response::Response {
    async fn create_blog1(
        storage: &(dyn StorageBackend + Send + Sync),
        user: StdResult<Extension<User>, ExtensionRejection>,
        body: StdResult<Json<NewBlogReq>, JsonRejection>,
    ) -> Result<BlogRsp> {
        let user = require_user(user)?;
        let Json(req) = body.context(BadRequestBodySnafu)?;
        let blog = Blog::new(
            required(&req.title, "title")?,
            req.author.as_deref().unwrap_or_default(),
            required(&req.url, "url")?,
            req.likes.unwrap_or(0),
            &user.id(),
        );
        storage.add_blog(&blog).await.context(AddBlogSnafu)?;
        Ok(BlogRsp::new(&blog, Some(&user)))
    }

    match create_blog1(state.storage.as_ref(), user, body).await {
        Ok(rsp) => {
            info!("Created blog {}", rsp.id);
            counter_add!(state.instruments, "blogs.creations.successful", 1, &[]);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "blogs.creations.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `GET /api/blogs/{id}`                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.lookups.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.lookups.failures", Sort::IntegralCounter) }

async fn get_blog(
    State(state): State<Arc<Bloglist>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn get_blog1(storage: &(dyn StorageBackend + Send + Sync), id: &str) -> Result<BlogRsp> {
        let blog = lookup_blog(storage, &parse_blog_id(id)?).await?;
        blog_rsp(storage, &blog).await
    }

    match get_blog1(state.storage.as_ref(), &id).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "blogs.lookups.successful", 1, &[]);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "blogs.lookups.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    `DELETE /api/blogs/{id}`                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.deletions.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.deletions.failures", Sort::IntegralCounter) }

/// Delete a blog; only its owner may do so
async fn delete_blog(
    State(state): State<Arc<Bloglist>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<String>,
) -> axum::response::Response {
    async fn delete_blog1(
        storage: &(dyn StorageBackend + Send + Sync),
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &str,
    ) -> Result<()> {
        let user = require_user(user)?;
        let id = parse_blog_id(id)?;
        let blog = lookup_blog(storage, &id).await?;
        ensure!(
            blog.user() == user.id(),
            NotOwnerSnafu {
                username: user.username().clone(),
                id
            }
        );
        // Someone may have beaten us to it
        ensure!(
            storage
                .delete_blog(&id)
                .await
                .context(DeleteBlogSnafu { id })?,
            NoSuchBlogSnafu { id }
        );
        Ok(())
    }

    match delete_blog1(state.storage.as_ref(), user, &id).await {
        Ok(_) => {
            info!("Deleted blog {}", id);
            counter_add!(state.instruments, "blogs.deletions.successful", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "blogs.deletions.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `PUT /api/blogs/{id}`                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.likes.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.likes.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LikesReq {
    pub likes: u64,
}

/// Set the like count on a blog
async fn update_likes(
    State(state): State<Arc<Bloglist>>,
    Path(id): Path<String>,
    body: StdResult<Json<LikesReq>, JsonRejection>,
) -> axum::response::Response {
    async fn update_likes1(
        storage: &(dyn StorageBackend + Send + Sync),
        id: &str,
        body: StdResult<Json<LikesReq>, JsonRejection>,
    ) -> Result<BlogRsp> {
        let id = parse_blog_id(id)?;
        let Json(req) = body.context(BadRequestBodySnafu)?;
        let blog = storage
            .update_likes(&id, req.likes)
            .await
            .context(UpdateLikesSnafu { id })?
            .context(NoSuchBlogSnafu { id })?;
        blog_rsp(storage, &blog).await
    }

    match update_likes1(state.storage.as_ref(), &id, body).await {
        Ok(rsp) => {
            counter_add!(
                state.instruments,
                "blogs.likes.successful",
                1,
                &[KeyValue::new("blog", rsp.id.to_string())]
            );
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "blogs.likes.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     `GET /api/blogs/stats`                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs.stats.successful", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.stats.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs.stats.total_likes", Sort::IntegralGauge) }

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StatsRsp {
    pub total_likes: u64,
    pub favorite: Option<BlogRsp>,
    pub most_blogs: Option<AuthorBlogs>,
    pub most_likes: Option<AuthorLikes>,
}

/// Summarize the entire blog list
async fn blog_stats(State(state): State<Arc<Bloglist>>) -> axum::response::Response {
    async fn blog_stats1(storage: &(dyn StorageBackend + Send + Sync)) -> Result<StatsRsp> {
        let blogs = storage.all_blogs().await.context(AllBlogsSnafu)?;
        let favorite = match stats::favorite(&blogs) {
            Ok(blog) => Some(blog_rsp(storage, blog).await?),
            // The only failure mode is an empty list
            Err(_) => None,
        };
        Ok(StatsRsp {
            total_likes: stats::total_likes(&blogs),
            favorite,
            most_blogs: stats::most_blogs(&blogs),
            most_likes: stats::most_likes(&blogs),
        })
    }

    match blog_stats1(state.storage.as_ref()).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "blogs.stats.successful", 1, &[]);
            gauge_set!(
                state.instruments,
                "blogs.stats.total_likes",
                rsp.total_likes,
                &[]
            );
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "blogs.stats.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the blogs API
pub fn make_router(state: Arc<Bloglist>) -> Router<Arc<Bloglist>> {
    Router::new()
        .route("/", get(all_blogs).post(create_blog))
        .route("/stats", get(blog_stats))
        .route(
            "/{id}",
            get(get_blog).delete(delete_blog).put(update_likes),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        // All responses are JSON; add the appropriate Content-Type header (but leave the existing
        // Content-Type header should a handler set it specially).
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
