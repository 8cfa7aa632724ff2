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

//! # Serving HTTP
//!
//! The state every handler shares, the JSON shape of an error, and the top-level [Router]:
//!
//! | path            | what                                     |
//! |-----------------|------------------------------------------|
//! | `/healthcheck`  | liveness; always "GOOD"                  |
//! | `/metrics`      | Prometheus exposition of our OTel meters |
//! | `/api/blogs...` | [crate::blogs]                           |
//! | `/api/...`      | [crate::users] (signup, listing & login) |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Duration;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::error;

use crate::{
    blogs, counter_add,
    metrics::{self, Instruments, Sort},
    peppers::Peppers,
    signing_keys::SigningKeys,
    storage::Backend as StorageBackend,
    users,
};

/// The body of every non-2xx response: `{"error": "..."}`
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl IntoResponse for ErrorResponseBody {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Everything a handler might need
pub struct Bloglist {
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub registry: prometheus::Registry,
    pub instruments: Arc<Instruments>,
    pub pepper: Peppers,
    pub token_lifetime: Duration,
    pub signing_keys: SigningKeys,
    /// Names us in the access tokens we mint
    pub issuer: String,
}

inventory::submit! { metrics::Registration::new("http.requests", Sort::IntegralCounter) }

/// Count every request by method, route template & status
///
/// The route template (`/api/blogs/{id}`) rather than the path keeps the label set bounded.
async fn count_requests(State(state): State<Arc<Bloglist>>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_owned(), |path| path.as_str().to_owned());
    let rsp = next.run(request).await;
    counter_add!(
        state.instruments,
        "http.requests",
        1,
        &[
            KeyValue::new("method", method),
            KeyValue::new("route", route),
            KeyValue::new("status", i64::from(rsp.status().as_u16())),
        ]
    );
    rsp
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Bloglist>>) -> Response {
    match prometheus::TextEncoder::new().encode_to_string(&state.registry.gather()) {
        Ok(text) => text.into_response(),
        Err(err) => {
            error!("Couldn't render metrics: {err:?}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponseBody {
                    error: format!("couldn't render metrics: {err}"),
                },
            )
                .into_response()
        }
    }
}

/// Assemble the public-facing [Router]
///
/// Requests pass through the layers top-to-bottom: each gets an `x-request-id` (a fresh UUID,
/// unless the caller supplied one), is traced & counted, and has its ID echoed on the response.
pub fn make_world_router(state: Arc<Bloglist>) -> Router {
    let layers = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .propagate_x_request_id();
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .nest("/api/blogs", blogs::make_router(state.clone()))
        .nest("/api", users::make_router(state.clone()))
        .route_layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(layers)
        .with_state(state)
}
