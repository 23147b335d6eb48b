// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP API handlers for the merchant feed service.
//!
//! - `GET /facebook-rss.xml` - The feed, or a redirect to the static file
//! - `GET /healthz` - Service health check
//! - `GET /metrics` - Prometheus metrics export
//! - `GET /admin/nonce` - Issue an action nonce
//! - `POST /admin/feed/regenerate` - Regenerate the feed now
//! - `POST /admin/feed/delete` - Flush the cache or delete the file
//! - `GET /admin/feed/status` - Current feed state
//! - `POST /hooks/product-saved` - Catalog change notification
//!
//! Admin and hook routes require the admin API key in `x-api-key` or as a
//! bearer token.

use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::delivery::{Delivery, FeedArtifact, FeedDelivery, Validators};
use crate::error::AppError;
use crate::metrics::Metrics;
use crate::model::{ActionResponse, FeedQuery, FeedStatusResponse, NonceQuery, NonceResponse};
use crate::policy::{
    extract_api_key, extract_bearer_token, AdminAuth, NonceVerifier, DELETE_ACTION, FLUSH_ACTION,
    REGENERATE_ACTION,
};

pub const FEED_ROUTE: &str = "/facebook-rss.xml";
pub const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=UTF-8";

#[derive(Clone)]
pub struct AppState {
    pub delivery: Delivery,
    pub metrics: Metrics,
    pub admin: AdminAuth,
    pub nonces: NonceVerifier,
    /// Directory served under `/uploads` in static mode.
    pub upload_dir: Option<PathBuf>,
}

pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route(FEED_ROUTE, get(handle_feed))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/admin/nonce", get(handle_nonce))
        .route("/admin/feed/regenerate", post(handle_regenerate))
        .route("/admin/feed/delete", post(handle_delete))
        .route("/admin/feed/status", get(handle_status))
        .route("/hooks/product-saved", post(handle_product_saved));

    if let (Delivery::Static(_), Some(dir)) = (&state.delivery, &state.upload_dir) {
        router = router.nest_service("/uploads", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "merchant-feed",
        "mode": state.delivery.mode().as_str(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.export()
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let api_key = headers.get("x-api-key").and_then(|h| h.to_str().ok());
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    extract_api_key(api_key).or_else(|| extract_bearer_token(bearer))
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn redirect(location: &str) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(location)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid redirect target: {}", e)))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

fn with_validators(mut response: Response, validators: &Validators) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&validators.last_modified_header()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&validators.etag_header()) {
        headers.insert(header::ETAG, value);
    }
    response
}

/// Serve the feed
pub async fn handle_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Response, AppError> {
    state.metrics.record_request();

    let cached = match &state.delivery {
        Delivery::Cached(cached) => cached,
        Delivery::Static(file) => {
            return match file.ensure_fresh().await? {
                FeedArtifact::File { url, .. } => redirect(&url),
                FeedArtifact::Inline { .. } => Err(AppError::Internal(anyhow::anyhow!(
                    "static delivery returned an inline feed"
                ))),
            };
        }
    };

    if query.flush.as_deref().is_some_and(|flag| !flag.is_empty() && flag != "0") {
        state.admin.authorize(presented_key(&headers))?;
        state.nonces.require(query.nonce.as_deref(), FLUSH_ACTION)?;
        cached.invalidate().await?;
        return redirect(FEED_ROUTE);
    }

    let validators = cached.validators().await;
    if validators.matches(
        header_str(&headers, header::IF_MODIFIED_SINCE),
        header_str(&headers, header::IF_NONE_MATCH),
    ) {
        state.metrics.record_not_modified();
        let response = StatusCode::NOT_MODIFIED.into_response();
        return Ok(with_validators(response, &validators));
    }

    match cached.ensure_fresh().await? {
        FeedArtifact::Inline {
            body,
            last_modified,
            etag,
        } => {
            let response = (
                [(header::CONTENT_TYPE, RSS_CONTENT_TYPE)],
                Body::from(body.to_string()),
            )
                .into_response();
            Ok(with_validators(
                response,
                &Validators {
                    last_modified,
                    etag,
                },
            ))
        }
        FeedArtifact::File { url, .. } => redirect(&url),
    }
}

/// Issue a nonce for an admin action
pub async fn handle_nonce(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NonceQuery>,
) -> Result<Json<NonceResponse>, AppError> {
    state.admin.authorize(presented_key(&headers))?;

    let action = query.action.trim();
    if action.is_empty() {
        return Err(AppError::bad_request("action query parameter is required"));
    }

    Ok(Json(NonceResponse {
        action: action.to_string(),
        nonce: state.nonces.create(action),
    }))
}

/// Regenerate the feed immediately
pub async fn handle_regenerate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<ActionResponse>, AppError> {
    state.admin.authorize(presented_key(&headers))?;
    state
        .nonces
        .require(query.nonce.as_deref(), REGENERATE_ACTION)?;

    let delivery = state.delivery.as_dyn();
    delivery.regenerate().await?;
    tracing::info!(mode = delivery.mode().as_str(), "feed regenerated by admin");

    Ok(Json(ActionResponse {
        status: "regenerated",
        feed_url: Some(delivery.feed_url()),
    }))
}

/// Flush the cached feed or delete the static file
pub async fn handle_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<ActionResponse>, AppError> {
    state.admin.authorize(presented_key(&headers))?;
    state.nonces.require(query.nonce.as_deref(), DELETE_ACTION)?;

    state.delivery.as_dyn().invalidate().await?;

    Ok(Json(ActionResponse {
        status: "deleted",
        feed_url: None,
    }))
}

/// Report the current feed state
pub async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FeedStatusResponse>, AppError> {
    state.admin.authorize(presented_key(&headers))?;

    let (exists, last_generated, feed_url) = match &state.delivery {
        Delivery::Cached(cached) => {
            let generated_at = cached.generated_at().await;
            (generated_at.is_some(), generated_at, cached.feed_url())
        }
        Delivery::Static(file) => {
            let status = file.status().await;
            (status.exists, status.modified, status.url)
        }
    };

    Ok(Json(FeedStatusResponse {
        mode: state.delivery.mode().as_str(),
        feed_url,
        exists,
        last_generated,
        fingerprint: state.delivery.fingerprint().to_string(),
    }))
}

/// A product changed in the catalog
pub async fn handle_product_saved(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ActionResponse>, AppError> {
    state.admin.authorize(presented_key(&headers))?;

    let delivery = state.delivery.as_dyn();
    let status = match &state.delivery {
        Delivery::Cached(cached) => {
            cached.invalidate().await?;
            "invalidated"
        }
        Delivery::Static(file) => {
            file.regenerate().await?;
            "regenerated"
        }
    };
    tracing::debug!(status, "processed product change notification");

    Ok(Json(ActionResponse {
        status,
        feed_url: Some(delivery.feed_url()),
    }))
}
