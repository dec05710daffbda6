//! Web API - HTTP control surface
//!
//! ## Responsibilities
//!
//! - `/status`: every control value as JSON
//! - `/control`: set one named control from query parameters
//! - `/capture`: one still frame as `image/jpeg`
//! - `/reset`: drop all stream clients and reinitialize the sensor
//! - `/`: minimal viewer page
//!
//! The live `/stream` endpoint never reaches this router; the acceptor
//! peels those connections off before HTTP parsing and hands the raw
//! socket to the stream registry.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::state::AppState;

pub mod acceptor;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>camstreamd</title>
<style>body{background:#202020;color:#d0d0d0;font-family:sans-serif;text-align:center}img{max-width:100%}</style>
</head>
<body>
<h1>camstreamd</h1>
<img src="/stream" alt="live stream">
<p><a href="/capture">still frame</a> | <a href="/status">status</a></p>
</body>
</html>
"#;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/control", get(control))
        .route("/capture", get(capture))
        .route("/reset", get(reset))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>> {
    Ok(Json(state.cache.status_json()?))
}

#[derive(Debug, Deserialize)]
struct ControlParams {
    var: String,
    val: i32,
}

async fn control(
    State(state): State<AppState>,
    Query(params): Query<ControlParams>,
) -> Result<StatusCode> {
    state.cache.ctrl_set(&params.var, params.val)?;
    // an fps change moves the next frame deadline
    state.wake.notify_one();
    Ok(StatusCode::OK)
}

async fn capture(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let data: Bytes = {
        let guard = state.cache.grab(Instant::now())?;
        guard.data().clone()
    };
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (
                header::CONTENT_DISPOSITION,
                "inline; filename=capture.jpg",
            ),
        ],
        data,
    ))
}

async fn reset(State(state): State<AppState>) -> Result<StatusCode> {
    // boot out all clients before touching the sensor
    state.registry.purge()?;
    state.cache.reset()?;
    Ok(StatusCode::OK)
}
