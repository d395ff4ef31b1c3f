#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method, Request, Response};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use folio_api::config::AppConfig;
use folio_api::state::AppState;
use folio_core::content::model::{Page, Site};
use folio_core::events::bus::EventBus;
use folio_core::store::InMemoryStore;
use folio_core::time::FixedClock;

pub const CRON_SECRET: &str = "test-cron-secret";

/// Everything a test needs to drive the router and inspect the store.
pub struct TestApp {
    pub app: Router,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub site: Site,
    pub page: Page,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 15, 12, 0, 0).unwrap()
}

/// Config with the cron endpoint enabled and the interval loop off.
pub fn test_config() -> AppConfig {
    AppConfig {
        cron_secret: Some(CRON_SECRET.to_string()),
        scheduler_interval_secs: 0,
        ..AppConfig::default()
    }
}

pub fn build_test_app_with(config: AppConfig) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::new(start_time()));
    let site = store.insert_site("acme", "Europe/Berlin");
    let page = store.insert_page(site.id, "/launch", "Launch");

    let state = AppState::new(store.clone(), clock.clone(), config, EventBus::new(64));
    TestApp {
        app: folio_api::app(state),
        store,
        clock,
        site,
        page,
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_with_auth(app: &Router, uri: &str, authorization: Option<&str>) -> Response<Body> {
    let mut builder = Request::builder().method(Method::POST).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
