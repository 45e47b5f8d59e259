// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scraprs::engines::http_engine::HttpEngine;
use scraprs::engines::router::EngineRouter;
use scraprs::engines::traits::{EngineError, FetchRequest, ScraperEngine};
use scraprs::pipeline::FetchPipeline;
use scraprs::politeness::{HostLimiter, RetryPolicy};
use scraprs::utils::robots::RobotsChecker;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        enable_jitter: false,
        ..Default::default()
    }
}

fn pipeline() -> FetchPipeline {
    let engines: Vec<Arc<dyn ScraperEngine>> = vec![Arc::new(HttpEngine)];
    FetchPipeline::new(
        Arc::new(EngineRouter::new(engines)),
        Arc::new(RobotsChecker::new(None)),
        Arc::new(HostLimiter::unlimited()),
    )
    .with_retry_policy(fast_retry())
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_successful_fetch_first_attempt() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>fine</body></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = pipeline()
        .fetch(FetchRequest::new(format!("{}/ok", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert!(response.content.contains("fine"));
}

#[tokio::test]
async fn test_server_errors_retried_until_exhausted() {
    let server = MockServer::start().await;
    mount_robots(&server, "").await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // max_retries bounds the total number of attempts
        .mount(&server)
        .await;

    let response = pipeline()
        .fetch(FetchRequest::new(format!("{}/flaky", server.uri())))
        .await
        .unwrap();

    // The terminal 5xx response is handed back, not hidden
    assert_eq!(response.status_code, 503);
}

#[tokio::test]
async fn test_recovery_after_transient_error() {
    let server = MockServer::start().await;
    mount_robots(&server, "").await;

    // First two hits fail, the third succeeds
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let response = pipeline()
        .fetch(FetchRequest::new(format!("{}/recovering", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.content, "recovered");
}

#[tokio::test]
async fn test_disallowed_url_never_reaches_engine() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /private\n").await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = pipeline()
        .fetch(FetchRequest::new(format!("{}/private/secret", server.uri())))
        .await;

    assert!(matches!(result, Err(EngineError::Disallowed(_))));
}

#[tokio::test]
async fn test_robots_can_be_disabled() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /\n").await;
    Mock::given(method("GET"))
        .and(path("/anything"))
        .respond_with(ResponseTemplate::new(200).set_body_string("content"))
        .expect(1)
        .mount(&server)
        .await;

    let engines: Vec<Arc<dyn ScraperEngine>> = vec![Arc::new(HttpEngine)];
    let pipeline = FetchPipeline::new(
        Arc::new(EngineRouter::new(engines)),
        Arc::new(RobotsChecker::new(None)),
        Arc::new(HostLimiter::unlimited()),
    )
    .with_retry_policy(fast_retry())
    .with_respect_robots(false);

    let response = pipeline
        .fetch(FetchRequest::new(format!("{}/anything", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn test_url_normalization_applies() {
    let server = MockServer::start().await;
    mount_robots(&server, "").await;
    Mock::given(method("GET"))
        .and(path("/list,1,2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("rows"))
        .expect(1)
        .mount(&server)
        .await;

    let response = pipeline()
        .fetch(FetchRequest::new(format!(
            "{}/list%2C1%2C2",
            server.uri()
        )))
        .await
        .unwrap();
    assert_eq!(response.content, "rows");
}
