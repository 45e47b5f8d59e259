// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scraprs::utils::robots::{RobotsChecker, RobotsGate};

const ROBOTS_BODY: &str = "User-agent: *\nDisallow: /private\nCrawl-delay: 2\n";

async fn server_with_robots(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_disallow_blocks_exact_subtree() {
    let server = server_with_robots(ROBOTS_BODY).await;
    let checker = RobotsChecker::new(None);

    let private = format!("{}/private/data", server.uri());
    let public = format!("{}/public", server.uri());

    assert!(!checker.is_allowed(&private, "anybot").await.unwrap());
    assert!(checker.is_allowed(&public, "anybot").await.unwrap());
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let checker = RobotsChecker::new(None);
    let url = format!("{}/anything", server.uri());
    assert!(checker.is_allowed(&url, "anybot").await.unwrap());

    let directives = checker.directives(&url, "anybot").await.unwrap();
    assert_eq!(directives.crawl_delay, None);
}

#[tokio::test]
async fn test_crawl_delay_surfaces_in_directives() {
    let server = server_with_robots(ROBOTS_BODY).await;
    let checker = RobotsChecker::new(None);

    let url = format!("{}/page", server.uri());
    let directives = checker.directives(&url, "anybot").await.unwrap();
    assert_eq!(directives.crawl_delay, Some(Duration::from_secs(2)));
    assert_eq!(directives.min_interval(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn test_memory_cache_avoids_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ROBOTS_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let checker = RobotsChecker::new(None);
    let url = format!("{}/a", server.uri());

    for _ in 0..5 {
        checker.is_allowed(&url, "anybot").await.unwrap();
    }
    // The expect(1) above verifies a single upstream hit on drop
}

#[tokio::test]
async fn test_robots_persisted_to_disk_and_reused() {
    let dir = tempfile::tempdir().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ROBOTS_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/page", server.uri());

    let checker = RobotsChecker::new(Some(dir.path().to_path_buf()));
    assert!(checker.is_allowed(&url, "anybot").await.unwrap());

    // The body landed under <dir>/<sanitized host>/robots.txt
    let saved: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(saved.len(), 1);
    let robots_file = saved[0].join("robots.txt");
    assert_eq!(std::fs::read_to_string(&robots_file).unwrap(), ROBOTS_BODY);

    // A fresh checker (fresh memory cache) reuses the disk copy
    let second = RobotsChecker::new(Some(dir.path().to_path_buf()));
    assert!(!second
        .is_allowed(&format!("{}/private/x", server.uri()), "anybot")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_server_errors_fall_back_to_allow() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let checker = RobotsChecker::new(None).with_retry_policy(scraprs::politeness::RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        enable_jitter: false,
        ..Default::default()
    });
    let url = format!("{}/page", server.uri());
    // Persistent 5xx resolves to "no rules" rather than blocking the crawl
    assert!(checker.is_allowed(&url, "anybot").await.unwrap());
}
