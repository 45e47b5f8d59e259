// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scraprs::extract::profiles::{SiteProfile, SiteProfileRegistry};
use scraprs::extract::ExtractionRule;
use scraprs::politeness::RetryPolicy;
use scraprs::session::{Scraper, ScraperConfig, SessionError};

const PAGE_HTML: &str = r#"<html>
<head><title>Article Index</title></head>
<body>
  <h1>Articles</h1>
  <a href="/a/1">First</a>
  <a href="/a/2">Second</a>
</body>
</html>"#;

async fn start_site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/articles"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PAGE_HTML)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer, dir: &std::path::Path) -> ScraperConfig {
    let mut config = ScraperConfig::new(server.uri())
        .with_user_agent("scraprs-bot/1.0")
        .with_timeout(Duration::from_secs(5))
        .with_output_dir(dir);
    config.retry = RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        enable_jitter: false,
        ..Default::default()
    };
    config
}

#[tokio::test]
async fn test_navigate_save_exit_lifecycle() {
    let server = start_site().await;
    let dir = tempfile::tempdir().unwrap();

    let mut scraper = Scraper::start(config_for(&server, dir.path())).await.unwrap();

    let page = scraper.navigate_to("/articles").await.unwrap();
    assert_eq!(page.status_code, 200);
    assert!(page.content.contains("Article Index"));

    let saved = scraper.save_page("articles.html").await.unwrap();
    assert!(saved.path.exists());
    assert_eq!(
        std::fs::read_to_string(&saved.path).unwrap(),
        PAGE_HTML
    );

    // robots.txt was fetched once at start and persisted beside the page
    let robots_path = scraper.output_dir().join("robots.txt");
    assert!(robots_path.exists());

    scraper.exit().await.unwrap();
    scraper.exit().await.unwrap();
}

#[tokio::test]
async fn test_save_collision_appends_suffix() {
    let server = start_site().await;
    let dir = tempfile::tempdir().unwrap();

    let mut scraper = Scraper::start(config_for(&server, dir.path())).await.unwrap();
    scraper.navigate_to("/articles").await.unwrap();

    let first = scraper.save_page("page.html").await.unwrap();
    let second = scraper.save_page("page.html").await.unwrap();

    assert!(first.key.ends_with("page.html"));
    assert!(second.key.ends_with("page-1.html"));
    assert!(first.path.exists());
    assert!(second.path.exists());

    scraper.exit().await.unwrap();
}

#[tokio::test]
async fn test_save_collision_overwrites_when_configured() {
    let server = start_site().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = config_for(&server, dir.path());
    config.overwrite = true;
    let mut scraper = Scraper::start(config).await.unwrap();
    scraper.navigate_to("/articles").await.unwrap();

    let first = scraper.save_page("page.html").await.unwrap();
    let second = scraper.save_page("page.html").await.unwrap();
    assert_eq!(first.key, second.key);

    scraper.exit().await.unwrap();
}

#[tokio::test]
async fn test_navigation_blocked_by_robots() {
    let server = start_site().await;
    let dir = tempfile::tempdir().unwrap();

    let mut scraper = Scraper::start(config_for(&server, dir.path())).await.unwrap();
    let result = scraper.navigate_to("/private/secret").await;

    assert!(matches!(
        result,
        Err(SessionError::Engine(scraprs::EngineError::Disallowed(_)))
    ));
    scraper.exit().await.unwrap();
}

#[tokio::test]
async fn test_extract_with_rules_and_profile() {
    let server = start_site().await;
    let dir = tempfile::tempdir().unwrap();

    let mut scraper = Scraper::start(config_for(&server, dir.path())).await.unwrap();
    scraper.navigate_to("/articles").await.unwrap();

    let mut rules = HashMap::new();
    rules.insert("title".to_string(), ExtractionRule::css("title"));
    rules.insert(
        "links".to_string(),
        ExtractionRule::css("a").with_attr("href").as_array(),
    );

    let value = scraper.extract(&rules).await.unwrap();
    assert_eq!(value["title"], "Article Index");
    assert_eq!(value["links"].as_array().unwrap().len(), 2);

    // The same rules provided through a site profile
    let mut registry = SiteProfileRegistry::new();
    registry.register(SiteProfile {
        domain: "127.0.0.1".to_string(),
        rules,
    });
    scraper.set_profiles(registry);

    let value = scraper.extract_with_profile().await.unwrap();
    assert_eq!(value["title"], "Article Index");

    scraper.exit().await.unwrap();
}

#[tokio::test]
async fn test_extract_without_profile_errors() {
    let server = start_site().await;
    let dir = tempfile::tempdir().unwrap();

    let mut scraper = Scraper::start(config_for(&server, dir.path())).await.unwrap();
    scraper.navigate_to("/articles").await.unwrap();

    let result = scraper.extract_with_profile().await;
    assert!(matches!(result, Err(SessionError::NoProfile(_))));
    scraper.exit().await.unwrap();
}
