// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::mpsc;
use std::time::Duration;

use scraprs::blocking;
use scraprs::session::ScraperConfig;

/// 在独立线程上起一个测试站点，返回其基础URL
///
/// 同步会话自带运行时，不能在异步上下文里构造，
/// 因此服务器运行在自己的运行时线程上
fn spawn_site() -> (String, std::thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();

    let handle = std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            use axum::{routing::get, Router};

            let app = Router::new()
                .route(
                    "/robots.txt",
                    get(|| async { "User-agent: *\nAllow: /\n" }),
                )
                .route(
                    "/page",
                    get(|| async {
                        axum::response::Html("<html><title>Sync Page</title></html>")
                    }),
                );

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tx.send(format!("http://{}", addr)).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    let url = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    (url, handle)
}

#[test]
fn test_blocking_scraper_full_flow() {
    let (base_url, _server) = spawn_site();
    let dir = tempfile::tempdir().unwrap();

    let config = ScraperConfig::new(&base_url)
        .with_timeout(Duration::from_secs(5))
        .with_output_dir(dir.path());

    let mut scraper = blocking::Scraper::start(config).unwrap();

    let page = scraper.navigate_to("/page").unwrap();
    assert_eq!(page.status_code, 200);
    assert!(page.content.contains("Sync Page"));

    let saved = scraper.save_page("page.html").unwrap();
    assert!(saved.path.exists());

    scraper.exit().unwrap();
    scraper.exit().unwrap();
}
