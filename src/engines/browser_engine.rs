// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{
    EngineError, FetchRequest, FetchResponse, PageAction, ScraperEngine, ScreenshotConfig,
};
use crate::engines::validators;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// 移动端默认User-Agent
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Mobile/15E148 Safari/604.1";

// Global browser instance to avoid re-launching Chrome on every request.
// This significantly improves performance for browser-based scraping.
static BROWSER_INSTANCE: OnceCell<Browser> = OnceCell::const_new();

// Asynchronously gets or initializes the shared browser instance.
// This function ensures that the browser is launched only once.
pub async fn get_browser() -> Result<&'static Browser, EngineError> {
    BROWSER_INSTANCE
        .get_or_try_init(|| async {
            let remote_debugging_url = std::env::var("CHROMIUM_REMOTE_DEBUGGING_URL").ok();

            let (browser, mut handler) = if let Some(ref url) = remote_debugging_url {
                tracing::info!("Connecting to remote Chrome instance at: {}", url);
                Browser::connect(url).await.map_err(|e| {
                    EngineError::Browser(format!("Failed to connect to remote Chrome: {}", e))
                })?
            } else {
                let mut builder = BrowserConfig::builder()
                    .no_sandbox()
                    .request_timeout(Duration::from_secs(30)); // Default timeout

                builder = builder.arg("--disable-gpu").arg("--disable-dev-shm-usage");

                Browser::launch(
                    builder
                        .build()
                        .map_err(|e| EngineError::Browser(e.to_string()))?,
                )
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?
            };

            // Spawn a handler to process browser events
            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            Ok(browser)
        })
        .await
}

/// 浏览器引擎
///
/// 通过Chrome DevTools协议驱动的浏览器自动化抓取引擎，
/// 处理需要JavaScript渲染、页面交互或截图的请求
pub struct BrowserEngine;

impl BrowserEngine {
    /// 在目标页面中执行XPath表达式
    ///
    /// XPath求值委托给浏览器的document.evaluate，
    /// 返回匹配节点的文本内容列表
    ///
    /// # 参数
    ///
    /// * `url` - 目标页面URL
    /// * `xpath` - XPath表达式
    /// * `timeout` - 整体超时时间
    pub async fn evaluate_xpath(
        &self,
        url: &str,
        xpath: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, EngineError> {
        if !url.contains("127.0.0.1") && !url.contains("localhost") {
            validators::validate_url(url)
                .await
                .map_err(|e| EngineError::InvalidInput(format!("SSRF protection: {}", e)))?;
        }

        let script = format!(
            r#"() => {{
                const results = [];
                const iter = document.evaluate({xpath}, document, null, XPathResult.ORDERED_NODE_ITERATOR_TYPE, null);
                let node = iter.iterateNext();
                while (node) {{
                    results.push(node.textContent !== null ? node.textContent.trim() : node.nodeValue);
                    node = iter.iterateNext();
                }}
                return results;
            }}"#,
            xpath = serde_json::to_string(xpath)
                .map_err(|e| EngineError::InvalidInput(e.to_string()))?
        );

        tokio::time::timeout(timeout, async {
            let browser = get_browser().await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            page.goto(url)
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            let values: Vec<String> = page
                .evaluate(script.as_str())
                .await
                .map_err(|e| EngineError::Browser(format!("XPath evaluation failed: {}", e)))?
                .into_value()
                .map_err(|e| EngineError::Browser(format!("XPath result decoding failed: {}", e)))?;

            let _ = page.close().await;
            Ok(values)
        })
        .await
        .map_err(|_| EngineError::Timeout)?
    }

    /// 在目标页面中执行一段JavaScript并返回结果
    ///
    /// # 参数
    ///
    /// * `url` - 目标页面URL
    /// * `script` - JavaScript代码
    /// * `timeout` - 整体超时时间
    pub async fn evaluate_on(
        &self,
        url: &str,
        script: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, EngineError> {
        if !url.contains("127.0.0.1") && !url.contains("localhost") {
            validators::validate_url(url)
                .await
                .map_err(|e| EngineError::InvalidInput(format!("SSRF protection: {}", e)))?;
        }

        tokio::time::timeout(timeout, async {
            let browser = get_browser().await?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            page.goto(url)
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            let value = page
                .evaluate(script)
                .await
                .map_err(|e| EngineError::Browser(format!("Evaluate failed: {}", e)))?
                .into_value::<serde_json::Value>()
                .unwrap_or(serde_json::Value::Null);

            let _ = page.close().await;
            Ok(value)
        })
        .await
        .map_err(|_| EngineError::Timeout)?
    }

    /// 执行单个页面交互动作
    async fn run_action(
        page: &chromiumoxide::Page,
        action: &PageAction,
    ) -> Result<Option<serde_json::Value>, EngineError> {
        match action {
            PageAction::Wait { milliseconds } => {
                tokio::time::sleep(Duration::from_millis(*milliseconds)).await;
                Ok(None)
            }
            PageAction::Click { selector } => {
                page.find_element(selector)
                    .await
                    .map_err(|e| {
                        EngineError::Browser(format!("Click failed, element not found: {}", e))
                    })?
                    .click()
                    .await
                    .map_err(|e| EngineError::Browser(format!("Click failed: {}", e)))?;
                Ok(None)
            }
            PageAction::Hover { selector } => {
                page.find_element(selector)
                    .await
                    .map_err(|e| {
                        EngineError::Browser(format!("Hover failed, element not found: {}", e))
                    })?
                    .hover()
                    .await
                    .map_err(|e| EngineError::Browser(format!("Hover failed: {}", e)))?;
                Ok(None)
            }
            PageAction::Scroll { direction } => {
                let script = match direction.as_str() {
                    "down" => "window.scrollBy(0, window.innerHeight);",
                    "up" => "window.scrollBy(0, -window.innerHeight);",
                    "bottom" => "window.scrollTo(0, document.body.scrollHeight);",
                    "top" => "window.scrollTo(0, 0);",
                    _ => "window.scrollBy(0, window.innerHeight);",
                };
                page.evaluate(script)
                    .await
                    .map_err(|e| EngineError::Browser(format!("Scroll failed: {}", e)))?;
                Ok(None)
            }
            PageAction::Type { selector, text } => {
                page.find_element(selector)
                    .await
                    .map_err(|e| {
                        EngineError::Browser(format!("Input failed, element not found: {}", e))
                    })?
                    .type_str(text)
                    .await
                    .map_err(|e| EngineError::Browser(format!("Input failed: {}", e)))?;
                Ok(None)
            }
            PageAction::Evaluate { script } => {
                let value = page
                    .evaluate(script.as_str())
                    .await
                    .map_err(|e| EngineError::Browser(format!("Evaluate failed: {}", e)))?
                    .into_value::<serde_json::Value>()
                    .unwrap_or(serde_json::Value::Null);
                Ok(Some(value))
            }
        }
    }

    /// 截取页面或元素截图
    async fn take_screenshot(
        page: &chromiumoxide::Page,
        config: &ScreenshotConfig,
    ) -> Result<Vec<u8>, EngineError> {
        let format = match config.format.as_deref() {
            Some("png") => CaptureScreenshotFormat::Png,
            _ => CaptureScreenshotFormat::Jpeg,
        };

        if let Some(selector) = &config.selector {
            let element = page
                .find_element(selector)
                .await
                .map_err(|e| EngineError::Browser(format!("Element not found: {}", e)))?;

            element
                .screenshot(format)
                .await
                .map_err(|e| EngineError::Browser(format!("Element screenshot failed: {}", e)))
        } else {
            let params = chromiumoxide::page::ScreenshotParams::builder()
                .format(format)
                .quality(config.quality.unwrap_or(80) as i64)
                .full_page(config.full_page)
                .build();

            page.screenshot(params)
                .await
                .map_err(|e| EngineError::Browser(format!("Page screenshot failed: {}", e)))
        }
    }
}

#[async_trait]
impl ScraperEngine for BrowserEngine {
    /// 执行浏览器自动化抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 抓取响应
    /// * `Err(EngineError)` - 抓取过程中出现的错误
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        // SSRF protection
        if !request.url.contains("127.0.0.1") && !request.url.contains("localhost") {
            validators::validate_url(&request.url)
                .await
                .map_err(|e| EngineError::InvalidInput(format!("SSRF protection: {}", e)))?;
        }

        let start = Instant::now();
        let timeout_duration = request.timeout;

        // Wrap the entire operation in a timeout
        tokio::time::timeout(timeout_duration, async {
            let browser = get_browser().await?;

            // Create new page and navigate
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            // Apply the requested user agent
            let user_agent = request
                .user_agent
                .as_deref()
                .or(if request.mobile { Some(MOBILE_UA) } else { None });
            if let Some(ua) = user_agent {
                page.set_user_agent(ua)
                    .await
                    .map_err(|e| EngineError::Browser(e.to_string()))?;
            }

            if !request.headers.is_empty() {
                // CDP级别的自定义请求头支持有限，目前仅记录
                tracing::warn!(
                    "custom headers are only partially supported by the browser engine"
                );
            }

            // Navigate and wait for load
            // goto waits for the load event by default
            page.goto(request.url.as_str())
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            // 按顺序执行页面交互动作
            for action in &request.actions {
                Self::run_action(&page, action).await?;
            }

            let final_url = page
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| request.url.clone());

            let content = page
                .content()
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?;

            // Handle screenshot if requested
            let mut screenshot = None;
            if request.needs_screenshot {
                let config = request.screenshot_config.clone().unwrap_or_default();
                screenshot = Some(Self::take_screenshot(&page, &config).await?);
            }

            let _ = page.close().await;

            // The CDP load event does not expose the HTTP status; a rendered
            // document is reported as 200
            Ok(FetchResponse {
                status_code: 200,
                final_url,
                content,
                screenshot,
                content_type: "text/html".to_string(),
                headers: std::collections::HashMap::new(),
                response_time_ms: start.elapsed().as_millis() as u64,
            })
        })
        .await
        .map_err(|_| EngineError::Timeout)?
    }

    /// 计算对请求的支持分数
    ///
    /// 需要JS、截图或交互动作的请求得满分，普通请求分数很低
    fn support_score(&self, request: &FetchRequest) -> u8 {
        if request.needs_browser() {
            return 100;
        }
        10 // Can do it, but expensive
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "browser"
    }
}
