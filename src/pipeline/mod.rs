// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{warn, Instrument};

use crate::engines::router::EngineRouter;
use crate::engines::traits::{EngineError, FetchRequest, FetchResponse};
use crate::politeness::{HostLimiter, RetryPolicy};
use crate::utils::robots::RobotsGate;
use crate::utils::url_utils;

/// 礼貌抓取管道
///
/// 每次抓取依次经过：URL规范化、robots检查、每主机限速、
/// 引擎路由，失败后按退避策略重试
pub struct FetchPipeline {
    router: Arc<EngineRouter>,
    robots: Arc<dyn RobotsGate>,
    limiter: Arc<HostLimiter>,
    retry: RetryPolicy,
    respect_robots: bool,
    user_agent: String,
    crawl_delay_override: Option<Duration>,
}

impl FetchPipeline {
    /// 创建新的抓取管道
    ///
    /// # 参数
    ///
    /// * `router` - 引擎路由器
    /// * `robots` - robots.txt检查器
    /// * `limiter` - 每主机限速器
    pub fn new(
        router: Arc<EngineRouter>,
        robots: Arc<dyn RobotsGate>,
        limiter: Arc<HostLimiter>,
    ) -> Self {
        Self {
            router,
            robots,
            limiter,
            retry: RetryPolicy::standard(),
            respect_robots: true,
            user_agent: "scraprs-bot/1.0".to_string(),
            crawl_delay_override: None,
        }
    }

    /// 设置重试策略
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 设置是否遵守robots.txt
    pub fn with_respect_robots(mut self, respect: bool) -> Self {
        self.respect_robots = respect;
        self
    }

    /// 设置robots匹配使用的User-Agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// 覆盖robots.txt的爬取延迟
    pub fn with_crawl_delay_override(mut self, delay: Option<Duration>) -> Self {
        self.crawl_delay_override = delay;
        self
    }

    /// 执行一次礼貌抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求，URL会先被规范化
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 抓取响应；重试耗尽后的5xx响应原样返回
    /// * `Err(EngineError)` - robots禁止、输入无效或引擎持续失败
    pub async fn fetch(&self, mut request: FetchRequest) -> Result<FetchResponse, EngineError> {
        request.url = url_utils::normalize_url(&request.url)
            .map_err(|e| EngineError::InvalidInput(format!("invalid url '{}': {}", request.url, e)))?;

        let host = url_utils::host_of(&request.url)
            .ok_or_else(|| EngineError::InvalidInput(format!("missing host in '{}'", request.url)))?;

        // Robots gate
        let mut crawl_delay = self.crawl_delay_override;
        if self.respect_robots {
            match self.robots.is_allowed(&request.url, &self.user_agent).await {
                Ok(false) => {
                    warn!(
                        "Cannot scrape URL '{}' as it's disallowed in robots.txt",
                        request.url
                    );
                    counter!("scraprs_fetch_disallowed_total").increment(1);
                    return Err(EngineError::Disallowed(request.url.clone()));
                }
                Ok(true) => {}
                Err(e) => {
                    // Unreadable rules do not block the fetch
                    warn!("robots.txt check failed for '{}': {}", request.url, e);
                }
            }

            if crawl_delay.is_none() {
                match self.robots.directives(&request.url, &self.user_agent).await {
                    Ok(directives) => crawl_delay = directives.min_interval(),
                    Err(e) => warn!("robots directives unavailable for '{}': {}", host, e),
                }
            }
        }

        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire(&host, crawl_delay).await;
            attempt += 1;

            let span = tracing::info_span!("fetch_attempt", url = %request.url, attempt);
            let result = self.router.route(&request).instrument(span).await;

            match result {
                Ok(response) if response.status_code >= 500 => {
                    if self.retry.should_retry(attempt) {
                        let backoff = self.retry.calculate_backoff(attempt);
                        warn!(
                            "server error {} from '{}', retrying in {:?} (attempt {}/{})",
                            response.status_code,
                            request.url,
                            backoff,
                            attempt,
                            self.retry.max_retries
                        );
                        counter!("scraprs_fetch_retries_total").increment(1);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    // Retries exhausted, hand the last response to the caller
                    return Ok(response);
                }
                Ok(response) => {
                    counter!("scraprs_fetch_ok_total").increment(1);
                    return Ok(response);
                }
                Err(e) => {
                    if self.retry.should_retry_with_error(attempt, &e) {
                        let backoff = self.retry.calculate_backoff(attempt);
                        warn!(
                            "fetch of '{}' failed: {}, retrying in {:?} (attempt {}/{})",
                            request.url, e, backoff, attempt, self.retry.max_retries
                        );
                        counter!("scraprs_fetch_retries_total").increment(1);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    counter!("scraprs_fetch_failed_total").increment(1);
                    return Err(e);
                }
            }
        }
    }
}
