// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use async_trait::async_trait;

use crate::politeness::retry_policy::RetryPolicy;
use crate::utils::filename::sanitize_filename;

/// Robots规则获取失败的错误类型
#[derive(Error, Debug)]
pub enum RobotsError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("robots.txt request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("robots.txt cache io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 从robots.txt解析出的礼貌性指令
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotDirectives {
    /// Crawl-delay指令值
    pub crawl_delay: Option<Duration>,
    /// Request-rate指令值：(请求数, 时间窗口)
    pub request_rate: Option<(u32, Duration)>,
}

impl RobotDirectives {
    /// 两次请求之间应保持的最小间隔
    ///
    /// 取Crawl-delay与Request-rate推导间隔中的较大者
    pub fn min_interval(&self) -> Option<Duration> {
        let rate_interval = self
            .request_rate
            .filter(|(n, _)| *n > 0)
            .map(|(n, window)| window / n);
        match (self.crawl_delay, rate_interval) {
            (Some(d), Some(r)) => Some(d.max(r)),
            (d, r) => d.or(r),
        }
    }
}

/// Robots.txt检查器接口
#[async_trait]
pub trait RobotsGate: Send + Sync {
    /// 检查URL是否被允许访问
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool, RobotsError>;
    /// 获取适用于该URL所属站点的礼貌性指令
    async fn directives(
        &self,
        url_str: &str,
        user_agent: &str,
    ) -> Result<RobotDirectives, RobotsError>;
}

/// 缓存的Robots.txt内容
#[derive(Clone)]
struct CachedRobots {
    content: String,
    expires_at: Instant,
}

/// Robots.txt检查器
///
/// 自动抓取并解析目标站点的robots.txt，结果缓存在内存中，
/// 并可选地持久化到输出目录，后续会话直接复用磁盘副本
#[derive(Clone)]
pub struct RobotsChecker {
    /// HTTP客户端
    client: Client,

    /// 内存缓存
    memory_cache: Arc<Mutex<HashMap<String, CachedRobots>>>,

    /// 磁盘持久化目录
    persist_dir: Option<PathBuf>,

    /// 内存缓存有效期
    cache_ttl: Duration,

    /// 重试策略
    retry_policy: RetryPolicy,
}

#[async_trait]
impl RobotsGate for RobotsChecker {
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool, RobotsError> {
        let content = self.get_robots_content(url_str).await?;
        let mut matcher = DefaultMatcher::default();
        Ok(matcher.one_agent_allowed_by_robots(&content, user_agent, url_str))
    }

    async fn directives(
        &self,
        url_str: &str,
        user_agent: &str,
    ) -> Result<RobotDirectives, RobotsError> {
        let content = self.get_robots_content(url_str).await?;
        Ok(parse_directives(&content, user_agent))
    }
}

impl Default for RobotsChecker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RobotsChecker {
    /// 创建新的Robots检查器实例
    ///
    /// # 参数
    ///
    /// * `persist_dir` - robots.txt磁盘缓存目录，None表示仅使用内存缓存
    pub fn new(persist_dir: Option<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            memory_cache: Arc::new(Mutex::new(HashMap::new())),
            persist_dir,
            cache_ttl: Duration::from_secs(3600),
            retry_policy: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(10),
                ..Default::default()
            },
        }
    }

    /// 设置内存缓存有效期
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// 设置抓取robots.txt时使用的重试策略
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// 获取Robots.txt内容（带缓存）
    async fn get_robots_content(&self, url_str: &str) -> Result<String, RobotsError> {
        let url = Url::parse(url_str).map_err(|e| RobotsError::InvalidUrl(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| RobotsError::InvalidUrl(format!("missing host in '{}'", url_str)))?
            .to_string();
        let scheme = url.scheme();
        let port = url.port_or_known_default().unwrap_or(80);

        let robots_url = format!("{}://{}:{}/robots.txt", scheme, host, port);

        // 1. Check memory cache
        {
            let mut cache = self.memory_cache.lock().unwrap();
            if let Some(cached) = cache.get(&robots_url) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.content.clone());
                } else {
                    cache.remove(&robots_url);
                }
            }
        }

        // 2. Check disk cache
        if let Some(path) = self.disk_cache_path(&host) {
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                tracing::debug!("using cached robots.txt from {}", path.display());
                self.insert_memory_cache(&robots_url, &content);
                return Ok(content);
            }
        }

        // 3. Fetch robots.txt with retry
        let content = self.fetch_robots_content(&robots_url).await;

        // 4. Update memory cache
        self.insert_memory_cache(&robots_url, &content);

        // 5. Persist to disk, best effort
        if let Some(path) = self.disk_cache_path(&host) {
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    tracing::warn!("cannot create robots cache dir {}: {}", parent.display(), e);
                } else if let Err(e) = tokio::fs::write(&path, &content).await {
                    tracing::warn!("cannot persist robots.txt to {}: {}", path.display(), e);
                }
            }
        }

        Ok(content)
    }

    /// 带重试地抓取robots.txt
    ///
    /// 404视为站点没有规则，持续失败时按允许处理并告警
    async fn fetch_robots_content(&self, robots_url: &str) -> String {
        let mut attempt = 0;
        let mut last_error: Option<String> = None;

        while attempt < self.retry_policy.max_retries {
            attempt += 1;
            let response = self
                .client
                .get(robots_url)
                .header("User-Agent", "scraprs-bot/1.0")
                .timeout(Duration::from_secs(5))
                .send()
                .await;

            match response {
                Ok(resp) => {
                    if resp.status().is_success() {
                        return resp.text().await.unwrap_or_default();
                    } else if resp.status() == reqwest::StatusCode::NOT_FOUND {
                        // 404 is a valid response, meaning no robots.txt
                        return String::new();
                    } else if resp.status().is_server_error() {
                        last_error = Some(format!("server error: {}", resp.status()));
                    } else {
                        // Other client errors (403 etc.) are treated as "no rules"
                        return String::new();
                    }
                }
                Err(e) => {
                    last_error = Some(format!("request failed: {}", e));
                }
            }

            if attempt < self.retry_policy.max_retries {
                let backoff = self.retry_policy.calculate_backoff(attempt);
                tokio::time::sleep(backoff).await;
            }
        }

        if let Some(err) = last_error {
            tracing::warn!("failed to fetch robots.txt from {}: {}", robots_url, err);
        }
        String::new()
    }

    fn insert_memory_cache(&self, robots_url: &str, content: &str) {
        let mut cache = self.memory_cache.lock().unwrap();
        cache.insert(
            robots_url.to_string(),
            CachedRobots {
                content: content.to_string(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
    }

    fn disk_cache_path(&self, host: &str) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(sanitize_filename(host)).join("robots.txt"))
    }
}

/// 解析适用于指定User-Agent的Crawl-delay和Request-rate指令
///
/// 逐行扫描，先匹配User-agent块，再读取块内指令。
/// 具体命名的agent块优先于`*`通配块。
pub fn parse_directives(content: &str, user_agent: &str) -> RobotDirectives {
    let mut current_agent_matched = false;
    let mut specific_agent_found = false;
    let mut directives = RobotDirectives::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let lower_line = line.to_lowercase();
        if lower_line.starts_with("user-agent:") {
            let agent = line[11..].trim();
            if agent == "*" {
                current_agent_matched = !specific_agent_found;
            } else if user_agent.to_lowercase().contains(&agent.to_lowercase()) {
                current_agent_matched = true;
                if !specific_agent_found {
                    // 首次命中具体agent时丢弃通配块里收集到的值
                    directives = RobotDirectives::default();
                }
                specific_agent_found = true;
            } else {
                current_agent_matched = false;
            }
        } else if lower_line.starts_with("crawl-delay:") && current_agent_matched {
            if let Ok(d) = line[12..].trim().parse::<f64>() {
                if d >= 0.0 {
                    directives.crawl_delay = Some(Duration::from_secs_f64(d));
                }
            }
        } else if lower_line.starts_with("request-rate:") && current_agent_matched {
            directives.request_rate = parse_request_rate(line[13..].trim());
        }
    }

    directives
}

/// 解析Request-rate值，形如 `1/5` 或 `1/5s`（每5秒1个请求）
fn parse_request_rate(value: &str) -> Option<(u32, Duration)> {
    let (requests, window) = value.split_once('/')?;
    let requests: u32 = requests.trim().parse().ok()?;
    let window = window.trim().trim_end_matches(['s', 'S']);
    let seconds: u64 = window.parse().ok()?;
    if requests == 0 || seconds == 0 {
        return None;
    }
    Some((requests, Duration::from_secs(seconds)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = r#"
# sample robots file
User-agent: *
Crawl-delay: 2
Disallow: /private

User-agent: scraprs-bot
Crawl-delay: 5
Request-rate: 1/10
"#;

    #[test]
    fn test_parse_crawl_delay_wildcard() {
        let d = parse_directives(ROBOTS, "otherbot");
        assert_eq!(d.crawl_delay, Some(Duration::from_secs(2)));
        assert_eq!(d.request_rate, None);
    }

    #[test]
    fn test_parse_specific_agent_wins() {
        let d = parse_directives(ROBOTS, "scraprs-bot/1.0");
        assert_eq!(d.crawl_delay, Some(Duration::from_secs(5)));
        assert_eq!(d.request_rate, Some((1, Duration::from_secs(10))));
    }

    #[test]
    fn test_parse_empty_content() {
        let d = parse_directives("", "anybot");
        assert_eq!(d, RobotDirectives::default());
    }

    #[test]
    fn test_request_rate_formats() {
        assert_eq!(
            parse_request_rate("2/60"),
            Some((2, Duration::from_secs(60)))
        );
        assert_eq!(
            parse_request_rate("1/5s"),
            Some((1, Duration::from_secs(5)))
        );
        assert_eq!(parse_request_rate("0/5"), None);
        assert_eq!(parse_request_rate("garbage"), None);
    }

    #[test]
    fn test_min_interval_prefers_larger() {
        let d = RobotDirectives {
            crawl_delay: Some(Duration::from_secs(2)),
            request_rate: Some((1, Duration::from_secs(10))),
        };
        assert_eq!(d.min_interval(), Some(Duration::from_secs(10)));

        let d = RobotDirectives {
            crawl_delay: Some(Duration::from_secs(20)),
            request_rate: Some((2, Duration::from_secs(10))),
        };
        assert_eq!(d.min_interval(), Some(Duration::from_secs(20)));

        assert_eq!(RobotDirectives::default().min_interval(), None);
    }

    #[test]
    fn test_fractional_crawl_delay() {
        let content = "User-agent: *\nCrawl-delay: 0.5\n";
        let d = parse_directives(content, "anybot");
        assert_eq!(d.crawl_delay, Some(Duration::from_millis(500)));
    }
}
