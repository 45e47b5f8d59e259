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

pub mod blocking;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::engines::browser_engine::BrowserEngine;
use crate::engines::http_engine::HttpEngine;
use crate::engines::router::EngineRouter;
use crate::engines::traits::{
    EngineError, FetchRequest, PageAction, ScraperEngine, ScreenshotConfig,
};
use crate::extract::profiles::SiteProfileRegistry;
use crate::extract::{ExtractionRule, Extractor};
use crate::pipeline::FetchPipeline;
use crate::politeness::{HostLimiter, RetryPolicy};
use crate::storage::{LocalStore, PageStore, StoreError};
use crate::utils::filename::{sanitize_filename, short_id, with_suffix};
use crate::utils::robots::{RobotsChecker, RobotsGate};
use crate::utils::url_utils;

/// 会话错误类型
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid scraper configuration: {0}")]
    InvalidConfig(String),

    #[error("session is closed")]
    Closed,

    #[error("no page has been loaded yet")]
    NoPage,

    #[error("no site profile registered for host '{0}'")]
    NoProfile(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 抓取会话配置
#[derive(Debug, Clone, Validate)]
pub struct ScraperConfig {
    /// 目标站点基础URL
    #[validate(url(message = "domain must be an absolute URL"))]
    pub domain: String,
    /// User-Agent，同时用于请求头与robots匹配
    #[validate(length(min = 1, message = "user_agent must not be empty"))]
    pub user_agent: String,
    /// 代理URL
    #[validate(url(message = "proxy must be a valid URL"))]
    pub proxy: Option<String>,
    /// 单次请求超时
    pub timeout: Duration,
    /// 是否使用移动端UA
    pub mobile: bool,
    /// 是否跳过TLS验证
    pub skip_tls_verification: bool,
    /// 输出目录
    pub output_dir: PathBuf,
    /// 是否遵守robots.txt
    pub respect_robots: bool,
    /// 保存文件时是否覆盖同名文件
    pub overwrite: bool,
    /// 覆盖robots.txt的爬取延迟
    pub crawl_delay_override: Option<Duration>,
    /// robots.txt内存缓存有效期
    pub robots_cache_ttl: Duration,
    /// 同一主机两次请求的最小间隔
    pub per_host_interval: Option<Duration>,
    /// 限速突发额度
    pub burst: u32,
    /// 重试策略
    pub retry: RetryPolicy,
    /// 附加请求头
    pub headers: HashMap<String, String>,
}

impl ScraperConfig {
    /// 创建指向目标站点的默认配置
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            user_agent: "scraprs-bot/1.0".to_string(),
            proxy: None,
            timeout: Duration::from_secs(30),
            mobile: false,
            skip_tls_verification: false,
            output_dir: PathBuf::from("./output"),
            respect_robots: true,
            overwrite: false,
            crawl_delay_override: None,
            robots_cache_ttl: Duration::from_secs(3600),
            per_host_interval: None,
            burst: 1,
            retry: RetryPolicy::standard(),
            headers: HashMap::new(),
        }
    }

    /// 设置User-Agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// 设置代理
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// 设置请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置输出目录
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// 关闭robots.txt检查
    pub fn without_robots(mut self) -> Self {
        self.respect_robots = false;
        self
    }

    /// 校验配置
    pub fn check_valid(&self) -> Result<(), SessionError> {
        if self.timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "timeout must be non-zero".to_string(),
            ));
        }
        self.validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))
    }
}

/// 当前加载的页面
#[derive(Debug, Clone)]
pub struct Page {
    /// 请求的URL
    pub url: String,
    /// 重定向后的最终URL
    pub final_url: String,
    /// HTTP状态码
    pub status_code: u16,
    /// 页面HTML内容
    pub content: String,
    /// 内容类型
    pub content_type: String,
    /// 抓取时间
    pub fetched_at: DateTime<Utc>,
}

/// 保存结果
#[derive(Debug, Clone)]
pub struct SavedPage {
    /// 写入的完整路径
    pub path: PathBuf,
    /// 存储键（相对输出目录）
    pub key: String,
    /// 写入字节数
    pub bytes: usize,
    /// 保存时间
    pub saved_at: DateTime<Utc>,
}

/// 导航选项
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    /// 是否需要JavaScript渲染
    pub needs_js: bool,
    /// 页面交互动作
    pub actions: Vec<PageAction>,
}

/// 截图选项
#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    /// 是否截取整页
    pub full_page: bool,
    /// 仅截取指定元素
    pub selector: Option<String>,
    /// 图片质量 (1-100)
    pub quality: Option<u8>,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            full_page: false,
            selector: None,
            quality: None,
        }
    }
}

/// 抓取会话
///
/// 面向单个站点的抓取入口：构造配置后异步启动，
/// 导航到页面、保存HTML、提取数据，最后关闭。
///
/// ```no_run
/// use scraprs::session::{Scraper, ScraperConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ScraperConfig::new("https://example.com")
///     .with_user_agent("my-bot/0.1")
///     .with_output_dir("./output");
///
/// let mut scraper = Scraper::start(config).await?;
/// scraper.navigate_to("/articles").await?;
/// scraper.save_page("articles.html").await?;
/// scraper.exit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Scraper {
    config: ScraperConfig,
    pipeline: FetchPipeline,
    limiter: Arc<HostLimiter>,
    browser: Arc<BrowserEngine>,
    store: Arc<dyn PageStore>,
    profiles: SiteProfileRegistry,
    site_dir: String,
    page: Option<Page>,
    closed: bool,
}

impl Scraper {
    /// 启动抓取会话
    ///
    /// 校验配置、装配引擎与管道，并预取目标站点的robots.txt
    /// （结果持久化到输出目录，后续会话复用）。
    ///
    /// # 参数
    ///
    /// * `config` - 会话配置
    ///
    /// # 返回值
    ///
    /// * `Ok(Scraper)` - 就绪的会话
    /// * `Err(SessionError)` - 配置无效
    pub async fn start(config: ScraperConfig) -> Result<Self, SessionError> {
        config.check_valid()?;

        let host = url_utils::host_of(&config.domain).ok_or_else(|| {
            SessionError::InvalidConfig(format!("missing host in domain '{}'", config.domain))
        })?;
        let site_dir = sanitize_filename(&host);

        let browser = Arc::new(BrowserEngine);
        let engines: Vec<Arc<dyn ScraperEngine>> = vec![Arc::new(HttpEngine), browser.clone()];
        let router = Arc::new(EngineRouter::new(engines));

        let robots: Arc<dyn RobotsGate> = Arc::new(
            RobotsChecker::new(Some(config.output_dir.clone()))
                .with_cache_ttl(config.robots_cache_ttl),
        );
        let limiter = Arc::new(HostLimiter::new(config.per_host_interval, config.burst));

        let pipeline = FetchPipeline::new(router, robots.clone(), limiter.clone())
            .with_retry_policy(config.retry.clone())
            .with_respect_robots(config.respect_robots)
            .with_user_agent(config.user_agent.clone())
            .with_crawl_delay_override(config.crawl_delay_override);

        // Warm up the robots cache for the site; failures only log
        if config.respect_robots {
            match robots.directives(&config.domain, &config.user_agent).await {
                Ok(directives) => {
                    info!(
                        "robots rules loaded for {}: crawl_delay={:?} request_rate={:?}",
                        host, directives.crawl_delay, directives.request_rate
                    );
                }
                Err(e) => warn!("could not load robots rules for {}: {}", host, e),
            }
        }

        let store: Arc<dyn PageStore> = Arc::new(LocalStore::new(config.output_dir.clone()));

        info!("scraper session started for {}", host);
        Ok(Self {
            config,
            pipeline,
            limiter,
            browser,
            store,
            profiles: SiteProfileRegistry::new(),
            site_dir,
            page: None,
            closed: false,
        })
    }

    /// 注册站点提取配置
    pub fn set_profiles(&mut self, profiles: SiteProfileRegistry) {
        self.profiles = profiles;
    }

    /// 当前页面
    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    /// 会话输出目录
    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir.join(&self.site_dir)
    }

    /// 导航到指定URL
    ///
    /// 相对路径会基于会话域名解析。导航经过完整的礼貌管道：
    /// robots检查、限速、引擎路由与重试。
    ///
    /// # 参数
    ///
    /// * `url` - 绝对URL或相对路径
    pub async fn navigate_to(&mut self, url: &str) -> Result<&Page, SessionError> {
        self.navigate_to_with(url, NavigateOptions::default()).await
    }

    /// 以指定选项导航
    ///
    /// # 参数
    ///
    /// * `url` - 绝对URL或相对路径
    /// * `options` - 渲染与交互选项
    pub async fn navigate_to_with(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> Result<&Page, SessionError> {
        self.ensure_open()?;

        let url = self.resolve(url)?;
        let mut request = self.base_request(&url);
        request.needs_js = options.needs_js;
        request.actions = options.actions;

        let response = self.pipeline.fetch(request).await?;
        debug!(
            "navigated to {} ({} in {}ms)",
            response.final_url, response.status_code, response.response_time_ms
        );

        let page = Page {
            url,
            final_url: response.final_url,
            status_code: response.status_code,
            content: response.content,
            content_type: response.content_type,
            fetched_at: Utc::now(),
        };
        Ok(&*self.page.insert(page))
    }

    /// 保存当前页面的HTML到输出目录
    ///
    /// 文件写入`<output_dir>/<站点目录>/<文件名>`，文件名会被净化。
    /// 同名文件存在时，根据配置覆盖或追加`-1`、`-2`等后缀。
    ///
    /// # 参数
    ///
    /// * `filename` - 目标文件名
    ///
    /// # 返回值
    ///
    /// * `Ok(SavedPage)` - 实际写入的路径与字节数
    /// * `Err(SessionError::NoPage)` - 尚未加载任何页面
    pub async fn save_page(&mut self, filename: &str) -> Result<SavedPage, SessionError> {
        self.ensure_open()?;
        let page = self.page.as_ref().ok_or(SessionError::NoPage)?;

        let name = sanitize_filename(filename);
        let key = self.unique_key(&name).await?;

        let data = page.content.as_bytes();
        self.store.save(&key, data).await?;

        let saved = SavedPage {
            path: self.config.output_dir.join(&key),
            key,
            bytes: data.len(),
            saved_at: Utc::now(),
        };
        info!("page html saved to {}", saved.path.display());
        Ok(saved)
    }

    /// 截取当前页面的截图并保存
    ///
    /// 不支持的图片扩展名会被改写为`.jpeg`。截图由浏览器引擎
    /// 重新渲染当前URL生成。
    ///
    /// # 参数
    ///
    /// * `filename` - 目标文件名
    /// * `options` - 截图选项
    pub async fn screenshot(
        &mut self,
        filename: &str,
        options: ScreenshotOptions,
    ) -> Result<SavedPage, SessionError> {
        self.ensure_open()?;
        let page = self.page.as_ref().ok_or(SessionError::NoPage)?;

        // Coerce the filename to a supported image type
        let mut name = sanitize_filename(filename);
        let lower = name.to_lowercase();
        let format = if lower.ends_with(".png") {
            "png"
        } else {
            if !lower.ends_with(".jpg") && !lower.ends_with(".jpeg") {
                let stem = name.rsplit_once('.').map(|(s, _)| s.to_string());
                name = format!("{}.jpeg", stem.unwrap_or(name));
                warn!("unsupported screenshot type, filename is now '{}'", name);
            }
            "jpeg"
        };

        let mut request = self.base_request(&page.final_url.clone());
        request.needs_screenshot = true;
        request.screenshot_config = Some(ScreenshotConfig {
            full_page: options.full_page,
            selector: options.selector.clone(),
            quality: options.quality,
            format: Some(format.to_string()),
        });

        let response = self.pipeline.fetch(request).await?;
        let bytes = response.screenshot.ok_or_else(|| {
            SessionError::Engine(EngineError::Browser(
                "engine returned no screenshot data".to_string(),
            ))
        })?;

        let key = self.unique_key(&name).await?;
        self.store.save(&key, &bytes).await?;

        let saved = SavedPage {
            path: self.config.output_dir.join(&key),
            key,
            bytes: bytes.len(),
            saved_at: Utc::now(),
        };
        info!("screenshot saved to {}", saved.path.display());
        Ok(saved)
    }

    /// 点击当前页面上的元素
    ///
    /// 浏览器引擎会以全新页面重放导航以保证状态干净，
    /// 点击后的页面内容成为当前页面。
    ///
    /// # 参数
    ///
    /// * `selector` - CSS选择器
    pub async fn click(&mut self, selector: &str) -> Result<&Page, SessionError> {
        self.interact(PageAction::Click {
            selector: selector.to_string(),
        })
        .await
    }

    /// 将光标悬停在当前页面的元素上
    ///
    /// # 参数
    ///
    /// * `selector` - CSS选择器
    pub async fn hover(&mut self, selector: &str) -> Result<&Page, SessionError> {
        self.interact(PageAction::Hover {
            selector: selector.to_string(),
        })
        .await
    }

    /// 在当前页面上执行JavaScript并返回结果
    ///
    /// # 参数
    ///
    /// * `script` - JavaScript代码
    pub async fn evaluate_js(&mut self, script: &str) -> Result<Value, SessionError> {
        self.ensure_open()?;
        let page = self.page.as_ref().ok_or(SessionError::NoPage)?;
        let url = page.final_url.clone();

        let host = url_utils::host_of(&url).unwrap_or_default();
        self.limiter
            .acquire(&host, self.config.crawl_delay_override)
            .await;

        let value = self
            .browser
            .evaluate_on(&url, script, self.config.timeout)
            .await?;
        Ok(value)
    }

    /// 对当前页面应用提取规则
    ///
    /// CSS与正则规则在已抓取的HTML上求值；
    /// XPath规则转交浏览器引擎在实时页面上求值。
    ///
    /// # 参数
    ///
    /// * `rules` - 规则名到提取规则的映射
    pub async fn extract(
        &mut self,
        rules: &HashMap<String, ExtractionRule>,
    ) -> Result<Value, SessionError> {
        self.ensure_open()?;
        let page = self.page.as_ref().ok_or(SessionError::NoPage)?;
        let url = page.final_url.clone();

        let mut result = Extractor::extract(&page.content, rules);

        let deferred = Extractor::xpath_rules(rules);
        if !deferred.is_empty() {
            let host = url_utils::host_of(&url).unwrap_or_default();
            self.limiter
                .acquire(&host, self.config.crawl_delay_override)
                .await;

            for (name, rule) in deferred {
                let values = self
                    .browser
                    .evaluate_xpath(&url, &rule.selector, self.config.timeout)
                    .await?;
                let value = if rule.is_array {
                    Value::Array(values.into_iter().map(Value::String).collect())
                } else {
                    values
                        .into_iter()
                        .next()
                        .map(Value::String)
                        .unwrap_or(Value::Null)
                };
                result[name.as_str()] = value;
            }
        }

        Ok(result)
    }

    /// 使用注册的站点配置提取当前页面
    pub async fn extract_with_profile(&mut self) -> Result<Value, SessionError> {
        self.ensure_open()?;
        let page = self.page.as_ref().ok_or(SessionError::NoPage)?;
        let host = url_utils::host_of(&page.final_url)
            .ok_or_else(|| SessionError::NoProfile("unknown".to_string()))?;

        let rules = self
            .profiles
            .lookup(&host)
            .ok_or(SessionError::NoProfile(host))?
            .rules
            .clone();

        self.extract(&rules).await
    }

    /// 关闭会话
    ///
    /// 释放会话持有的页面状态。幂等，重复调用是空操作。
    /// 进程级共享的浏览器实例保持存活以供其他会话复用。
    pub async fn exit(&mut self) -> Result<(), SessionError> {
        if self.closed {
            debug!("exit() called on an already closed session");
            return Ok(());
        }
        self.page = None;
        self.closed = true;
        info!("scraper session closed for {}", self.site_dir);
        Ok(())
    }

    /// 会话是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn resolve(&self, url: &str) -> Result<String, SessionError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        let base = url::Url::parse(&self.config.domain)
            .map_err(|e| SessionError::InvalidConfig(format!("invalid domain: {}", e)))?;
        url_utils::resolve_url(&base, url)
            .map(|u| u.to_string())
            .map_err(|e| {
                SessionError::Engine(EngineError::InvalidInput(format!(
                    "cannot resolve '{}': {}",
                    url, e
                )))
            })
    }

    fn base_request(&self, url: &str) -> FetchRequest {
        let mut request = FetchRequest::new(url);
        request.headers = self.config.headers.clone();
        request.user_agent = Some(self.config.user_agent.clone());
        request.timeout = self.config.timeout;
        request.mobile = self.config.mobile;
        request.proxy = self.config.proxy.clone();
        request.skip_tls_verification = self.config.skip_tls_verification;
        request
    }

    async fn interact(&mut self, action: PageAction) -> Result<&Page, SessionError> {
        self.ensure_open()?;
        let page = self.page.as_ref().ok_or(SessionError::NoPage)?;
        let url = page.final_url.clone();
        self.navigate_to_with(
            &url,
            NavigateOptions {
                needs_js: true,
                actions: vec![action],
            },
        )
        .await
    }

    /// 为文件名找一个不冲突的存储键
    async fn unique_key(&self, name: &str) -> Result<String, SessionError> {
        let key = format!("{}/{}", self.site_dir, name);
        if self.config.overwrite || !self.store.exists(&key).await? {
            return Ok(key);
        }

        for counter in 1..=100u32 {
            let candidate = format!("{}/{}", self.site_dir, with_suffix(name, &counter.to_string()));
            if !self.store.exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        // Extremely crowded directory, fall back to a random id
        Ok(format!(
            "{}/{}",
            self.site_dir,
            with_suffix(name, &short_id())
        ))
    }
}

impl Drop for Scraper {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "scraper session for {} dropped without exit()",
                self.site_dir
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(ScraperConfig::new("https://example.com").check_valid().is_ok());
        assert!(ScraperConfig::new("not-a-url").check_valid().is_err());
        assert!(ScraperConfig::new("https://example.com")
            .with_proxy("also-not-a-url")
            .check_valid()
            .is_err());

        let mut zero_timeout = ScraperConfig::new("https://example.com");
        zero_timeout.timeout = Duration::ZERO;
        assert!(zero_timeout.check_valid().is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let result = Scraper::start(ScraperConfig::new("::bad::")).await;
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_save_before_navigate_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScraperConfig::new("https://example.com")
            .without_robots()
            .with_output_dir(dir.path());
        let mut scraper = Scraper::start(config).await.unwrap();

        let result = scraper.save_page("page.html").await;
        assert!(matches!(result, Err(SessionError::NoPage)));
        scraper.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScraperConfig::new("https://example.com")
            .without_robots()
            .with_output_dir(dir.path());
        let mut scraper = Scraper::start(config).await.unwrap();

        scraper.exit().await.unwrap();
        scraper.exit().await.unwrap();
        assert!(scraper.is_closed());

        // Navigation after exit is rejected
        let result = scraper.navigate_to("https://example.com/").await;
        assert!(matches!(result, Err(SessionError::Closed)));
    }
}
