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

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::politeness::RetryPolicy;
use crate::session::ScraperConfig;

/// 应用程序配置设置
///
/// 包含抓取、浏览器、robots、限速、重试和输出等所有配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 抓取配置
    pub scraper: ScraperSettings,
    /// 浏览器配置
    #[serde(default)]
    pub browser: BrowserSettings,
    /// robots.txt配置
    pub robots: RobotsSettings,
    /// 速率限制配置
    pub rate_limiting: RateLimitingSettings,
    /// 重试配置
    pub retry: RetrySettings,
    /// 输出配置
    pub output: OutputSettings,
}

/// 抓取配置设置
#[derive(Debug, Deserialize)]
pub struct ScraperSettings {
    /// User-Agent
    pub user_agent: String,
    /// 代理URL
    #[serde(default)]
    pub proxy: Option<String>,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
    /// 是否使用移动端UA
    pub mobile: bool,
    /// 是否跳过TLS验证
    pub skip_tls_verification: bool,
}

/// 浏览器配置设置
#[derive(Debug, Default, Deserialize)]
pub struct BrowserSettings {
    /// 远程调试地址，设置后连接现有Chrome实例而不是自行启动
    #[serde(default)]
    pub remote_debugging_url: Option<String>,
}

/// robots.txt配置设置
#[derive(Debug, Deserialize)]
pub struct RobotsSettings {
    /// 是否遵守robots.txt
    pub enabled: bool,
    /// 内存缓存有效期（秒）
    pub cache_ttl_secs: u64,
    /// 爬取延迟覆盖值（秒），设置后优先于robots.txt
    #[serde(default)]
    pub crawl_delay_override_secs: Option<u64>,
}

/// 速率限制配置设置
#[derive(Debug, Deserialize)]
pub struct RateLimitingSettings {
    /// 是否启用速率限制
    pub enabled: bool,
    /// 同一主机两次请求的最小间隔（毫秒）
    pub per_host_interval_ms: u64,
    /// 突发额度
    pub burst: u32,
}

/// 重试配置设置
#[derive(Debug, Deserialize)]
pub struct RetrySettings {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避时间（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避时间（毫秒）
    pub max_backoff_ms: u64,
}

/// 输出配置设置
#[derive(Debug, Deserialize)]
pub struct OutputSettings {
    /// 输出目录
    pub dir: String,
    /// 同名文件是否覆盖
    pub overwrite: bool,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 加载顺序：内置默认值、config/default文件、
    /// config/{APP_ENVIRONMENT}文件、SCRAPRS__前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Scraper defaults
            .set_default("scraper.user_agent", "scraprs-bot/1.0")?
            .set_default("scraper.timeout_secs", 30)?
            .set_default("scraper.mobile", false)?
            .set_default("scraper.skip_tls_verification", false)?
            // Robots defaults
            .set_default("robots.enabled", true)?
            .set_default("robots.cache_ttl_secs", 3600)?
            // Rate limiting defaults
            .set_default("rate_limiting.enabled", true)?
            .set_default("rate_limiting.per_host_interval_ms", 1000)?
            .set_default("rate_limiting.burst", 1)?
            // Retry defaults
            .set_default("retry.max_retries", 3)?
            .set_default("retry.initial_backoff_ms", 1000)?
            .set_default("retry.max_backoff_ms", 60000)?
            // Output defaults
            .set_default("output.dir", "./output")?
            .set_default("output.overwrite", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("SCRAPRS").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// 由设置推导重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            ..Default::default()
        }
    }

    /// 为指定站点构造会话配置
    ///
    /// # 参数
    ///
    /// * `domain` - 目标站点基础URL
    pub fn scraper_config(&self, domain: impl Into<String>) -> ScraperConfig {
        let mut config = ScraperConfig::new(domain)
            .with_user_agent(self.scraper.user_agent.clone())
            .with_timeout(Duration::from_secs(self.scraper.timeout_secs))
            .with_output_dir(self.output.dir.clone());

        config.proxy = self.scraper.proxy.clone();
        config.mobile = self.scraper.mobile;
        config.skip_tls_verification = self.scraper.skip_tls_verification;
        config.respect_robots = self.robots.enabled;
        config.overwrite = self.output.overwrite;
        config.crawl_delay_override = self
            .robots
            .crawl_delay_override_secs
            .map(Duration::from_secs);
        config.robots_cache_ttl = Duration::from_secs(self.robots.cache_ttl_secs);
        config.per_host_interval = if self.rate_limiting.enabled {
            Some(Duration::from_millis(self.rate_limiting.per_host_interval_ms))
        } else {
            None
        };
        config.burst = self.rate_limiting.burst;
        config.retry = self.retry_policy();
        config
    }
}
