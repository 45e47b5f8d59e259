// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

/// 每主机限速器
///
/// 对每个目标主机独立限速，防止对单一站点的突发请求。
/// robots.txt中的Crawl-delay长于配额间隔时，以Crawl-delay为准。
pub struct HostLimiter {
    /// 按主机键控的令牌桶
    limiter: Option<DefaultKeyedRateLimiter<String>>,
    /// 各主机最近一次放行时间，用于执行爬取延迟
    last_release: DashMap<String, Instant>,
}

impl HostLimiter {
    /// 创建新的主机限速器
    ///
    /// # 参数
    ///
    /// * `interval` - 同一主机两次请求的最小间隔，None表示不限速
    /// * `burst` - 允许的突发请求数
    pub fn new(interval: Option<Duration>, burst: u32) -> Self {
        let limiter = interval
            .filter(|iv| !iv.is_zero())
            .and_then(Quota::with_period)
            .map(|quota| {
                let burst = NonZeroU32::new(burst.max(1)).unwrap();
                RateLimiter::keyed(quota.allow_burst(burst))
            });

        Self {
            limiter,
            last_release: DashMap::new(),
        }
    }

    /// 不做任何限制的限速器
    pub fn unlimited() -> Self {
        Self::new(None, 1)
    }

    /// 等待直到允许向指定主机发起请求
    ///
    /// # 参数
    ///
    /// * `host` - 目标主机
    /// * `crawl_delay` - 该主机的爬取延迟（robots.txt或覆盖值），优先于配额
    pub async fn acquire(&self, host: &str, crawl_delay: Option<Duration>) {
        // 先执行爬取延迟：距离上次放行不足delay时补足睡眠
        if let Some(delay) = crawl_delay.filter(|d| !d.is_zero()) {
            if let Some(last) = self.last_release.get(host).map(|v| *v.value()) {
                let elapsed = last.elapsed();
                if elapsed < delay {
                    let wait = delay - elapsed;
                    debug!("waiting {:?} before next request to {}", wait, host);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_key_ready(&host.to_string()).await;
        }

        self.last_release.insert(host.to_string(), Instant::now());
    }
}
