// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::circuit_breaker::CircuitBreaker;
use crate::engines::traits::{EngineError, FetchRequest, FetchResponse, ScraperEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 引擎性能统计
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// 成功率 (0.0 - 1.0)
    pub success_rate: f64,
    /// 平均响应时间
    pub avg_response_time: Duration,
    /// 最近使用时间
    pub last_used: Option<Instant>,
    /// 使用次数
    pub usage_count: u64,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_time: Duration::from_millis(500),
            last_used: None,
            usage_count: 0,
        }
    }
}

/// 引擎路由器
///
/// 根据请求特征选择合适的抓取引擎，按综合评分排序逐个尝试，
/// 可重试的失败会落到下一个候选引擎
pub struct EngineRouter {
    /// 引擎列表
    engines: Vec<Arc<dyn ScraperEngine>>,
    /// 熔断器
    circuit_breaker: Arc<CircuitBreaker>,
    /// 引擎性能统计
    engine_stats: Arc<parking_lot::RwLock<std::collections::HashMap<String, EngineStats>>>,
}

impl EngineRouter {
    /// 创建新的引擎路由器
    ///
    /// # 参数
    ///
    /// * `engines` - 引擎列表
    pub fn new(engines: Vec<Arc<dyn ScraperEngine>>) -> Self {
        Self::with_circuit_breaker(engines, Arc::new(CircuitBreaker::new()))
    }

    /// 使用指定熔断器创建引擎路由器
    ///
    /// # 参数
    ///
    /// * `engines` - 引擎列表
    /// * `circuit_breaker` - 熔断器
    pub fn with_circuit_breaker(
        engines: Vec<Arc<dyn ScraperEngine>>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let mut engine_stats = std::collections::HashMap::new();
        for engine in &engines {
            engine_stats.insert(engine.name().to_string(), EngineStats::default());
        }

        Self {
            engines,
            circuit_breaker,
            engine_stats: Arc::new(parking_lot::RwLock::new(engine_stats)),
        }
    }

    /// 选择候选引擎
    ///
    /// 过滤掉熔断中的和不支持请求的引擎，按综合评分降序返回
    fn select_candidates(&self, request: &FetchRequest) -> Vec<(f64, Arc<dyn ScraperEngine>)> {
        let mut candidates = Vec::new();
        let stats = self.engine_stats.read();

        for engine in &self.engines {
            let engine_name = engine.name();

            // 检查熔断器状态
            if self.circuit_breaker.is_open(engine_name) {
                continue;
            }

            // 获取支持分数
            let support_score = engine.support_score(request) as f64;
            if support_score == 0.0 {
                continue;
            }

            let default_stats = EngineStats::default();
            let engine_stat = stats.get(engine_name).unwrap_or(&default_stats);

            let final_score = self.calculate_engine_score(support_score, engine_stat);
            candidates.push((final_score, engine.clone()));
        }

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }

    /// 计算引擎综合评分
    ///
    /// 支持分数按成功率和响应时间加权修正
    fn calculate_engine_score(&self, support_score: f64, stats: &EngineStats) -> f64 {
        let mut score = support_score;

        // 成功率权重 (70%)
        score *= 0.3 + (stats.success_rate * 0.7);

        // 响应时间权重 (20%)
        let response_time_score = 1.0 - (stats.avg_response_time.as_secs_f64() / 10.0).min(1.0);
        score *= 0.8 + (response_time_score * 0.2);

        score
    }

    /// 更新引擎统计信息
    ///
    /// 指数平滑更新成功率与平均响应时间
    fn update_engine_stats(&self, engine_name: &str, success: bool, response_time: Duration) {
        let mut stats = self.engine_stats.write();
        if let Some(stat) = stats.get_mut(engine_name) {
            let alpha = 0.1; // 平滑因子
            let current_success = if success { 1.0 } else { 0.0 };
            stat.success_rate = stat.success_rate * (1.0 - alpha) + current_success * alpha;

            let current_avg_ns = stat.avg_response_time.as_nanos() as f64;
            let response_ns = response_time.as_nanos() as f64;
            let new_avg_ns = current_avg_ns * (1.0 - alpha) + response_ns * alpha;
            stat.avg_response_time = Duration::from_nanos(new_avg_ns as u64);

            stat.last_used = Some(Instant::now());
            stat.usage_count += 1;
        }
    }

    /// 路由请求到合适的引擎
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 第一个成功引擎的响应
    /// * `Err(EngineError)` - 所有候选引擎都失败时的最后一个错误
    pub async fn route(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        let start_time = Instant::now();
        let mut last_error = None;

        let candidates = self.select_candidates(request);

        if candidates.is_empty() {
            warn!("No suitable engines available for request");
            return Err(EngineError::AllEnginesFailed);
        }

        for (score, engine) in candidates {
            let engine_name = engine.name();
            info!(
                "Trying engine {} with score {:.2} for request to {}",
                engine_name, score, request.url
            );

            let engine_start = Instant::now();
            match engine.fetch(request).await {
                Ok(response) => {
                    let response_time = engine_start.elapsed();
                    self.update_engine_stats(engine_name, true, response_time);
                    self.circuit_breaker.record_success(engine_name);

                    info!(
                        "Engine {} succeeded in {:?}, total time: {:?}",
                        engine_name,
                        response_time,
                        start_time.elapsed()
                    );

                    return Ok(response);
                }
                Err(e) => {
                    let response_time = engine_start.elapsed();
                    self.update_engine_stats(engine_name, false, response_time);

                    if e.is_retryable() {
                        self.circuit_breaker.record_failure(engine_name);
                        warn!(
                            "Engine {} failed with retryable error: {}, trying next engine",
                            engine_name, e
                        );
                        last_error = Some(e);
                        continue;
                    }

                    warn!(
                        "Engine {} failed with non-retryable error: {}",
                        engine_name, e
                    );
                    return Err(e);
                }
            }
        }

        warn!("All engines failed for request to {}", request.url);
        Err(last_error.unwrap_or(EngineError::AllEnginesFailed))
    }

    /// 获取引擎统计信息
    pub fn get_engine_stats(&self) -> std::collections::HashMap<String, EngineStats> {
        self.engine_stats.read().clone()
    }

    /// 重置引擎统计信息
    pub fn reset_engine_stats(&self, engine_name: &str) {
        let mut stats = self.engine_stats.write();
        if let Some(stat) = stats.get_mut(engine_name) {
            *stat = EngineStats::default();
        }
    }
}
