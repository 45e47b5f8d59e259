// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{counter, gauge};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 熔断器配置
#[derive(Clone, Debug)]
pub struct CircuitConfig {
    /// 失败阈值
    pub failure_threshold: u32,
    /// 恢复超时时间
    pub recovery_timeout: Duration,
    /// 失败时间窗口
    pub failure_window: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// 熔断器状态枚举
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Status {
    /// 关闭状态
    Closed,
    /// 打开状态
    Open,
    /// 半开状态
    HalfOpen,
}

/// 熔断器状态
#[derive(Clone, Debug)]
struct CircuitState {
    status: Status,
    failure_timestamps: VecDeque<Instant>,
    last_failure: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            status: Status::Closed,
            failure_timestamps: VecDeque::new(),
            last_failure: None,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

/// 熔断器统计信息
#[derive(Clone, Debug, Default)]
pub struct CircuitStats {
    /// 是否处于打开状态
    pub is_open: bool,
    /// 时间窗口内的失败次数
    pub failure_count: u32,
    /// 总请求数
    pub total_requests: u64,
    /// 总失败数
    pub total_failures: u64,
    /// 总成功数
    pub total_successes: u64,
}

/// 熔断器
///
/// 按引擎维护熔断状态，连续失败的引擎在恢复期内不再被选中
#[derive(Clone)]
pub struct CircuitBreaker {
    states: Arc<RwLock<HashMap<String, CircuitState>>>,
    config: CircuitConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// 创建新的熔断器实例
    pub fn new() -> Self {
        Self::with_config(CircuitConfig::default())
    }

    /// 使用指定配置创建熔断器实例
    ///
    /// # 参数
    ///
    /// * `config` - 熔断配置
    pub fn with_config(config: CircuitConfig) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// 检查熔断器是否打开
    ///
    /// # 参数
    ///
    /// * `engine_name` - 引擎名称
    ///
    /// # 返回值
    ///
    /// 如果熔断器打开则返回true，否则返回false
    pub fn is_open(&self, engine_name: &str) -> bool {
        let mut states = self.states.write();
        let state = states
            .entry(engine_name.to_string())
            .or_insert_with(CircuitState::new);

        match state.status {
            Status::Closed => false,
            Status::Open => {
                if let Some(last_failure) = state.last_failure {
                    if last_failure.elapsed() > self.config.recovery_timeout {
                        state.status = Status::HalfOpen;
                        self.update_status_metric(engine_name, Status::HalfOpen);
                        return false;
                    }
                }
                counter!("scraprs_circuit_rejected_total", "engine" => engine_name.to_string())
                    .increment(1);
                true
            }
            Status::HalfOpen => false,
        }
    }

    /// 记录成功
    ///
    /// # 参数
    ///
    /// * `engine_name` - 引擎名称
    pub fn record_success(&self, engine_name: &str) {
        let mut states = self.states.write();
        let state = states
            .entry(engine_name.to_string())
            .or_insert_with(CircuitState::new);

        state.total_requests += 1;
        state.total_successes += 1;

        counter!("scraprs_circuit_requests_total", "engine" => engine_name.to_string())
            .increment(1);

        if state.status == Status::HalfOpen {
            state.status = Status::Closed;
            state.failure_timestamps.clear();
            self.update_status_metric(engine_name, Status::Closed);
        }
    }

    /// 记录失败
    ///
    /// # 参数
    ///
    /// * `engine_name` - 引擎名称
    pub fn record_failure(&self, engine_name: &str) {
        let mut states = self.states.write();
        let state = states
            .entry(engine_name.to_string())
            .or_insert_with(CircuitState::new);

        let now = Instant::now();
        state.total_requests += 1;
        state.total_failures += 1;
        state.last_failure = Some(now);
        state.failure_timestamps.push_back(now);

        // 移除超出时间窗口的失败记录
        while let Some(front) = state.failure_timestamps.front() {
            if now.duration_since(*front) > self.config.failure_window {
                state.failure_timestamps.pop_front();
            } else {
                break;
            }
        }

        counter!("scraprs_circuit_requests_total", "engine" => engine_name.to_string())
            .increment(1);
        counter!("scraprs_circuit_failures_total", "engine" => engine_name.to_string())
            .increment(1);

        match state.status {
            Status::Closed => {
                if state.failure_timestamps.len() >= self.config.failure_threshold as usize {
                    state.status = Status::Open;
                    self.update_status_metric(engine_name, Status::Open);
                }
            }
            Status::HalfOpen => {
                state.status = Status::Open;
                self.update_status_metric(engine_name, Status::Open);
            }
            Status::Open => {}
        }
    }

    /// 获取引擎的熔断统计信息
    ///
    /// # 参数
    ///
    /// * `engine_name` - 引擎名称
    pub fn get_stats(&self, engine_name: &str) -> CircuitStats {
        let states = self.states.read();
        if let Some(state) = states.get(engine_name) {
            CircuitStats {
                is_open: state.status == Status::Open,
                failure_count: state.failure_timestamps.len() as u32,
                total_requests: state.total_requests,
                total_failures: state.total_failures,
                total_successes: state.total_successes,
            }
        } else {
            CircuitStats::default()
        }
    }

    fn update_status_metric(&self, engine_name: &str, status: Status) {
        let val = match status {
            Status::Closed => 0.0,
            Status::Open => 1.0,
            Status::HalfOpen => 0.5,
        };
        gauge!("scraprs_circuit_status", "engine" => engine_name.to_string()).set(val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::with_config(CircuitConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        });

        assert!(!breaker.is_open("http"));
        breaker.record_failure("http");
        breaker.record_failure("http");
        assert!(!breaker.is_open("http"));
        breaker.record_failure("http");
        assert!(breaker.is_open("http"));
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::with_config(CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
            failure_window: Duration::from_secs(60),
        });

        breaker.record_failure("browser");
        assert!(breaker.is_open("browser"));

        std::thread::sleep(Duration::from_millis(80));
        // Recovery timeout elapsed, breaker lets a probe through
        assert!(!breaker.is_open("browser"));

        // A success in half-open state closes the circuit
        breaker.record_success("browser");
        assert!(!breaker.is_open("browser"));
        let stats = breaker.get_stats("browser");
        assert_eq!(stats.failure_count, 0);
    }

    #[test]
    fn test_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::with_config(CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
            failure_window: Duration::from_secs(60),
        });

        breaker.record_failure("http");
        assert!(breaker.is_open("http"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(!breaker.is_open("http")); // half-open probe
        breaker.record_failure("http");
        assert!(breaker.is_open("http"));
    }

    #[test]
    fn test_stats_accumulate() {
        let breaker = CircuitBreaker::new();
        breaker.record_success("http");
        breaker.record_success("http");
        breaker.record_failure("http");

        let stats = breaker.get_stats("http");
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_successes, 2);
        assert_eq!(stats.total_failures, 1);
        assert!(!stats.is_open);
    }
}
