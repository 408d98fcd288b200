// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::{CircuitSettings, LimiterSettings};
use crate::limiter::circuit::{Circuit, CircuitStatus};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 准入决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    /// 允许发起请求
    Allowed,
    /// 被拒绝
    Denied(DenyReason),
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// 熔断器处于打开状态
    CircuitOpen,
    /// 超出当前速率
    RateLimited,
    /// 达到该域名的并发上限
    AtConcurrencyCap,
    /// 未到爬取延迟要求的最小间隔
    CrawlDelay,
}

/// 窗口内的单次请求样本
#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    success: bool,
    latency_ms: u64,
}

/// 单个域名的限流状态
///
/// 只被DomainLimiter在自己的锁内修改。一个域名上的锁竞争
/// 不会阻塞其他域名的进度。
#[derive(Debug)]
struct DomainState {
    /// 当前每分钟请求数上限，自适应调整
    current_rpm: f64,
    /// 自适应调整的速率天花板
    rpm_ceiling: f64,
    /// 该域名的最大并发数
    max_concurrent: u32,
    /// 在途请求数
    in_flight: u32,
    /// 准入时间戳，用于速率核算
    admissions: VecDeque<Instant>,
    /// 最近请求的结果样本环
    window: VecDeque<Sample>,
    /// 距上次自适应调整以来的已完成请求数
    since_adjust: u32,
    /// 连续"健康"评估周期数，持续健康才提速
    healthy_streaks: u32,
    /// robots爬取延迟要求的最小间隔
    min_interval: Option<Duration>,
    /// 上次准入时间
    last_admission: Option<Instant>,
    /// 域名级退避截止时间（如429后的冷却），与熔断独立
    suspended_until: Option<Instant>,
    /// 熔断器
    circuit: Circuit,
}

/// 按域名的自适应限流器
///
/// 每个域名一份状态，首次引用时惰性创建并应用静态覆盖
/// （搜索引擎域名：低速率天花板、单并发）。准入检查依次评估
/// 熔断器、并发上限、爬取延迟与滑动窗口速率。
pub struct DomainLimiter {
    settings: LimiterSettings,
    circuit_settings: CircuitSettings,
    states: DashMap<String, Arc<Mutex<DomainState>>>,
}

impl DomainLimiter {
    /// 创建新的限流器实例
    pub fn new(settings: LimiterSettings, circuit_settings: CircuitSettings) -> Self {
        Self {
            settings,
            circuit_settings,
            states: DashMap::new(),
        }
    }

    /// 获取或创建域名状态
    fn state_of(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        if let Some(state) = self.states.get(domain) {
            return state.clone();
        }
        let state = self
            .states
            .entry(domain.to_string())
            .or_insert_with(|| {
                let is_search_engine = self.is_search_engine(domain);
                let (rpm, ceiling, max_concurrent) = if is_search_engine {
                    (
                        self.settings.search_engine_rpm,
                        self.settings.search_engine_rpm,
                        1,
                    )
                } else {
                    (
                        self.settings.default_rpm,
                        self.settings.max_rpm,
                        self.settings.max_concurrent,
                    )
                };
                Arc::new(Mutex::new(DomainState {
                    current_rpm: rpm,
                    rpm_ceiling: ceiling,
                    max_concurrent,
                    in_flight: 0,
                    admissions: VecDeque::new(),
                    window: VecDeque::new(),
                    since_adjust: 0,
                    healthy_streaks: 0,
                    min_interval: None,
                    last_admission: None,
                    suspended_until: None,
                    circuit: Circuit::new(domain.to_string(), self.circuit_settings.clone()),
                }))
            })
            .clone();
        state
    }

    /// 判断域名是否属于搜索引擎静态覆盖列表
    fn is_search_engine(&self, domain: &str) -> bool {
        self.settings
            .search_engine_domains
            .iter()
            .any(|d| domain == d || domain.ends_with(&format!(".{}", d)))
    }

    /// 设置该域名的爬取延迟最小间隔（来自robots策略）
    pub fn set_min_interval(&self, domain: &str, interval: Duration) {
        let state = self.state_of(domain);
        state.lock().min_interval = Some(interval);
    }

    /// 准入检查
    ///
    /// 通过后计入一次准入并占用一个并发槽位；调用方在请求结束时
    /// 必须调用`record`（或放弃时调用`cancel`）归还槽位。
    pub fn admit(&self, domain: &str) -> AdmitDecision {
        let state = self.state_of(domain);
        let mut state = state.lock();
        let now = Instant::now();

        if !state.circuit.check_admit() {
            return AdmitDecision::Denied(DenyReason::CircuitOpen);
        }
        // 熔断探测请求不受速率与间隔约束，但仍占用并发槽位
        let probing = state.circuit.status() == CircuitStatus::HalfOpen;

        if state.in_flight >= state.max_concurrent {
            state.circuit.abort_probe();
            return AdmitDecision::Denied(DenyReason::AtConcurrencyCap);
        }

        if !probing {
            if let Some(until) = state.suspended_until {
                if now < until {
                    return AdmitDecision::Denied(DenyReason::RateLimited);
                }
                state.suspended_until = None;
            }

            if let (Some(interval), Some(last)) = (state.min_interval, state.last_admission) {
                if now.duration_since(last) < interval {
                    return AdmitDecision::Denied(DenyReason::CrawlDelay);
                }
            }

            let window = Duration::from_secs(self.settings.window_secs);
            while let Some(front) = state.admissions.front() {
                if now.duration_since(*front) > window {
                    state.admissions.pop_front();
                } else {
                    break;
                }
            }
            let allowed_in_window =
                state.current_rpm * self.settings.window_secs as f64 / 60.0;
            if state.admissions.len() as f64 >= allowed_in_window {
                counter!("limiter_rate_denied_total", "domain" => domain.to_string())
                    .increment(1);
                return AdmitDecision::Denied(DenyReason::RateLimited);
            }
        }

        state.admissions.push_back(now);
        state.last_admission = Some(now);
        state.in_flight += 1;
        AdmitDecision::Allowed
    }

    /// 放弃一次已通过的准入（例如没有可用会话）
    pub fn cancel(&self, domain: &str) {
        let state = self.state_of(domain);
        let mut state = state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.admissions.pop_back();
        state.circuit.abort_probe();
    }

    /// 记录一次请求结果
    ///
    /// 归还并发槽位、更新样本窗口与熔断器，并按节奏执行
    /// 自适应速率调整。
    pub fn record(&self, domain: &str, success: bool, latency: Duration) {
        let state = self.state_of(domain);
        let mut state = state.lock();
        let now = Instant::now();

        state.in_flight = state.in_flight.saturating_sub(1);
        state.window.push_back(Sample {
            at: now,
            success,
            latency_ms: latency.as_millis() as u64,
        });
        let window = Duration::from_secs(self.settings.window_secs);
        while let Some(front) = state.window.front() {
            if now.duration_since(front.at) > window {
                state.window.pop_front();
            } else {
                break;
            }
        }

        if success {
            state.circuit.record_success();
        } else {
            state.circuit.record_failure();
        }

        state.since_adjust += 1;
        if state.since_adjust >= self.settings.adjust_every {
            state.since_adjust = 0;
            self.adjust_rate(domain, &mut state);
        }
    }

    /// 自适应速率调整
    ///
    /// 成功率低或p95延迟过高时降速；成功率高且延迟健康并持续
    /// 两个评估周期后，向天花板缓慢提速。固定速率会无视域名的
    /// 实际响应状况，这里让速率跟随观测结果演化。
    fn adjust_rate(&self, domain: &str, state: &mut DomainState) {
        if state.window.is_empty() {
            return;
        }
        let total = state.window.len();
        let successes = state.window.iter().filter(|s| s.success).count();
        let success_rate = successes as f64 / total as f64;

        let mut latencies: Vec<u64> = state.window.iter().map(|s| s.latency_ms).collect();
        latencies.sort_unstable();
        let p95_idx = ((total as f64 * 0.95).ceil() as usize).saturating_sub(1);
        let p95 = latencies[p95_idx.min(total - 1)];

        let slow = p95 > self.settings.latency_threshold_ms;
        if success_rate < self.settings.lower_success_rate || slow {
            state.healthy_streaks = 0;
            let lowered = (state.current_rpm * self.settings.lower_factor)
                .max(self.settings.min_rpm);
            if lowered < state.current_rpm {
                tracing::debug!(
                    domain,
                    success_rate,
                    p95_ms = p95,
                    rpm = lowered,
                    "lowering domain rate"
                );
                state.current_rpm = lowered;
            }
        } else if success_rate >= self.settings.raise_success_rate && !slow {
            state.healthy_streaks += 1;
            if state.healthy_streaks >= 2 {
                let raised =
                    (state.current_rpm * self.settings.raise_factor).min(state.rpm_ceiling);
                if raised > state.current_rpm {
                    tracing::debug!(domain, rpm = raised, "raising domain rate");
                    state.current_rpm = raised;
                }
            }
        } else {
            state.healthy_streaks = 0;
        }
    }

    /// 暂停域名的准入一段时间
    ///
    /// 目标站点明确要求退避（429/Retry-After）时使用：
    /// 被限速的任务在退避期重试，其他任务也不该继续冲击该域名。
    pub fn suspend(&self, domain: &str, duration: Duration) {
        let state = self.state_of(domain);
        let mut state = state.lock();
        let until = Instant::now() + duration;
        state.suspended_until = Some(state.suspended_until.map_or(until, |u| u.max(until)));
    }

    /// 域名的熔断器是否处于打开状态
    pub fn is_circuit_open(&self, domain: &str) -> bool {
        self.states
            .get(domain)
            .map(|s| s.lock().circuit.is_open())
            .unwrap_or(false)
    }

    /// 当前处于熔断状态的所有域名
    pub fn open_domains(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|entry| entry.value().lock().circuit.is_open())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// 域名当前的每分钟请求数上限（测试与监控用）
    pub fn current_rpm(&self, domain: &str) -> Option<f64> {
        self.states.get(domain).map(|s| s.lock().current_rpm)
    }
}
