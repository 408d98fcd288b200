// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::CircuitSettings;
use metrics::{counter, gauge};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 熔断器状态枚举
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CircuitStatus {
    /// 关闭状态，正常放行
    Closed,
    /// 打开状态，到达恢复时间前全部拒绝
    Open,
    /// 半开状态，只放行一个探测请求
    HalfOpen,
}

/// 单个域名的熔断器
///
/// 连续失败达到阈值后熔断该域名，冷却期过后放行一个探测请求。
/// 探测成功则恢复，失败则以指数增长的冷却时间再次熔断。
/// 不变式：处于Open状态时backoff_until总在未来——到达时限的
/// Open会在下一次准入检查时转为HalfOpen。
#[derive(Debug)]
pub struct Circuit {
    config: CircuitSettings,
    domain: String,
    status: CircuitStatus,
    /// 连续失败计数，成功后清零
    consecutive_failures: u32,
    /// 时间窗口内的失败时间戳，窗口外的失败不计入熔断判断
    failure_timestamps: VecDeque<Instant>,
    /// 熔断恢复时间点
    backoff_until: Option<Instant>,
    /// 当前冷却时长，探测失败时翻倍
    current_open_timeout: Duration,
    /// 半开状态下是否已有探测请求在途
    probe_in_flight: bool,
    total_failures: u64,
    total_successes: u64,
}

impl Circuit {
    /// 创建新的熔断器实例
    pub fn new(domain: String, config: CircuitSettings) -> Self {
        let open_timeout = config.open_timeout();
        Self {
            config,
            domain,
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            failure_timestamps: VecDeque::new(),
            backoff_until: None,
            current_open_timeout: open_timeout,
            probe_in_flight: false,
            total_failures: 0,
            total_successes: 0,
        }
    }

    /// 当前状态
    pub fn status(&self) -> CircuitStatus {
        self.status
    }

    /// 是否处于熔断（打开）状态且尚未到恢复时间
    pub fn is_open(&self) -> bool {
        match self.status {
            CircuitStatus::Open => self
                .backoff_until
                .map(|t| Instant::now() < t)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// 准入检查
    ///
    /// Closed放行；Open在恢复时间前拒绝（廉价拒绝，不消耗状态），
    /// 到达恢复时间后转为HalfOpen并放行唯一的探测请求；
    /// HalfOpen在探测在途时拒绝后续请求。
    pub fn check_admit(&mut self) -> bool {
        match self.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                let deadline = match self.backoff_until {
                    Some(t) => t,
                    None => return false,
                };
                if Instant::now() >= deadline {
                    self.transition(CircuitStatus::HalfOpen);
                    self.probe_in_flight = true;
                    true
                } else {
                    counter!("circuit_rejected_total", "domain" => self.domain.clone())
                        .increment(1);
                    false
                }
            }
            CircuitStatus::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// 记录成功
    pub fn record_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_failures = 0;

        if self.status == CircuitStatus::HalfOpen {
            // 探测成功，完全恢复
            self.probe_in_flight = false;
            self.failure_timestamps.clear();
            self.backoff_until = None;
            self.current_open_timeout = self.config.open_timeout();
            self.transition(CircuitStatus::Closed);
            tracing::info!(domain = %self.domain, "circuit closed after successful probe");
        }
    }

    /// 记录失败
    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.total_failures += 1;

        // 距上次失败超出时间窗口时，连续计数重新开始
        if let Some(last) = self.failure_timestamps.back() {
            if now.duration_since(*last) > self.config.failure_window() {
                self.consecutive_failures = 0;
            }
        }
        self.consecutive_failures += 1;
        self.failure_timestamps.push_back(now);
        while let Some(front) = self.failure_timestamps.front() {
            if now.duration_since(*front) > self.config.failure_window() {
                self.failure_timestamps.pop_front();
            } else {
                break;
            }
        }

        match self.status {
            CircuitStatus::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            CircuitStatus::HalfOpen => {
                // 探测失败，冷却时间翻倍后再次熔断
                self.probe_in_flight = false;
                self.current_open_timeout = std::cmp::min(
                    self.current_open_timeout * 2,
                    self.config.max_open_timeout(),
                );
                self.open(now);
            }
            CircuitStatus::Open => {}
        }
    }

    /// 连续失败计数（测试与状态快照用）
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 放弃在途的探测请求
    ///
    /// 探测请求通过准入后又被上层放弃（如并发槽位或会话不可用）时
    /// 调用，否则半开状态会永远等一个不存在的探测结果。
    pub fn abort_probe(&mut self) {
        if self.status == CircuitStatus::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    fn open(&mut self, now: Instant) {
        self.backoff_until = Some(now + self.current_open_timeout);
        self.transition(CircuitStatus::Open);
        tracing::warn!(
            domain = %self.domain,
            failures = self.consecutive_failures,
            timeout_secs = self.current_open_timeout.as_secs(),
            "circuit opened"
        );
    }

    fn transition(&mut self, status: CircuitStatus) {
        self.status = status;
        let val = match status {
            CircuitStatus::Closed => 0.0,
            CircuitStatus::Open => 1.0,
            CircuitStatus::HalfOpen => 0.5,
        };
        gauge!("circuit_status", "domain" => self.domain.clone()).set(val);
    }
}
