// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RetrySettings;
use crate::retry::classifier::{Classification, RetryStrategy};
use std::time::Duration;

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// 是否重试
    pub retry: bool,
    /// 决策原因，用于日志与失败记录
    pub reason: &'static str,
}

impl RetryDecision {
    fn yes() -> Self {
        Self {
            retry: true,
            reason: "retry approved",
        }
    }

    fn no(reason: &'static str) -> Self {
        Self { retry: false, reason }
    }
}

/// 重试计划器
///
/// 根据尝试历史和分类结果决定是否重试，并计算退避时间。
/// 所有退避公式都会叠加抖动，避免同一域名上大量并发失败的
/// 任务形成同步重试风暴。
#[derive(Debug, Clone)]
pub struct RetryPlanner {
    settings: RetrySettings,
    /// 单任务总耗时上限
    task_deadline: Duration,
}

impl RetryPlanner {
    /// 创建新的重试计划器实例
    ///
    /// # 参数
    ///
    /// * `settings` - 重试配置
    /// * `task_deadline` - 单任务从首次尝试起的总耗时上限
    pub fn new(settings: RetrySettings, task_deadline: Duration) -> Self {
        Self {
            settings,
            task_deadline,
        }
    }

    /// 判断是否应该重试
    ///
    /// 决策顺序：分类禁止重试 → 该类错误的重试上限 →
    /// 全局重试硬上限 → 任务总耗时上限 → 允许重试。
    ///
    /// # 参数
    ///
    /// * `attempts_made` - 已完成的尝试次数（含本次失败）
    /// * `elapsed` - 首次尝试以来的总耗时
    /// * `classification` - 错误分类结果
    pub fn should_retry(
        &self,
        attempts_made: u32,
        elapsed: Option<Duration>,
        classification: &Classification,
    ) -> RetryDecision {
        if classification.strategy == RetryStrategy::NoRetry {
            return RetryDecision::no("classification forbids retry");
        }

        // 已用重试次数 = 尝试次数 - 1（首次尝试不算重试）
        let retries_used = attempts_made.saturating_sub(1);
        if retries_used >= classification.max_retries {
            return RetryDecision::no("per-kind retry limit reached");
        }
        if retries_used >= self.settings.global_max_retries {
            return RetryDecision::no("global retry limit reached");
        }

        if let Some(elapsed) = elapsed {
            if elapsed >= self.task_deadline {
                return RetryDecision::no("task deadline exceeded");
            }
        }

        RetryDecision::yes()
    }

    /// 计算下次重试的退避时间
    ///
    /// 公式：Linear = base*attempt；Exponential = base*2^(attempt-1)；
    /// ChallengeRetry = base + attempt*10s。结果叠加抖动
    /// `delay *= 1 + uniform(-J, J)` 后钳制到 [min_delay, max_delay]。
    ///
    /// # 参数
    ///
    /// * `attempt` - 即将进行的重试序号（从1开始）
    /// * `classification` - 错误分类结果
    pub fn compute_delay(&self, attempt: u32, classification: &Classification) -> Duration {
        let attempt = attempt.max(1);
        let base = classification.base_delay.as_secs_f64();

        let raw = match classification.strategy {
            RetryStrategy::NoRetry => return Duration::ZERO,
            RetryStrategy::Linear => base * attempt as f64,
            RetryStrategy::Exponential => base * 2f64.powi(attempt as i32 - 1),
            RetryStrategy::ChallengeRetry => base + attempt as f64 * 10.0,
        };

        let jittered = if self.settings.jitter_factor > 0.0 {
            let j = self.settings.jitter_factor;
            raw * (1.0 + rand::random_range(-j..j))
        } else {
            raw
        };

        let min = self.settings.min_delay_ms as f64 / 1000.0;
        let max = self.settings.max_delay_secs as f64;
        Duration::from_secs_f64(jittered.clamp(min, max))
    }
}
