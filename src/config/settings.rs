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

/// 应用程序配置设置
///
/// 包含调度器、限流器、熔断器、会话、代理、重试、策略和抓取等所有配置项
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    /// 调度器配置
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// 限流器配置
    #[serde(default)]
    pub limiter: LimiterSettings,
    /// 熔断器配置
    #[serde(default)]
    pub circuit: CircuitSettings,
    /// 会话配置
    #[serde(default)]
    pub session: SessionSettings,
    /// 代理池配置
    #[serde(default)]
    pub proxy: ProxySettings,
    /// 重试配置
    #[serde(default)]
    pub retry: RetrySettings,
    /// 策略缓存配置
    #[serde(default)]
    pub policy: PolicySettings,
    /// 抓取配置
    #[serde(default)]
    pub fetch: FetchSettings,
    /// 工作器配置
    #[serde(default)]
    pub worker: WorkerSettings,
}

/// 调度器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// 任务默认最大尝试次数
    pub default_max_attempts: u32,
    /// 活跃域名数量上限，超出后低优先级任务会被拒绝入队
    pub max_active_domains: usize,
    /// 单任务总耗时上限（秒），超过后不再重试
    pub task_deadline_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_max_attempts: 4,
            max_active_domains: 200,
            task_deadline_secs: 3600,
        }
    }
}

/// 限流器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterSettings {
    /// 默认每分钟请求数
    pub default_rpm: f64,
    /// 每分钟请求数下限
    pub min_rpm: f64,
    /// 每分钟请求数上限
    pub max_rpm: f64,
    /// 默认单域名最大并发数
    pub max_concurrent: u32,
    /// 滑动窗口长度（秒）
    pub window_secs: u64,
    /// 每N次准入执行一次自适应调整
    pub adjust_every: u32,
    /// 成功率低于该值时降速
    pub lower_success_rate: f64,
    /// 成功率高于该值且延迟健康时提速
    pub raise_success_rate: f64,
    /// p95延迟阈值（毫秒），超过视为域名响应变慢
    pub latency_threshold_ms: u64,
    /// 降速系数
    pub lower_factor: f64,
    /// 提速系数
    pub raise_factor: f64,
    /// 搜索引擎域名的每分钟请求数上限
    pub search_engine_rpm: f64,
    /// 搜索引擎域名列表（静态覆盖：低速率、单并发）
    pub search_engine_domains: Vec<String>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            default_rpm: 30.0,
            min_rpm: 2.0,
            max_rpm: 120.0,
            max_concurrent: 3,
            window_secs: 60,
            adjust_every: 20,
            lower_success_rate: 0.90,
            raise_success_rate: 0.98,
            latency_threshold_ms: 5000,
            lower_factor: 0.8,
            raise_factor: 1.1,
            search_engine_rpm: 6.0,
            search_engine_domains: vec![
                "google.com".to_string(),
                "bing.com".to_string(),
                "baidu.com".to_string(),
                "duckduckgo.com".to_string(),
            ],
        }
    }
}

/// 熔断器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitSettings {
    /// 连续失败阈值，达到后熔断
    pub failure_threshold: u32,
    /// 熔断恢复超时时间（秒）
    pub open_timeout_secs: u64,
    /// 熔断超时上限（秒），重复失败时指数增长到此为止
    pub max_open_timeout_secs: u64,
    /// 失败计数时间窗口（秒），窗口外的失败不计入
    pub failure_window_secs: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 300,
            max_open_timeout_secs: 3600,
            failure_window_secs: 120,
        }
    }
}

impl CircuitSettings {
    /// 熔断恢复超时
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    /// 熔断超时上限
    pub fn max_open_timeout(&self) -> Duration {
        Duration::from_secs(self.max_open_timeout_secs)
    }

    /// 失败计数窗口
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

/// 会话配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// 全局活跃会话数上限
    pub max_live_sessions: usize,
    /// 单个域名的会话槽位上限，即同一域名可同时领出的会话数
    pub max_slots_per_domain: usize,
    /// 会话最大存活时间（秒）
    pub max_duration_secs: u64,
    /// 会话错误数达到该值后轮换
    pub max_errors: u32,
    /// 挑战/封禁比例超过该值后轮换
    pub challenge_rate_threshold: f64,
    /// 计算挑战比例所需的最少请求数
    pub challenge_rate_min_requests: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_live_sessions: 5,
            max_slots_per_domain: 3,
            max_duration_secs: 1800,
            max_errors: 3,
            challenge_rate_threshold: 0.3,
            challenge_rate_min_requests: 5,
        }
    }
}

/// 代理池配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// 连续失败达到该值后标记为不健康
    pub unhealthy_threshold: u32,
    /// 延迟EWMA平滑系数
    pub latency_ewma_alpha: f64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            latency_ewma_alpha: 0.3,
        }
    }
}

/// 重试配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// 全局重试次数硬上限
    pub global_max_retries: u32,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 退避时间下限（毫秒）
    pub min_delay_ms: u64,
    /// 退避时间上限（秒）
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            global_max_retries: 5,
            jitter_factor: 0.1,
            min_delay_ms: 100,
            max_delay_secs: 300,
        }
    }
}

/// 策略缓存配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySettings {
    /// 策略缓存TTL（秒）
    pub cache_ttl_secs: u64,
    /// 默认爬取延迟（秒）
    pub default_crawl_delay_secs: f64,
    /// 每个域名的页面预算
    pub default_max_pages: u32,
    /// robots.txt抓取使用的User-Agent
    pub user_agent: String,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            default_crawl_delay_secs: 2.0,
            default_max_pages: 500,
            user_agent: "prospectrs-bot/1.0".to_string(),
        }
    }
}

/// 抓取配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    /// 单次抓取超时时间（秒）
    pub timeout_secs: u64,
    /// 默认User-Agent
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (compatible; prospectrs/0.1)".to_string(),
        }
    }
}

/// 工作器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// 工作器数量
    pub count: usize,
    /// 无任务可取时的空转等待时间（毫秒）
    pub idle_backoff_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 8,
            idle_backoff_ms: 500,
        }
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 从配置文件和环境变量加载配置，所有字段均有默认值
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("PROSPECTRS").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let settings = Settings::default();
        assert_eq!(settings.circuit.failure_threshold, 5);
        assert_eq!(settings.circuit.open_timeout_secs, 300);
        assert_eq!(settings.session.max_live_sessions, 5);
        assert_eq!(settings.session.max_errors, 3);
        assert_eq!(settings.retry.jitter_factor, 0.1);
        assert_eq!(settings.retry.max_delay_secs, 300);
    }

    #[test]
    fn test_limiter_bounds_are_sane() {
        let limiter = LimiterSettings::default();
        assert!(limiter.min_rpm < limiter.default_rpm);
        assert!(limiter.default_rpm < limiter.max_rpm);
        assert!(limiter.lower_factor < 1.0);
        assert!(limiter.raise_factor > 1.0);
    }
}
