// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::outcome::{ErrorKind, FetchOutcome};
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::time::Duration;

/// 重试策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// 不重试
    NoRetry,
    /// 线性退避：base * attempt
    Linear,
    /// 指数退避：base * 2^(attempt-1)
    Exponential,
    /// 挑战重试：base + attempt * 10s，同时要求轮换会话
    ChallengeRetry,
}

/// 分类结果
///
/// 错误类型加上建议的重试参数。rotate_session为true时
/// 调度器必须在重试前轮换会话——在同一身份上重试挑战页没有意义。
#[derive(Debug, Clone)]
pub struct Classification {
    /// 错误类型
    pub kind: ErrorKind,
    /// 重试策略
    pub strategy: RetryStrategy,
    /// 退避基准时间
    pub base_delay: Duration,
    /// 该类错误的最大重试次数
    pub max_retries: u32,
    /// 是否强制轮换会话
    pub rotate_session: bool,
}

impl Classification {
    fn new(kind: ErrorKind, strategy: RetryStrategy, base_delay: Duration, max_retries: u32) -> Self {
        Self {
            kind,
            strategy,
            base_delay,
            max_retries,
            rotate_session: false,
        }
    }

    fn no_retry(kind: ErrorKind) -> Self {
        Self::new(kind, RetryStrategy::NoRetry, Duration::ZERO, 0)
    }
}

/// 封禁文案签名
static BLOCK_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)access\s+denied",
        r"(?i)you\s+have\s+been\s+blocked",
        r"(?i)your\s+ip\s+(address\s+)?has\s+been\s+(blocked|banned)",
        r"(?i)unusual\s+traffic\s+from\s+your",
        r"(?i)request\s+blocked",
    ])
    .expect("block signature set")
});

/// 限速文案签名
static RATE_LIMIT_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)rate\s+limit(ed)?",
        r"(?i)too\s+many\s+requests",
        r"(?i)slow\s+down",
        r"(?i)quota\s+exceeded",
    ])
    .expect("rate limit signature set")
});

/// 验证码文案签名
static CAPTCHA_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)re?captcha",
        r"(?i)hcaptcha",
        r"(?i)verify\s+(that\s+)?you\s+are\s+(a\s+)?human",
        r"(?i)solve\s+the\s+puzzle",
    ])
    .expect("captcha signature set")
});

/// 边缘/WAF挑战页签名
static CHALLENGE_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)checking\s+your\s+browser",
        r"(?i)just\s+a\s+moment",
        r"(?i)attention\s+required.{0,40}cloudflare",
        r"(?i)ddos\s+protection\s+by",
        r"(?i)enable\s+javascript\s+and\s+cookies\s+to\s+continue",
        r"(?i)please\s+wait\s+while\s+we\s+verify",
    ])
    .expect("challenge signature set")
});

/// 成功响应体的最小可用长度（字节）
const MIN_USABLE_BODY_BYTES: usize = 100;

/// 错误分类器
///
/// 纯函数式的映射：把原始抓取结果（异常、状态码、响应体）
/// 归类为错误类型并给出建议的重试策略。规则按优先级排列，
/// 先命中先生效。
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// 创建分类器实例
    pub fn new() -> Self {
        Self
    }

    /// 对抓取结果进行分类
    ///
    /// # 参数
    ///
    /// * `outcome` - 外部抓取层回传的结果
    ///
    /// # 返回值
    ///
    /// * `Some(Classification)` - 需要按该分类处理的失败
    /// * `None` - 真正成功的结果，无需分类
    pub fn classify(&self, outcome: &FetchOutcome) -> Option<Classification> {
        // 连接级失败优先于一切HTTP层判断
        if let Some(err) = &outcome.error {
            let lowered = err.to_lowercase();
            if lowered.contains("timeout") || lowered.contains("timed out") {
                return Some(Classification::new(
                    ErrorKind::Timeout,
                    RetryStrategy::Linear,
                    Duration::from_secs(5),
                    2,
                ));
            }
            return Some(Classification::new(
                ErrorKind::Connection,
                RetryStrategy::Exponential,
                Duration::from_secs(2),
                3,
            ));
        }

        let status = outcome.status_code.unwrap_or(0);
        let body = outcome.body_excerpt.as_str();

        // 封禁：换个身份也许有用，同一身份上重试只会增加暴露
        if status == 403 || BLOCK_SIGNATURES.is_match(body) {
            return Some(Classification::no_retry(ErrorKind::Blocked));
        }

        // 限速：优先采用Retry-After给出的等待时间
        if status == 429 || RATE_LIMIT_SIGNATURES.is_match(body) {
            let base = outcome.retry_after.unwrap_or(Duration::from_secs(60));
            return Some(Classification::new(
                ErrorKind::RateLimited,
                RetryStrategy::Linear,
                base,
                2,
            ));
        }

        // 挑战/验证码：最多重试一次，且必须先轮换会话
        if CAPTCHA_SIGNATURES.is_match(body) {
            let mut c = Classification::new(
                ErrorKind::Captcha,
                RetryStrategy::ChallengeRetry,
                Duration::from_secs(30),
                1,
            );
            c.rotate_session = true;
            return Some(c);
        }
        if outcome.challenge_detected || CHALLENGE_SIGNATURES.is_match(body) {
            let mut c = Classification::new(
                ErrorKind::Challenge,
                RetryStrategy::ChallengeRetry,
                Duration::from_secs(15),
                1,
            );
            c.rotate_session = true;
            return Some(c);
        }

        // 服务端错误：502/503/504通常是暂时的，其他5xx重试价值更低
        if (500..600).contains(&status) {
            let retries = match status {
                502 | 503 | 504 => 3,
                _ => 1,
            };
            return Some(Classification::new(
                ErrorKind::Server,
                RetryStrategy::Exponential,
                Duration::from_secs(5),
                retries,
            ));
        }

        // 客户端错误：页面不存在或无权限，重试浪费配额
        if matches!(status, 400 | 401 | 404 | 410) {
            return Some(Classification::no_retry(ErrorKind::Client));
        }

        // 2xx不等于可用页面：响应体过小视为内容错误
        if (200..300).contains(&status) && body.len() < MIN_USABLE_BODY_BYTES {
            return Some(Classification::new(
                ErrorKind::Content,
                RetryStrategy::Exponential,
                Duration::from_secs(2),
                2,
            ));
        }

        if outcome.success {
            return None;
        }

        // 没有命中任何规则的失败
        Some(Classification::new(
            ErrorKind::Unknown,
            RetryStrategy::Exponential,
            Duration::from_secs(3),
            1,
        ))
    }
}
