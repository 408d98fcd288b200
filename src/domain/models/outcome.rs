// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// 错误类型枚举
///
/// 错误分类器将原始抓取结果映射为以下类型之一，
/// 每种类型对应不同的重试策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 连接级失败（DNS、连接被拒等）
    Connection,
    /// 请求超时
    Timeout,
    /// 被目标站点封禁（403或封禁文案）
    Blocked,
    /// 被限速（429或限速文案）
    RateLimited,
    /// 反爬挑战页（JS挑战、WAF拦截页）
    Challenge,
    /// 验证码页
    Captcha,
    /// 服务端错误（5xx）
    Server,
    /// 客户端错误（404/410/400/401）
    Client,
    /// 2xx但响应体过小，不是可用页面
    Content,
    /// 无法分类的错误
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Blocked => "blocked",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Challenge => "challenge",
            ErrorKind::Captcha => "captcha",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Content => "content",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// 抓取结果
///
/// 外部抓取层回传给调度核心的值对象，只用于喂给
/// 错误分类器、限流器和会话管理器，不在核心内长期保留。
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// 对应的任务ID
    pub task_id: Uuid,
    /// 是否成功拿到可用响应
    pub success: bool,
    /// HTTP状态码（连接级失败时为None）
    pub status_code: Option<u16>,
    /// 响应体片段，供签名匹配使用
    pub body_excerpt: String,
    /// Retry-After响应头给出的等待时间
    pub retry_after: Option<Duration>,
    /// 本次请求耗时
    pub latency: Duration,
    /// 连接级错误描述（超时、连接被拒等）
    pub error: Option<String>,
    /// 是否检测到反爬挑战
    pub challenge_detected: bool,
}

impl FetchOutcome {
    /// 构造一个成功结果
    pub fn success(task_id: Uuid, status_code: u16, body_excerpt: String, latency: Duration) -> Self {
        Self {
            task_id,
            success: true,
            status_code: Some(status_code),
            body_excerpt,
            retry_after: None,
            latency,
            error: None,
            challenge_detected: false,
        }
    }

    /// 构造一个HTTP层失败结果
    pub fn http_failure(
        task_id: Uuid,
        status_code: u16,
        body_excerpt: String,
        latency: Duration,
    ) -> Self {
        Self {
            task_id,
            success: false,
            status_code: Some(status_code),
            body_excerpt,
            retry_after: None,
            latency,
            error: None,
            challenge_detected: false,
        }
    }

    /// 构造一个连接级失败结果
    pub fn connection_failure(task_id: Uuid, error: String, latency: Duration) -> Self {
        Self {
            task_id,
            success: false,
            status_code: None,
            body_excerpt: String::new(),
            retry_after: None,
            latency,
            error: Some(error),
            challenge_detected: false,
        }
    }
}
