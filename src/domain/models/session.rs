// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 爬取会话
///
/// 一个逻辑爬取身份（cookie、User-Agent与代理的绑定），
/// 生命周期有限，通过轮换降低被识别的概率。
/// 每个(域名, 逻辑槽位)最多一个活跃会话。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSession {
    /// 会话唯一标识符
    pub id: Uuid,
    /// 绑定的域名
    pub domain: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 已发出的请求数
    pub request_count: u32,
    /// 累计错误数
    pub error_count: u32,
    /// 累计挑战数
    pub challenge_count: u32,
    /// 累计封禁数
    pub block_count: u32,
    /// 绑定的代理ID（弱引用，不独占代理）
    pub proxy_id: Option<Uuid>,
}

impl CrawlSession {
    /// 会话是否已超过存活时间
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// 近期请求中挑战与封禁的占比
    ///
    /// 请求数不足时返回0，避免在样本太少时误触发轮换。
    pub fn challenge_rate(&self, min_requests: u32) -> f64 {
        if self.request_count < min_requests {
            return 0.0;
        }
        (self.challenge_count + self.block_count) as f64 / self.request_count as f64
    }
}

/// 代理记录
///
/// 被所有会话共享，只接受成功/失败反馈式的状态变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// 代理唯一标识符
    pub id: Uuid,
    /// 代理端点URL
    pub endpoint: String,
    /// 是否健康
    pub healthy: bool,
    /// 连续失败次数
    pub consecutive_failures: u32,
    /// 平均延迟（毫秒，EWMA）
    pub avg_latency_ms: f64,
}

impl ProxyRecord {
    /// 创建一个新的代理记录
    pub fn new(endpoint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            healthy: true,
            consecutive_failures: 0,
            avg_latency_ms: 0.0,
        }
    }
}
