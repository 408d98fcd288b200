// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SessionSettings;
use crate::domain::models::session::CrawlSession;
use crate::session::proxy::ProxyPool;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// 会话错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// 全局会话数或域名槽位已达上限且无可淘汰的过期会话。
    /// 调度器将其视为"域名暂时不可用"而非任务失败。
    #[error("session pool exhausted for domain {0}")]
    TemporarilyUnavailable(String),
}

/// 会话使用反馈
///
/// 工作器完成一次请求后通过`release`回传，用于更新会话计数
/// 并检查轮换触发条件。
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFeedback {
    /// 请求是否成功
    pub success: bool,
    /// 是否遇到反爬挑战
    pub challenge: bool,
    /// 是否被封禁
    pub blocked: bool,
}

/// 域名下的一个会话槽位
///
/// 同一域名可以有多个并发槽位，每个槽位最多一个活跃会话；
/// 被领出（in_use）的槽位不会再分配给其他任务。
#[derive(Debug)]
struct SessionSlot {
    session: CrawlSession,
    in_use: bool,
}

/// 会话管理器
///
/// 持有活跃会话池与代理池。`acquire`为每个并发任务领出一个
/// 独立的会话身份，空闲槽位优先复用。每次`release`检查轮换
/// 触发条件：错误数达到上限、会话超龄、或近期请求中挑战/封禁
/// 比例过高。任一条件命中即关闭会话（释放代理引用但不销毁
/// 代理），下一次`acquire`会惰性创建替代会话。
pub struct SessionManager {
    settings: SessionSettings,
    proxies: Arc<ProxyPool>,
    /// 按域名分组的会话槽位
    sessions: DashMap<String, Vec<SessionSlot>>,
}

impl SessionManager {
    /// 创建新的会话管理器实例
    pub fn new(settings: SessionSettings, proxies: Arc<ProxyPool>) -> Self {
        Self {
            settings,
            proxies,
            sessions: DashMap::new(),
        }
    }

    /// 领出一个可用于该域名的会话
    ///
    /// 优先复用域名下空闲的活跃会话；没有则创建新会话，
    /// 受域名槽位上限与全局活跃会话数上限约束——全局达到
    /// 上限时先尝试淘汰最老的已过期会话，否则返回暂时不可用。
    pub fn acquire(&self, domain: &str) -> Result<CrawlSession, SessionError> {
        if let Some(mut entry) = self.sessions.get_mut(domain) {
            // 清掉已过期的空闲槽位，在途的留到release时轮换
            entry.retain(|slot| slot.in_use || !slot.session.is_expired());
            if let Some(slot) = entry.iter_mut().find(|slot| !slot.in_use) {
                slot.in_use = true;
                return Ok(slot.session.clone());
            }
            if entry.len() >= self.settings.max_slots_per_domain {
                return Err(SessionError::TemporarilyUnavailable(domain.to_string()));
            }
        }

        if self.live_count() >= self.settings.max_live_sessions
            && !self.evict_oldest_expired()
        {
            return Err(SessionError::TemporarilyUnavailable(domain.to_string()));
        }

        let session = self.create_session(domain);
        self.sessions
            .entry(domain.to_string())
            .or_default()
            .push(SessionSlot {
                session: session.clone(),
                in_use: true,
            });
        debug!(domain, session_id = %session.id, "session created");
        Ok(session)
    }

    /// 归还会话并回传本次请求的反馈
    ///
    /// # 返回值
    ///
    /// 会话因触发轮换条件被关闭时返回true
    pub fn release(&self, session_id: Uuid, feedback: SessionFeedback) -> bool {
        let mut rotate_reason: Option<&'static str> = None;
        let mut found = false;

        'outer: for mut entry in self.sessions.iter_mut() {
            for slot in entry.iter_mut() {
                if slot.session.id != session_id {
                    continue;
                }
                found = true;
                slot.in_use = false;
                let session = &mut slot.session;
                session.request_count += 1;
                if !feedback.success {
                    session.error_count += 1;
                }
                if feedback.challenge {
                    session.challenge_count += 1;
                }
                if feedback.blocked {
                    session.block_count += 1;
                }

                if session.error_count >= self.settings.max_errors {
                    rotate_reason = Some("error threshold");
                } else if session.is_expired() {
                    rotate_reason = Some("max age");
                } else if session.challenge_rate(self.settings.challenge_rate_min_requests)
                    > self.settings.challenge_rate_threshold
                {
                    rotate_reason = Some("challenge rate");
                }
                break 'outer;
            }
        }

        if !found {
            debug!(session_id = %session_id, "release for unknown session");
            return false;
        }

        if let Some(reason) = rotate_reason {
            info!(session_id = %session_id, reason, "rotating session");
            self.rotate(session_id);
            return true;
        }
        false
    }

    /// 归还会话但不计入任何统计
    ///
    /// 用于任务被放弃而非执行完成的场合（如领出会话后
    /// 队首被其他工作器抢走），槽位回到空闲状态。
    pub fn checkin(&self, session_id: Uuid) {
        for mut entry in self.sessions.iter_mut() {
            if let Some(slot) = entry.iter_mut().find(|s| s.session.id == session_id) {
                slot.in_use = false;
                return;
            }
        }
    }

    /// 强制关闭会话
    ///
    /// 释放其代理引用（代理本身保留在池中），从活跃池移除。
    pub fn rotate(&self, session_id: Uuid) {
        for mut entry in self.sessions.iter_mut() {
            let before = entry.len();
            entry.retain(|slot| slot.session.id != session_id);
            if entry.len() != before {
                return;
            }
        }
    }

    /// 选择一个代理供新会话或直接使用
    pub fn pick_proxy(&self) -> Option<crate::domain::models::session::ProxyRecord> {
        self.proxies.pick()
    }

    /// 回传代理使用结果
    pub fn record_proxy_result(&self, proxy_id: Uuid, success: bool, latency_ms: u64) {
        self.proxies.record_result(proxy_id, success, latency_ms);
    }

    /// 查询代理的端点URL
    pub fn proxy_endpoint(&self, proxy_id: Uuid) -> Option<String> {
        self.proxies.get(proxy_id).map(|p| p.endpoint)
    }

    /// 当前活跃会话总数
    pub fn live_count(&self) -> usize {
        self.sessions.iter().map(|e| e.len()).sum()
    }

    fn create_session(&self, domain: &str) -> CrawlSession {
        let now = Utc::now();
        let proxy_id = self.proxies.pick().map(|p| p.id);
        CrawlSession {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            created_at: now,
            expires_at: now + ChronoDuration::seconds(self.settings.max_duration_secs as i64),
            request_count: 0,
            error_count: 0,
            challenge_count: 0,
            block_count: 0,
            proxy_id,
        }
    }

    /// 淘汰最老的已过期会话，返回是否有会话被淘汰
    ///
    /// 过期会话的身份已经失效，即使在途也可淘汰——其归还
    /// 只会被当作未知会话记录。
    fn evict_oldest_expired(&self) -> bool {
        let mut oldest: Option<(String, Uuid)> = None;
        let mut oldest_created = Utc::now();

        for entry in self.sessions.iter() {
            for slot in entry.iter() {
                if slot.session.is_expired() && slot.session.created_at < oldest_created {
                    oldest_created = slot.session.created_at;
                    oldest = Some((entry.key().clone(), slot.session.id));
                }
            }
        }

        if let Some((domain, id)) = oldest {
            if let Some(mut entry) = self.sessions.get_mut(&domain) {
                entry.retain(|slot| slot.session.id != id);
            }
            debug!(domain, session_id = %id, "evicted expired session");
            true
        } else {
            false
        }
    }
}
