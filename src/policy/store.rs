// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::PolicySettings;
use crate::policy::provider::PolicyProvider;
use crate::utils::url_utils;
use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// 缓存的域名策略
///
/// 不变式：requests_issued与max_pages的关系作为准入检查执行，
/// 策略对象本身不做硬截断。
#[derive(Debug, Clone)]
struct DomainPolicy {
    /// robots.txt原文，空串表示全部允许
    robots_content: String,
    /// 该域名的爬取延迟
    crawl_delay: Duration,
    /// 页面预算
    max_pages: u32,
    /// 已发出的请求数
    requests_issued: u32,
    /// 刷新时间，用于TTL判断
    fetched_at: Instant,
}

/// 策略缓存
///
/// 按域名缓存robots规则、爬取延迟和页面预算，TTL过期后刷新。
/// 策略获取失败时采用保守放行（默认延迟 + 全部允许）并记录日志，
/// 绝不因策略查询错误而让整个调度器失败。
pub struct PolicyStore {
    provider: Arc<dyn PolicyProvider>,
    settings: PolicySettings,
    cache: DashMap<String, DomainPolicy>,
}

impl PolicyStore {
    /// 创建新的策略缓存实例
    pub fn new(provider: Arc<dyn PolicyProvider>, settings: PolicySettings) -> Self {
        Self {
            provider,
            settings,
            cache: DashMap::new(),
        }
    }

    /// 确保域名策略已缓存且未过期
    async fn ensure(&self, domain: &str) {
        let ttl = Duration::from_secs(self.settings.cache_ttl_secs);
        if let Some(cached) = self.cache.get(domain) {
            if cached.fetched_at.elapsed() < ttl {
                return;
            }
        }

        let (content, delay) = match self.provider.fetch_policy(domain).await {
            Ok(policy) => {
                let delay = policy
                    .crawl_delay
                    .unwrap_or(Duration::from_secs_f64(self.settings.default_crawl_delay_secs));
                (policy.robots_content, delay)
            }
            Err(e) => {
                // 保守放行：策略拿不到不代表站点禁止爬取
                warn!(domain, error = %e, "policy lookup failed, defaulting to conservative allow");
                (
                    String::new(),
                    Duration::from_secs_f64(self.settings.default_crawl_delay_secs),
                )
            }
        };

        // 刷新时保留已计数的请求数
        let requests_issued = self
            .cache
            .get(domain)
            .map(|p| p.requests_issued)
            .unwrap_or(0);
        self.cache.insert(
            domain.to_string(),
            DomainPolicy {
                robots_content: content,
                crawl_delay: delay,
                max_pages: self.settings.default_max_pages,
                requests_issued,
                fetched_at: Instant::now(),
            },
        );
    }

    /// 检查URL当前是否被允许抓取
    ///
    /// # 返回值
    ///
    /// `(allowed, reason)` - 是否允许及其原因
    pub async fn is_allowed(&self, url: &str) -> (bool, &'static str) {
        let domain = match url_utils::domain_of(url) {
            Ok(d) => d,
            Err(_) => return (false, "invalid url"),
        };
        self.ensure(&domain).await;

        let Some(policy) = self.cache.get(&domain) else {
            return (true, "no policy cached");
        };
        if policy.robots_content.is_empty() {
            return (true, "no robots restrictions");
        }
        let mut matcher = DefaultMatcher::default();
        if matcher.one_agent_allowed_by_robots(&policy.robots_content, &self.settings.user_agent, url)
        {
            (true, "allowed by robots")
        } else {
            (false, "disallowed by robots")
        }
    }

    /// 获取域名的爬取延迟
    pub async fn get_delay(&self, domain: &str) -> Duration {
        self.ensure(domain).await;
        self.cache
            .get(domain)
            .map(|p| p.crawl_delay)
            .unwrap_or(Duration::from_secs_f64(self.settings.default_crawl_delay_secs))
    }

    /// 域名的页面预算是否还有剩余
    pub fn budget_remaining(&self, domain: &str) -> bool {
        self.cache
            .get(domain)
            .map(|p| p.requests_issued < p.max_pages)
            .unwrap_or(true)
    }

    /// 记录一次已发出的请求
    pub fn record_request(&self, domain: &str, _success: bool) {
        if let Some(mut policy) = self.cache.get_mut(domain) {
            policy.requests_issued += 1;
        }
    }
}
