// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use prospectrs::config::settings::Settings;
use prospectrs::domain::models::session::CrawlSession;
use prospectrs::domain::models::task::{CrawlTask, TaskPriority};
use prospectrs::limiter::DomainLimiter;
use prospectrs::policy::{FetchedPolicy, PolicyProvider, PolicyStore};
use prospectrs::scheduler::{CrawlScheduler, EnqueueRequest};
use prospectrs::session::{ProxyPool, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 固定robots内容的策略提供者，测试中不走网络
#[derive(Default)]
pub struct StaticPolicyProvider {
    pub robots: String,
    pub delay: Option<Duration>,
}

#[async_trait]
impl PolicyProvider for StaticPolicyProvider {
    async fn fetch_policy(&self, _domain: &str) -> Result<FetchedPolicy> {
        Ok(FetchedPolicy {
            robots_content: self.robots.clone(),
            crawl_delay: self.delay,
        })
    }
}

/// 组装好的被测组件集合
pub struct Harness {
    pub scheduler: Arc<CrawlScheduler>,
    pub limiter: Arc<DomainLimiter>,
    pub sessions: Arc<SessionManager>,
}

/// 时序可预测的测试配置
///
/// 关掉抖动与爬取延迟，放开速率窗口，让断言不依赖真实时间。
pub fn fast_settings() -> Settings {
    let mut s = Settings::default();
    s.retry.jitter_factor = 0.0;
    s.retry.min_delay_ms = 0;
    s.policy.default_crawl_delay_secs = 0.0;
    s.limiter.default_rpm = 6000.0;
    s.limiter.max_rpm = 6000.0;
    s.limiter.max_concurrent = 10;
    s
}

/// 用给定配置和robots内容组装调度器
pub fn harness_with(settings: Settings, robots: &str) -> Harness {
    let policy = Arc::new(PolicyStore::new(
        Arc::new(StaticPolicyProvider {
            robots: robots.to_string(),
            delay: None,
        }),
        settings.policy.clone(),
    ));
    let limiter = Arc::new(DomainLimiter::new(
        settings.limiter.clone(),
        settings.circuit.clone(),
    ));
    let proxies = Arc::new(ProxyPool::new(vec![], settings.proxy.clone()));
    let sessions = Arc::new(SessionManager::new(settings.session.clone(), proxies));
    let scheduler = Arc::new(CrawlScheduler::new(
        settings,
        policy,
        limiter.clone(),
        sessions.clone(),
    ));
    Harness {
        scheduler,
        limiter,
        sessions,
    }
}

pub fn harness(settings: Settings) -> Harness {
    harness_with(settings, "")
}

/// 入队一个任务，返回是否被接受
pub fn enqueue(
    scheduler: &CrawlScheduler,
    url: &str,
    priority: TaskPriority,
    confidence: f64,
) -> bool {
    scheduler.enqueue(EnqueueRequest {
        url: url.to_string(),
        page_type_hint: None,
        confidence,
        priority: Some(priority),
        discovered_from: None,
    })
}

/// 以随机工作器身份取下一个任务
pub async fn take(scheduler: &CrawlScheduler) -> Option<(CrawlTask, CrawlSession)> {
    scheduler.next(Uuid::new_v4()).await
}

/// 一段足以通过最小响应体检查的页面内容
pub fn usable_body() -> String {
    format!("<html><body>{}</body></html>", "content ".repeat(30))
}
