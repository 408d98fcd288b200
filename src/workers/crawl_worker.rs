// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::{FetchSettings, WorkerSettings};
use crate::domain::models::outcome::FetchOutcome;
use crate::domain::models::session::CrawlSession;
use crate::domain::models::task::CrawlTask;
use crate::engines::traits::{FetchRequest, FetchResponse, Fetcher};
use crate::scheduler::CrawlScheduler;
use crate::session::SessionManager;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// 响应体片段的最大保留长度
const BODY_EXCERPT_CHARS: usize = 2048;

/// 抓取工作器
///
/// 循环从调度器领取(任务, 会话)对，交给抓取引擎执行，
/// 并把结果上报回调度器。没有可执行任务时短暂空转，
/// 不在循环内持有任何调度器锁。
pub struct CrawlWorker {
    id: Uuid,
    scheduler: Arc<CrawlScheduler>,
    sessions: Arc<SessionManager>,
    fetcher: Arc<dyn Fetcher>,
    fetch_settings: FetchSettings,
    idle_backoff: Duration,
}

impl CrawlWorker {
    /// 创建新的抓取工作器
    pub fn new(
        scheduler: Arc<CrawlScheduler>,
        sessions: Arc<SessionManager>,
        fetcher: Arc<dyn Fetcher>,
        fetch_settings: FetchSettings,
        worker_settings: &WorkerSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scheduler,
            sessions,
            fetcher,
            fetch_settings,
            idle_backoff: Duration::from_millis(worker_settings.idle_backoff_ms),
        }
    }

    /// 工作器ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 执行一次抓取
    #[tracing::instrument(skip(self, task, session), fields(task_id = %task.id, url = %task.url, attempt = task.attempt))]
    async fn execute(&self, task: &CrawlTask, session: &CrawlSession) -> FetchOutcome {
        let proxy = session
            .proxy_id
            .and_then(|id| self.sessions.proxy_endpoint(id));
        let request = FetchRequest {
            url: task.url.clone(),
            user_agent: self.fetch_settings.user_agent.clone(),
            proxy,
            timeout: Duration::from_secs(self.fetch_settings.timeout_secs),
        };

        let started = Instant::now();
        match self.fetcher.fetch(&request).await {
            Ok(response) => outcome_from_response(task.id, response),
            Err(e) => {
                debug!(task_id = %task.id, error = %e, "fetch failed");
                FetchOutcome::connection_failure(task.id, e.to_string(), started.elapsed())
            }
        }
    }
}

/// 把引擎响应归一化为调度核心的结果值对象
///
/// 此处只做机械转换，成功与否的最终裁决在错误分类器。
pub fn outcome_from_response(task_id: Uuid, response: FetchResponse) -> FetchOutcome {
    let retry_after = response.retry_after();
    let excerpt: String = response.body.chars().take(BODY_EXCERPT_CHARS).collect();
    let mut outcome = if (200..300).contains(&response.status_code) {
        FetchOutcome::success(task_id, response.status_code, excerpt, response.elapsed)
    } else {
        FetchOutcome::http_failure(task_id, response.status_code, excerpt, response.elapsed)
    };
    outcome.retry_after = retry_after;
    outcome
}

#[async_trait]
impl Worker for CrawlWorker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(worker_id = %self.id, engine = self.fetcher.name(), "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.scheduler.next(self.id).await {
                Some((task, session)) => {
                    let outcome = self.execute(&task, &session).await;
                    self.scheduler.report(task.id, outcome);
                }
                None => {
                    // 空闲等待，同时保持对关闭信号的响应
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, "worker stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "crawl_worker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response(status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            status_code: status,
            body: body.to_string(),
            headers: HashMap::new(),
            elapsed: Duration::from_millis(120),
        }
    }

    #[test]
    fn test_outcome_success_flag_follows_status() {
        let ok = outcome_from_response(Uuid::new_v4(), response(200, "body"));
        assert!(ok.success);
        let bad = outcome_from_response(Uuid::new_v4(), response(500, "err"));
        assert!(!bad.success);
        assert_eq!(bad.status_code, Some(500));
    }

    #[test]
    fn test_outcome_carries_retry_after() {
        let mut r = response(429, "");
        r.headers
            .insert("retry-after".to_string(), "30".to_string());
        let o = outcome_from_response(Uuid::new_v4(), r);
        assert_eq!(o.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_body_excerpt_truncated() {
        let long = "x".repeat(10_000);
        let o = outcome_from_response(Uuid::new_v4(), response(200, &long));
        assert_eq!(o.body_excerpt.len(), BODY_EXCERPT_CHARS);
    }
}
