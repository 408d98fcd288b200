// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::Settings;
use crate::domain::models::outcome::{ErrorKind, FetchOutcome};
use crate::domain::models::session::CrawlSession;
use crate::domain::models::task::{CrawlTask, TaskPriority};
use crate::limiter::{AdmitDecision, DomainLimiter};
use crate::policy::PolicyStore;
use crate::retry::{ErrorClassifier, RetryPlanner};
use crate::scheduler::queue::{DeferredQueue, DomainQueue};
use crate::session::{SessionError, SessionFeedback, SessionManager};
use crate::utils::url_utils;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 入队请求
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    /// 目标URL
    pub url: String,
    /// 页面类型提示（外部内容分类器给出）
    pub page_type_hint: Option<String>,
    /// 置信度 [0,1]
    pub confidence: f64,
    /// 优先级，缺省为Medium
    pub priority: Option<TaskPriority>,
    /// 发现该URL的来源页面
    pub discovered_from: Option<String>,
}

/// 队列状态快照
///
/// 只读视图，供外部监控消费，不会修改调度器状态。
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// 每个域名的待处理任务数
    pub pending_by_domain: HashMap<String, usize>,
    /// 每个域名的在途任务数
    pub active_by_domain: HashMap<String, usize>,
    /// 等待重试的任务数
    pub deferred_count: usize,
    /// 已完成任务总数
    pub completed_count: u64,
    /// 永久失败任务总数
    pub failed_count: u64,
    /// 处于熔断状态的域名
    pub circuit_open_domains: Vec<String>,
}

/// 在途任务记录
#[derive(Debug, Clone)]
struct ActiveTask {
    task: CrawlTask,
    session_id: Uuid,
    proxy_id: Option<Uuid>,
}

/// 爬取调度器
///
/// 工作器唯一直接交互的组件：持有每个域名一个优先级队列，
/// 出队前咨询策略缓存与限流器，通过会话管理器附加会话，
/// 结果经错误分类器与重试计划器决定任务去向（完成、延迟重试
/// 或永久失败）。`enqueue`/`next`/`report`/`status`均可被多个
/// 工作器并发调用。
pub struct CrawlScheduler {
    settings: Settings,
    policy: Arc<PolicyStore>,
    limiter: Arc<DomainLimiter>,
    sessions: Arc<SessionManager>,
    classifier: ErrorClassifier,
    planner: RetryPlanner,
    /// 域名 → 优先级队列
    queues: DashMap<String, Arc<Mutex<DomainQueue>>>,
    /// 退避中的重试任务，按就绪时间排序
    deferred: Mutex<DeferredQueue>,
    /// 在途任务
    active: DashMap<Uuid, ActiveTask>,
    /// 已见过的规范化URL，跨pending/active/终态去重
    seen_urls: DashMap<String, ()>,
    /// 永久失败任务的最后错误类型，供外部报表聚合
    failed_kinds: DashMap<Uuid, ErrorKind>,
    completed_count: AtomicU64,
    failed_count: AtomicU64,
}

impl CrawlScheduler {
    /// 创建新的调度器实例
    pub fn new(
        settings: Settings,
        policy: Arc<PolicyStore>,
        limiter: Arc<DomainLimiter>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let planner = RetryPlanner::new(
            settings.retry.clone(),
            Duration::from_secs(settings.scheduler.task_deadline_secs),
        );
        Self {
            settings,
            policy,
            limiter,
            sessions,
            classifier: ErrorClassifier::new(),
            planner,
            queues: DashMap::new(),
            deferred: Mutex::new(DeferredQueue::new()),
            active: DashMap::new(),
            seen_urls: DashMap::new(),
            failed_kinds: DashMap::new(),
            completed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
        }
    }

    /// 入队一个抓取任务
    ///
    /// 拒绝条件：URL无效、重复URL（pending/active/终态中已存在）、
    /// 域名页面预算耗尽、以及活跃域名数超过上限时的非Critical/High
    /// 任务（为关键任务保留容量）。
    ///
    /// # 返回值
    ///
    /// 任务被接受返回true
    pub fn enqueue(&self, request: EnqueueRequest) -> bool {
        let url = match url_utils::normalize_url(&request.url) {
            Ok(u) => u,
            Err(e) => {
                debug!(url = %request.url, error = %e, "enqueue rejected: invalid url");
                return false;
            }
        };
        let domain = match url_utils::domain_of(&url) {
            Ok(d) => d,
            Err(_) => return false,
        };

        if !self.policy.budget_remaining(&domain) {
            debug!(domain, "enqueue rejected: page budget exhausted");
            return false;
        }

        let priority = request.priority.unwrap_or_default();
        let is_reserved_tier =
            matches!(priority, TaskPriority::Critical | TaskPriority::High);
        if !is_reserved_tier
            && !self.queues.contains_key(&domain)
            && self.active_domain_count() >= self.settings.scheduler.max_active_domains
        {
            debug!(domain, %priority, "enqueue rejected: active domain cap reached");
            return false;
        }

        // 先占去重键再入队，并发的重复入队只有一个能成功
        if self.seen_urls.insert(url.clone(), ()).is_some() {
            debug!(url, "enqueue rejected: duplicate");
            return false;
        }

        let mut task = CrawlTask::new(url, domain.clone(), priority, request.confidence);
        task.max_attempts = self.settings.scheduler.default_max_attempts;
        task.page_type_hint = request.page_type_hint;
        task.discovered_from = request.discovered_from;

        self.queue_of(&domain).lock().push(task);
        counter!("scheduler_enqueued_total").increment(1);
        true
    }

    /// 取出下一个可执行的(任务, 会话)对
    ///
    /// 在所有非空域名队列中选出优先级最高（同级比置信度）的任务，
    /// 前提是该域名此刻通过策略检查与限流准入。策略禁止、熔断打开
    /// 或达到并发上限的域名被跳过，不阻塞其他域名的选择。
    /// 没有可执行任务时返回None，调用方应退避等待。
    pub async fn next(&self, worker_id: Uuid) -> Option<(CrawlTask, CrawlSession)> {
        self.promote_ready();

        // 候选域名按其队首任务排序
        let mut candidates: Vec<(String, u8, f64)> = Vec::new();
        for entry in self.queues.iter() {
            let queue = entry.value().lock();
            if let Some(task) = queue.peek() {
                candidates.push((entry.key().clone(), task.priority.rank(), task.confidence));
            }
        }
        candidates.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
        });

        for (domain, _, _) in candidates {
            let head_url = {
                let queue = self.queue_of(&domain);
                let queue = queue.lock();
                match queue.peek() {
                    Some(task) => task.url.clone(),
                    None => continue,
                }
            };

            let (allowed, reason) = self.policy.is_allowed(&head_url).await;
            if !allowed {
                // 被robots禁止的URL不会随时间变得可抓，直接终结，
                // 避免它堵住整个域名队列
                if reason == "disallowed by robots" {
                    self.fail_head_of_queue(&domain, &head_url);
                }
                continue;
            }

            let delay = self.policy.get_delay(&domain).await;
            self.limiter.set_min_interval(&domain, delay);

            match self.limiter.admit(&domain) {
                AdmitDecision::Allowed => {}
                AdmitDecision::Denied(reason) => {
                    debug!(domain, ?reason, "domain skipped");
                    continue;
                }
            }

            let session = match self.sessions.acquire(&domain) {
                Ok(s) => s,
                Err(SessionError::TemporarilyUnavailable(_)) => {
                    // 会话池耗尽不是错误，归还准入并跳过该域名
                    self.limiter.cancel(&domain);
                    continue;
                }
            };

            let task = {
                let queue = self.queue_of(&domain);
                let mut queue = queue.lock();
                queue.pop()
            };
            let Some(mut task) = task else {
                // 其他工作器抢先拿走了队首
                self.limiter.cancel(&domain);
                self.sessions.checkin(session.id);
                continue;
            };

            if task.start().is_err() {
                warn!(task_id = %task.id, "task in unexpected state, dropping");
                self.limiter.cancel(&domain);
                self.sessions.checkin(session.id);
                continue;
            }

            debug!(
                worker_id = %worker_id,
                task_id = %task.id,
                url = %task.url,
                attempt = task.attempt,
                "task dispatched"
            );
            self.active.insert(
                task.id,
                ActiveTask {
                    task: task.clone(),
                    session_id: session.id,
                    proxy_id: session.proxy_id,
                },
            );
            return Some((task, session));
        }

        None
    }

    /// 上报任务的抓取结果
    ///
    /// 成功则任务完成；失败经分类器与重试计划器裁决：
    /// 允许重试的任务降一级优先级后进入延迟队列，
    /// 拒绝重试的任务带着最后的错误类型进入失败终态。
    pub fn report(&self, task_id: Uuid, outcome: FetchOutcome) {
        let Some((_, entry)) = self.active.remove(&task_id) else {
            warn!(task_id = %task_id, "report for unknown task");
            return;
        };
        let ActiveTask {
            mut task,
            session_id,
            proxy_id,
        } = entry;
        let domain = task.domain.clone();

        let classification = self.classifier.classify(&outcome);
        let effective_success = classification.is_none();

        self.policy.record_request(&domain, effective_success);
        self.limiter.record(&domain, effective_success, outcome.latency);
        if let Some(proxy_id) = proxy_id {
            // 代理健康只关心连接层是否可达
            self.sessions.record_proxy_result(
                proxy_id,
                outcome.error.is_none(),
                outcome.latency.as_millis() as u64,
            );
        }

        let kind = classification.as_ref().map(|c| c.kind);
        let feedback = SessionFeedback {
            success: effective_success,
            challenge: matches!(kind, Some(ErrorKind::Challenge) | Some(ErrorKind::Captcha)),
            blocked: matches!(kind, Some(ErrorKind::Blocked)),
        };
        let rotated = self.sessions.release(session_id, feedback);

        let Some(classification) = classification else {
            if task.complete().is_ok() {
                self.completed_count.fetch_add(1, Ordering::Relaxed);
                counter!("scheduler_completed_total").increment(1);
                info!(task_id = %task.id, url = %task.url, "task completed");
            }
            return;
        };

        // 挑战类错误在同一身份上重试没有意义，强制轮换会话
        if classification.rotate_session && !rotated {
            self.sessions.rotate(session_id);
        }

        // 目标站点明确要求退避时，整个域名一起冷却
        if classification.kind == ErrorKind::RateLimited {
            self.limiter.suspend(&domain, classification.base_delay);
        }

        let decision = self.planner.should_retry(
            task.attempt,
            task.elapsed_since_first_attempt(),
            &classification,
        );

        if decision.retry && task.attempts_remaining() {
            let delay = self.planner.compute_delay(task.attempt, &classification);
            if task.requeue_for_retry(classification.kind).is_ok() {
                debug!(
                    task_id = %task.id,
                    kind = %classification.kind,
                    delay_ms = delay.as_millis() as u64,
                    attempt = task.attempt,
                    "task deferred for retry"
                );
                counter!("scheduler_retries_total", "kind" => classification.kind.to_string())
                    .increment(1);
                self.deferred.lock().push(task, Instant::now() + delay);
            }
            return;
        }

        let reason = if decision.retry {
            "max attempts reached"
        } else {
            decision.reason
        };
        if task.fail(classification.kind).is_ok() {
            self.failed_kinds.insert(task.id, classification.kind);
            self.failed_count.fetch_add(1, Ordering::Relaxed);
            counter!("scheduler_failed_total", "kind" => classification.kind.to_string())
                .increment(1);
            info!(
                task_id = %task.id,
                url = %task.url,
                kind = %classification.kind,
                attempts = task.attempt,
                reason,
                "task permanently failed"
            );
        }
    }

    /// 获取队列状态快照
    pub fn status(&self) -> QueueSnapshot {
        let mut pending_by_domain = HashMap::new();
        for entry in self.queues.iter() {
            let len = entry.value().lock().len();
            if len > 0 {
                pending_by_domain.insert(entry.key().clone(), len);
            }
        }
        let mut active_by_domain: HashMap<String, usize> = HashMap::new();
        for entry in self.active.iter() {
            *active_by_domain
                .entry(entry.value().task.domain.clone())
                .or_default() += 1;
        }
        QueueSnapshot {
            pending_by_domain,
            active_by_domain,
            deferred_count: self.deferred.lock().len(),
            completed_count: self.completed_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            circuit_open_domains: self.limiter.open_domains(),
        }
    }

    /// 某个失败任务的最后错误类型
    pub fn failure_kind(&self, task_id: Uuid) -> Option<ErrorKind> {
        self.failed_kinds.get(&task_id).map(|k| *k)
    }

    fn queue_of(&self, domain: &str) -> Arc<Mutex<DomainQueue>> {
        self.queues
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainQueue::new())))
            .clone()
    }

    /// 把延迟队列中已就绪的任务捞回各自的域名队列
    fn promote_ready(&self) {
        let ready = self.deferred.lock().pop_ready(Instant::now());
        for task in ready {
            let domain = task.domain.clone();
            self.queue_of(&domain).lock().push(task);
        }
    }

    /// 终结被robots禁止的队首任务
    fn fail_head_of_queue(&self, domain: &str, expected_url: &str) {
        let queue = self.queue_of(domain);
        let mut queue = queue.lock();
        if queue.peek().map(|t| t.url.as_str()) != Some(expected_url) {
            return;
        }
        if let Some(mut task) = queue.pop() {
            if task.fail_before_start(ErrorKind::Client).is_ok() {
                self.failed_kinds.insert(task.id, ErrorKind::Client);
                self.failed_count.fetch_add(1, Ordering::Relaxed);
                info!(url = %task.url, "task failed: disallowed by robots");
            }
        }
    }

    /// 当前有任务（待处理或在途）的域名数
    fn active_domain_count(&self) -> usize {
        let mut domains: std::collections::HashSet<String> = self
            .queues
            .iter()
            .filter(|entry| !entry.value().lock().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        for entry in self.active.iter() {
            domains.insert(entry.value().task.domain.clone());
        }
        domains.len()
    }
}
