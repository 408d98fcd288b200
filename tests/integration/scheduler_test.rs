// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{enqueue, fast_settings, harness, harness_with, take, usable_body};
use prospectrs::domain::models::outcome::{ErrorKind, FetchOutcome};
use prospectrs::domain::models::task::TaskPriority;
use std::time::Duration;

#[tokio::test]
async fn test_critical_task_dequeued_before_higher_confidence_medium() {
    let h = harness(fast_settings());
    assert!(enqueue(
        &h.scheduler,
        "https://b.com/page",
        TaskPriority::Medium,
        0.9
    ));
    assert!(enqueue(
        &h.scheduler,
        "https://a.com/contact",
        TaskPriority::Critical,
        0.2
    ));

    let (first, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(first.domain, "a.com");
    assert_eq!(first.priority, TaskPriority::Critical);
}

#[tokio::test]
async fn test_confidence_breaks_priority_ties() {
    let h = harness(fast_settings());
    enqueue(&h.scheduler, "https://a.com/one", TaskPriority::Medium, 0.3);
    enqueue(&h.scheduler, "https://a.com/two", TaskPriority::Medium, 0.9);
    enqueue(&h.scheduler, "https://a.com/three", TaskPriority::Medium, 0.6);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (task, _) = take(&h.scheduler).await.unwrap();
        seen.push(task.confidence);
        h.scheduler.report(
            task.id,
            FetchOutcome::success(task.id, 200, usable_body(), Duration::from_millis(50)),
        );
    }
    assert_eq!(seen, vec![0.9, 0.6, 0.3]);
}

#[tokio::test]
async fn test_duplicate_url_rejected() {
    let h = harness(fast_settings());
    assert!(enqueue(
        &h.scheduler,
        "https://a.com/page",
        TaskPriority::Medium,
        0.5
    ));
    // 规范化后相同的URL视为重复
    assert!(!enqueue(
        &h.scheduler,
        "https://A.COM/page#section",
        TaskPriority::Medium,
        0.5
    ));
}

#[tokio::test]
async fn test_active_domain_cap_reserves_room_for_critical() {
    let mut settings = fast_settings();
    settings.scheduler.max_active_domains = 1;
    let h = harness(settings);

    assert!(enqueue(&h.scheduler, "https://a.com/x", TaskPriority::Low, 0.5));
    // 低优先级的新域名被拒绝，关键任务仍然放行
    assert!(!enqueue(&h.scheduler, "https://b.com/x", TaskPriority::Low, 0.5));
    assert!(enqueue(
        &h.scheduler,
        "https://c.com/contact",
        TaskPriority::Critical,
        0.9
    ));
    // 已有队列的域名不受上限影响
    assert!(enqueue(&h.scheduler, "https://a.com/y", TaskPriority::Low, 0.5));
}

#[tokio::test]
async fn test_connection_failures_retried_then_permanently_failed() {
    let mut settings = fast_settings();
    // 退避钳制到0，重试立即就绪
    settings.retry.max_delay_secs = 0;
    let h = harness(settings);
    enqueue(&h.scheduler, "https://flaky.com/page", TaskPriority::Medium, 0.5);

    let mut attempts = 0;
    let mut last_priority = TaskPriority::Medium;
    while let Some((task, _)) = take(&h.scheduler).await {
        attempts += 1;
        last_priority = task.priority;
        h.scheduler.report(
            task.id,
            FetchOutcome::connection_failure(
                task.id,
                "connection refused".to_string(),
                Duration::from_millis(10),
            ),
        );
    }

    // 首次尝试 + 3次重试
    assert_eq!(attempts, 4);
    // 每次重试降一级
    assert_eq!(last_priority, TaskPriority::Background);
    let snapshot = h.scheduler.status();
    assert_eq!(snapshot.failed_count, 1);
    assert_eq!(snapshot.completed_count, 0);
}

#[tokio::test]
async fn test_blocked_response_fails_without_retry() {
    let h = harness(fast_settings());
    enqueue(&h.scheduler, "https://a.com/page", TaskPriority::High, 0.5);

    let (task, _) = take(&h.scheduler).await.unwrap();
    h.scheduler.report(
        task.id,
        FetchOutcome::http_failure(task.id, 403, String::new(), Duration::from_millis(50)),
    );

    assert!(take(&h.scheduler).await.is_none());
    let snapshot = h.scheduler.status();
    assert_eq!(snapshot.failed_count, 1);
    assert_eq!(snapshot.deferred_count, 0);
    assert_eq!(h.scheduler.failure_kind(task.id), Some(ErrorKind::Blocked));
}

#[tokio::test]
async fn test_rate_limited_domain_cools_down_then_retries() {
    let mut settings = fast_settings();
    settings.limiter.max_concurrent = 1;
    let h = harness(settings);

    enqueue(
        &h.scheduler,
        "https://x.com/contact",
        TaskPriority::Critical,
        0.9,
    );
    enqueue(&h.scheduler, "https://x.com/about", TaskPriority::Low, 0.1);

    let (first, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(first.url, "https://x.com/contact");

    let mut outcome =
        FetchOutcome::http_failure(first.id, 429, String::new(), Duration::from_millis(50));
    outcome.retry_after = Some(Duration::from_secs(2));
    h.scheduler.report(first.id, outcome);

    // 冷却期内整个域名都不可调度，低优先级任务也拿不到
    assert!(take(&h.scheduler).await.is_none());
    assert_eq!(h.scheduler.status().deferred_count, 1);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    // 退避期满后被限速的任务先回来
    let (retried, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(retried.id, first.id);
    assert_eq!(retried.attempt, 2);
    h.scheduler.report(
        retried.id,
        FetchOutcome::success(retried.id, 200, usable_body(), Duration::from_millis(50)),
    );
    assert_eq!(h.scheduler.status().completed_count, 1);

    let (second, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(second.url, "https://x.com/about");
}

#[tokio::test]
async fn test_robots_disallowed_task_fails_and_queue_moves_on() {
    let h = harness_with(
        fast_settings(),
        "User-agent: *\nDisallow: /admin\n",
    );
    enqueue(&h.scheduler, "https://a.com/admin", TaskPriority::Critical, 0.9);
    enqueue(&h.scheduler, "https://a.com/contact", TaskPriority::Low, 0.5);

    // 第一轮扫描终结被禁止的队首
    let first = take(&h.scheduler).await;
    let task = match first {
        Some((task, _)) => task,
        None => take(&h.scheduler).await.unwrap().0,
    };
    assert_eq!(task.url, "https://a.com/contact");
    assert_eq!(h.scheduler.status().failed_count, 1);
}

#[tokio::test]
async fn test_page_budget_rejects_enqueue() {
    let mut settings = fast_settings();
    settings.policy.default_max_pages = 1;
    let h = harness(settings);

    enqueue(&h.scheduler, "https://a.com/one", TaskPriority::Medium, 0.5);
    let (task, _) = take(&h.scheduler).await.unwrap();
    h.scheduler.report(
        task.id,
        FetchOutcome::success(task.id, 200, usable_body(), Duration::from_millis(50)),
    );

    // 预算已用完
    assert!(!enqueue(&h.scheduler, "https://a.com/two", TaskPriority::Medium, 0.5));
}

#[tokio::test]
async fn test_snapshot_reflects_pending_and_active() {
    let h = harness(fast_settings());
    enqueue(&h.scheduler, "https://a.com/one", TaskPriority::Medium, 0.5);
    enqueue(&h.scheduler, "https://a.com/two", TaskPriority::Medium, 0.4);

    let snapshot = h.scheduler.status();
    assert_eq!(snapshot.pending_by_domain.get("a.com"), Some(&2));

    let (task, _) = take(&h.scheduler).await.unwrap();
    let snapshot = h.scheduler.status();
    assert_eq!(snapshot.pending_by_domain.get("a.com"), Some(&1));
    assert_eq!(snapshot.active_by_domain.get("a.com"), Some(&1));

    h.scheduler.report(
        task.id,
        FetchOutcome::success(task.id, 200, usable_body(), Duration::from_millis(50)),
    );
    assert_eq!(h.scheduler.status().completed_count, 1);
}
