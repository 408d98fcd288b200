// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{enqueue, fast_settings, harness, take, usable_body};
use prospectrs::domain::models::outcome::FetchOutcome;
use prospectrs::domain::models::task::TaskPriority;
use std::time::Duration;

fn blocked(task_id: uuid::Uuid) -> FetchOutcome {
    FetchOutcome::http_failure(task_id, 403, String::new(), Duration::from_millis(50))
}

#[tokio::test]
async fn test_tripped_circuit_skips_domain_but_serves_others() {
    let mut settings = fast_settings();
    settings.circuit.failure_threshold = 2;
    let h = harness(settings);

    for i in 0..3 {
        enqueue(
            &h.scheduler,
            &format!("https://bad.com/{}", i),
            TaskPriority::Critical,
            0.9,
        );
    }
    enqueue(&h.scheduler, "https://good.com/page", TaskPriority::Low, 0.1);

    for _ in 0..2 {
        let (task, _) = take(&h.scheduler).await.unwrap();
        assert_eq!(task.domain, "bad.com");
        h.scheduler.report(task.id, blocked(task.id));
    }

    assert!(h.limiter.is_circuit_open("bad.com"));
    // bad.com还有更高优先级的任务排队，但熔断让good.com先走
    let (task, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(task.domain, "good.com");
    h.scheduler.report(
        task.id,
        FetchOutcome::success(task.id, 200, usable_body(), Duration::from_millis(50)),
    );

    assert!(take(&h.scheduler).await.is_none());
    assert_eq!(
        h.scheduler.status().circuit_open_domains,
        vec!["bad.com".to_string()]
    );
}

#[tokio::test]
async fn test_circuit_recovery_via_single_probe() {
    let mut settings = fast_settings();
    settings.circuit.failure_threshold = 2;
    // 恢复超时为0，熔断后立即进入半开探测
    settings.circuit.open_timeout_secs = 0;
    let h = harness(settings);

    for i in 0..4 {
        enqueue(
            &h.scheduler,
            &format!("https://bad.com/{}", i),
            TaskPriority::Medium,
            0.5,
        );
    }

    for _ in 0..2 {
        let (task, _) = take(&h.scheduler).await.unwrap();
        h.scheduler.report(task.id, blocked(task.id));
    }
    assert!(h.limiter.is_circuit_open("bad.com"));

    // 半开状态放行单个探测请求
    let (probe, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(probe.domain, "bad.com");
    // 探测未返回前不再放行第二个请求
    assert!(take(&h.scheduler).await.is_none());

    h.scheduler.report(
        probe.id,
        FetchOutcome::success(probe.id, 200, usable_body(), Duration::from_millis(50)),
    );
    assert!(!h.limiter.is_circuit_open("bad.com"));

    // 熔断关闭后正常放行
    let (task, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(task.domain, "bad.com");
}

#[tokio::test]
async fn test_concurrency_cap_enforced_through_scheduler() {
    let mut settings = fast_settings();
    settings.limiter.max_concurrent = 2;
    let h = harness(settings);

    for i in 0..3 {
        enqueue(
            &h.scheduler,
            &format!("https://a.com/{}", i),
            TaskPriority::Medium,
            0.5,
        );
    }

    let (t1, _) = take(&h.scheduler).await.unwrap();
    let (_t2, _) = take(&h.scheduler).await.unwrap();
    // 两个在途，第三个被并发上限挡住
    assert!(take(&h.scheduler).await.is_none());

    h.scheduler.report(
        t1.id,
        FetchOutcome::success(t1.id, 200, usable_body(), Duration::from_millis(50)),
    );
    assert!(take(&h.scheduler).await.is_some());
}
