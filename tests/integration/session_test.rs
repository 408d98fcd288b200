// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{enqueue, fast_settings, harness, take, usable_body};
use prospectrs::domain::models::outcome::FetchOutcome;
use prospectrs::domain::models::task::TaskPriority;
use std::time::Duration;

#[tokio::test]
async fn test_challenge_rotates_session_before_retry() {
    let mut settings = fast_settings();
    settings.retry.max_delay_secs = 0;
    let h = harness(settings);
    enqueue(&h.scheduler, "https://a.com/page", TaskPriority::High, 0.5);

    let (task, first_session) = take(&h.scheduler).await.unwrap();
    let challenge_body = format!(
        "please solve the reCAPTCHA to continue {}",
        "x".repeat(200)
    );
    h.scheduler.report(
        task.id,
        FetchOutcome::success(task.id, 200, challenge_body, Duration::from_millis(50)),
    );

    // 重试走新的会话身份
    let (retried, second_session) = take(&h.scheduler).await.unwrap();
    assert_eq!(retried.id, task.id);
    assert_ne!(second_session.id, first_session.id);

    h.scheduler.report(
        retried.id,
        FetchOutcome::success(retried.id, 200, usable_body(), Duration::from_millis(50)),
    );
    assert_eq!(h.scheduler.status().completed_count, 1);
}

#[tokio::test]
async fn test_repeated_errors_rotate_session() {
    let mut settings = fast_settings();
    settings.retry.max_delay_secs = 0;
    let h = harness(settings);
    enqueue(&h.scheduler, "https://a.com/page", TaskPriority::Medium, 0.5);

    let mut session_ids = Vec::new();
    while let Some((task, session)) = take(&h.scheduler).await {
        session_ids.push(session.id);
        h.scheduler.report(
            task.id,
            FetchOutcome::connection_failure(
                task.id,
                "connection reset".to_string(),
                Duration::from_millis(10),
            ),
        );
    }

    // 4次尝试：前3次同一会话，错误数达到上限后第4次换新会话
    assert_eq!(session_ids.len(), 4);
    assert_eq!(session_ids[0], session_ids[1]);
    assert_eq!(session_ids[1], session_ids[2]);
    assert_ne!(session_ids[2], session_ids[3]);
    assert_eq!(h.sessions.live_count(), 1);
}

#[tokio::test]
async fn test_parallel_takes_on_one_domain_use_distinct_sessions() {
    let h = harness(fast_settings());
    enqueue(&h.scheduler, "https://a.com/1", TaskPriority::Medium, 0.5);
    enqueue(&h.scheduler, "https://a.com/2", TaskPriority::Medium, 0.5);
    enqueue(&h.scheduler, "https://a.com/3", TaskPriority::Medium, 0.5);

    let (t1, s1) = take(&h.scheduler).await.unwrap();
    let (t2, s2) = take(&h.scheduler).await.unwrap();
    let (t3, s3) = take(&h.scheduler).await.unwrap();

    // 三个在途任务各自持有独立的会话身份
    assert_ne!(s1.id, s2.id);
    assert_ne!(s2.id, s3.id);
    assert_ne!(s1.id, s3.id);
    assert_eq!(h.sessions.live_count(), 3);

    for (task, _) in [(t1, s1), (t2, s2), (t3, s3)] {
        h.scheduler.report(
            task.id,
            FetchOutcome::success(task.id, 200, usable_body(), Duration::from_millis(50)),
        );
    }
    assert_eq!(h.scheduler.status().completed_count, 3);
    // 归还后的会话留在池中等待复用
    assert_eq!(h.sessions.live_count(), 3);
}

#[tokio::test]
async fn test_session_cap_starves_new_domain_without_failing_tasks() {
    let mut settings = fast_settings();
    settings.session.max_live_sessions = 1;
    let h = harness(settings);

    enqueue(&h.scheduler, "https://a.com/page", TaskPriority::Critical, 0.9);
    enqueue(&h.scheduler, "https://b.com/page", TaskPriority::Low, 0.1);

    let (task_a, _) = take(&h.scheduler).await.unwrap();
    assert_eq!(task_a.domain, "a.com");
    // 会话池占满，b.com暂时拿不到会话但任务不会失败
    assert!(take(&h.scheduler).await.is_none());
    assert_eq!(h.scheduler.status().failed_count, 0);
    assert_eq!(h.scheduler.status().pending_by_domain.get("b.com"), Some(&1));
}
