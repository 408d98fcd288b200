// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{enqueue, fast_settings, harness, usable_body, Harness};
use prospectrs::config::settings::Settings;
use prospectrs::domain::models::task::TaskPriority;
use prospectrs::engines::ReqwestFetcher;
use prospectrs::workers::WorkerManager;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn worker_settings() -> Settings {
    let mut s = fast_settings();
    s.worker.count = 2;
    s.worker.idle_backoff_ms = 20;
    s
}

async fn wait_for_completed(h: &Harness, expected: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if h.scheduler.status().completed_count >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("tasks did not complete in time");
}

#[tokio::test]
async fn test_workers_drain_queue_end_to_end() {
    let server = MockServer::start().await;
    for p in ["/p1", "/p2", "/p3"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(usable_body()))
            .mount(&server)
            .await;
    }

    let settings = worker_settings();
    let h = harness(settings.clone());
    for p in ["/p1", "/p2", "/p3"] {
        assert!(enqueue(
            &h.scheduler,
            &format!("{}{}", server.uri(), p),
            TaskPriority::Medium,
            0.5
        ));
    }

    let mut manager = WorkerManager::new(
        h.scheduler.clone(),
        h.sessions.clone(),
        Arc::new(ReqwestFetcher::new()),
        settings,
    );
    manager.start_workers();

    wait_for_completed(&h, 3).await;
    manager.shutdown().await;

    let snapshot = h.scheduler.status();
    assert_eq!(snapshot.completed_count, 3);
    assert_eq!(snapshot.failed_count, 0);
    assert!(snapshot.pending_by_domain.is_empty());
}

#[tokio::test]
async fn test_worker_retries_transient_server_error() {
    let server = MockServer::start().await;
    // 第一次503，随后200
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(usable_body()))
        .mount(&server)
        .await;

    let mut settings = worker_settings();
    // 退避钳制到0，重试立即就绪
    settings.retry.max_delay_secs = 0;
    let h = harness(settings.clone());
    assert!(enqueue(
        &h.scheduler,
        &format!("{}/page", server.uri()),
        TaskPriority::High,
        0.8
    ));

    let mut manager = WorkerManager::new(
        h.scheduler.clone(),
        h.sessions.clone(),
        Arc::new(ReqwestFetcher::new()),
        settings,
    );
    manager.start_workers();

    wait_for_completed(&h, 1).await;
    manager.shutdown().await;

    assert_eq!(h.scheduler.status().failed_count, 0);
    // 503消耗了一次尝试，成功发生在重试上
    assert!(server.received_requests().await.unwrap().len() >= 2);
}
