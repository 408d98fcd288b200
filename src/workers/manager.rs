// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::Settings;
use crate::engines::traits::Fetcher;
use crate::scheduler::CrawlScheduler;
use crate::session::SessionManager;
use crate::utils::telemetry;
use crate::workers::crawl_worker::CrawlWorker;
use crate::workers::worker::Worker;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 工作管理器
///
/// 负责启动指定数量的抓取工作器并协调它们的优雅关闭。
/// 关闭通过watch通道广播，工作器在完成手头任务后退出。
pub struct WorkerManager {
    scheduler: Arc<CrawlScheduler>,
    sessions: Arc<SessionManager>,
    fetcher: Arc<dyn Fetcher>,
    settings: Settings,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerManager {
    /// 创建新的工作管理器
    pub fn new(
        scheduler: Arc<CrawlScheduler>,
        sessions: Arc<SessionManager>,
        fetcher: Arc<dyn Fetcher>,
        settings: Settings,
    ) -> Self {
        telemetry::init_telemetry();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            scheduler,
            sessions,
            fetcher,
            settings,
            handles: Vec::new(),
            shutdown_tx,
        }
    }

    /// 启动工作进程
    ///
    /// 创建并启动配置指定数量的抓取工作器
    pub fn start_workers(&mut self) {
        let count = self.settings.worker.count;
        info!(count, "starting workers");
        for _ in 0..count {
            let worker = CrawlWorker::new(
                self.scheduler.clone(),
                self.sessions.clone(),
                self.fetcher.clone(),
                self.settings.fetch.clone(),
                &self.settings.worker,
            );
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                if let Err(e) = worker.run(shutdown_rx).await {
                    error!(error = %e, "worker exited with error");
                }
            });
            self.handles.push(handle);
        }
    }

    /// 等待关闭信号并关闭工作进程
    ///
    /// 监听关闭信号并优雅地关闭所有工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        self.shutdown().await;
    }

    /// 广播关闭信号并等待所有工作器退出
    pub async fn shutdown(&mut self) {
        info!("Shutting down workers...");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("Workers shut down successfully");
    }
}
