// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 抓取工作器
pub mod crawl_worker;
/// 工作器管理器
pub mod manager;
/// Worker trait定义
pub mod worker;

pub use crawl_worker::CrawlWorker;
pub use manager::WorkerManager;
pub use worker::Worker;
