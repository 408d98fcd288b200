// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化日志订阅器
///
/// 过滤级别来自`RUST_LOG`，未设置时默认只对本crate开debug。
/// 可重复调用：已有全局订阅器时静默跳过，方便测试进程内
/// 多个组件各自初始化。
pub fn init_telemetry() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,prospectrs=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
