// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 会话管理器
pub mod manager;
/// 代理池
pub mod proxy;

pub use manager::{SessionError, SessionFeedback, SessionManager};
pub use proxy::ProxyPool;
