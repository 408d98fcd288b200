// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 策略提供者
pub mod provider;
/// 策略缓存
pub mod store;

pub use provider::{FetchedPolicy, HttpPolicyProvider, PolicyProvider};
pub use store::PolicyStore;
