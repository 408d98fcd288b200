// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 熔断器
pub mod circuit;
/// 按域名限流器
pub mod domain_limiter;

pub use circuit::{Circuit, CircuitStatus};
pub use domain_limiter::{AdmitDecision, DenyReason, DomainLimiter};
