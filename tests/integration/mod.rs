// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod helpers;
pub mod limiter_test;
pub mod scheduler_test;
pub mod session_test;
pub mod worker_test;
