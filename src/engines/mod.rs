// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基于reqwest的默认抓取引擎
pub mod reqwest_engine;
/// 抓取引擎接口定义
pub mod traits;

pub use reqwest_engine::ReqwestFetcher;
pub use traits::{FetchError, FetchRequest, FetchResponse, Fetcher};
