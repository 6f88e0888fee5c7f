// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 提供周期性后台工作：调度 tick（派发、轮询、卡住恢复）与维护（清理、索引重建）
pub mod maintenance_worker;
pub mod manager;
pub mod tick_worker;
pub mod worker;

pub use worker::Worker;
