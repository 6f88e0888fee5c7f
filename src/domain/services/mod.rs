// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 批次服务（batch_service）：批次切分、派发、结果合并与卡住恢复
/// - 任务索引服务（task_index_service）：分页列表使用的任务索引与孤儿清理
pub mod batch_service;
pub mod task_index_service;
