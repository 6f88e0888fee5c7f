// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// HTTP请求处理器模块
///
/// 运维 API：任务提交与操作、调度触发、熔断器状态与维护
pub mod circuit_handler;
pub mod task_handler;
