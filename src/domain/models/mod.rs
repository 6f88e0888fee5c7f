// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了系统的核心业务实体，包括：
/// - 任务（task）：一次用户发起的生成请求及其状态机
/// - 批次（batch）：任务文档的有界切片
/// - 生成更新（generation）：远端服务返回的进度
/// - 轮询条目（poll_entry）：等待远端完成的订阅
/// - 索引条目（index_entry）：分页列表使用的反规范化指针
pub mod batch;
pub mod generation;
pub mod index_entry;
pub mod poll_entry;
pub mod task;
