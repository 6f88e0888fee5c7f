// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含系统的核心业务逻辑，包括：
/// - 领域模型（models）：任务、批次与轮询条目
/// - 仓库接口（repositories）：记录存储抽象
/// - 服务（services）：批次管理与任务索引
pub mod models;
pub mod repositories;
pub mod services;
