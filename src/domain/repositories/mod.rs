// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库接口模块
///
/// 该模块定义了领域层的存储接口，遵循依赖倒置原则。
/// - 记录存储（record_store）：带过期时间的键值存储与类型化 CAS 访问
/// - 任务仓库（task_repository）：任务与批次记录
///
/// 具体实现由基础设施层提供（Redis 或内存）。
pub mod record_store;
pub mod task_repository;
