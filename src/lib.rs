// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! genflow：批量内容生成任务协调服务
//!
//! 将文档集合拆分为批次提交给远端生成服务，异步轮询结果，
//! 并通过熔断器、任务索引与后台工作器维持任务状态的一致性。

/// 应用程序模块
///
/// 包含任务编排用例与 DTO
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体、服务和仓库接口
pub mod domain;

/// 引擎模块
///
/// 远端生成服务客户端与熔断器
pub mod engines;

/// 基础设施模块
///
/// 记录存储（内存 / Redis）、仓库实现与指标导出
pub mod infrastructure;

/// 表示层模块
///
/// 运维 HTTP API：路由、处理器与错误映射
pub mod presentation;

/// 队列模块
///
/// 生成结果轮询队列
pub mod queue;

/// 工具模块
///
/// 错误分类、重试策略与日志
pub mod utils;

/// 工作器模块
///
/// 周期调度与维护工作器
pub mod workers;
