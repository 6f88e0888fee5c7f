// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 记录存储模块
///
/// 提供 Redis 与进程内两种带过期时间的记录存储
pub mod memory_store;
pub mod redis_client;
