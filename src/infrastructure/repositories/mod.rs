// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库实现模块
///
/// 提供领域仓库接口基于记录存储的实现
pub mod batch_repo_impl;
pub mod task_repo_impl;
