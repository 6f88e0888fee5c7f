// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供集中式轮询队列：决定下一次轮询哪个远端生成，并按退避重新安排
pub mod polling_queue;
