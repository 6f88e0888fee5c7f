// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::models::task::DocumentId;

/// 远端生成服务返回的进度更新
///
/// `is_terminal` 是必填字段：远端必须明确声明结果是否为终态，
/// 缺失时反序列化失败，而不是根据其它字段是否存在去猜测。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationUpdate {
    #[serde(default)]
    pub results: BTreeMap<DocumentId, serde_json::Value>,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub fail_count: u32,
    pub is_terminal: bool,
}

impl GenerationUpdate {
    /// 尚无结果的非终态更新
    pub fn in_progress() -> Self {
        Self {
            results: BTreeMap::new(),
            success_count: 0,
            fail_count: 0,
            is_terminal: false,
        }
    }
}
