//! 页面处理上下文
//!
//! 封装"我正在处理哪个文档的第几页"这一信息

use crate::models::Language;
use std::fmt::Display;

/// 页面处理上下文
#[derive(Debug, Clone)]
pub struct UnitCtx {
    /// 文档稳定标识（仅用于日志显示）
    pub session_key: String,

    /// 页码（从1开始）
    pub unit_index: usize,

    /// 总页数
    pub total_units: usize,

    /// 输出语言
    pub language: Language,
}

impl UnitCtx {
    /// 创建新的页面上下文
    pub fn new(
        session_key: impl Into<String>,
        unit_index: usize,
        total_units: usize,
        language: Language,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            unit_index,
            total_units,
            language,
        }
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[文档 {} 第 {}/{} 页]",
            self.session_key, self.unit_index, self.total_units
        )
    }
}
