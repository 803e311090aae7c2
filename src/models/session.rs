//! 文档会话与进度
//!
//! `SessionState` 是每个文档会话唯一的共享状态，由编排器和历史合并器通过
//! `Arc` 共同持有。页面进度只由编排器修改，记录ID只由合并器写入。
//! 每次打开新文档都会递增 generation，旧会话的异步结果据此被丢弃。

use crate::error::UnitError;
use crate::models::analysis::UnitAnalysis;
use crate::models::options::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// 文档稳定标识（文件名 + 文件大小）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(file_name: &str, size_bytes: u64) -> Self {
        Self(format!("{}#{}", file_name, size_bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 单页状态
///
/// `Unanalyzed → Analyzing → Completed`，或 `Analyzing → Failed`。
/// `Failed` 只能通过手动重试重新进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitState {
    #[default]
    Unanalyzed,
    Analyzing,
    Completed,
    Failed,
}

/// 进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// 文档会话
#[derive(Debug, Clone)]
pub struct DocumentSession {
    key: SessionKey,
    generation: u64,
    full_text: Arc<str>,
    total_units: usize,
    language: Language,
    states: Vec<UnitState>,
    units: BTreeMap<usize, UnitAnalysis>,
    record_id: Option<String>,
    create_unresolved: bool,
}

impl DocumentSession {
    fn new(
        key: SessionKey,
        generation: u64,
        full_text: Arc<str>,
        total_units: usize,
        language: Language,
        record_id: Option<String>,
    ) -> Self {
        Self {
            key,
            generation,
            full_text,
            total_units,
            language,
            states: vec![UnitState::Unanalyzed; total_units],
            units: BTreeMap::new(),
            record_id,
            create_unresolved: false,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn full_text(&self) -> Arc<str> {
        Arc::clone(&self.full_text)
    }

    pub fn total_units(&self) -> usize {
        self.total_units
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    /// 创建请求已发出但结果未知，本会话不再发出创建请求
    pub fn create_unresolved(&self) -> bool {
        self.create_unresolved
    }

    /// 页码必须在 [1, total] 内
    pub fn check_index(&self, index: usize) -> Result<(), UnitError> {
        if index == 0 || index > self.total_units {
            return Err(UnitError::IndexOutOfRange {
                index,
                total: self.total_units,
            });
        }
        Ok(())
    }

    pub fn check_range(&self, start: usize, end: usize) -> Result<(), UnitError> {
        if start == 0 || start > end || end > self.total_units {
            return Err(UnitError::InvalidRange {
                start,
                end,
                total: self.total_units,
            });
        }
        Ok(())
    }

    /// 越界页码视为未分析
    pub fn state(&self, index: usize) -> UnitState {
        index
            .checked_sub(1)
            .and_then(|i| self.states.get(i))
            .copied()
            .unwrap_or_default()
    }

    pub fn analysis(&self, index: usize) -> Option<&UnitAnalysis> {
        self.units.get(&index)
    }

    /// 已完成的页面，按页码升序
    pub fn completed_units(&self) -> &BTreeMap<usize, UnitAnalysis> {
        &self.units
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.units.len(),
            total: self.total_units,
        }
    }

    pub(crate) fn set_state(&mut self, index: usize, state: UnitState) {
        if let Some(slot) = index.checked_sub(1).and_then(|i| self.states.get_mut(i)) {
            *slot = state;
        }
    }

    pub(crate) fn store_analysis(&mut self, analysis: UnitAnalysis) {
        let index = analysis.unit_index;
        self.set_state(index, UnitState::Completed);
        self.units.insert(index, analysis);
    }

    /// 记录ID只能设置一次，返回是否生效
    pub(crate) fn set_record_id(&mut self, id: String) -> bool {
        if self.record_id.is_some() {
            return false;
        }
        self.record_id = Some(id);
        true
    }

    pub(crate) fn mark_create_unresolved(&mut self) {
        self.create_unresolved = true;
    }
}

/// 会话级共享状态
///
/// 内部锁从不跨 `.await` 持有。
#[derive(Debug, Default)]
pub struct SessionState {
    current: Mutex<Option<DocumentSession>>,
    generations: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 打开新文档，替换当前会话，返回新的 generation
    pub fn open(
        &self,
        key: SessionKey,
        full_text: Arc<str>,
        total_units: usize,
        language: Language,
        record_id: Option<String>,
    ) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let session =
            DocumentSession::new(key, generation, full_text, total_units, language, record_id);
        *self.lock() = Some(session);
        generation
    }

    /// 关闭当前会话
    pub fn reset(&self) {
        self.generations.fetch_add(1, Ordering::SeqCst);
        *self.lock() = None;
    }

    pub fn is_active(&self, generation: u64) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// 读取当前会话
    pub fn read<R>(&self, f: impl FnOnce(&DocumentSession) -> R) -> Option<R> {
        self.lock().as_ref().map(f)
    }

    /// 修改指定 generation 的会话；会话已被替换时返回 None
    pub(crate) fn update<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut DocumentSession) -> R,
    ) -> Option<R> {
        self.lock()
            .as_mut()
            .filter(|s| s.generation == generation)
            .map(f)
    }

    /// 修改当前会话（不校验 generation），用于开始处理前的状态检查
    pub(crate) fn modify<R>(&self, f: impl FnOnce(&mut DocumentSession) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }

    fn lock(&self) -> MutexGuard<'_, Option<DocumentSession>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_three(state: &SessionState) -> u64 {
        state.open(
            SessionKey::new("notes.pdf", 1024),
            Arc::from("a\u{c}b\u{c}c"),
            3,
            Language::English,
            None,
        )
    }

    #[test]
    fn test_index_bounds() {
        let state = SessionState::new();
        open_three(&state);
        state.read(|s| {
            assert!(s.check_index(1).is_ok());
            assert!(s.check_index(3).is_ok());
            assert!(s.check_index(0).is_err());
            assert!(s.check_index(4).is_err());
            assert!(s.check_range(2, 1).is_err());
        });
    }

    #[test]
    fn test_record_id_set_once() {
        let state = SessionState::new();
        let generation = open_three(&state);
        assert_eq!(state.update(generation, |s| s.set_record_id("r1".into())), Some(true));
        assert_eq!(state.update(generation, |s| s.set_record_id("r2".into())), Some(false));
        assert_eq!(state.read(|s| s.record_id().map(String::from)), Some(Some("r1".into())));
    }

    #[test]
    fn test_replaced_session_rejects_updates() {
        let state = SessionState::new();
        let old = open_three(&state);
        let new = open_three(&state);
        assert_ne!(old, new);
        assert!(!state.is_active(old));
        assert_eq!(state.update(old, |s| s.store_analysis(UnitAnalysis::empty(1))), None);
        assert_eq!(state.read(|s| s.progress().completed), Some(0));

        state.reset();
        assert!(!state.is_active(new));
        assert!(state.read(|_| ()).is_none());
    }
}
