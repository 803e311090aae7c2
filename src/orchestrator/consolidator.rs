//! 历史合并器 - 编排层
//!
//! ## 职责
//!
//! 每个文档会话只维护一条累积记录，并与记录存储保持同步。
//!
//! - 没有记录ID → 先查会话缓存，缓存里有则采用；否则 `create_record`，
//!   把返回的ID写回会话和会话缓存
//! - 已有记录ID → `update_record`
//! - 两种请求都携带合并记录和完整的逐页映射
//! - 创建请求结果未知（可能已在存储端生效）时，本会话不再发出创建请求
//!
//! ## 顺序保证
//!
//! 同一会话同时只有一个持久化请求在途。请求在途期间的触发只设置 pending 标记，
//! 当前请求完成后再以最新状态补发一次，而不是每完成一页就排队一次。
//! 持有请求权后同步在独立任务中执行，调用方被取消时在途请求和补发照常完成。
//!
//! 持久化失败只记录日志并发出通知，不回滚、不阻塞分析进度。
//! 请求返回时会话已被替换，则丢弃结果；新建的记录ID仍写入缓存，
//! 同一文档重新打开后据此更新这条记录。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::clients::{RecordStore, SessionIdCache};
use crate::error::StoreError;
use crate::models::{
    CumulativeRecord, RecordMetadata, RecordPayload, SessionKey, SessionState,
};
use crate::notifications::{Notification, Notifier};

/// 一次同步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 创建了记录
    Created(String),
    /// 更新了记录
    Updated(String),
    /// 已有请求在途，本次触发合并到下一次同步
    Coalesced,
    /// 没有已完成的页面，或没有打开的会话
    NothingToSync,
    /// 会话已被替换，结果被丢弃
    Discarded,
    /// 存储不可用（非致命）
    Degraded(StoreError),
    /// 此前的创建请求结果未知，不再创建
    CreateUnresolved,
}

struct Snapshot {
    generation: u64,
    key: SessionKey,
    record_id: Option<String>,
    create_unresolved: bool,
    payload: RecordPayload,
    metadata: RecordMetadata,
}

/// 历史合并器
pub struct HistoryConsolidator {
    this: Weak<HistoryConsolidator>,
    session: Arc<SessionState>,
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn SessionIdCache>,
    notifier: Notifier,
    owner: String,
    kind: String,
    gate: Arc<Mutex<()>>,
    pending: AtomicBool,
}

impl HistoryConsolidator {
    pub fn new(
        session: Arc<SessionState>,
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn SessionIdCache>,
        notifier: Notifier,
        owner: impl Into<String>,
        kind: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            session,
            store,
            cache,
            notifier,
            owner: owner.into(),
            kind: kind.into(),
            gate: Arc::new(Mutex::new(())),
            pending: AtomicBool::new(false),
        })
    }

    /// 当前的合并视图
    pub fn merged_record(&self) -> Option<CumulativeRecord> {
        self.session
            .read(|s| CumulativeRecord::merge(s.completed_units(), s.record_id()))
    }

    /// 同步累积记录
    ///
    /// 已有同步在途时立即返回 `Coalesced`，在途的同步结束后会以最新状态再执行一次。
    pub async fn consolidate(&self) -> SyncOutcome {
        self.pending.store(true, Ordering::SeqCst);
        let Ok(gate) = Arc::clone(&self.gate).try_lock_owned() else {
            return SyncOutcome::Coalesced;
        };

        // 首次快照在调用方上下文中取，包含触发时的最新进度
        self.pending.store(false, Ordering::SeqCst);
        let first = self.snapshot();
        let Some(this) = self.this.upgrade() else {
            return self.sync_once(first).await;
        };

        match tokio::spawn(this.drain(gate, first)).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                error!("同步任务异常退出: {}", join_error);
                SyncOutcome::Coalesced
            }
        }
    }

    async fn drain(
        self: Arc<Self>,
        mut gate: OwnedMutexGuard<()>,
        first: Option<Snapshot>,
    ) -> SyncOutcome {
        let mut last = self.sync_once(first).await;

        loop {
            while self.pending.swap(false, Ordering::SeqCst) {
                last = self.sync_once(self.snapshot()).await;
            }
            drop(gate);

            // 释放锁的间隙里可能有新的触发
            if !self.pending.load(Ordering::SeqCst) {
                return last;
            }
            gate = match Arc::clone(&self.gate).try_lock_owned() {
                Ok(gate) => gate,
                Err(_) => return last,
            };
        }
    }

    async fn sync_once(&self, snapshot: Option<Snapshot>) -> SyncOutcome {
        let Some(mut snapshot) = snapshot else {
            return SyncOutcome::NothingToSync;
        };
        if snapshot.payload.units.is_empty() {
            debug!("[文档 {}] 尚无已完成页面，跳过同步", snapshot.key);
            return SyncOutcome::NothingToSync;
        }

        if snapshot.record_id.is_none() {
            match self.adopt_cached(&snapshot).await {
                Some(Some(adopted)) => snapshot = adopted,
                Some(None) => {}
                None => return self.stale(&snapshot),
            }
        }

        match snapshot.record_id.clone() {
            None if snapshot.create_unresolved => self.unresolved(&snapshot),
            None => self.create(snapshot).await,
            Some(record_id) => self.update(snapshot, record_id).await,
        }
    }

    /// 缓存中已有该文档的记录ID（例如旧会话的创建请求晚于重新打开返回）时采用它
    ///
    /// 返回 None 表示会话已被替换，`Some(None)` 表示缓存中没有。
    async fn adopt_cached(&self, snapshot: &Snapshot) -> Option<Option<Snapshot>> {
        let Some(cached) = self.cache.get(&snapshot.key).await else {
            return Some(None);
        };
        self.session
            .update(snapshot.generation, |s| s.set_record_id(cached.clone()))?;
        debug!("[文档 {}] 采用缓存中的记录ID {}", snapshot.key, cached);
        self.snapshot()
            .filter(|s| s.generation == snapshot.generation)
            .map(Some)
    }

    async fn create(&self, snapshot: Snapshot) -> SyncOutcome {
        info!(
            "[文档 {}] 📤 创建累积记录 ({} 页)",
            snapshot.key, snapshot.metadata.completed_units
        );

        let result = self
            .store
            .create_record(&self.owner, &self.kind, &snapshot.payload, &snapshot.metadata)
            .await;

        let record_id = match result {
            Ok(id) => id,
            Err(e) => {
                if e.is_outcome_unknown() {
                    self.session
                        .update(snapshot.generation, |s| s.mark_create_unresolved());
                }
                return self.degraded(&snapshot, e);
            }
        };

        match self
            .session
            .update(snapshot.generation, |s| s.set_record_id(record_id.clone()))
        {
            Some(true) => {
                self.cache.put(&snapshot.key, &record_id).await;
                info!("[文档 {}] ✓ 累积记录已创建: {}", snapshot.key, record_id);
                self.notifier.send(Notification::RecordCreated {
                    record_id: record_id.clone(),
                });
                SyncOutcome::Created(record_id)
            }
            Some(false) => {
                warn!(
                    "[文档 {}] ⚠️ 记录ID已存在，忽略新创建的记录 {}",
                    snapshot.key, record_id
                );
                SyncOutcome::Discarded
            }
            None => {
                // 记录已在存储端生效，同一文档重新打开后应更新它
                self.cache.put(&snapshot.key, &record_id).await;
                self.stale(&snapshot)
            }
        }
    }

    async fn update(&self, snapshot: Snapshot, record_id: String) -> SyncOutcome {
        debug!(
            "[文档 {}] 📤 更新累积记录 {} ({} 页)",
            snapshot.key, record_id, snapshot.metadata.completed_units
        );

        let result = self
            .store
            .update_record(&record_id, &snapshot.payload, &snapshot.metadata)
            .await;

        if !self.session.is_active(snapshot.generation) {
            return self.stale(&snapshot);
        }

        match result {
            Ok(()) => {
                info!(
                    "[文档 {}] ✓ 累积记录已更新 ({} 页)",
                    snapshot.key, snapshot.metadata.completed_units
                );
                self.notifier.send(Notification::RecordUpdated {
                    record_id: record_id.clone(),
                    completed: snapshot.metadata.completed_units,
                });
                SyncOutcome::Updated(record_id)
            }
            Err(e) => self.degraded(&snapshot, e),
        }
    }

    fn snapshot(&self) -> Option<Snapshot> {
        self.session.read(|s| {
            let units = s.completed_units().clone();
            Snapshot {
                generation: s.generation(),
                key: s.key().clone(),
                record_id: s.record_id().map(String::from),
                create_unresolved: s.create_unresolved(),
                metadata: RecordMetadata {
                    session_key: s.key().to_string(),
                    total_units: s.total_units(),
                    completed_units: units.len(),
                    language: s.language(),
                    updated_at: Utc::now(),
                },
                payload: RecordPayload {
                    record: CumulativeRecord::merge(&units, s.record_id()),
                    units,
                },
            }
        })
    }

    fn degraded(&self, snapshot: &Snapshot, error: StoreError) -> SyncOutcome {
        if !self.session.is_active(snapshot.generation) {
            return self.stale(snapshot);
        }
        warn!("[文档 {}] ⚠️ 持久化失败，分析继续: {}", snapshot.key, error);
        self.notifier.send(Notification::PersistenceDegraded {
            message: error.to_string(),
        });
        SyncOutcome::Degraded(error)
    }

    fn unresolved(&self, snapshot: &Snapshot) -> SyncOutcome {
        warn!(
            "[文档 {}] ⚠️ 此前的创建请求结果未知，本会话不再创建记录",
            snapshot.key
        );
        self.notifier.send(Notification::PersistenceDegraded {
            message: "创建请求结果未知，累积记录不再同步".to_string(),
        });
        SyncOutcome::CreateUnresolved
    }

    fn stale(&self, snapshot: &Snapshot) -> SyncOutcome {
        warn!("[文档 {}] 会话已被替换，丢弃持久化结果", snapshot.key);
        self.notifier.send(Notification::StaleResultDiscarded {
            session_key: snapshot.key.to_string(),
        });
        SyncOutcome::Discarded
    }
}
