//! 页面编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **会话管理**：打开 / 替换 / 关闭文档会话，从缓存恢复记录ID
//! 2. **单页调度**：状态检查 → 页面流程 → 写入进度 → 触发合并
//! 3. **顺序批量**：按页码升序逐页分析，页间固定等待，遇到终止失败即停止
//! 4. **后台导航**：切换页面时在受监督的后台任务中分析未分析的页面
//! 5. **全文并行**：有界并发窗口的一次性全文分析，结束后统一合并
//!
//! 页面进度只由本模块修改；记录ID只由合并器写入。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clients::{AnalysisClient, RecordStore, SessionIdCache, UnitExtractor};
use crate::config::Config;
use crate::error::UnitError;
use crate::models::{
    CumulativeRecord, Language, Progress, SessionKey, SessionState, UnitAnalysis, UnitState,
};
use crate::notifications::{Notification, Notifier};
use crate::orchestrator::consolidator::HistoryConsolidator;
use crate::utils::logging::log_session_opened;
use crate::utils::RetryPolicy;
use crate::workflow::{FlowOutcome, UnitCtx, UnitFlow};

/// 编排参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retry_policy: RetryPolicy,
    /// 顺序分析时两次成功请求之间的等待
    pub inter_unit_delay: Duration,
    /// 全文并行分析的并发窗口
    pub parallel_window: usize,
    pub owner: String,
    pub record_kind: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            retry_policy: config.retry_policy(),
            inter_unit_delay: config.inter_unit_delay(),
            parallel_window: config.parallel_window.max(1),
            owner: config.store_owner.clone(),
            record_kind: config.record_kind.clone(),
        }
    }
}

/// 外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn UnitExtractor>,
    pub client: Arc<dyn AnalysisClient>,
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<dyn SessionIdCache>,
}

/// 单页调度结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 已完成，未发出任何请求
    AlreadyCompleted,
    /// 分析服务返回成功
    Analyzed { attempts: u32 },
    /// 空白页，未调用分析服务
    Blank,
    /// 正在分析中，不重复请求
    InFlight,
    /// 会话已被替换，结果被丢弃
    Stale,
}

/// 批量分析中断信息
#[derive(Debug)]
pub struct BatchFailure {
    pub unit: usize,
    pub error: UnitError,
}

/// 批量分析报告
#[derive(Debug, Default)]
pub struct BatchReport {
    /// 本次完成的页数（含空白页）
    pub analyzed: usize,
    /// 跳过的页数（已完成或正在分析）
    pub skipped: usize,
    /// 中断所在页
    pub failure: Option<BatchFailure>,
    /// 会话在批量过程中被替换
    pub superseded: bool,
}

impl BatchReport {
    pub fn halted_at(&self) -> Option<usize> {
        self.failure.as_ref().map(|f| f.unit)
    }
}

/// 导航结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateOutcome {
    /// 已在后台开始分析
    Started,
    AlreadyCompleted,
    InFlight,
    /// 此前失败，需要手动重试
    NeedsManualRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// 自动调度：已完成的页面直接跳过
    Auto,
    /// 手动重新分析：替换已有结果
    Replace,
}

struct Claimed {
    generation: u64,
    previous: UnitState,
    ctx: UnitCtx,
    full_text: Arc<str>,
}

enum Begin {
    Run(Claimed),
    Skip(UnitOutcome),
}

/// 页面编排器
pub struct UnitOrchestrator {
    session: Arc<SessionState>,
    extractor: Arc<dyn UnitExtractor>,
    cache: Arc<dyn SessionIdCache>,
    flow: UnitFlow,
    consolidator: Arc<HistoryConsolidator>,
    notifier: Notifier,
    settings: OrchestratorSettings,
    cursor: AtomicUsize,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl UnitOrchestrator {
    pub fn new(
        collaborators: Collaborators,
        settings: OrchestratorSettings,
        notifier: Notifier,
    ) -> Self {
        let session = Arc::new(SessionState::new());
        let consolidator = HistoryConsolidator::new(
            Arc::clone(&session),
            collaborators.store,
            Arc::clone(&collaborators.cache),
            notifier.clone(),
            settings.owner.clone(),
            settings.record_kind.clone(),
        );
        let flow = UnitFlow::new(
            Arc::clone(&collaborators.extractor),
            collaborators.client,
            settings.retry_policy,
        );

        Self {
            session,
            extractor: collaborators.extractor,
            cache: collaborators.cache,
            flow,
            consolidator,
            notifier,
            settings,
            cursor: AtomicUsize::new(0),
            background: Mutex::new(Vec::new()),
        }
    }

    // ========== 会话 ==========

    /// 打开文档，替换当前会话
    ///
    /// 缓存中已有该文档的记录ID时直接恢复，之后的合并只会更新这条记录。
    pub async fn open_session(
        &self,
        key: SessionKey,
        full_text: impl Into<Arc<str>>,
        language: Language,
    ) -> Progress {
        let full_text = full_text.into();
        let total = self.extractor.unit_count(&full_text);

        // 先替换会话，旧会话在途的结果从此刻起作废
        let generation = self
            .session
            .open(key.clone(), full_text, total, language, None);
        self.cursor.store(if total > 0 { 1 } else { 0 }, Ordering::SeqCst);

        let record_id = self.cache.get(&key).await;
        if let Some(id) = &record_id {
            self.session
                .update(generation, |s| s.set_record_id(id.clone()));
        }
        log_session_opened(key.as_str(), total, record_id.as_deref());

        Progress {
            completed: 0,
            total,
        }
    }

    /// 关闭当前会话，在途结果全部作废
    pub fn reset(&self) {
        if let Some(key) = self.session.read(|s| s.key().clone()) {
            info!("[文档 {}] 🔚 会话已关闭", key);
        }
        self.session.reset();
        self.cursor.store(0, Ordering::SeqCst);
    }

    // ========== 单页 ==========

    /// 分析单页
    ///
    /// 已完成的页面不发出任何请求；此前失败的页面视为手动重试。
    pub async fn analyze_unit(&self, index: usize) -> Result<UnitOutcome, UnitError> {
        self.run_unit(index, Trigger::Auto).await
    }

    /// 手动重新分析，成功后替换已有结果
    ///
    /// 失败时保留原有结果。
    pub async fn reanalyze_unit(&self, index: usize) -> Result<UnitOutcome, UnitError> {
        self.run_unit(index, Trigger::Replace).await
    }

    async fn run_unit(&self, index: usize, trigger: Trigger) -> Result<UnitOutcome, UnitError> {
        let claimed = match self.begin(index, trigger)? {
            Begin::Run(claimed) => claimed,
            Begin::Skip(outcome) => {
                debug!("第 {} 页跳过: {:?}", index, outcome);
                return Ok(outcome);
            }
        };

        let result = self
            .flow
            .run(&claimed.ctx, &claimed.full_text, &self.notifier)
            .await;

        match result {
            Ok(outcome) => {
                let unit_outcome = match &outcome {
                    FlowOutcome::Analyzed { attempts, .. } => UnitOutcome::Analyzed {
                        attempts: *attempts,
                    },
                    FlowOutcome::Blank(_) => UnitOutcome::Blank,
                };
                let analysis = outcome.into_analysis();
                if !self.commit(&claimed, analysis) {
                    return Ok(UnitOutcome::Stale);
                }
                self.notifier.send(Notification::UnitCompleted {
                    unit: index,
                    blank: unit_outcome == UnitOutcome::Blank,
                });
                self.consolidator.consolidate().await;
                Ok(unit_outcome)
            }
            Err(error) => {
                if !self.mark_failed(&claimed) {
                    return Ok(UnitOutcome::Stale);
                }
                error!("{} ❌ {}", claimed.ctx, error);
                self.notifier.send(Notification::UnitFailed {
                    unit: index,
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// 在锁内完成状态检查并占用页面
    fn begin(&self, index: usize, trigger: Trigger) -> Result<Begin, UnitError> {
        self.session
            .modify(|s| -> Result<Begin, UnitError> {
                s.check_index(index)?;
                let previous = s.state(index);
                match (previous, trigger) {
                    (UnitState::Analyzing, _) => return Ok(Begin::Skip(UnitOutcome::InFlight)),
                    (UnitState::Completed, Trigger::Auto) => {
                        return Ok(Begin::Skip(UnitOutcome::AlreadyCompleted))
                    }
                    _ => {}
                }
                s.set_state(index, UnitState::Analyzing);
                Ok(Begin::Run(Claimed {
                    generation: s.generation(),
                    previous,
                    ctx: UnitCtx::new(s.key().as_str(), index, s.total_units(), s.language()),
                    full_text: s.full_text(),
                }))
            })
            .ok_or(UnitError::NoSession)?
    }

    fn commit(&self, claimed: &Claimed, analysis: UnitAnalysis) -> bool {
        let stored = self
            .session
            .update(claimed.generation, |s| s.store_analysis(analysis))
            .is_some();
        if !stored {
            self.discard_stale(&claimed.ctx);
        }
        stored
    }

    fn mark_failed(&self, claimed: &Claimed) -> bool {
        // 重新分析失败时保留原有结果
        let restored = match claimed.previous {
            UnitState::Completed => UnitState::Completed,
            _ => UnitState::Failed,
        };
        let index = claimed.ctx.unit_index;
        let applied = self
            .session
            .update(claimed.generation, |s| s.set_state(index, restored))
            .is_some();
        if !applied {
            self.discard_stale(&claimed.ctx);
        }
        applied
    }

    fn discard_stale(&self, ctx: &UnitCtx) {
        warn!("{} 会话已被替换，丢弃分析结果", ctx);
        self.notifier.send(Notification::StaleResultDiscarded {
            session_key: ctx.session_key.clone(),
        });
    }

    // ========== 顺序批量 ==========

    /// 分析全部未完成的页面
    pub async fn analyze_all(&self) -> Result<BatchReport, UnitError> {
        let total = self
            .session
            .read(|s| s.total_units())
            .ok_or(UnitError::NoSession)?;
        if total == 0 {
            return Ok(BatchReport::default());
        }
        self.analyze_range(1, total).await
    }

    /// 按页码升序分析 [start, end] 中未完成的页面
    ///
    /// 遇到终止失败立即停止，已完成的页面保留。
    /// 此前失败的页面不会自动重试，批量在该页停止。
    pub async fn analyze_range(&self, start: usize, end: usize) -> Result<BatchReport, UnitError> {
        let generation = self
            .session
            .read(|s| s.check_range(start, end).map(|_| s.generation()))
            .ok_or(UnitError::NoSession)??;

        info!("📚 开始顺序分析第 {}-{} 页", start, end);
        let mut report = BatchReport::default();
        let mut delay_before_next = false;

        for index in start..=end {
            if !self.session.is_active(generation) {
                report.superseded = true;
                break;
            }

            match self.unit_state(index) {
                UnitState::Completed | UnitState::Analyzing => {
                    report.skipped += 1;
                    continue;
                }
                UnitState::Failed => {
                    self.halt(&mut report, index, UnitError::NeedsManualRetry { unit: index });
                    break;
                }
                UnitState::Unanalyzed => {}
            }

            if delay_before_next {
                tokio::time::sleep(self.settings.inter_unit_delay).await;
                delay_before_next = false;
            }

            match self.analyze_unit(index).await {
                Ok(UnitOutcome::Analyzed { .. }) => {
                    report.analyzed += 1;
                    delay_before_next = true;
                }
                Ok(UnitOutcome::Blank) => report.analyzed += 1,
                Ok(UnitOutcome::AlreadyCompleted | UnitOutcome::InFlight) => report.skipped += 1,
                Ok(UnitOutcome::Stale) => {
                    report.superseded = true;
                    break;
                }
                Err(error) => {
                    self.halt(&mut report, index, error);
                    break;
                }
            }
        }

        info!(
            "📚 顺序分析结束: 本次完成 {} 页，跳过 {} 页",
            report.analyzed, report.skipped
        );
        Ok(report)
    }

    fn halt(&self, report: &mut BatchReport, unit: usize, error: UnitError) {
        warn!("⛔ 批量分析在第 {} 页中断: {}", unit, error);
        self.notifier.send(Notification::BatchHalted { unit });
        report.failure = Some(BatchFailure { unit, error });
    }

    // ========== 导航 ==========

    /// 切换到指定页面
    ///
    /// 页面未分析时在后台开始分析，失败只通过通知通道上报。
    pub fn navigate(self: &Arc<Self>, index: usize) -> Result<NavigateOutcome, UnitError> {
        let (state, generation) = self
            .session
            .read(|s| s.check_index(index).map(|_| (s.state(index), s.generation())))
            .ok_or(UnitError::NoSession)??;

        self.cursor.store(index, Ordering::SeqCst);

        let outcome = match state {
            UnitState::Completed => NavigateOutcome::AlreadyCompleted,
            UnitState::Analyzing => NavigateOutcome::InFlight,
            UnitState::Failed => NavigateOutcome::NeedsManualRetry,
            UnitState::Unanalyzed => {
                self.spawn_supervised(index, generation);
                NavigateOutcome::Started
            }
        };
        Ok(outcome)
    }

    fn spawn_supervised(self: &Arc<Self>, index: usize, generation: u64) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let worker = Arc::clone(&this);
            let task = tokio::spawn(async move { worker.analyze_unit(index).await });

            match task.await {
                Ok(Ok(outcome)) => debug!("第 {} 页后台分析结束: {:?}", index, outcome),
                // 失败已在 run_unit 中通知
                Ok(Err(e)) => debug!("第 {} 页后台分析失败: {}", index, e),
                Err(join_error) => {
                    error!("第 {} 页后台任务异常退出: {}", index, join_error);
                    this.session.update(generation, |s| {
                        if s.state(index) == UnitState::Analyzing {
                            s.set_state(index, UnitState::Failed);
                        }
                    });
                    this.notifier.send(Notification::UnitFailed {
                        unit: index,
                        message: join_error.to_string(),
                    });
                }
            }
        });

        let mut background = self.lock_background();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// 等待所有后台分析结束
    pub async fn wait_background(&self) {
        let handles = std::mem::take(&mut *self.lock_background());
        futures::future::join_all(handles).await;
    }

    fn lock_background(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========== 全文并行 ==========

    /// 有界并发的全文分析
    ///
    /// 所有结果返回后按页码升序写入，再统一合并一次。
    /// 此前失败的页面不参与；失败的页面标记为 Failed，报告中给出页码最小的一页。
    pub async fn comprehensive_pass(&self) -> Result<BatchReport, UnitError> {
        let claimed = self
            .session
            .modify(|s| {
                let total = s.total_units();
                let pending: Vec<usize> = (1..=total)
                    .filter(|&i| s.state(i) == UnitState::Unanalyzed)
                    .collect();
                for &i in &pending {
                    s.set_state(i, UnitState::Analyzing);
                }
                let skipped = total - pending.len();
                (
                    s.generation(),
                    s.key().to_string(),
                    total,
                    s.language(),
                    s.full_text(),
                    pending,
                    skipped,
                )
            })
            .ok_or(UnitError::NoSession)?;
        let (generation, key, total, language, full_text, pending, skipped) = claimed;

        let window = self.settings.parallel_window.max(1);
        info!(
            "[文档 {}] 🚀 全文并行分析 {} 页 (并发窗口 {})",
            key,
            pending.len(),
            window
        );

        let mut results: Vec<(usize, Result<FlowOutcome, UnitError>)> = stream::iter(pending)
            .map(|index| {
                let ctx = UnitCtx::new(key.as_str(), index, total, language);
                let full_text = Arc::clone(&full_text);
                async move {
                    let result = self.flow.run(&ctx, &full_text, &self.notifier).await;
                    (index, result)
                }
            })
            .buffer_unordered(window)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let mut report = BatchReport {
            skipped,
            ..Default::default()
        };
        let mut completed = Vec::new();
        let mut failures = Vec::new();

        let applied = self.session.update(generation, |s| {
            for (index, result) in results {
                match result {
                    Ok(outcome) => {
                        s.store_analysis(outcome.into_analysis());
                        completed.push(index);
                    }
                    Err(error) => {
                        s.set_state(index, UnitState::Failed);
                        failures.push((index, error));
                    }
                }
            }
        });

        if applied.is_none() {
            warn!("[文档 {}] 会话已被替换，丢弃全文分析结果", key);
            self.notifier.send(Notification::StaleResultDiscarded { session_key: key });
            report.superseded = true;
            return Ok(report);
        }

        report.analyzed = completed.len();
        for index in completed {
            self.notifier.send(Notification::UnitCompleted {
                unit: index,
                blank: self
                    .analysis(index)
                    .is_some_and(|analysis| analysis.is_empty()),
            });
        }
        for (index, error) in failures {
            error!("[文档 {} 第 {}/{} 页] ❌ {}", key, index, total, error);
            self.notifier.send(Notification::UnitFailed {
                unit: index,
                message: error.to_string(),
            });
            if report.failure.is_none() {
                report.failure = Some(BatchFailure { unit: index, error });
            }
        }

        self.consolidator.consolidate().await;
        info!(
            "[文档 {}] ✓ 全文并行分析结束: 完成 {} 页",
            key, report.analyzed
        );
        Ok(report)
    }

    // ========== 查询 ==========

    pub fn progress(&self) -> Progress {
        self.session
            .read(|s| s.progress())
            .unwrap_or(Progress {
                completed: 0,
                total: 0,
            })
    }

    pub fn cumulative_record_id(&self) -> Option<String> {
        self.session
            .read(|s| s.record_id().map(String::from))
            .flatten()
    }

    pub fn unit_state(&self, index: usize) -> UnitState {
        self.session.read(|s| s.state(index)).unwrap_or_default()
    }

    pub fn analysis(&self, index: usize) -> Option<UnitAnalysis> {
        self.session.read(|s| s.analysis(index).cloned()).flatten()
    }

    pub fn merged_record(&self) -> Option<CumulativeRecord> {
        self.consolidator.merged_record()
    }

    /// 当前页码（从1开始，0 表示没有打开的文档）
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn consolidator(&self) -> &Arc<HistoryConsolidator> {
        &self.consolidator
    }
}
