//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话状态和调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `unit_orchestrator` - 页面编排器
//! - 打开 / 替换文档会话（递增 generation）
//! - 单页分析、手动重新分析
//! - 顺序批量分析（页间等待，遇到终止失败即停止）
//! - 后台导航（受监督的 tokio 任务）
//! - 有界并发的全文分析
//!
//! ### `consolidator` - 历史合并器
//! - 把已完成页面合并为一条累积记录
//! - 每个会话只创建一次，之后只更新
//! - 单请求在途，重复触发合并为一次
//!
//! ## 层次关系
//!
//! ```text
//! unit_orchestrator (处理一个文档的所有页面)
//!     ↓                       ↘
//! workflow::UnitFlow          consolidator (累积记录)
//!     ↓                           ↓
//! clients (UnitExtractor / AnalysisClient / RecordStore / SessionIdCache)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一写者**：页面进度只由编排器修改，记录ID只由合并器写入
//! 2. **锁不跨 await**：会话锁只在同步代码块内持有
//! 3. **向下依赖**：编排层 → workflow → clients

pub mod consolidator;
pub mod unit_orchestrator;

// 重新导出主要类型
pub use consolidator::{HistoryConsolidator, SyncOutcome};
pub use unit_orchestrator::{
    BatchFailure, BatchReport, Collaborators, NavigateOutcome, OrchestratorSettings,
    UnitOrchestrator, UnitOutcome,
};
