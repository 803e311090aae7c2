//! # Page Insight
//!
//! 逐页分析长文档，并把已完成的页面合并为一条持续更新的累积记录
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Clients）
//! - `clients/` - 外部协作方，全部以 trait 暴露能力
//! - `UnitExtractor` / `AnalysisClient` / `RecordStore` / `SessionIdCache`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `QuizService` - 按页码区间出题，校验并替换不合格的题目
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一页"的完整处理流程
//! - `UnitCtx` - 上下文封装（session_key + unit_index）
//! - `UnitFlow` - 流程编排（extract → analyze with retry）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/unit_orchestrator` - 会话、单页调度、顺序批量、后台导航
//! - `orchestrator/consolidator` - 累积记录的合并与持久化
//!
//! ## 模块结构

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{CumulativeRecord, Progress, SessionKey, UnitAnalysis, UnitState};
pub use notifications::{Notification, Notifier};
pub use orchestrator::{HistoryConsolidator, UnitOrchestrator};
pub use services::QuizService;
pub use workflow::{UnitCtx, UnitFlow};
