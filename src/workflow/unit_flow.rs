//! 单页处理流程 - 流程层
//!
//! 核心职责：定义"一页"的完整处理流程
//!
//! 流程顺序：
//! 1. 提取页面文本
//! 2. 空白页 → 直接生成空的已完成分析（不调用分析服务）
//! 3. 调用分析服务，频率限制时指数退避重试
//!
//! 本层不修改会话状态，也不触发持久化；这些由编排层负责。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clients::{AnalysisClient, UnitExtractor};
use crate::error::{AnalysisError, UnitError};
use crate::models::UnitAnalysis;
use crate::notifications::{Notification, Notifier};
use crate::utils::{retry_with_backoff, truncate_text, RetryFailure, RetryPolicy};
use crate::workflow::unit_ctx::UnitCtx;

/// 单页处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// 分析服务返回成功
    Analyzed {
        analysis: UnitAnalysis,
        attempts: u32,
    },
    /// 空白页，未调用分析服务
    Blank(UnitAnalysis),
}

impl FlowOutcome {
    pub fn into_analysis(self) -> UnitAnalysis {
        match self {
            FlowOutcome::Analyzed { analysis, .. } | FlowOutcome::Blank(analysis) => analysis,
        }
    }
}

/// 单页处理流程
///
/// - 不持有会话状态
/// - 重试状态只存在于一次 `run` 调用内
pub struct UnitFlow {
    extractor: Arc<dyn UnitExtractor>,
    client: Arc<dyn AnalysisClient>,
    retry_policy: RetryPolicy,
}

impl UnitFlow {
    /// 创建新的页面处理流程
    pub fn new(
        extractor: Arc<dyn UnitExtractor>,
        client: Arc<dyn AnalysisClient>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            extractor,
            client,
            retry_policy,
        }
    }

    pub async fn run(
        &self,
        ctx: &UnitCtx,
        full_text: &str,
        notifier: &Notifier,
    ) -> Result<FlowOutcome, UnitError> {
        let unit = ctx.unit_index;

        let text = self
            .extractor
            .extract_range(full_text, unit, unit)
            .await
            .map_err(|e| UnitError::ExtractionFailed {
                unit,
                message: e.to_string(),
            })?;

        if text.trim().is_empty() {
            info!("{} 📭 空白页，跳过分析", ctx);
            return Ok(FlowOutcome::Blank(UnitAnalysis::empty(unit)));
        }

        info!("{} 🤖 正在请求分析...", ctx);
        debug!("{} 内容预览: {}", ctx, truncate_text(&text, 80));

        let client = &self.client;
        let content: &str = &text;
        let language = ctx.language;
        let max_attempts = self.retry_policy.max_attempts();

        let result = retry_with_backoff(
            &self.retry_policy,
            move |attempt| {
                debug!("第 {} 页第 {}/{} 次请求", unit, attempt, max_attempts);
                client.analyze_unit(content, unit, language)
            },
            AnalysisError::is_retryable,
            |attempt, delay, error| {
                warn!(
                    "{} ⏳ 请求频率限制 (尝试 {}/{})，{} 毫秒后重试...",
                    ctx,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                );
                notifier.send(Notification::Retrying {
                    unit,
                    attempt,
                    max_attempts,
                    delay,
                    reason: error.to_string(),
                });
            },
        )
        .await;

        match result {
            Ok((response, attempts)) => {
                info!("{} ✓ 分析成功 (请求 {} 次)", ctx, attempts);
                Ok(FlowOutcome::Analyzed {
                    analysis: UnitAnalysis::from_response(unit, response),
                    attempts,
                })
            }
            Err(RetryFailure { error, attempts }) => Err(UnitError::AnalysisFailed {
                unit,
                attempts,
                source: error,
            }),
        }
    }
}
