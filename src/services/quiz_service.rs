//! 出题服务 - 业务能力层
//!
//! 只负责"按页码区间出题"能力：
//! 合并区间内已完成页面的分析 → 请求出题 → 校验并替换不合格的题目

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clients::AnalysisClient;
use crate::error::{AppResult, QuizError, UnitError};
use crate::models::{
    Difficulty, Language, QuestionRecord, RawQuestion, SessionState, UnitAnalysis,
};

/// 一次出题的结果
#[derive(Debug, Clone, Serialize)]
pub struct Quiz {
    pub start: usize,
    pub end: usize,
    pub difficulty: Difficulty,
    pub language: Language,
    pub questions: Vec<QuestionRecord>,
    /// 被占位题替换的题目数
    pub replaced: usize,
}

/// 出题服务
///
/// 职责：
/// - 只读会话状态，不修改进度
/// - 不关心分析流程
pub struct QuizService {
    client: Arc<dyn AnalysisClient>,
    session: Arc<SessionState>,
}

impl QuizService {
    pub fn new(client: Arc<dyn AnalysisClient>, session: Arc<SessionState>) -> Self {
        Self { client, session }
    }

    /// 为 [start, end] 页出题
    pub async fn generate(
        &self,
        start: usize,
        end: usize,
        difficulty: Difficulty,
        language: Language,
    ) -> AppResult<Quiz> {
        let merged = self
            .session
            .read(|s| -> Result<String, UnitError> {
                s.check_range(start, end)?;
                Ok(merge_units(
                    s.completed_units().range(start..=end).map(|(_, a)| a),
                ))
            })
            .ok_or(UnitError::NoSession)??;

        if merged.is_empty() {
            return Err(QuizError::NoAnalyzedUnits { start, end }.into());
        }

        info!(
            "📝 为第 {}-{} 页出题 (难度 {}, 语言 {})",
            start, end, difficulty, language
        );
        let raw = self
            .client
            .generate_questions(&merged, difficulty, language)
            .await
            .map_err(QuizError::Generation)?;

        let (questions, replaced) = sanitize(raw);
        if replaced > 0 {
            warn!("⚠️ {} 道题目格式不正确，已替换为占位题", replaced);
        }
        info!("✓ 共生成 {} 道题目", questions.len());

        Ok(Quiz {
            start,
            end,
            difficulty,
            language,
            questions,
            replaced,
        })
    }
}

/// 校验题目，不合格的替换为占位题，返回 (题目, 替换数)
pub fn sanitize(raw: Vec<RawQuestion>) -> (Vec<QuestionRecord>, usize) {
    let mut replaced = 0;
    let questions = raw
        .into_iter()
        .enumerate()
        .map(|(i, q)| {
            QuestionRecord::validate(q).unwrap_or_else(|| {
                replaced += 1;
                QuestionRecord::placeholder(i + 1)
            })
        })
        .collect();
    (questions, replaced)
}

/// 把已完成页面的分析合并为出题素材，空白页不计入
fn merge_units<'a>(units: impl Iterator<Item = &'a UnitAnalysis>) -> String {
    let mut merged = String::new();
    for unit in units.filter(|u| !u.is_empty()) {
        if !merged.is_empty() {
            merged.push_str("\n\n");
        }
        let _ = writeln!(merged, "Page {}:", unit.unit_index);
        if !unit.summary.trim().is_empty() {
            let _ = writeln!(merged, "{}", unit.summary.trim());
        }
        for point in &unit.key_points {
            let _ = writeln!(merged, "- {}", point);
        }
        for point in &unit.study_points {
            let _ = writeln!(merged, "- {}: {}", point.title, point.description);
        }
    }
    merged.trim_end().to_string()
}
