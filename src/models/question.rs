use crate::error::AnalysisError;
use crate::models::analysis::extract_json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// 答案选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerTag {
    A,
    B,
    C,
    D,
}

impl AnswerTag {
    /// 接受 "b"、"(C)"、"D." 之类的写法；其他一律无效
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let cleaned = raw.trim().trim_matches(|c: char| !c.is_ascii_alphanumeric());
        match cleaned.to_ascii_uppercase().as_str() {
            "A" => Some(AnswerTag::A),
            "B" => Some(AnswerTag::B),
            "C" => Some(AnswerTag::C),
            "D" => Some(AnswerTag::D),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            AnswerTag::A => "A",
            AnswerTag::B => "B",
            AnswerTag::C => "C",
            AnswerTag::D => "D",
        };
        f.write_str(tag)
    }
}

/// 题型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    #[default]
    MultipleChoice,
    AssertionReason,
}

impl QuestionType {
    /// 无法识别时按单选题处理
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if normalized.contains("assertion") {
            QuestionType::AssertionReason
        } else {
            QuestionType::MultipleChoice
        }
    }
}

/// 出题服务返回的原始题目（未校验）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawQuestion {
    #[serde(alias = "question")]
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    pub answer: String,
    #[serde(alias = "type")]
    pub question_type: String,
    pub explanation: String,
}

impl RawQuestion {
    /// 解析出题结果：顶层数组，或 `{"questions": [...]}`
    ///
    /// 单个题目结构错误时保留为空题目，交给后续校验替换为占位题
    pub fn list_from_llm_text(raw: &str) -> Result<Vec<Self>, AnalysisError> {
        let body = extract_json(raw)
            .ok_or_else(|| AnalysisError::request_failed("出题结果不是 JSON"))?;
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| AnalysisError::request_failed(format!("出题结果 JSON 解析失败: {}", e)))?;

        let items = match &value {
            JsonValue::Array(items) => items,
            JsonValue::Object(obj) => obj
                .get("questions")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| AnalysisError::request_failed("出题结果缺少 questions 字段"))?,
            _ => return Err(AnalysisError::request_failed("出题结果不是数组")),
        };

        Ok(items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).unwrap_or_default())
            .collect())
    }
}

/// 已校验的题目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub prompt: String,
    pub options: [String; 4],
    pub answer: AnswerTag,
    pub question_type: QuestionType,
    pub explanation: String,
}

impl QuestionRecord {
    /// 格式正确的占位题
    pub fn placeholder(number: usize) -> Self {
        Self {
            prompt: format!("Question {} could not be generated. Please regenerate the quiz.", number),
            options: [
                "Option A".to_string(),
                "Option B".to_string(),
                "Option C".to_string(),
                "Option D".to_string(),
            ],
            answer: AnswerTag::A,
            question_type: QuestionType::MultipleChoice,
            explanation: "Placeholder for a malformed question.".to_string(),
        }
    }

    /// 校验原始题目
    ///
    /// 选项不是恰好四个、或答案不在 A-D 之内时返回 None
    pub fn validate(raw: RawQuestion) -> Option<Self> {
        let answer = AnswerTag::parse_lenient(&raw.answer)?;
        let options: [String; 4] = raw
            .options
            .into_iter()
            .map(|o| o.trim().to_string())
            .collect::<Vec<_>>()
            .try_into()
            .ok()?;
        if raw.prompt.trim().is_empty() {
            return None;
        }
        Some(Self {
            prompt: raw.prompt.trim().to_string(),
            options,
            answer,
            question_type: QuestionType::parse_lenient(&raw.question_type),
            explanation: raw.explanation.trim().to_string(),
        })
    }
}
