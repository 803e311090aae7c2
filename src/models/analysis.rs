//! 单页分析结果
//!
//! 分析服务的返回在这里做严格校验：缺失或格式错误的字段一律映射为默认值，
//! 不让未定义的结构流入编排层。

use crate::error::AnalysisError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::OnceLock;

/// 学习要点的重要程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Medium,
    Low,
}

impl Importance {
    /// 无法识别的取值按 Medium 处理
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "very high" => Importance::High,
            "low" | "minor" => Importance::Low,
            _ => Importance::Medium,
        }
    }
}

/// 学习要点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyPoint {
    pub title: String,
    pub description: String,
    pub importance: Importance,
    pub relevance: String,
}

/// 单页分析
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAnalysis {
    /// 页码（从 1 开始）
    pub unit_index: usize,
    pub key_points: Vec<String>,
    pub study_points: Vec<StudyPoint>,
    pub summary: String,
    pub relevance: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub is_complete: bool,
}

impl UnitAnalysis {
    /// 空白页：不调用分析服务，直接视为已完成
    pub fn empty(unit_index: usize) -> Self {
        Self {
            unit_index,
            key_points: Vec::new(),
            study_points: Vec::new(),
            summary: String::new(),
            relevance: String::new(),
            categories: Vec::new(),
            is_complete: true,
        }
    }

    pub fn from_response(unit_index: usize, response: AnalysisResponse) -> Self {
        Self {
            unit_index,
            key_points: response.key_points,
            study_points: response.study_points,
            summary: response.summary,
            relevance: response.relevance,
            categories: response.categories,
            is_complete: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_points.is_empty() && self.study_points.is_empty() && self.summary.is_empty()
    }
}

/// 分析服务的返回（已校验）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub key_points: Vec<String>,
    pub study_points: Vec<StudyPoint>,
    pub summary: String,
    pub relevance: String,
    pub categories: Vec<String>,
}

impl AnalysisResponse {
    /// 解析 LLM 返回的文本
    ///
    /// 允许 ```json 代码块包裹或前后夹杂说明文字；顶层必须是 JSON 对象。
    pub fn from_llm_text(raw: &str) -> Result<Self, AnalysisError> {
        let body = extract_json(raw).ok_or_else(|| {
            AnalysisError::request_failed(format!(
                "分析结果不是 JSON 对象: {}",
                crate::utils::truncate_text(raw, 80)
            ))
        })?;
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| AnalysisError::request_failed(format!("分析结果 JSON 解析失败: {}", e)))?;
        Self::from_value(&value)
    }

    /// 按字段校验，缺失字段取默认值
    pub fn from_value(value: &JsonValue) -> Result<Self, AnalysisError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AnalysisError::request_failed("分析结果不是 JSON 对象"))?;

        let study_points = field(obj, &["studyPoints", "study_points"])
            .and_then(JsonValue::as_array)
            .map(|items| items.iter().filter_map(parse_study_point).collect())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let categories = string_list(field(obj, &["categories", "category"]))
            .into_iter()
            .filter(|c| seen.insert(c.to_lowercase()))
            .collect();

        Ok(Self {
            key_points: string_list(field(obj, &["keyPoints", "key_points"])),
            study_points,
            summary: string_field(field(obj, &["summary"])),
            relevance: string_field(field(obj, &["relevance"])),
            categories,
        })
    }
}

fn field<'a>(obj: &'a serde_json::Map<String, JsonValue>, names: &[&str]) -> Option<&'a JsonValue> {
    names.iter().find_map(|name| obj.get(*name))
}

/// 从 LLM 文本中截取 JSON（对象或数组）
pub(crate) fn extract_json(raw: &str) -> Option<&str> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("静态正则表达式")
    });

    let candidate = fence
        .captures(raw)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let start = candidate.find(&['{', '['][..])?;
    let end = candidate.rfind(&['}', ']'][..])?;
    (start < end).then(|| &candidate[start..=end])
}

fn string_field(value: Option<&JsonValue>) -> String {
    value
        .and_then(JsonValue::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// 字符串数组；单个字符串也接受
fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(JsonValue::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn parse_study_point(item: &JsonValue) -> Option<StudyPoint> {
    let obj = item.as_object()?;
    let title = string_field(obj.get("title"));
    let description = string_field(obj.get("description"));
    if title.is_empty() && description.is_empty() {
        return None;
    }
    Some(StudyPoint {
        title,
        description,
        importance: obj
            .get("importance")
            .and_then(JsonValue::as_str)
            .map(Importance::parse_lenient)
            .unwrap_or_default(),
        relevance: string_field(obj.get("relevance")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fenced_response() {
        let raw = r#"好的，以下是分析：
```json
{"keyPoints": ["a", "  ", "b"], "summary": " s ", "categories": ["History", "history", "Polity"]}
```"#;
        let resp = AnalysisResponse::from_llm_text(raw).unwrap();
        assert_eq!(resp.key_points, vec!["a", "b"]);
        assert_eq!(resp.summary, "s");
        assert_eq!(resp.relevance, "");
        assert_eq!(resp.categories, vec!["History", "Polity"]);
    }

    #[test]
    fn test_malformed_study_points_get_defaults() {
        let value = json!({
            "studyPoints": [
                {"title": "Treaty", "importance": "CRITICAL"},
                {"title": "Dates", "description": "d", "importance": 5},
                {"importance": "high"},
                "not an object"
            ],
            "summary": 42
        });
        let resp = AnalysisResponse::from_value(&value).unwrap();
        assert_eq!(resp.study_points.len(), 2);
        assert_eq!(resp.study_points[0].importance, Importance::High);
        assert_eq!(resp.study_points[1].importance, Importance::Medium);
        assert_eq!(resp.summary, "");
    }

    #[test]
    fn test_non_object_is_request_failure() {
        let err = AnalysisResponse::from_llm_text("sorry, I can't help").unwrap_err();
        assert!(!err.is_retryable());
        assert!(AnalysisResponse::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_empty_unit_is_complete() {
        let unit = UnitAnalysis::empty(4);
        assert!(unit.is_complete);
        assert!(unit.is_empty());
    }
}
