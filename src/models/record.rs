use crate::models::analysis::{StudyPoint, UnitAnalysis};
use crate::models::options::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// 带页码标注的文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledText {
    pub unit_index: usize,
    pub text: String,
}

/// 累积记录：所有已完成页面按页码升序合并
///
/// 只由已完成页面推导，不单独保存状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub key_points: Vec<String>,
    pub study_points: Vec<StudyPoint>,
    pub summaries: Vec<LabeledText>,
    pub relevance: Vec<LabeledText>,
    pub categories: Vec<String>,
    pub unit_count: usize,
}

impl CumulativeRecord {
    /// 合并顺序永远是页码升序，与完成顺序无关
    pub fn merge(units: &BTreeMap<usize, UnitAnalysis>, record_id: Option<&str>) -> Self {
        let mut record = Self {
            record_id: record_id.map(String::from),
            key_points: Vec::new(),
            study_points: Vec::new(),
            summaries: Vec::new(),
            relevance: Vec::new(),
            categories: Vec::new(),
            unit_count: 0,
        };
        let mut seen_categories = HashSet::new();

        for (&unit_index, unit) in units.iter().filter(|(_, u)| u.is_complete) {
            record.unit_count += 1;
            record.key_points.extend(unit.key_points.iter().cloned());
            record.study_points.extend(unit.study_points.iter().cloned());

            if !unit.summary.trim().is_empty() {
                record.summaries.push(LabeledText {
                    unit_index,
                    text: unit.summary.clone(),
                });
            }
            if !unit.relevance.trim().is_empty() {
                record.relevance.push(LabeledText {
                    unit_index,
                    text: unit.relevance.clone(),
                });
            }
            for category in &unit.categories {
                if seen_categories.insert(category.to_lowercase()) {
                    record.categories.push(category.clone());
                }
            }
        }

        record
    }

    /// "Page N: ..." 形式的合并摘要
    pub fn summary_text(&self) -> String {
        labeled_join(&self.summaries)
    }

    pub fn relevance_text(&self) -> String {
        labeled_join(&self.relevance)
    }
}

fn labeled_join(items: &[LabeledText]) -> String {
    items
        .iter()
        .map(|item| format!("Page {}: {}", item.unit_index, item.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 写入存储的内容：合并记录 + 完整的逐页映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub record: CumulativeRecord,
    pub units: BTreeMap<usize, UnitAnalysis>,
}

/// 写入存储的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub session_key: String,
    pub total_units: usize,
    pub completed_units: usize,
    pub language: Language,
    pub updated_at: DateTime<Utc>,
}
