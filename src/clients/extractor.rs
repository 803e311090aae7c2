//! 纯文本分页提取
//!
//! 文档全文以换页符 (`\f`) 分页，`pdftotext` 等工具的默认输出即是如此。

use super::UnitExtractor;
use crate::error::UnitError;
use async_trait::async_trait;

const PAGE_BREAK: char = '\u{c}';

/// 以换页符分页的文本提取器
#[derive(Debug, Clone, Default)]
pub struct PageTextExtractor;

impl PageTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn pages(full_text: &str) -> Vec<&str> {
        let mut pages: Vec<&str> = full_text.split(PAGE_BREAK).collect();
        // 末尾的换页符不算新的一页
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        pages
    }
}

#[async_trait]
impl UnitExtractor for PageTextExtractor {
    fn unit_count(&self, full_text: &str) -> usize {
        Self::pages(full_text).len()
    }

    async fn extract_range(
        &self,
        full_text: &str,
        start: usize,
        end: usize,
    ) -> Result<String, UnitError> {
        let pages = Self::pages(full_text);
        if start == 0 || start > end || end > pages.len() {
            return Err(UnitError::InvalidRange {
                start,
                end,
                total: pages.len(),
            });
        }
        Ok(pages[start - 1..end]
            .iter()
            .map(|p| p.trim())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extract_pages() {
        let text = "page one\u{c}  \u{c}page three\u{c}";
        let extractor = PageTextExtractor::new();
        assert_eq!(extractor.unit_count(text), 3);
        assert_eq!(extractor.extract_range(text, 1, 1).await.unwrap(), "page one");
        assert_eq!(extractor.extract_range(text, 2, 2).await.unwrap(), "");
        assert_eq!(
            extractor.extract_range(text, 1, 3).await.unwrap(),
            "page one\n\n\n\npage three"
        );
        assert!(extractor.extract_range(text, 4, 4).await.is_err());
    }

    #[test]
    fn test_single_page_document() {
        assert_eq!(PageTextExtractor::new().unit_count("no breaks"), 1);
    }
}
