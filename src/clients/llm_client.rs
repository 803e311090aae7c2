//! LLM 分析客户端 - 基础设施层
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）
//!
//! 返回内容在这里完成 JSON 校验，编排层只会看到 `AnalysisResponse`
//! 或分类好的 `AnalysisError`。
//!
//! 关闭了 async-openai 内置的指数退避，每次调用只发出一个 HTTP 请求，
//! 重试次数和间隔完全由编排层的重试策略决定。

use super::AnalysisClient;
use crate::config::Config;
use crate::error::AnalysisError;
use crate::models::{AnalysisResponse, Difficulty, Language, RawQuestion};
use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// OpenAI 兼容的分析客户端
pub struct OpenAiAnalysisClient {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiAnalysisClient {
    /// 创建新的分析客户端
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        // 不在客户端内部重试
        let single_attempt = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(openai_config).with_backoff(single_attempt),
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 通用的 LLM 调用
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息
    /// - `max_tokens`: 最大输出长度
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: &str,
        max_tokens: u32,
    ) -> Result<String, AnalysisError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(classify_error)?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(classify_error)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.3)
            .max_tokens(max_tokens)
            .build()
            .map_err(classify_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_error(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AnalysisError::request_failed("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl AnalysisClient for OpenAiAnalysisClient {
    async fn analyze_unit(
        &self,
        content: &str,
        unit_index: usize,
        language: Language,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let (user_message, system_message) = build_analysis_messages(content, unit_index, language);
        let response = self.send_to_llm(&user_message, &system_message, 2048).await?;
        AnalysisResponse::from_llm_text(&response)
    }

    async fn generate_questions(
        &self,
        merged_content: &str,
        difficulty: Difficulty,
        language: Language,
    ) -> Result<Vec<RawQuestion>, AnalysisError> {
        let (user_message, system_message) =
            build_quiz_messages(merged_content, difficulty, language);
        let response = self.send_to_llm(&user_message, &system_message, 4096).await?;
        RawQuestion::list_from_llm_text(&response)
    }
}

/// 表示频率限制的错误 type / code
const RATE_LIMIT_CODES: [&str; 5] = [
    "rate_limit_exceeded",
    "rate_limit_error",
    "requests",
    "tokens",
    "resource_exhausted",
];

/// 把 async-openai 的错误归类为可重试 / 不可重试
///
/// 只依据结构化字段判断：错误对象的 type / code，或 HTTP 状态码 429。
/// 额度用尽（insufficient_quota）同样返回 429，但重试无效。
fn classify_error(err: OpenAIError) -> AnalysisError {
    let rate_limited = match &err {
        OpenAIError::ApiError(api_error) => is_rate_limit_error(api_error),
        OpenAIError::Reqwest(e) => e.status().is_some_and(|s| s.as_u16() == 429),
        // 部分兼容服务的错误体不是标准格式
        OpenAIError::JSONDeserialize(_, content) => {
            let lower = content.to_lowercase();
            !lower.contains("insufficient_quota")
                && ["rate_limit", "resource_exhausted"]
                    .iter()
                    .any(|marker| lower.contains(marker))
        }
        _ => false,
    };

    let message = err.to_string();
    if rate_limited {
        AnalysisError::rate_limited(message)
    } else {
        AnalysisError::request_failed(message)
    }
}

fn is_rate_limit_error(api_error: &ApiError) -> bool {
    let fields = [api_error.r#type.as_deref(), api_error.code.as_deref()];
    let matches = |codes: &[&str]| {
        fields
            .iter()
            .flatten()
            .any(|field| codes.iter().any(|code| field.eq_ignore_ascii_case(code)))
    };
    !matches(&["insufficient_quota"]) && matches(&RATE_LIMIT_CODES)
}

/// 构建单页分析的消息
///
/// 返回 (user_message, system_message)
fn build_analysis_messages(content: &str, unit_index: usize, language: Language) -> (String, String) {
    let system_message = format!(
        "You are an expert exam-preparation tutor. You read one page of study material at a time \
         and extract what a student must remember. Always answer in {} and only with a JSON object.",
        language.prompt_name()
    );

    let user_message = format!(
        r#"Analyze page {} of the document below.

Return a JSON object with exactly these fields:
- "keyPoints": array of short strings, the essential facts on this page
- "studyPoints": array of objects {{"title", "description", "importance" ("high" | "medium" | "low"), "relevance"}}
- "summary": a concise paragraph summarizing the page
- "relevance": why this page matters for exam preparation
- "categories": array of subject categories covered (e.g. "History", "Economy")

Page content:
"""
{}
""""#,
        unit_index, content
    );

    (user_message, system_message)
}

/// 构建出题的消息
fn build_quiz_messages(content: &str, difficulty: Difficulty, language: Language) -> (String, String) {
    let system_message = format!(
        "You are an examiner writing practice questions from study notes. \
         Always answer in {} and only with JSON.",
        language.prompt_name()
    );

    let user_message = format!(
        r#"Write {} difficulty practice questions from the notes below.

Return a JSON object {{"questions": [...]}} where every question is
{{"prompt", "options" (exactly four strings), "answer" ("A" | "B" | "C" | "D"),
  "type" ("multiple-choice" | "assertion-reason"), "explanation"}}.

Notes:
"""
{}
""""#,
        difficulty, content
    );

    (user_message, system_message)
}
