//! 应用入口
//!
//! 装配外部协作方，打开配置中的文档，顺序分析全部页面，按需出题。

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clients::{HttpRecordStore, OpenAiAnalysisClient, PageTextExtractor, TomlSessionCache};
use crate::config::Config;
use crate::models::SessionKey;
use crate::notifications::{Notification, Notifier};
use crate::orchestrator::{Collaborators, OrchestratorSettings, UnitOrchestrator};
use crate::services::QuizService;
use crate::utils::logging::{log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
    orchestrator: Arc<UnitOrchestrator>,
    quiz: QuizService,
    notifications: Option<UnboundedReceiver<Notification>>,
    quiz_range: Option<(usize, usize)>,
}

impl App {
    /// 初始化应用
    ///
    /// 配置在这里校验完毕，分析开始后不会再因配置错误退出。
    pub fn initialize(config: Config) -> Result<Self> {
        let quiz_range = config
            .parse_quiz_range()
            .context("出题区间配置无效")?;
        log_startup(&config.document_path, &config.llm_model_name);

        let client = Arc::new(OpenAiAnalysisClient::new(&config));
        let collaborators = Collaborators {
            extractor: Arc::new(PageTextExtractor::new()),
            client: client.clone(),
            store: Arc::new(HttpRecordStore::new(&config)),
            cache: Arc::new(TomlSessionCache::new(&config.session_cache_file)),
        };

        let (notifier, notifications) = Notifier::channel();
        let orchestrator = Arc::new(UnitOrchestrator::new(
            collaborators,
            OrchestratorSettings::from(&config),
            notifier,
        ));
        let quiz = QuizService::new(client, Arc::clone(orchestrator.session()));

        Ok(Self {
            config,
            orchestrator,
            quiz,
            notifications: Some(notifications),
            quiz_range,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(mut self) -> Result<()> {
        let logger = self.notifications.take().map(spawn_notification_logger);

        let path = Path::new(&self.config.document_path);
        let full_text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取文档失败: {}", path.display()))?;
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("读取文档信息失败: {}", path.display()))?
            .len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.document_path.clone());

        let progress = self
            .orchestrator
            .open_session(SessionKey::new(&file_name, size), full_text, self.config.language)
            .await;
        if progress.total == 0 {
            warn!("⚠️ 文档没有任何页面，程序结束");
            return Ok(());
        }

        let report = self.orchestrator.analyze_all().await?;
        self.orchestrator.wait_background().await;

        let progress = self.orchestrator.progress();
        print_final_stats(progress.completed, progress.total, report.halted_at());
        if let Some(record_id) = self.orchestrator.cumulative_record_id() {
            info!("🗂️ 累积记录 ID: {}", record_id);
        }

        if let Some((start, end)) = self.quiz_range {
            self.run_quiz(start, end).await;
        }

        // 关闭通知通道，等待日志任务结束
        drop(self.orchestrator);
        drop(self.quiz);
        if let Some(logger) = logger {
            let _ = logger.await;
        }

        Ok(())
    }

    async fn run_quiz(&self, start: usize, end: usize) {
        match self
            .quiz
            .generate(
                start,
                end,
                self.config.quiz_difficulty,
                self.config.language,
            )
            .await
        {
            Ok(quiz) => match serde_json::to_string_pretty(&quiz) {
                Ok(json) => info!("📝 题目:\n{}", json),
                Err(e) => warn!("⚠️ 题目序列化失败: {}", e),
            },
            Err(e) => error!("❌ 出题失败: {}", e),
        }
    }
}

/// 把通知转发到日志
fn spawn_notification_logger(mut rx: UnboundedReceiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            match notification {
                Notification::Retrying {
                    unit,
                    attempt,
                    max_attempts,
                    delay,
                    ..
                } => info!(
                    "🔔 第 {} 页等待重试 ({}/{}, {} 毫秒)",
                    unit,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                ),
                Notification::UnitCompleted { unit, blank } => {
                    info!("🔔 第 {} 页完成{}", unit, if blank { " (空白页)" } else { "" })
                }
                Notification::UnitFailed { unit, message } => {
                    error!("🔔 第 {} 页失败: {}", unit, message)
                }
                Notification::BatchHalted { unit } => warn!("🔔 批量分析在第 {} 页停止", unit),
                Notification::RecordCreated { record_id } => {
                    info!("🔔 累积记录已创建: {}", record_id)
                }
                Notification::RecordUpdated {
                    record_id,
                    completed,
                } => info!("🔔 累积记录 {} 已更新 ({} 页)", record_id, completed),
                Notification::PersistenceDegraded { message } => {
                    warn!("🔔 持久化暂不可用: {}", message)
                }
                Notification::StaleResultDiscarded { session_key } => {
                    warn!("🔔 已丢弃旧会话 {} 的结果", session_key)
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_invalid_quiz_range_rejected_before_analysis() {
        let config = Config {
            quiz_range: Some("three".to_string()),
            ..Config::default()
        };
        assert!(App::initialize(config).is_err());
    }

    #[tokio::test]
    async fn test_quiz_range_parsed_at_startup() {
        let config = Config {
            quiz_range: Some("2-4".to_string()),
            ..Config::default()
        };
        let app = assert_ok!(App::initialize(config));
        assert_eq!(app.quiz_range, Some((2, 4)));
    }
}
