/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化全局日志
///
/// 优先使用 `RUST_LOG`，否则 `verbose` 时为 debug，默认为 info。
/// 重复调用是安全的（测试中会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(document_path: &str, model_name: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 逐页分析模式");
    info!("📄 文档: {}", document_path);
    info!("🤖 模型: {}", model_name);
    info!("{}", "=".repeat(60));
}

/// 记录会话打开信息
///
/// # 参数
/// - `session_key`: 文档稳定标识
/// - `total`: 总页数
/// - `record_id`: 从缓存恢复的记录ID（如果有）
pub fn log_session_opened(session_key: &str, total: usize, record_id: Option<&str>) {
    info!("✓ 已打开文档 {}，共 {} 页", session_key, total);
    match record_id {
        Some(id) => info!("♻️ 已恢复历史记录 ID: {}", id),
        None => info!("🆕 尚无历史记录，首次保存时创建"),
    }
}

/// 打印最终统计信息
///
/// # 参数
/// - `completed`: 已完成页数
/// - `total`: 总页数
/// - `failed_at`: 中断所在页（如果有）
pub fn print_final_stats(completed: usize, total: usize, failed_at: Option<usize>) {
    info!("\n{}", "=".repeat(60));
    info!("📊 分析完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已完成: {}/{}", completed, total);
    match failed_at {
        Some(unit) => info!("❌ 在第 {} 页中断", unit),
        None => info!("❌ 失败: 0"),
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate_text("第一页内容很长", 3), "第一页...");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
