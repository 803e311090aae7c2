use anyhow::Result;
use page_insight::utils::logging;
use page_insight::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：命令行给出配置文件时使用文件，否则使用环境变量
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_toml_file(&path)?,
        None => Config::from_env(),
    };

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    App::initialize(config)?.run().await?;

    Ok(())
}
