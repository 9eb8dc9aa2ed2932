use anyhow::Result;
use dawn_farmer::utils::logging;
use dawn_farmer::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（命令行第一个参数优先于 COMMAND 环境变量）
    let mut config = Config::from_env();
    if let Some(command) = std::env::args().nth(1) {
        config.command = command;
    }

    // 初始化日志
    logging::init(config.verbose_logging);

    config.validate()?;

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
