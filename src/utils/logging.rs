//! 日志工具模块
//!
//! 提供日志初始化以及启动、批次、统计信息的输出函数
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;

/// 初始化 tracing 订阅器
///
/// `RUST_LOG` 优先；否则按 `verbose` 选择 debug / info
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "dawn_farmer=debug,info"
    } else {
        "info"
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 命令: {}", config.command);
    info!("📊 最大并发数: {}", config.max_concurrent_accounts);
    match &config.proxy_template {
        Some(_) => info!("🌐 代理: 已配置模板"),
        None => info!("🌐 代理: 直连"),
    }
    if config.mailbox.redirect.is_some() {
        info!("📧 确认邮件: 转发邮箱模式");
    }
    info!("{}", "=".repeat(60));
}

/// 记录账号加载信息
pub fn log_accounts_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个待处理的账号", total);
    info!("📋 将以每批 {} 个的方式处理", max_concurrent);
}

/// 记录批次开始信息
pub fn log_batch_start(
    batch_num: usize,
    total_batches: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("📄 本批账号: {}-{} / 共 {} 个", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, success: usize, total: usize) {
    info!("{}", "─".repeat(60));
    info!("✓ 第 {} 批完成: 成功 {}/{}", batch_num, success, total);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(
    action: &str,
    success: usize,
    failed: usize,
    quarantined: usize,
    total: usize,
    results_dir: &str,
) {
    info!("{}", "=".repeat(60));
    info!("📊 {}完成统计", action);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("🚫 隔离: {}", quarantined);
    info!("{}", "=".repeat(60));
    info!("结果已保存至: {}", results_dir);
}

/// 记录一轮 farm 的统计
pub fn log_farm_cycle(cycle: usize, kept_alive: usize, sleeping: usize, failed: usize, remaining: usize) {
    info!(
        "🌾 第 {} 轮 farm 完成: keepalive {} | 休眠 {} | 失败 {} | 剩余账号 {}",
        cycle, kept_alive, sleeping, failed, remaining
    );
}
