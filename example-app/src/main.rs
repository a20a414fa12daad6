//! # 示例应用程序
//!
//! 从文件、环境变量以及可选的 etcd 加载配置，打印合并结果，
//! 并在配置变化时输出新版本

use anyhow::Context;
use clap::Parser;
use config_abstractions::{ConfigSource, Snapshot};
use config_impl::{ConfigStore, EnvSource, FileSource, StoreOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "example-app")]
#[command(about = "Lorn ADSP 配置中心示例")]
struct Args {
    /// 配置文件路径，可多次指定，后面的覆盖前面的
    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,

    /// 环境变量前缀，匹配的变量会覆盖文件配置并去掉前缀
    #[arg(long)]
    env_prefix: Option<String>,

    /// etcd 地址，可多次指定
    #[cfg(feature = "etcd")]
    #[arg(long)]
    etcd: Vec<String>,

    /// etcd 键前缀
    #[cfg(feature = "etcd")]
    #[arg(long, default_value = config_impl::providers::kv::DEFAULT_PREFIX)]
    etcd_prefix: String,

    /// 持续监听配置变化
    #[arg(long)]
    watch: bool,

    /// 只输出指定路径的配置，使用 `.` 分隔
    #[arg(long)]
    path: Option<String>,

    /// 监控失败后的重试间隔（毫秒）
    #[arg(long, default_value_t = 1000)]
    retry_ms: u64,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// 示例中读取的服务配置
#[derive(Debug, Default, Deserialize)]
struct ServerConfig {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志，RUST_LOG 优先于命令行参数
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("启动 Lorn ADSP 配置中心示例");

    let store = ConfigStore::new(
        StoreOptions::new().with_watch_retry_interval(Duration::from_millis(args.retry_ms)),
    );
    let sources = build_sources(&args).await?;
    store
        .load(sources)
        .await
        .context("加载配置源失败")?;

    print_snapshot(&store.snapshot(), args.path.as_deref())?;

    let server: ServerConfig = store.get(&["server"]).scan()?;
    info!("服务地址: {}:{}", server.host, server.port);

    if args.watch {
        watch_changes(&store, args.path.as_deref()).await?;
    }

    store.close().await?;
    info!("应用已关闭");
    Ok(())
}

/// 按命令行参数构建配置源，顺序即覆盖优先级
async fn build_sources(args: &Args) -> anyhow::Result<Vec<Arc<dyn ConfigSource>>> {
    let mut sources: Vec<Arc<dyn ConfigSource>> = Vec::new();

    if !args.configs.is_empty() {
        let file = args
            .configs
            .iter()
            .fold(FileSource::new(), |source, path| source.with_path(path));
        info!("添加文件配置源: {}", file.name());
        sources.push(Arc::new(file));
    }

    #[cfg(feature = "etcd")]
    if !args.etcd.is_empty() {
        use config_impl::{EtcdKvClient, KvOptions, KvSource};

        let options = args
            .etcd
            .iter()
            .fold(KvOptions::new(), |options, address| options.with_address(address))
            .with_prefix(args.etcd_prefix.as_str())
            .with_strip_prefix();
        let client = EtcdKvClient::connect(&options).await?;
        info!("添加 etcd 配置源: {}", args.etcd_prefix);
        sources.push(Arc::new(KvSource::new(Arc::new(client), options)));
    }

    if let Some(prefix) = &args.env_prefix {
        info!("添加环境变量配置源, 前缀: {}", prefix);
        sources.push(Arc::new(EnvSource::new().with_stripped_prefix(prefix)));
    }

    if sources.is_empty() {
        warn!("未指定任何配置源, 配置为空");
    }
    Ok(sources)
}

fn print_snapshot(snapshot: &Arc<Snapshot>, path: Option<&str>) -> anyhow::Result<()> {
    let output = match path {
        Some(path) => {
            let segments: Vec<&str> = path.split('.').collect();
            String::from_utf8(snapshot.get(&segments).bytes())?
        }
        None => serde_json::to_string_pretty(snapshot.values())?,
    };
    println!("# version {}", snapshot.version());
    println!("{output}");
    Ok(())
}

/// 输出每个新版本，直到收到退出信号
async fn watch_changes(store: &ConfigStore, path: Option<&str>) -> anyhow::Result<()> {
    let watcher = store.watch()?;
    info!("开始监听配置变化, 按 Ctrl+C 退出");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到退出信号，正在关闭应用");
                watcher.close();
                return Ok(());
            }
            next = watcher.next() => match next {
                Ok(snapshot) => {
                    info!("配置已更新到版本 {}", snapshot.version());
                    print_snapshot(&snapshot, path)?;
                }
                Err(e) => {
                    error!("配置监听结束: {}", e);
                    return Ok(());
                }
            },
        }
    }
}
