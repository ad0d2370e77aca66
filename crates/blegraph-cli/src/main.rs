//! Blegraph CLI
//!
//! - `inspect`: 由发现样本组装 GATT 图并打印
//! - `replay`: 组装、订阅并重放通知轨迹
//! - `watch`: 通过 BlueZ 连接配置中等待的设备（`bluez` 特性）

mod fixture;
mod stats;
#[cfg(feature = "bluez")]
mod watch;

use anyhow::{Context, Result};
use blegraph_core::{
    AttributeHandle, DeviceKey, GattError, GattGraph, GattSession, LogLevel, Settings,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blegraph", version, about = "BLE GATT 客户端调试工具")]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,
    /// 配置文件路径 (默认: ~/.config/blegraph/settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 打印发现样本组装出的 GATT 层级
    Inspect {
        /// 发现样本 (JSON)
        fixture: PathBuf,
    },
    /// 重放通知轨迹并统计每个特征收到的更新
    Replay {
        /// 发现样本 (JSON)
        fixture: PathBuf,
        /// 通知轨迹 (JSON)
        trace: PathBuf,
    },
    /// 扫描并连接配置中等待的设备
    #[cfg(feature = "bluez")]
    Watch {
        /// 总超时时间 (秒)，默认取配置中的 scan_timeout_secs
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 每台设备开启通知后的监听时间 (秒)
        #[arg(long, default_value = "10")]
        listen: u64,
    },
}

/// 离线会话：只记录 CCCD 写入
struct OfflineSession {
    peer: DeviceKey,
}

#[async_trait::async_trait]
impl GattSession for OfflineSession {
    fn peer(&self) -> DeviceKey {
        self.peer
    }

    async fn write_descriptor(&self, handle: AttributeHandle, value: &[u8]) -> Result<(), GattError> {
        tracing::info!("[offline] write {} <- {:02x?}", handle, value);
        Ok(())
    }
}

/// 显式指定的配置必须可读；默认位置的配置损坏时回退为默认值并返回错误
fn load_settings(path: &Path, explicit: bool) -> Result<(Settings, Option<anyhow::Error>)> {
    if explicit {
        let settings = Settings::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        return Ok((settings, None));
    }
    Ok(Settings::load_or_default(path))
}

fn init_logging(level: LogLevel) {
    // 桥接 log crate（blegraph-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.filter_directive())),
        )
        .try_init();
}

fn inspect(fixture: &Path) -> Result<()> {
    let fixture = fixture::load_discovery(fixture)?;
    let session: Arc<dyn GattSession> = Arc::new(OfflineSession {
        peer: fixture.device,
    });
    let graph = GattGraph::assemble(fixture.device, &fixture.services, Arc::downgrade(&session))?;

    print!("{}", graph.describe());
    println!(
        "{} service(s), {} characteristic(s)",
        graph.service_count(),
        graph.characteristic_count()
    );
    Ok(())
}

async fn replay(fixture: &Path, trace: &Path) -> Result<()> {
    let fixture = fixture::load_discovery(fixture)?;
    let events = fixture::load_trace(trace)?;

    let session: Arc<dyn GattSession> = Arc::new(OfflineSession {
        peer: fixture.device,
    });
    let graph = GattGraph::assemble(fixture.device, &fixture.services, Arc::downgrade(&session))?;

    let stats = stats::NotificationStats::new();
    for characteristic in graph.characteristics() {
        let props = characteristic.properties();
        if !props.can_notify_or_indicate() || characteristic.client_config().is_none() {
            continue;
        }
        characteristic.subscribe(stats.handler());
        graph
            .configure_notifications(
                characteristic,
                props.contains(blegraph_core::CharacteristicProperties::NOTIFY),
                props.contains(blegraph_core::CharacteristicProperties::INDICATE),
            )
            .await?;
    }

    let mut dropped = 0usize;
    for event in &events {
        if graph
            .deliver(AttributeHandle(event.handle), &event.value, event.kind())
            .is_none()
        {
            dropped += 1;
        }
    }

    println!(
        "📈 重放 {} 条更新 ({} 条句柄未知)",
        events.len(),
        dropped
    );
    stats.print();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Settings::config_path);
    let (settings, fallback) = load_settings(&config_path, cli.config.is_some())?;
    init_logging(cli.log_level.unwrap_or(settings.log_level));
    if let Some(e) = fallback {
        tracing::warn!(
            "Failed to load settings from {}: {:#}, using defaults",
            config_path.display(),
            e
        );
    }

    match cli.command {
        Commands::Inspect { fixture } => inspect(&fixture)?,
        Commands::Replay { fixture, trace } => replay(&fixture, &trace).await?,
        #[cfg(feature = "bluez")]
        Commands::Watch { timeout, listen } => {
            let timeout = timeout.unwrap_or(settings.scan_timeout_secs);
            watch::run(&settings, &config_path, timeout, listen).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "blegraph-cli-test-{}-{}.toml",
            std::process::id(),
            name
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_location_falls_back() {
        let path = temp_config("fallback", "log_level = 3");
        let (settings, fallback) = load_settings(&path, false).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(fallback.is_some());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_explicit_config_must_parse() {
        let path = temp_config("explicit", "log_level = 3");
        let err = load_settings(&path, true).unwrap_err();
        assert!(format!("{:#}", err).contains(&path.display().to_string()));

        std::fs::write(&path, "scan_timeout_secs = 3").unwrap();
        let (settings, fallback) = load_settings(&path, true).unwrap();
        assert_eq!(settings.scan_timeout_secs, 3);
        assert!(fallback.is_none());
        let _ = std::fs::remove_file(path);
    }
}
