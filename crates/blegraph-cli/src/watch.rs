//! BlueZ 实时模式
//!
//! 扫描 → 查询登记表 → 连接 → 发现 → 开启通知 → 标记已处理，直到所有
//! 按地址等待的设备都处理完毕或超时。

use anyhow::{Result, bail};
use blegraph_core::ble::bluez::{BluezCentral, DiscoveredPeer};
use blegraph_core::{CharacteristicProperties, DeviceRegistry, Settings};
use std::path::Path;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::stats::NotificationStats;

/// 单次扫描窗口上限
const SCAN_WINDOW: Duration = Duration::from_secs(5);

pub async fn run(
    settings: &Settings,
    config_path: &Path,
    timeout_secs: u64,
    listen_secs: u64,
) -> Result<()> {
    let registry = settings.registry();
    if !registry.has_any_awaited() {
        bail!("No awaited devices configured in {}", config_path.display());
    }
    // 纯名称模式是开放式的，只能等到超时
    let has_addressed = registry
        .awaited_patterns()
        .iter()
        .any(|p| p.key().is_some());

    let central = BluezCentral::new().await?;
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    println!("🔍 等待设备 ({}s)...", timeout_secs);

    loop {
        if has_addressed && registry.all_awaited_are_processed() {
            println!("✅ 所有等待的设备均已处理");
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            println!("⏱️  超时");
            break;
        }

        let peers = central
            .scan_awaited(&registry, remaining.min(SCAN_WINDOW))
            .await?;
        for peer in peers {
            if !registry.mark_processing(peer.key, &peer.name) {
                continue;
            }
            match process(&central, &peer, listen_secs).await {
                Ok(()) => {
                    registry.mark_processed(peer.key, &peer.name);
                }
                Err(e) => warn!("Failed to process {}: {:#}", peer.key, e),
            }
            registry.unmark_processing(&peer.key);
        }
    }

    summarize(&registry);
    registry.shutdown();
    Ok(())
}

async fn process(central: &BluezCentral, peer: &DiscoveredPeer, listen_secs: u64) -> Result<()> {
    println!(
        "🔗 {} '{}' (rssi: {})",
        peer.key,
        peer.name,
        peer.rssi.map_or_else(|| "-".to_string(), |r| r.to_string())
    );

    let (session, graph) = central.connect(&peer.key).await?;
    print!("{}", graph.describe());

    let stats = NotificationStats::new();
    graph.add_listener(stats.handler());

    for characteristic in graph.characteristics() {
        let props = characteristic.properties();
        if !props.can_notify_or_indicate() || characteristic.client_config().is_none() {
            continue;
        }
        // 两者都支持时优先通知
        let notify = props.contains(CharacteristicProperties::NOTIFY);
        if let Err(e) = graph
            .configure_notifications(characteristic, notify, !notify)
            .await
        {
            warn!("Cannot enable updates on {}: {}", characteristic, e);
        }
    }

    info!("Listening to {} for {}s", peer.key, listen_secs);
    time::sleep(Duration::from_secs(listen_secs)).await;

    // 先停止通知任务，移除监听时不会再有处理函数在运行
    session.disconnect().await?;
    graph.remove_listener(&stats.handler());

    println!("📊 {} 条更新", stats.total());
    stats.print();
    Ok(())
}

fn summarize(registry: &DeviceRegistry) {
    info!("Registry: {}", registry.describe());
    for record in registry.processed_devices() {
        println!("   ✔ {}", record);
    }
}
