//! 离线样本
//!
//! - 发现样本：设备身份 + 服务记录列表
//! - 通知轨迹：按时间顺序的 `(value_handle, bytes)` 序列

use anyhow::{Context, Result};
use blegraph_core::{DeviceKey, NotificationKind, ServiceRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 一次完整发现的 JSON 样本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryFixture {
    pub device: DeviceKey,
    pub services: Vec<ServiceRecord>,
}

/// 轨迹中的一次属性值更新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub handle: u16,
    #[serde(default)]
    pub indication: bool,
    pub value: Vec<u8>,
}

impl TraceEvent {
    pub fn kind(&self) -> NotificationKind {
        if self.indication {
            NotificationKind::Indication
        } else {
            NotificationKind::Notification
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_discovery(path: &Path) -> Result<DiscoveryFixture> {
    read_json(path)
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_discovery_fixture() {
        let json = r#"{
            "device": { "address": "C0:FF:EE:00:11:22", "type": "random" },
            "services": [
                {
                    "start_handle": 16,
                    "end_handle": 20,
                    "uuid": "180f",
                    "characteristics": [
                        {
                            "handle": 17,
                            "value_handle": 18,
                            "uuid": "2a19",
                            "properties": 18,
                            "descriptors": [{ "handle": 19, "uuid": "2902" }]
                        }
                    ]
                }
            ]
        }"#;
        let fixture: DiscoveryFixture = serde_json::from_str(json).unwrap();
        assert_eq!(fixture.device.to_string(), "C0:FF:EE:00:11:22/random");
        assert!(fixture.services[0].is_primary);
        assert_eq!(fixture.services[0].characteristics[0].descriptors.len(), 1);
    }

    #[test]
    fn test_trace_kind() {
        let events: Vec<TraceEvent> = serde_json::from_str(
            r#"[{ "handle": 18, "value": [87] }, { "handle": 34, "indication": true, "value": [1, 2] }]"#,
        )
        .unwrap();
        assert_eq!(events[0].kind(), NotificationKind::Notification);
        assert_eq!(events[1].kind(), NotificationKind::Indication);
    }
}
