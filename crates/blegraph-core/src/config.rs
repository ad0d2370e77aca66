//! 应用配置和持久化
//!
//! 保存等待连接的设备、名称匹配方式、扫描超时和日志级别。

use log::debug;

use crate::ble::{AddressType, BdAddr, DeviceKey};
use crate::logging::LogLevel;
use crate::registry::{AwaitedPattern, DeviceRegistry, NameMatch};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件中的一条等待记录
///
/// ```toml
/// [[awaited]]
/// address = "C0:FF:EE:00:11:22"
/// type = "random"
///
/// [[awaited]]
/// name = "Thermo"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<BdAddr>,
    /// 未填写时视为公共地址
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub address_type: Option<AddressType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AwaitedEntry {
    pub fn by_address(address: BdAddr, address_type: AddressType) -> Self {
        Self {
            address: Some(address),
            address_type: Some(address_type),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            address: None,
            address_type: None,
            name: Some(name.into()),
        }
    }

    /// 转换为注册表模式；既无地址也无名称时返回 `None`
    pub fn to_pattern(&self) -> Option<AwaitedPattern> {
        let key = self.address.map(|address| {
            DeviceKey::new(address, self.address_type.unwrap_or(AddressType::Public))
        });
        AwaitedPattern::new(key, self.name.clone())
    }
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 等待连接的设备
    pub awaited: Vec<AwaitedEntry>,
    /// 名称子串匹配方式
    pub name_match: NameMatch,
    /// 扫描超时（秒）
    pub scan_timeout_secs: u64,
    /// 日志级别
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            awaited: Vec::new(),
            name_match: NameMatch::default(),
            scan_timeout_secs: 30,
            log_level: LogLevel::default(),
        }
    }
}

impl Settings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blegraph");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在或无法解析则使用默认值）
    ///
    /// 解析失败的错误一并返回，由调用方在日志就绪后报告。
    pub fn load_or_default(path: impl AsRef<Path>) -> (Self, Option<anyhow::Error>) {
        let path = path.as_ref();
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::load_from(path) {
            Ok(settings) => (settings, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// 从指定路径加载
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 构造已填入等待模式的注册表
    ///
    /// 空记录会被跳过并记录警告。
    pub fn registry(&self) -> DeviceRegistry {
        let registry = DeviceRegistry::new(self.name_match);
        for entry in &self.awaited {
            match entry.to_pattern() {
                Some(pattern) => {
                    registry.add_awaited(pattern);
                }
                None => log::warn!("Ignoring awaited entry with neither address nor name"),
            }
        }
        registry
    }
}
