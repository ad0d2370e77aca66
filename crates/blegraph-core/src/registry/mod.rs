//! 设备身份注册表
//!
//! 连接编排器用它回答两个问题："要不要连这台设备" 和 "这台设备是不是已经
//! 处理过了"。三个集合彼此独立：
//!
//! - **awaited**: 按地址精确匹配或按名称子串匹配的等待模式
//! - **processing**: 正在连接/配对中的设备
//! - **processed**: 已处理完毕的设备，在注册表生命周期内不会移出
//!
//! 每个操作都是一个独立的临界区；跨集合的迁移（processing → processed）
//! 由调用方分两步完成，注册表不提供组合事务。

use log::{debug, info};

use crate::ble::DeviceKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 名称子串的匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameMatch {
    /// 区分大小写的无锚点子串匹配
    #[default]
    CaseSensitive,
    CaseInsensitive,
}

impl NameMatch {
    pub fn matches(&self, name: &str, pattern: &str) -> bool {
        match self {
            NameMatch::CaseSensitive => name.contains(pattern),
            NameMatch::CaseInsensitive => name.to_lowercase().contains(&pattern.to_lowercase()),
        }
    }
}

/// 等待模式，至少包含地址或名称子串之一
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AwaitedPattern {
    key: Option<DeviceKey>,
    name_substring: Option<String>,
}

impl AwaitedPattern {
    /// 两者都为空（或名称为空串）时返回 `None`
    pub fn new(key: Option<DeviceKey>, name_substring: Option<String>) -> Option<Self> {
        let name_substring = name_substring.filter(|n| !n.is_empty());
        if key.is_none() && name_substring.is_none() {
            return None;
        }
        Some(Self {
            key,
            name_substring,
        })
    }

    pub fn by_key(key: DeviceKey) -> Self {
        Self {
            key: Some(key),
            name_substring: None,
        }
    }

    /// 空串会被当作空模式，因此这里的名称必须非空
    pub fn by_name(name_substring: impl Into<String>) -> Option<Self> {
        Self::new(None, Some(name_substring.into()))
    }

    pub fn key(&self) -> Option<DeviceKey> {
        self.key
    }

    pub fn name_substring(&self) -> Option<&str> {
        self.name_substring.as_deref()
    }

    pub fn matches(&self, key: &DeviceKey, name: &str, mode: NameMatch) -> bool {
        self.key.as_ref() == Some(key)
            || self
                .name_substring
                .as_deref()
                .is_some_and(|pattern| mode.matches(name, pattern))
    }
}

impl fmt::Display for AwaitedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.key, &self.name_substring) {
            (Some(key), Some(name)) => write!(f, "[{}, '{}']", key, name),
            (Some(key), None) => write!(f, "[{}]", key),
            (None, Some(name)) => write!(f, "['{}']", name),
            (None, None) => f.write_str("[]"),
        }
    }
}

/// processing/processed 集合中的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub key: DeviceKey,
    pub last_known_name: String,
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, '{}']", self.key, self.last_known_name)
    }
}

/// 三个设备集合
///
/// 显式构造并通过 `Arc` 注入编排器，不依赖任何进程级全局状态。
pub struct DeviceRegistry {
    name_match: NameMatch,
    awaited: Mutex<Vec<AwaitedPattern>>,
    processing: Mutex<BTreeMap<DeviceKey, DeviceRecord>>,
    processed: Mutex<BTreeMap<DeviceKey, DeviceRecord>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(NameMatch::default())
    }
}

impl DeviceRegistry {
    pub fn new(name_match: NameMatch) -> Self {
        Self {
            name_match,
            awaited: Mutex::new(Vec::new()),
            processing: Mutex::new(BTreeMap::new()),
            processed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name_match(&self) -> NameMatch {
        self.name_match
    }

    // ---- awaited ----

    /// 添加等待模式；完全相同的模式只保留一份
    pub fn add_awaited(&self, pattern: AwaitedPattern) -> bool {
        let mut awaited = lock(&self.awaited);
        if awaited.contains(&pattern) {
            return false;
        }
        debug!("Awaiting device {}", pattern);
        awaited.push(pattern);
        true
    }

    pub fn is_awaited(&self, key: &DeviceKey, name: &str) -> bool {
        lock(&self.awaited)
            .iter()
            .any(|p| p.matches(key, name, self.name_match))
    }

    pub fn awaited_count(&self) -> usize {
        lock(&self.awaited).len()
    }

    pub fn has_any_awaited(&self) -> bool {
        !lock(&self.awaited).is_empty()
    }

    pub fn awaited_patterns(&self) -> Vec<AwaitedPattern> {
        lock(&self.awaited).clone()
    }

    // ---- processing ----

    /// 标记为处理中；已存在时只更新名称并返回 `false`
    pub fn mark_processing(&self, key: DeviceKey, name: &str) -> bool {
        let mut processing = lock(&self.processing);
        let fresh = !processing.contains_key(&key);
        processing.insert(
            key,
            DeviceRecord {
                key,
                last_known_name: name.to_string(),
            },
        );
        fresh
    }

    /// 移出处理中集合；不存在时返回 `false`，这是预期中的竞争而不是错误
    pub fn unmark_processing(&self, key: &DeviceKey) -> bool {
        lock(&self.processing).remove(key).is_some()
    }

    pub fn is_processing(&self, key: &DeviceKey) -> bool {
        lock(&self.processing).contains_key(key)
    }

    pub fn processing_count(&self) -> usize {
        lock(&self.processing).len()
    }

    pub fn processing_devices(&self) -> Vec<DeviceRecord> {
        lock(&self.processing).values().cloned().collect()
    }

    // ---- processed ----

    /// 标记为已处理；重复调用是无操作，返回 `false`
    pub fn mark_processed(&self, key: DeviceKey, name: &str) -> bool {
        let mut processed = lock(&self.processed);
        if processed.contains_key(&key) {
            return false;
        }
        info!("Device processed: {} '{}'", key, name);
        processed.insert(
            key,
            DeviceRecord {
                key,
                last_known_name: name.to_string(),
            },
        );
        true
    }

    pub fn is_processed(&self, key: &DeviceKey) -> bool {
        lock(&self.processed).contains_key(key)
    }

    pub fn processed_count(&self) -> usize {
        lock(&self.processed).len()
    }

    pub fn processed_devices(&self) -> Vec<DeviceRecord> {
        lock(&self.processed).values().cloned().collect()
    }

    /// 所有带地址的等待模式是否都已处理
    ///
    /// 纯名称模式是开放式的，不计入完成条件；没有带地址的模式时为 `true`。
    pub fn all_awaited_are_processed(&self) -> bool {
        let awaited = lock(&self.awaited);
        let processed = lock(&self.processed);
        awaited
            .iter()
            .filter_map(AwaitedPattern::key)
            .all(|key| processed.contains_key(&key))
    }

    // ---- lifecycle ----

    /// 清空所有集合
    pub fn shutdown(&self) {
        let awaited = std::mem::take(&mut *lock(&self.awaited));
        let processing = std::mem::take(&mut *lock(&self.processing));
        let processed = std::mem::take(&mut *lock(&self.processed));
        info!(
            "Device registry shut down: awaited={}, processing={}, processed={}",
            awaited.len(),
            processing.len(),
            processed.len()
        );
    }

    /// 单行摘要，用于日志
    pub fn describe(&self) -> String {
        let awaited: Vec<String> = lock(&self.awaited).iter().map(|p| p.to_string()).collect();
        let processing: Vec<String> = lock(&self.processing)
            .values()
            .map(|r| r.to_string())
            .collect();
        let processed: Vec<String> = lock(&self.processed)
            .values()
            .map(|r| r.to_string())
            .collect();
        format!(
            "awaited[{}] processing[{}] processed[{}]",
            awaited.join(", "),
            processing.join(", "),
            processed.join(", ")
        )
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("name_match", &self.name_match)
            .field("awaited", &self.awaited_count())
            .field("processing", &self.processing_count())
            .field("processed", &self.processed_count())
            .finish()
    }
}
