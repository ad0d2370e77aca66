//! 按特征统计收到的通知

use blegraph_core::{CallableIdentity, Notification, NotificationHandler};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicStats {
    pub uuid: String,
    pub count: usize,
    pub last_value: Vec<u8>,
}

#[derive(Default)]
pub struct NotificationStats {
    by_handle: Mutex<BTreeMap<u16, CharacteristicStats>>,
}

impl NotificationStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn on_notification(&self, notification: &Notification) {
        tracing::debug!(
            "{:?} {} = {:02x?}",
            notification.kind,
            notification.value_handle,
            notification.value
        );
        let mut by_handle = self
            .by_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = by_handle
            .entry(notification.value_handle.value())
            .or_insert_with(|| CharacteristicStats {
                uuid: notification.characteristic_uuid.to_string(),
                count: 0,
                last_value: Vec::new(),
            });
        entry.count += 1;
        entry.last_value.clone_from(&notification.value);
    }

    /// 绑定到本实例的处理函数，同一实例多次调用得到相等的身份
    pub fn handler(self: &Arc<Self>) -> NotificationHandler {
        CallableIdentity::member(Arc::clone(self), Self::on_notification)
    }

    pub fn total(&self) -> usize {
        self.snapshot().values().map(|s| s.count).sum()
    }

    pub fn snapshot(&self) -> BTreeMap<u16, CharacteristicStats> {
        self.by_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn print(&self) {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            println!("   未收到通知");
            return;
        }
        for (handle, stats) in snapshot {
            println!(
                "   0x{:04X} {} x{} (last: {:02x?})",
                handle, stats.uuid, stats.count, stats.last_value
            );
        }
    }
}
