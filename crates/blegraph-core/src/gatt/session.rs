use crate::ble::DeviceKey;
use crate::gatt::{AttributeHandle, GattError};
use async_trait::async_trait;

/// 活动连接的上下文
///
/// GATT 对象只以弱引用持有它；连接拆除后解析会失败并返回
/// [`GattError::HandlerGone`]。
#[async_trait]
pub trait GattSession: Send + Sync {
    /// 对端设备
    fn peer(&self) -> DeviceKey;

    /// 写描述符（带响应）
    async fn write_descriptor(&self, handle: AttributeHandle, value: &[u8]) -> Result<(), GattError>;
}
