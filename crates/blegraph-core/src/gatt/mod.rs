//! GATT 属性层级
//!
//! 服务 → 特征 → 描述符，全部以连接内唯一的 16 位句柄寻址。
//!
//! # 生命周期
//!
//! 1. 发现协作方提供完整的 [`ServiceRecord`] 列表
//! 2. [`GattGraph::assemble`] 一次性校验并建立层级，失败时不产生任何图
//! 3. 应用按 UUID 查找特征并订阅 [`NotificationHandler`]
//! 4. 传输协作方以 `(value_handle, bytes)` 调用 [`GattGraph::deliver`]
//! 5. 连接拆除或重新发现时整张图被丢弃

mod characteristic;
mod graph;
mod handle;
mod properties;
mod records;
mod service;
mod session;
mod subscription;

pub use characteristic::{
    GattCharacteristic, GattDescriptor, Notification, NotificationHandler, NotificationKind,
};
pub use graph::GattGraph;
pub use handle::{AttributeHandle, HandleRange, InvalidRange};
pub use properties::CharacteristicProperties;
pub use records::{CharacteristicRecord, DescriptorRecord, ServiceRecord};
pub use service::GattService;
pub use session::GattSession;
pub use subscription::SubscriberList;

use uuid::Uuid;

/// GATT 运行期错误
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    /// 连接上下文已经拆除（设备并发断开）
    #[error("GATT handler gone: the connection was torn down")]
    HandlerGone,

    #[error("Characteristic {uuid} at {handle} does not support {operation}")]
    NotSupported {
        handle: AttributeHandle,
        uuid: Uuid,
        operation: &'static str,
    },

    #[error("Characteristic {uuid} at {handle} has no client configuration descriptor")]
    MissingDescriptor { handle: AttributeHandle, uuid: Uuid },

    #[error("Characteristic at {0} is not part of this graph")]
    UnknownCharacteristic(AttributeHandle),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// 发现结果不合法，组装被拒绝
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Malformed discovery response: invalid service range 0x{start:04X}..=0x{end:04X}")]
    InvalidServiceRange { start: u16, end: u16 },

    #[error("Malformed discovery response: services {first} and {second} overlap")]
    OverlappingServices {
        first: HandleRange,
        second: HandleRange,
    },

    #[error("Malformed discovery response: characteristic {handle} lies outside service {service}")]
    CharacteristicOutOfRange {
        service: HandleRange,
        handle: AttributeHandle,
    },

    #[error("Malformed discovery response: characteristic {handle} follows attribute {previous}")]
    CharacteristicOutOfOrder {
        handle: AttributeHandle,
        previous: AttributeHandle,
    },

    #[error("Malformed discovery response: value handle {value_handle} must follow declaration {handle}")]
    InvalidValueHandle {
        handle: AttributeHandle,
        value_handle: AttributeHandle,
    },

    #[error("Malformed discovery response: descriptor {handle} lies outside characteristic {characteristic}")]
    DescriptorOutOfRange {
        characteristic: HandleRange,
        handle: AttributeHandle,
    },
}
