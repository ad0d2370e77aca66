//! Blegraph Core Library
//!
//! BLE GATT 客户端核心：属性层级、回调身份与设备登记表
//!
//! # 模块
//!
//! - **ble**: 地址、属性 UUID、BlueZ 发现适配（`bluez` 特性）
//! - **callback**: 可比较的回调身份 [`CallableIdentity`]
//! - **gatt**: 服务/特征/描述符层级、订阅与通知派发
//! - **registry**: 等待/处理中/已处理三段式设备登记表
//! - **config**: 持久化设置
//! - **logging**: 日志级别
//!
//! # 使用示例
//!
//! ```ignore
//! use blegraph_core::{CallableIdentity, DeviceKey, GattGraph, ServiceRecord};
//!
//! // 1. 由发现结果组装
//! let graph = GattGraph::assemble(device, &records, Arc::downgrade(&session))?;
//!
//! // 2. 查找特征并订阅
//! let service = graph.find_service_by_uuid(0x180Fu16).unwrap();
//! let level = service.find_characteristic(0x2A19u16).unwrap();
//! level.subscribe(CallableIdentity::plain(on_battery));
//! graph.configure_notifications(level, true, false).await?;
//!
//! // 3. 传输层收到通知后派发
//! graph.deliver(level.value_handle(), &[87], NotificationKind::Notification);
//! ```

pub mod ble;
pub mod callback;
pub mod config;
pub mod gatt;
pub mod logging;
pub mod registry;

// BLE re-exports
pub use ble::{AddressType, AttributeUuid, BdAddr, DeviceKey};

// Callback re-exports
pub use callback::{CallableIdentity, CallableKind};

// GATT re-exports
pub use gatt::{
    AttributeHandle, CharacteristicProperties, CharacteristicRecord, DescriptorRecord,
    DiscoveryError, GattCharacteristic, GattDescriptor, GattError, GattGraph, GattService,
    GattSession, HandleRange, Notification, NotificationHandler, NotificationKind, ServiceRecord,
};

// Registry re-exports
pub use registry::{AwaitedPattern, DeviceRecord, DeviceRegistry, NameMatch};

// Config and logging re-exports
pub use config::Settings;
pub use logging::LogLevel;
