use log::{debug, info, trace};

use crate::ble::{AttributeUuid, DeviceKey};
use crate::gatt::{
    AttributeHandle, CharacteristicProperties, CharacteristicRecord, DiscoveryError,
    GattCharacteristic, GattDescriptor, GattError, GattService, GattSession, HandleRange,
    Notification, NotificationHandler, NotificationKind, ServiceRecord, SubscriberList,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// CCCD 取值（小端）
const CCCD_NOTIFY: u16 = 0x0001;
const CCCD_INDICATE: u16 = 0x0002;

/// 一个已连接设备的完整 GATT 层级
///
/// 组装完成后结构只读，可以在多个线程间无锁共享；特征值与订阅列表各自
/// 加锁。
pub struct GattGraph {
    device: DeviceKey,
    services: Vec<Arc<GattService>>,
    by_value_handle: HashMap<AttributeHandle, Arc<GattCharacteristic>>,
    listeners: SubscriberList<Notification>,
    session: Weak<dyn GattSession>,
}

impl GattGraph {
    /// 由一次完整的发现结果组装
    ///
    /// 句柄区间倒置、使用保留句柄 0、服务区间重叠、特征或描述符越界/乱序
    /// 都会使整个组装失败。
    pub fn assemble(
        device: DeviceKey,
        records: &[ServiceRecord],
        session: Weak<dyn GattSession>,
    ) -> Result<Self, DiscoveryError> {
        let mut services: Vec<Arc<GattService>> = Vec::with_capacity(records.len());
        let mut by_value_handle = HashMap::new();

        for record in records {
            let range = HandleRange::new(record.start_handle, record.end_handle).map_err(|_| {
                DiscoveryError::InvalidServiceRange {
                    start: record.start_handle,
                    end: record.end_handle,
                }
            })?;

            if let Some(existing) = services.iter().find(|s| s.range().overlaps(&range)) {
                return Err(DiscoveryError::OverlappingServices {
                    first: existing.range(),
                    second: range,
                });
            }

            let characteristics = build_characteristics(range, &record.characteristics)?;
            for characteristic in &characteristics {
                by_value_handle.insert(characteristic.value_handle(), Arc::clone(characteristic));
            }

            trace!(
                "Assembled service {} uuid={} with {} characteristic(s)",
                range,
                record.uuid,
                characteristics.len()
            );
            services.push(Arc::new(GattService::new(
                record.is_primary,
                range,
                record.uuid.to_uuid(),
                characteristics,
                session.clone(),
            )));
        }

        debug!(
            "GATT graph for {}: {} service(s), {} characteristic(s)",
            device,
            services.len(),
            by_value_handle.len()
        );

        Ok(Self {
            device,
            services,
            by_value_handle,
            listeners: SubscriberList::new(),
            session,
        })
    }

    pub fn device(&self) -> DeviceKey {
        self.device
    }

    /// 按发现顺序排列的服务
    pub fn services(&self) -> &[Arc<GattService>] {
        &self.services
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Arc<GattCharacteristic>> {
        self.services.iter().flat_map(|s| s.characteristics().iter())
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn characteristic_count(&self) -> usize {
        self.by_value_handle.len()
    }

    /// 按发现顺序返回第一个匹配的服务
    pub fn find_service_by_uuid(&self, uuid: impl Into<AttributeUuid>) -> Option<&Arc<GattService>> {
        let uuid = uuid.into().to_uuid();
        self.services.iter().find(|s| s.uuid() == uuid)
    }

    /// 用另一份快照里的服务在本图中重新定位
    pub fn find_service_by_identity(&self, service: &GattService) -> Option<&Arc<GattService>> {
        self.services.iter().find(|s| ***s == *service)
    }

    pub fn find_characteristic_by_uuid(
        &self,
        service: &GattService,
        uuid: impl Into<AttributeUuid>,
    ) -> Option<&Arc<GattCharacteristic>> {
        self.find_service_by_identity(service)?
            .find_characteristic(uuid)
    }

    pub fn find_characteristic_by_identity(
        &self,
        service: &GattService,
        characteristic: &GattCharacteristic,
    ) -> Option<&Arc<GattCharacteristic>> {
        self.find_service_by_identity(service)?
            .find_characteristic_by_identity(characteristic)
    }

    pub fn find_characteristic_by_value_handle(
        &self,
        value_handle: AttributeHandle,
    ) -> Option<&Arc<GattCharacteristic>> {
        self.by_value_handle.get(&value_handle)
    }

    /// 提升指向连接上下文的弱引用
    pub fn resolve_owning_session(&self) -> Result<Arc<dyn GattSession>, GattError> {
        self.session.upgrade().ok_or(GattError::HandlerGone)
    }

    /// 添加接收所有特征更新的监听器
    pub fn add_listener(&self, handler: NotificationHandler) -> bool {
        self.listeners.add(handler)
    }

    pub fn remove_listener(&self, handler: &NotificationHandler) -> bool {
        self.listeners.remove(handler)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// 传输层收到通知/指示时调用
    ///
    /// 先更新特征值，再依次派发给特征订阅者和全局监听器。返回被调用的
    /// 处理函数数量；句柄未知时返回 `None`。
    pub fn deliver(
        &self,
        value_handle: AttributeHandle,
        value: &[u8],
        kind: NotificationKind,
    ) -> Option<usize> {
        let Some(characteristic) = self.by_value_handle.get(&value_handle) else {
            debug!(
                "{} from {} for unknown handle {}, dropped",
                kind_name(kind),
                self.device,
                value_handle
            );
            return None;
        };

        characteristic.set_value(value);
        let notification = Notification {
            kind,
            value_handle,
            characteristic_uuid: characteristic.uuid(),
            value: value.to_vec(),
        };

        let invoked = characteristic.dispatch(&notification) + self.listeners.dispatch(&notification);
        trace!(
            "{} {} ({} bytes) dispatched to {} handler(s)",
            kind_name(kind),
            value_handle,
            value.len(),
            invoked
        );
        Some(invoked)
    }

    /// 写 CCCD 以开启/关闭通知与指示
    pub async fn configure_notifications(
        &self,
        characteristic: &GattCharacteristic,
        notify: bool,
        indicate: bool,
    ) -> Result<(), GattError> {
        let characteristic = self
            .by_value_handle
            .get(&characteristic.value_handle())
            .filter(|c| ***c == *characteristic)
            .ok_or(GattError::UnknownCharacteristic(characteristic.handle()))?;

        let props = characteristic.properties();
        if notify && !props.contains(CharacteristicProperties::NOTIFY) {
            return Err(GattError::NotSupported {
                handle: characteristic.handle(),
                uuid: characteristic.uuid(),
                operation: "notify",
            });
        }
        if indicate && !props.contains(CharacteristicProperties::INDICATE) {
            return Err(GattError::NotSupported {
                handle: characteristic.handle(),
                uuid: characteristic.uuid(),
                operation: "indicate",
            });
        }

        let cccd = characteristic
            .client_config()
            .ok_or(GattError::MissingDescriptor {
                handle: characteristic.handle(),
                uuid: characteristic.uuid(),
            })?;

        let session = self.resolve_owning_session()?;

        let mut bits = 0u16;
        if notify {
            bits |= CCCD_NOTIFY;
        }
        if indicate {
            bits |= CCCD_INDICATE;
        }

        info!(
            "Configuring {} on {}: notify={}, indicate={}",
            characteristic.uuid(),
            self.device,
            notify,
            indicate
        );
        session
            .write_descriptor(cccd.handle, &bits.to_le_bytes())
            .await
    }

    /// 多行的层级摘要，用于日志和命令行输出
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

fn kind_name(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Notification => "Notification",
        NotificationKind::Indication => "Indication",
    }
}

fn build_characteristics(
    service: HandleRange,
    records: &[CharacteristicRecord],
) -> Result<Vec<Arc<GattCharacteristic>>, DiscoveryError> {
    let mut characteristics = Vec::with_capacity(records.len());
    // 服务声明本身占用起始句柄
    let mut previous = service.start();

    for (i, record) in records.iter().enumerate() {
        let handle = AttributeHandle(record.handle);
        let value_handle = AttributeHandle(record.value_handle);

        if !service.contains(handle) {
            return Err(DiscoveryError::CharacteristicOutOfRange { service, handle });
        }
        if !service.contains(value_handle) {
            return Err(DiscoveryError::CharacteristicOutOfRange {
                service,
                handle: value_handle,
            });
        }
        if handle <= previous {
            return Err(DiscoveryError::CharacteristicOutOfOrder { handle, previous });
        }
        if value_handle <= handle {
            return Err(DiscoveryError::InvalidValueHandle {
                handle,
                value_handle,
            });
        }

        // 特征延伸到下一个特征声明之前，最后一个延伸到服务结尾
        let end = match records.get(i + 1) {
            Some(next) => {
                let next_handle = AttributeHandle(next.handle);
                if next_handle <= value_handle {
                    return Err(DiscoveryError::CharacteristicOutOfOrder {
                        handle: next_handle,
                        previous: value_handle,
                    });
                }
                AttributeHandle(next.handle - 1)
            }
            None => service.end(),
        };
        let range = HandleRange::new(handle, end)
            .map_err(|_| DiscoveryError::CharacteristicOutOfRange { service, handle })?;

        let mut descriptors = Vec::with_capacity(record.descriptors.len());
        let mut last = value_handle;
        for descriptor in &record.descriptors {
            let d_handle = AttributeHandle(descriptor.handle);
            if d_handle <= last || !range.contains(d_handle) {
                return Err(DiscoveryError::DescriptorOutOfRange {
                    characteristic: range,
                    handle: d_handle,
                });
            }
            descriptors.push(GattDescriptor {
                handle: d_handle,
                uuid: descriptor.uuid.to_uuid(),
            });
            last = d_handle;
        }

        characteristics.push(Arc::new(GattCharacteristic::new(
            range,
            value_handle,
            record.uuid.to_uuid(),
            CharacteristicProperties::from_bits_retain(record.properties),
            descriptors,
        )));
        previous = last;
    }

    Ok(characteristics)
}

impl fmt::Display for GattGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device {}", self.device)?;
        for service in &self.services {
            writeln!(f, "  {}", service)?;
            for characteristic in service.characteristics() {
                writeln!(f, "    {}", characteristic)?;
                for descriptor in characteristic.descriptors() {
                    writeln!(f, "      desc {} uuid={}", descriptor.handle, descriptor.uuid)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GattGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattGraph")
            .field("device", &self.device)
            .field("services", &self.services)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
