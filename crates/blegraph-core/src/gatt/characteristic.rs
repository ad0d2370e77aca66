use crate::ble::CLIENT_CHARACTERISTIC_CONFIGURATION;
use crate::callback::CallableIdentity;
use crate::gatt::{AttributeHandle, CharacteristicProperties, HandleRange, SubscriberList};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// 通知还是指示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Notification,
    Indication,
}

/// 派发给处理函数的一次属性值更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub value_handle: AttributeHandle,
    pub characteristic_uuid: Uuid,
    pub value: Vec<u8>,
}

/// 通知/指示处理函数
pub type NotificationHandler = CallableIdentity<Notification>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDescriptor {
    pub handle: AttributeHandle,
    pub uuid: Uuid,
}

impl GattDescriptor {
    pub fn is_client_config(&self) -> bool {
        self.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION
    }
}

/// GATT 特征
///
/// 结构（句柄、UUID、属性、描述符）在图的生命周期内不变，只有值和订阅
/// 列表会变化，两者各自加锁。两个特征相等当且仅当句柄区间相同。
pub struct GattCharacteristic {
    range: HandleRange,
    value_handle: AttributeHandle,
    uuid: Uuid,
    properties: CharacteristicProperties,
    descriptors: Vec<GattDescriptor>,
    value: RwLock<Vec<u8>>,
    subscribers: SubscriberList<Notification>,
}

impl GattCharacteristic {
    pub(crate) fn new(
        range: HandleRange,
        value_handle: AttributeHandle,
        uuid: Uuid,
        properties: CharacteristicProperties,
        descriptors: Vec<GattDescriptor>,
    ) -> Self {
        Self {
            range,
            value_handle,
            uuid,
            properties,
            descriptors,
            value: RwLock::new(Vec::new()),
            subscribers: SubscriberList::new(),
        }
    }

    /// 特征声明句柄
    pub fn handle(&self) -> AttributeHandle {
        self.range.start()
    }

    pub fn value_handle(&self) -> AttributeHandle {
        self.value_handle
    }

    /// 最后一个属于本特征的句柄
    pub fn end_handle(&self) -> AttributeHandle {
        self.range.end()
    }

    pub fn range(&self) -> HandleRange {
        self.range
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    pub fn descriptors(&self) -> &[GattDescriptor] {
        &self.descriptors
    }

    /// CCCD (0x2902)
    pub fn client_config(&self) -> Option<&GattDescriptor> {
        self.descriptors.iter().find(|d| d.is_client_config())
    }

    /// 最近一次读到或收到的值
    pub fn value(&self) -> Vec<u8> {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_value(&self, value: &[u8]) {
        let mut current = self.value.write().unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.extend_from_slice(value);
    }

    /// 订阅；已有相等的处理函数时返回 `false`
    pub fn subscribe(&self, handler: NotificationHandler) -> bool {
        self.subscribers.add(handler)
    }

    /// 退订；返回后该处理函数不会再被调用
    pub fn unsubscribe(&self, handler: &NotificationHandler) -> bool {
        self.subscribers.remove(handler)
    }

    pub fn is_subscribed(&self, handler: &NotificationHandler) -> bool {
        self.subscribers.contains(handler)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn dispatch(&self, notification: &Notification) -> usize {
        self.subscribers.dispatch(notification)
    }
}

impl PartialEq for GattCharacteristic {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range
    }
}

impl Eq for GattCharacteristic {}

impl fmt::Debug for GattCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattCharacteristic")
            .field("range", &self.range)
            .field("value_handle", &self.value_handle)
            .field("uuid", &self.uuid)
            .field("properties", &self.properties)
            .field("descriptors", &self.descriptors)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl fmt::Display for GattCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "char {} value={} uuid={} props={}",
            self.range, self.value_handle, self.uuid, self.properties
        )
    }
}
