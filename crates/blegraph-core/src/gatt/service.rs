use crate::ble::AttributeUuid;
use crate::gatt::{GattCharacteristic, GattError, GattSession, HandleRange};
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// GATT 服务
///
/// 相等性只由句柄区间决定：在一次连接中句柄就是属性的唯一身份，与 UUID
/// 和特征内容无关。
pub struct GattService {
    is_primary: bool,
    range: HandleRange,
    uuid: Uuid,
    characteristics: Vec<Arc<GattCharacteristic>>,
    session: Weak<dyn GattSession>,
}

impl GattService {
    pub(crate) fn new(
        is_primary: bool,
        range: HandleRange,
        uuid: Uuid,
        characteristics: Vec<Arc<GattCharacteristic>>,
        session: Weak<dyn GattSession>,
    ) -> Self {
        Self {
            is_primary,
            range,
            uuid,
            characteristics,
            session,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn range(&self) -> HandleRange {
        self.range
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// 按发现顺序排列的特征
    pub fn characteristics(&self) -> &[Arc<GattCharacteristic>] {
        &self.characteristics
    }

    pub fn find_characteristic(
        &self,
        uuid: impl Into<AttributeUuid>,
    ) -> Option<&Arc<GattCharacteristic>> {
        let uuid = uuid.into().to_uuid();
        self.characteristics.iter().find(|c| c.uuid() == uuid)
    }

    /// 用另一份快照里的特征在本服务中重新定位
    pub fn find_characteristic_by_identity(
        &self,
        characteristic: &GattCharacteristic,
    ) -> Option<&Arc<GattCharacteristic>> {
        self.characteristics
            .iter()
            .find(|c| ***c == *characteristic)
    }

    /// 提升指向连接上下文的弱引用
    pub fn resolve_owning_session(&self) -> Result<Arc<dyn GattSession>, GattError> {
        self.session.upgrade().ok_or(GattError::HandlerGone)
    }
}

impl PartialEq for GattService {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range
    }
}

impl Eq for GattService {}

impl fmt::Debug for GattService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattService")
            .field("is_primary", &self.is_primary)
            .field("range", &self.range)
            .field("uuid", &self.uuid)
            .field("characteristics", &self.characteristics)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GattService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} service {} uuid={}",
            if self.is_primary { "primary" } else { "secondary" },
            self.range,
            self.uuid
        )
    }
}
