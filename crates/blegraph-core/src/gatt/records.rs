//! 发现协作方提供的已解码记录
//!
//! 这里不解析任何线上字节，只描述一次完整的服务/特征发现结果。记录可以
//! 序列化为 JSON，方便用固定样本重放一次发现过程。

use crate::ble::AttributeUuid;
use crate::gatt::CharacteristicProperties;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub handle: u16,
    pub uuid: AttributeUuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicRecord {
    /// 特征声明句柄
    pub handle: u16,
    pub value_handle: u16,
    pub uuid: AttributeUuid,
    /// 属性位掩码（线上原值）
    pub properties: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptors: Vec<DescriptorRecord>,
}

impl CharacteristicRecord {
    pub fn new(
        handle: u16,
        value_handle: u16,
        uuid: impl Into<AttributeUuid>,
        properties: CharacteristicProperties,
    ) -> Self {
        Self {
            handle,
            value_handle,
            uuid: uuid.into(),
            properties: properties.bits(),
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, handle: u16, uuid: impl Into<AttributeUuid>) -> Self {
        self.descriptors.push(DescriptorRecord {
            handle,
            uuid: uuid.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(default = "default_primary")]
    pub is_primary: bool,
    pub start_handle: u16,
    pub end_handle: u16,
    pub uuid: AttributeUuid,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicRecord>,
}

fn default_primary() -> bool {
    true
}

impl ServiceRecord {
    pub fn primary(start_handle: u16, end_handle: u16, uuid: impl Into<AttributeUuid>) -> Self {
        Self {
            is_primary: true,
            start_handle,
            end_handle,
            uuid: uuid.into(),
            characteristics: Vec::new(),
        }
    }

    pub fn secondary(start_handle: u16, end_handle: u16, uuid: impl Into<AttributeUuid>) -> Self {
        Self {
            is_primary: false,
            ..Self::primary(start_handle, end_handle, uuid)
        }
    }

    pub fn with_characteristic(mut self, characteristic: CharacteristicRecord) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_record_json() {
        let json = r#"{
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
        }"#;

        let record: ServiceRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_primary);
        assert_eq!(record.uuid, AttributeUuid::from(0x180fu16));
        assert_eq!(record.characteristics.len(), 1);

        let ch = &record.characteristics[0];
        assert_eq!(
            CharacteristicProperties::from_bits_retain(ch.properties),
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY
        );
        assert_eq!(ch.descriptors[0].uuid.as_u16(), Some(0x2902));
    }
}
