//! 属性 UUID
//!
//! 蓝牙分配的 16/32 位短 UUID 在比较前一律展开到基准 UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`，这样同一属性类型的短形式与
//! 完整 128 位形式总是相等。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use ::uuid::Uuid;

/// 蓝牙基准 UUID 的低 96 位
const BASE_UUID_LOW: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const BASE_UUID_LOW_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// 把 16 位分配号展开为 128 位 UUID
pub const fn uuid_from_u16(value: u16) -> Uuid {
    uuid_from_u32(value as u32)
}

/// 把 32 位分配号展开为 128 位 UUID
pub const fn uuid_from_u32(value: u32) -> Uuid {
    Uuid::from_u128(((value as u128) << 96) | BASE_UUID_LOW)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid attribute UUID '{0}'")]
pub struct UuidParseError(pub String);

/// 边界处接受的 UUID 形式
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(Uuid),
}

impl AttributeUuid {
    /// 展开后的 128 位形式，所有比较都基于它
    pub const fn to_uuid(&self) -> Uuid {
        match *self {
            AttributeUuid::Uuid16(v) => uuid_from_u16(v),
            AttributeUuid::Uuid32(v) => uuid_from_u32(v),
            AttributeUuid::Uuid128(u) => u,
        }
    }

    /// 如果是基准 UUID 派生的 16 位值，返回该值
    pub fn as_u16(&self) -> Option<u16> {
        let full = self.to_uuid().as_u128();
        if full & BASE_UUID_LOW_MASK != BASE_UUID_LOW {
            return None;
        }
        u16::try_from(full >> 96).ok()
    }
}

impl PartialEq for AttributeUuid {
    fn eq(&self, other: &Self) -> bool {
        self.to_uuid() == other.to_uuid()
    }
}

impl Eq for AttributeUuid {}

impl Hash for AttributeUuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_uuid().hash(state);
    }
}

impl From<u16> for AttributeUuid {
    fn from(value: u16) -> Self {
        AttributeUuid::Uuid16(value)
    }
}

impl From<u32> for AttributeUuid {
    fn from(value: u32) -> Self {
        AttributeUuid::Uuid32(value)
    }
}

impl From<Uuid> for AttributeUuid {
    fn from(value: Uuid) -> Self {
        AttributeUuid::Uuid128(value)
    }
}

impl From<AttributeUuid> for Uuid {
    fn from(value: AttributeUuid) -> Self {
        value.to_uuid()
    }
}

impl FromStr for AttributeUuid {
    type Err = UuidParseError;

    /// 接受 `180f`、`0x180F`、`0000180f` 以及完整的 128 位字符串
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let err = || UuidParseError(s.to_string());
        let all_hex = hex.bytes().all(|b| b.is_ascii_hexdigit());

        match hex.len() {
            4 | 8 if !all_hex => Err(err()),
            4 => u16::from_str_radix(hex, 16)
                .map(AttributeUuid::Uuid16)
                .map_err(|_| err()),
            8 => u32::from_str_radix(hex, 16)
                .map(AttributeUuid::Uuid32)
                .map_err(|_| err()),
            _ => Uuid::parse_str(hex)
                .map(AttributeUuid::Uuid128)
                .map_err(|_| err()),
        }
    }
}

impl TryFrom<String> for AttributeUuid {
    type Error = UuidParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AttributeUuid> for String {
    fn from(value: AttributeUuid) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AttributeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeUuid::Uuid16(v) => write!(f, "{:04x}", v),
            AttributeUuid::Uuid32(v) => write!(f, "{:08x}", v),
            AttributeUuid::Uuid128(u) => write!(f, "{}", u),
        }
    }
}
