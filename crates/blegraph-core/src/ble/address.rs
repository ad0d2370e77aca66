//! 设备地址与身份键
//!
//! `DeviceKey` 是注册表与 GATT 会话共用的设备身份：48 位地址加地址类型，
//! 两个字段都必须完全相等才视为同一设备。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 地址解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("Invalid Bluetooth address '{0}': expected XX:XX:XX:XX:XX:XX")]
    Malformed(String),

    #[error("Unknown address type '{0}'")]
    UnknownType(String),
}

/// 48 位蓝牙设备地址，按显示顺序（最高字节在前）存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BdAddr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressParseError::Malformed(s.to_string());

        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(malformed)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for BdAddr {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BdAddr> for String {
    fn from(addr: BdAddr) -> Self {
        addr.to_string()
    }
}

/// 地址类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// LE 公共地址
    Public,
    /// LE 随机地址（静态或可解析私有地址）
    Random,
    /// BR/EDR 经典蓝牙
    #[serde(rename = "bredr")]
    BrEdr,
}

impl AddressType {
    pub fn name(&self) -> &'static str {
        match self {
            AddressType::Public => "public",
            AddressType::Random => "random",
            AddressType::BrEdr => "bredr",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AddressType {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(AddressType::Public),
            "random" => Ok(AddressType::Random),
            "bredr" | "br/edr" => Ok(AddressType::BrEdr),
            _ => Err(AddressParseError::UnknownType(s.to_string())),
        }
    }
}

/// 设备身份键：地址 + 地址类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub address: BdAddr,
    #[serde(rename = "type")]
    pub address_type: AddressType,
}

impl DeviceKey {
    pub const fn new(address: BdAddr, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
        }
    }

    pub const fn public(address: BdAddr) -> Self {
        Self::new(address, AddressType::Public)
    }

    pub const fn random(address: BdAddr) -> Self {
        Self::new(address, AddressType::Random)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.address_type)
    }
}
