pub mod address;
#[cfg(feature = "bluez")]
pub mod bluez;
pub mod uuid;

pub use self::address::{AddressParseError, AddressType, BdAddr, DeviceKey};
pub use self::uuid::{AttributeUuid, UuidParseError, uuid_from_u16, uuid_from_u32};

use ::uuid::Uuid;

pub const BATTERY_SERVICE_UUID: Uuid = uuid_from_u16(0x180F);
pub const BATTERY_LEVEL_CHAR_UUID: Uuid = uuid_from_u16(0x2A19);

/// Client Characteristic Configuration Descriptor
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = uuid_from_u16(0x2902);
