use std::fmt;

bitflags::bitflags! {
    /// 特征属性位，取值与 ATT 线上格式逐位一致
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_NO_ACK = 0x04;
        const WRITE_WITH_ACK = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTH_SIGNED_WRITE = 0x40;
        const EXT_PROPS = 0x80;
    }
}

impl CharacteristicProperties {
    pub fn can_notify_or_indicate(&self) -> bool {
        self.intersects(Self::NOTIFY | Self::INDICATE)
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CharacteristicProperties, &str); 8] = [
            (CharacteristicProperties::BROADCAST, "broadcast"),
            (CharacteristicProperties::READ, "read"),
            (CharacteristicProperties::WRITE_NO_ACK, "write-no-ack"),
            (CharacteristicProperties::WRITE_WITH_ACK, "write"),
            (CharacteristicProperties::NOTIFY, "notify"),
            (CharacteristicProperties::INDICATE, "indicate"),
            (CharacteristicProperties::AUTH_SIGNED_WRITE, "auth-signed-write"),
            (CharacteristicProperties::EXT_PROPS, "ext-props"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}
