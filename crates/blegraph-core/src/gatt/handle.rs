//! 属性句柄与句柄区间

use serde::{Deserialize, Serialize};
use std::fmt;

/// ATT 属性句柄，只在一个连接内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeHandle(pub u16);

impl AttributeHandle {
    /// 0x0000 是 ATT 保留值，不指向任何属性
    pub const RESERVED: AttributeHandle = AttributeHandle(0x0000);

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::RESERVED
    }
}

impl From<u16> for AttributeHandle {
    fn from(value: u16) -> Self {
        AttributeHandle(value)
    }
}

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid handle range {start}..={end}")]
pub struct InvalidRange {
    pub start: AttributeHandle,
    pub end: AttributeHandle,
}

/// 闭区间 `[start, end]`，构造时保证 `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleRange {
    start: AttributeHandle,
    end: AttributeHandle,
}

impl HandleRange {
    pub fn new(
        start: impl Into<AttributeHandle>,
        end: impl Into<AttributeHandle>,
    ) -> Result<Self, InvalidRange> {
        let (start, end) = (start.into(), end.into());
        if !start.is_valid() || start > end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> AttributeHandle {
        self.start
    }

    pub fn end(&self) -> AttributeHandle {
        self.end
    }

    pub fn contains(&self, handle: AttributeHandle) -> bool {
        self.start <= handle && handle <= self.end
    }

    pub fn overlaps(&self, other: &HandleRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn len(&self) -> usize {
        (self.end.0 - self.start.0) as usize + 1
    }
}

impl fmt::Display for HandleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
