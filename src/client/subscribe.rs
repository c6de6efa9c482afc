//! Daemon event subscriptions.

use std::ops::{BitOr, BitOrAssign};

/// Bit mask selecting which entity classes to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionMask(u32);

impl SubscriptionMask {
    pub const NONE: SubscriptionMask = SubscriptionMask(0);
    pub const SINK: SubscriptionMask = SubscriptionMask(1 << 0);
    pub const SOURCE: SubscriptionMask = SubscriptionMask(1 << 1);
    pub const SINK_INPUT: SubscriptionMask = SubscriptionMask(1 << 2);
    pub const SOURCE_OUTPUT: SubscriptionMask = SubscriptionMask(1 << 3);
    pub const CLIENT: SubscriptionMask = SubscriptionMask(1 << 4);
    pub const SERVER: SubscriptionMask = SubscriptionMask(1 << 5);
    pub const ALL: SubscriptionMask = SubscriptionMask(0b11_1111);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: SubscriptionMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SubscriptionMask {
    type Output = SubscriptionMask;

    fn bitor(self, rhs: SubscriptionMask) -> SubscriptionMask {
        SubscriptionMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for SubscriptionMask {
    fn bitor_assign(&mut self, rhs: SubscriptionMask) {
        self.0 |= rhs.0;
    }
}

/// Entity class an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFacility {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Client,
    Server,
}

impl SubscriptionFacility {
    fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(SubscriptionFacility::Sink),
            1 => Some(SubscriptionFacility::Source),
            2 => Some(SubscriptionFacility::SinkInput),
            3 => Some(SubscriptionFacility::SourceOutput),
            4 => Some(SubscriptionFacility::Client),
            5 => Some(SubscriptionFacility::Server),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            SubscriptionFacility::Sink => 0,
            SubscriptionFacility::Source => 1,
            SubscriptionFacility::SinkInput => 2,
            SubscriptionFacility::SourceOutput => 3,
            SubscriptionFacility::Client => 4,
            SubscriptionFacility::Server => 5,
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOperation {
    New,
    Changed,
    Removed,
}

impl SubscriptionOperation {
    fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0x00 => Some(SubscriptionOperation::New),
            0x10 => Some(SubscriptionOperation::Changed),
            0x20 => Some(SubscriptionOperation::Removed),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            SubscriptionOperation::New => 0x00,
            SubscriptionOperation::Changed => 0x10,
            SubscriptionOperation::Removed => 0x20,
        }
    }
}

const FACILITY_MASK: u32 = 0x0F;
const OPERATION_MASK: u32 = 0x30;

/// One decoded `SUBSCRIBE_EVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub facility: SubscriptionFacility,
    pub operation: SubscriptionOperation,
    /// Daemon-side index of the entity.
    pub index: u32,
}

impl SubscriptionEvent {
    pub fn decode(event: u32, index: u32) -> Option<Self> {
        if event & !(FACILITY_MASK | OPERATION_MASK) != 0 {
            return None;
        }
        Some(Self {
            facility: SubscriptionFacility::from_wire(event & FACILITY_MASK)?,
            operation: SubscriptionOperation::from_wire(event & OPERATION_MASK)?,
            index,
        })
    }

    pub fn encode(&self) -> u32 {
        self.facility.to_wire() | self.operation.to_wire()
    }
}
