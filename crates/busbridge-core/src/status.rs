//! Status codes and session vocabulary shared with the native bus layer.
//!
//! `Status` is the numeric result domain every boundary-crossing operation
//! returns. It stays a plain code so it can travel through native callbacks;
//! managed callers turn it into a [`BridgeError`] with [`Status::check`].

use crate::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A native result code. `Status::OK` is the only success value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(u32);

impl Status {
    pub const OK: Status = Status(0x0000);
    pub const FAIL: Status = Status(0x0001);
    pub const BAD_ARG: Status = Status(0x0002);
    pub const BUS_NOT_CONNECTED: Status = Status(0x9004);
    pub const BUS_BAD_SIGNATURE: Status = Status(0x900a);
    pub const BUS_BAD_OBJ_PATH: Status = Status(0x900f);
    pub const BUS_NO_SUCH_OBJECT: Status = Status(0x9018);
    pub const BUS_OBJ_ALREADY_EXISTS: Status = Status(0x901b);
    pub const BUS_TIMEOUT: Status = Status(0x9034);
    pub const BUS_NO_SESSION: Status = Status(0x9045);
    pub const BUS_NO_SUCH_PROPERTY: Status = Status(0x9052);
    pub const BUS_PROPERTY_ACCESS_DENIED: Status = Status(0x9053);
    pub const SESSION_PORT_ALREADY_BOUND: Status = Status(0x9061);
    pub const SESSION_PORT_NOT_BOUND: Status = Status(0x9062);
    pub const SESSION_JOIN_REJECTED: Status = Status(0x9063);

    /// Wrap a raw code received from the native layer.
    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// The raw numeric code.
    pub const fn code(self) -> u32 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == Self::OK.0
    }

    /// Fail fast: `Ok(())` for `Status::OK`, otherwise the status as an error.
    pub fn check(self) -> Result<(), BridgeError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BridgeError::Native(self))
        }
    }

    /// Symbolic name for known codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::OK => "OK",
            Self::FAIL => "FAIL",
            Self::BAD_ARG => "BAD_ARG",
            Self::BUS_NOT_CONNECTED => "BUS_NOT_CONNECTED",
            Self::BUS_BAD_SIGNATURE => "BUS_BAD_SIGNATURE",
            Self::BUS_BAD_OBJ_PATH => "BUS_BAD_OBJ_PATH",
            Self::BUS_NO_SUCH_OBJECT => "BUS_NO_SUCH_OBJECT",
            Self::BUS_OBJ_ALREADY_EXISTS => "BUS_OBJ_ALREADY_EXISTS",
            Self::BUS_TIMEOUT => "BUS_TIMEOUT",
            Self::BUS_NO_SESSION => "BUS_NO_SESSION",
            Self::BUS_NO_SUCH_PROPERTY => "BUS_NO_SUCH_PROPERTY",
            Self::BUS_PROPERTY_ACCESS_DENIED => "BUS_PROPERTY_ACCESS_DENIED",
            Self::SESSION_PORT_ALREADY_BOUND => "SESSION_PORT_ALREADY_BOUND",
            Self::SESSION_PORT_NOT_BOUND => "SESSION_PORT_NOT_BOUND",
            Self::SESSION_JOIN_REJECTED => "SESSION_JOIN_REJECTED",
            _ => return None,
        };
        Some(name)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::FAIL
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#06x})", name, self.0),
            None => write!(f, "status {:#06x}", self.0),
        }
    }
}

impl From<&BridgeError> for Status {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::Native(status) => *status,
            BridgeError::TargetGone(_) => Status::BUS_NO_SUCH_OBJECT,
            BridgeError::Timeout(_) => Status::BUS_TIMEOUT,
            BridgeError::InvalidArg(_) => Status::BAD_ARG,
            BridgeError::Config(_) => Status::FAIL,
        }
    }
}

impl From<BridgeError> for Status {
    fn from(err: BridgeError) -> Self {
        Status::from(&err)
    }
}

/// A well-known number under which a service advertises joinability.
pub type SessionPort = u16;

/// Identifier of an established session, assigned by the bus on join.
pub type SessionId = u32;

/// Asks the bus to pick a free session port during bind.
pub const SESSION_PORT_ANY: SessionPort = 0;

/// Why a session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLostReason {
    Invalid,
    RemoteEndLeftSession,
    RemoteEndClosedAbruptly,
    RemovedByBinder,
    LinkTimeout,
    Other,
}

impl fmt::Display for SessionLostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::RemoteEndLeftSession => "remote end left session",
            Self::RemoteEndClosedAbruptly => "remote end closed abruptly",
            Self::RemovedByBinder => "removed by binder",
            Self::LinkTimeout => "link timeout",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Kind of traffic carried by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficType {
    #[default]
    Messages,
    RawUnreliable,
    RawReliable,
}

/// How far away session peers may be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    #[default]
    Any,
    Physical,
    Network,
}

/// Set of transports a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportMask(u16);

impl TransportMask {
    pub const NONE: TransportMask = TransportMask(0x0000);
    pub const LOCAL: TransportMask = TransportMask(0x0001);
    pub const TCP: TransportMask = TransportMask(0x0004);
    pub const UDP: TransportMask = TransportMask(0x0100);
    pub const ANY: TransportMask = TransportMask(0xffff);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: TransportMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: TransportMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for TransportMask {
    type Output = TransportMask;

    fn bitor(self, rhs: TransportMask) -> TransportMask {
        TransportMask(self.0 | rhs.0)
    }
}

impl Default for TransportMask {
    fn default() -> Self {
        Self::ANY
    }
}

/// Options a session is bound or joined with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOpts {
    pub traffic: TrafficType,
    pub multipoint: bool,
    pub proximity: Proximity,
    pub transports: TransportMask,
}

impl Default for SessionOpts {
    /// Message traffic, multipoint, any proximity, any transport.
    fn default() -> Self {
        Self {
            traffic: TrafficType::Messages,
            multipoint: true,
            proximity: Proximity::Any,
            transports: TransportMask::ANY,
        }
    }
}

impl SessionOpts {
    /// Whether a joiner asking for `other` can be admitted to a session bound with `self`.
    pub fn is_compatible(&self, other: &SessionOpts) -> bool {
        self.traffic == other.traffic && self.transports.intersects(other.transports)
    }
}
