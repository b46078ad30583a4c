//! Callback marshalling between a native message bus and managed objects.
//!
//! The native bus calls back through plain function pointers carrying an
//! opaque [`Context`]. This crate turns those calls into method calls on live
//! objects located through weak handles, turns asynchronous completions into
//! blocking calls, and negotiates the session port that makes a producer
//! joinable. The bus itself sits behind the [`BusAttachment`] trait.

mod arg;
mod bus_object;
mod completion;
mod config;
mod dispatch;
mod error;
mod handle;
mod native;
mod property;
mod session;
mod status;

#[cfg(test)]
mod testing;

pub use arg::{ArgValue, FromArg, IntoArg, MsgArg, ObjectDescription};
pub use bus_object::{BusObject, ServiceObject, create_bus_object};
pub use completion::{CompletionContext, PropertyGetContext, PropertySetContext};
pub use config::{BridgeConfig, DEFAULT_SESSION_PORT, SessionConfig, Transport};
pub use dispatch::{
    AnnounceHandler, DispatchTable, PropertiesChangedHandler, PropertyProvider, SessionListener,
    SessionPortListener,
};
pub use error::BridgeError;
pub use handle::{HandleTable, ResolveError, WeakHandle, resolve};
pub use native::{
    AboutListenerCallbacks, AcceptSessionJoinerFn, AnnouncedFn, BusAttachment, BusObjectCallbacks,
    Context, GetPropertyCompleteFn, ListenerId, ObjectId, ObjectRegisteredFn, PropertiesChangedFn,
    PropertyGetFn, PropertySetFn, ProxyBusObject, SessionJoinedFn, SessionListenerCallbacks,
    SessionLostFn, SessionMemberFn, SessionPortListenerCallbacks, SetPropertyCompleteFn,
};
pub use property::{PropertyAccess, subscribe_properties_changed};
pub use session::{SessionDescriptor, SessionNegotiator, SessionState};
pub use status::{
    Proximity, SESSION_PORT_ANY, SessionId, SessionLostReason, SessionOpts, SessionPort, Status,
    TrafficType, TransportMask,
};

use std::time::Duration;

/// How long to wait for a reply after sending a message before timing out.
pub const MESSAGE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Longest type signature the bus accepts.
pub const MAXIMUM_SIGNATURE_LENGTH: usize = 255;

/// Individual trampolines, for native layers that take one function at a time.
pub mod trampolines {
    pub use crate::dispatch::{
        accept_session_joiner, announce, properties_changed, property_get, property_set,
        session_joined, session_lost, session_member_added, session_member_removed,
    };
}
