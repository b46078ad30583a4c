//! The seam to the native bus layer.
//!
//! Callback signatures mirror the native ones: every entry point receives an
//! opaque [`Context`] plus kind-specific arguments, and the tables below are
//! what the native layer stores when a bus object or listener is created.

use crate::{MsgArg, SessionId, SessionLostReason, SessionOpts, SessionPort, Status};
use std::ffi::c_void;
use std::time::Duration;

/// Opaque user data handed to the native layer alongside a callback table.
///
/// It carries a handle-table token, never an address, so the native side can
/// store and return it freely without it ever being dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Context(usize);

impl Context {
    pub(crate) const fn from_token(token: usize) -> Self {
        Self(token)
    }

    pub(crate) const fn token(self) -> usize {
        self.0
    }

    /// The pointer-sized form for C-shaped callback APIs.
    pub fn into_raw(self) -> *const c_void {
        self.0 as *const c_void
    }

    /// Recover a context from the pointer the native layer handed back.
    pub fn from_raw(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }
}

/// Native handle of a bus object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// Native handle of a listener (session port, session or about listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Proxy for an object exposed by another bus participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyBusObject {
    /// Unique or well-known bus name of the remote participant.
    pub service: String,
    pub path: String,
    pub session: SessionId,
}

impl ProxyBusObject {
    pub fn new(service: impl Into<String>, path: impl Into<String>, session: SessionId) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            session,
        }
    }
}

pub type AnnouncedFn = fn(
    context: Context,
    name: &str,
    version: u16,
    port: SessionPort,
    object_description: &MsgArg,
    about_data: &MsgArg,
);

pub type PropertiesChangedFn = fn(
    proxy: &ProxyBusObject,
    interface_name: &str,
    changed: &MsgArg,
    invalidated: &MsgArg,
    context: Context,
);

pub type PropertyGetFn =
    fn(context: Context, interface_name: &str, property_name: &str, value: &mut MsgArg) -> Status;

pub type PropertySetFn =
    fn(context: Context, interface_name: &str, property_name: &str, value: &MsgArg) -> Status;

pub type ObjectRegisteredFn = fn(context: Context);

pub type SessionLostFn = fn(context: Context, session_id: SessionId, reason: SessionLostReason);

pub type SessionMemberFn = fn(context: Context, session_id: SessionId, unique_name: &str);

pub type AcceptSessionJoinerFn =
    fn(context: Context, session_port: SessionPort, joiner: &str, opts: &SessionOpts) -> bool;

pub type SessionJoinedFn =
    fn(context: Context, session_port: SessionPort, session_id: SessionId, joiner: &str);

/// Completion of an asynchronous remote property read.
pub type GetPropertyCompleteFn =
    fn(status: Status, proxy: &ProxyBusObject, value: &MsgArg, context: Context);

/// Completion of an asynchronous remote property write.
pub type SetPropertyCompleteFn = fn(status: Status, proxy: &ProxyBusObject, context: Context);

/// Callbacks of a locally published bus object.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusObjectCallbacks {
    pub property_get: Option<PropertyGetFn>,
    pub property_set: Option<PropertySetFn>,
    pub object_registered: Option<ObjectRegisteredFn>,
    pub object_unregistered: Option<ObjectRegisteredFn>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPortListenerCallbacks {
    pub accept_session_joiner: AcceptSessionJoinerFn,
    pub session_joined: Option<SessionJoinedFn>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionListenerCallbacks {
    pub session_lost: Option<SessionLostFn>,
    pub session_member_added: Option<SessionMemberFn>,
    pub session_member_removed: Option<SessionMemberFn>,
}

#[derive(Debug, Clone, Copy)]
pub struct AboutListenerCallbacks {
    pub announced: AnnouncedFn,
}

/// A process's attachment to the message bus.
///
/// Implemented by the native layer. Callbacks registered here may be invoked
/// from threads the implementation owns, concurrently across kinds.
pub trait BusAttachment: Send + Sync {
    fn unique_name(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Allocate a bus object at `path`. `None` if the native layer cannot
    /// create it (for example an invalid path).
    fn create_bus_object(
        &self,
        path: &str,
        is_placeholder: bool,
        callbacks: BusObjectCallbacks,
        context: Context,
    ) -> Option<ObjectId>;

    fn register_bus_object(&self, object: ObjectId) -> Status;

    fn destroy_bus_object(&self, object: ObjectId);

    fn create_session_port_listener(
        &self,
        callbacks: SessionPortListenerCallbacks,
        context: Context,
    ) -> ListenerId;

    fn destroy_session_port_listener(&self, listener: ListenerId);

    /// Bind `port` for incoming joins. `SESSION_PORT_ANY` lets the bus pick;
    /// the chosen port is written back.
    fn bind_session_port(
        &self,
        port: &mut SessionPort,
        opts: &SessionOpts,
        listener: ListenerId,
    ) -> Status;

    fn unbind_session_port(&self, port: SessionPort) -> Status;

    /// Install lost/member callbacks for an established session.
    fn set_session_listener(
        &self,
        session_id: SessionId,
        callbacks: SessionListenerCallbacks,
        context: Context,
    ) -> Status;

    fn register_about_listener(
        &self,
        callbacks: AboutListenerCallbacks,
        context: Context,
    ) -> ListenerId;

    fn unregister_about_listener(&self, listener: ListenerId);

    fn register_properties_changed_listener(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        callback: PropertiesChangedFn,
        context: Context,
    ) -> Status;

    /// Start a remote property read. A non-OK return means the request was
    /// never issued and `callback` will not fire; otherwise `callback` fires
    /// exactly once, with `BUS_TIMEOUT` if no reply arrives within `timeout`.
    fn get_property_async(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
        callback: GetPropertyCompleteFn,
        timeout: Duration,
        context: Context,
    ) -> Status;

    /// Start a remote property write. Same completion contract as
    /// [`BusAttachment::get_property_async`].
    #[allow(clippy::too_many_arguments)]
    fn set_property_async(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
        value: MsgArg,
        callback: SetPropertyCompleteFn,
        timeout: Duration,
        context: Context,
    ) -> Status;
}
