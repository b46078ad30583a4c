//! Trampolines from native callbacks to managed handlers.
//!
//! Each trampoline is generic over the handler type and instantiates to a
//! plain `fn` pointer, so one definition serves every type that implements
//! the capability. A trampoline resolves its target through the handle table,
//! forwards the native arguments untouched, and converts a gone target or a
//! panicking handler into the neutral result for its kind. Nothing here holds
//! mutable state.

use crate::handle;
use crate::native::{
    AboutListenerCallbacks, BusObjectCallbacks, Context, PropertiesChangedFn, ProxyBusObject,
    SessionListenerCallbacks, SessionPortListenerCallbacks,
};
use crate::{MsgArg, SessionId, SessionLostReason, SessionOpts, SessionPort, Status};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Receives announce signals.
pub trait AnnounceHandler: Send + Sync + 'static {
    fn on_announce(
        &self,
        name: &str,
        version: u16,
        port: SessionPort,
        object_description: &MsgArg,
        about_data: &MsgArg,
    );
}

/// Receives property change signals from a proxied object.
pub trait PropertiesChangedHandler: Send + Sync + 'static {
    fn on_property_changed(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        changed: &MsgArg,
        invalidated: &MsgArg,
    );
}

/// Serves remote property reads and writes on a published object.
pub trait PropertyProvider: Send + Sync + 'static {
    /// Fill `value` with the property. Return a failure status if there is none.
    fn on_property_get(&self, interface_name: &str, property_name: &str, value: &mut MsgArg)
    -> Status;

    fn on_property_set(&self, interface_name: &str, property_name: &str, value: &MsgArg) -> Status;
}

/// Notifications about an established session.
pub trait SessionListener: Send + Sync + 'static {
    fn on_session_lost(&self, session_id: SessionId, reason: SessionLostReason);

    fn on_session_member_added(&self, _session_id: SessionId, _unique_name: &str) {}

    fn on_session_member_removed(&self, _session_id: SessionId, _unique_name: &str) {}
}

/// Admission control for a bound session port.
pub trait SessionPortListener: Send + Sync + 'static {
    fn on_accept_session_joiner(
        &self,
        session_port: SessionPort,
        joiner: &str,
        opts: &SessionOpts,
    ) -> bool;

    fn on_session_joined(&self, session_port: SessionPort, session_id: SessionId, joiner: &str);
}

fn target<T: Any + Send + Sync>(kind: &'static str, context: Context) -> Option<Arc<T>> {
    match handle::resolve::<T>(context) {
        Ok(target) => Some(target),
        Err(e @ handle::ResolveError::Gone { .. }) => {
            tracing::debug!(kind, "Dropping callback: {}", e);
            None
        }
        Err(e) => {
            tracing::warn!(kind, "Dropping callback: {}", e);
            None
        }
    }
}

/// Run a handler, turning a panic into `neutral`. Unwinding must not reach native code.
fn forward<R>(kind: &'static str, neutral: R, call: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(kind, "Handler panicked, returning neutral result");
            neutral
        }
    }
}

pub fn announce<T: AnnounceHandler>(
    context: Context,
    name: &str,
    version: u16,
    port: SessionPort,
    object_description: &MsgArg,
    about_data: &MsgArg,
) {
    if let Some(t) = target::<T>("announce", context) {
        forward("announce", (), || {
            t.on_announce(name, version, port, object_description, about_data)
        });
    }
}

pub fn properties_changed<T: PropertiesChangedHandler>(
    proxy: &ProxyBusObject,
    interface_name: &str,
    changed: &MsgArg,
    invalidated: &MsgArg,
    context: Context,
) {
    if let Some(t) = target::<T>("properties_changed", context) {
        forward("properties_changed", (), || {
            t.on_property_changed(proxy, interface_name, changed, invalidated)
        });
    }
}

pub fn property_get<T: PropertyProvider>(
    context: Context,
    interface_name: &str,
    property_name: &str,
    value: &mut MsgArg,
) -> Status {
    match target::<T>("property_get", context) {
        Some(t) => forward("property_get", Status::FAIL, || {
            t.on_property_get(interface_name, property_name, value)
        }),
        None => Status::BUS_NO_SUCH_OBJECT,
    }
}

pub fn property_set<T: PropertyProvider>(
    context: Context,
    interface_name: &str,
    property_name: &str,
    value: &MsgArg,
) -> Status {
    match target::<T>("property_set", context) {
        Some(t) => forward("property_set", Status::FAIL, || {
            t.on_property_set(interface_name, property_name, value)
        }),
        None => Status::BUS_NO_SUCH_OBJECT,
    }
}

pub fn session_lost<T: SessionListener>(
    context: Context,
    session_id: SessionId,
    reason: SessionLostReason,
) {
    if let Some(t) = target::<T>("session_lost", context) {
        forward("session_lost", (), || t.on_session_lost(session_id, reason));
    }
}

pub fn session_member_added<T: SessionListener>(
    context: Context,
    session_id: SessionId,
    unique_name: &str,
) {
    if let Some(t) = target::<T>("session_member_added", context) {
        forward("session_member_added", (), || {
            t.on_session_member_added(session_id, unique_name)
        });
    }
}

pub fn session_member_removed<T: SessionListener>(
    context: Context,
    session_id: SessionId,
    unique_name: &str,
) {
    if let Some(t) = target::<T>("session_member_removed", context) {
        forward("session_member_removed", (), || {
            t.on_session_member_removed(session_id, unique_name)
        });
    }
}

/// A gone producer admits nobody.
pub fn accept_session_joiner<T: SessionPortListener>(
    context: Context,
    session_port: SessionPort,
    joiner: &str,
    opts: &SessionOpts,
) -> bool {
    match target::<T>("accept_session_joiner", context) {
        Some(t) => forward("accept_session_joiner", false, || {
            t.on_accept_session_joiner(session_port, joiner, opts)
        }),
        None => false,
    }
}

pub fn session_joined<T: SessionPortListener>(
    context: Context,
    session_port: SessionPort,
    session_id: SessionId,
    joiner: &str,
) {
    if let Some(t) = target::<T>("session_joined", context) {
        forward("session_joined", (), || {
            t.on_session_joined(session_port, session_id, joiner)
        });
    }
}

/// Callback tables keyed by handler type.
pub struct DispatchTable;

impl DispatchTable {
    /// Property get/set only; method calls are not routed through the bridge.
    pub fn bus_object<T: PropertyProvider>() -> BusObjectCallbacks {
        BusObjectCallbacks {
            property_get: Some(property_get::<T>),
            property_set: Some(property_set::<T>),
            object_registered: None,
            object_unregistered: None,
        }
    }

    pub fn session_port_listener<T: SessionPortListener>() -> SessionPortListenerCallbacks {
        SessionPortListenerCallbacks {
            accept_session_joiner: accept_session_joiner::<T>,
            session_joined: Some(session_joined::<T>),
        }
    }

    pub fn session_listener<T: SessionListener>() -> SessionListenerCallbacks {
        SessionListenerCallbacks {
            session_lost: Some(session_lost::<T>),
            session_member_added: Some(session_member_added::<T>),
            session_member_removed: Some(session_member_removed::<T>),
        }
    }

    pub fn about_listener<T: AnnounceHandler>() -> AboutListenerCallbacks {
        AboutListenerCallbacks {
            announced: announce::<T>,
        }
    }

    pub fn properties_changed<T: PropertiesChangedHandler>() -> PropertiesChangedFn {
        properties_changed::<T>
    }
}
