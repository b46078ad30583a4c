//! Session negotiation for a producer that wants to be joinable.
//!
//! The negotiator owns the producer's session port and listener handles.
//! Binding always releases the port first, so a rebind after a crash or a
//! configuration change does not trip over a stale binding. Setup must be
//! serialized by the caller: two threads binding the same negotiator race on
//! the native port.

use crate::dispatch::{DispatchTable, SessionListener, SessionPortListener};
use crate::handle::WeakHandle;
use crate::native::{BusAttachment, ListenerId};
use crate::{
    BridgeConfig, BridgeError, SESSION_PORT_ANY, SessionId, SessionOpts, SessionPort, Status,
};
use parking_lot::Mutex;

/// Where a producer is in becoming joinable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Binding,
    Bound,
    /// The last attempt failed with this status. Retrying is up to the caller.
    Failed(Status),
}

/// Port, sessions and native listener handles owned by a producer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// Port assigned by the last successful bind.
    pub port: Option<SessionPort>,
    /// Most recently joined session.
    pub session_id: Option<SessionId>,
    /// Sessions joined and not yet lost.
    pub sessions: Vec<SessionId>,
    pub port_listener: Option<ListenerId>,
    /// Sessions with a session listener attached through this negotiator.
    pub session_listeners: Vec<SessionId>,
}

struct Inner {
    state: SessionState,
    descriptor: SessionDescriptor,
}

pub struct SessionNegotiator {
    requested_port: SessionPort,
    opts: SessionOpts,
    inner: Mutex<Inner>,
}

impl SessionNegotiator {
    pub fn new(requested_port: SessionPort, opts: SessionOpts) -> Self {
        Self {
            requested_port,
            opts,
            inner: Mutex::new(Inner {
                state: SessionState::Unbound,
                descriptor: SessionDescriptor::default(),
            }),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.session_port, config.session_opts())
    }

    /// Make the producer behind `handle` joinable.
    ///
    /// Registers a session port listener wired to `T`'s accept/joined
    /// handlers, releases any earlier binding (ignoring "not bound"), and
    /// binds. Returns the assigned port. Any failure short-circuits without
    /// retry and leaves the state at [`SessionState::Failed`].
    pub fn bind<T: SessionPortListener>(
        &self,
        bus: &dyn BusAttachment,
        handle: &WeakHandle<T>,
    ) -> Result<SessionPort, BridgeError> {
        handle.resolve()?;

        let previous = {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Binding;
            inner.descriptor.clone()
        };

        let listener = bus.create_session_port_listener(
            DispatchTable::session_port_listener::<T>(),
            handle.context(),
        );

        let mut port = self.requested_port;
        self.release_port(bus, port);
        if let Some(old) = previous.port.filter(|&p| p != port) {
            self.release_port(bus, old);
        }

        let status = bus.bind_session_port(&mut port, &self.opts, listener);
        if let Err(e) = status.check() {
            tracing::warn!("Binding session port {} failed: {}", self.requested_port, status);
            bus.destroy_session_port_listener(listener);
            if let Some(old) = previous.port_listener {
                bus.destroy_session_port_listener(old);
            }
            let mut inner = self.inner.lock();
            inner.state = SessionState::Failed(status);
            inner.descriptor.port = None;
            inner.descriptor.port_listener = None;
            return Err(e);
        }

        if let Some(old) = previous.port_listener {
            bus.destroy_session_port_listener(old);
        }

        let mut inner = self.inner.lock();
        inner.state = SessionState::Bound;
        inner.descriptor.port = Some(port);
        inner.descriptor.port_listener = Some(listener);
        tracing::info!("Session port {} bound", port);
        Ok(port)
    }

    /// Release the port and listener. Sessions already joined, and the
    /// session listeners attached to them, are forgotten.
    pub fn unbind(&self, bus: &dyn BusAttachment) -> Result<(), BridgeError> {
        let descriptor = {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Unbound;
            std::mem::take(&mut inner.descriptor)
        };

        let mut result = Ok(());
        if let Some(port) = descriptor.port {
            let status = bus.unbind_session_port(port);
            if status != Status::SESSION_PORT_NOT_BOUND {
                result = status.check();
            }
        }
        if let Some(listener) = descriptor.port_listener {
            bus.destroy_session_port_listener(listener);
        }
        result
    }

    /// Install lost/member notifications for an established session.
    pub fn attach_session_listener<T: SessionListener>(
        &self,
        bus: &dyn BusAttachment,
        handle: &WeakHandle<T>,
        session_id: SessionId,
    ) -> Result<(), BridgeError> {
        bus.set_session_listener(
            session_id,
            DispatchTable::session_listener::<T>(),
            handle.context(),
        )
        .check()?;

        let mut inner = self.inner.lock();
        if !inner.descriptor.session_listeners.contains(&session_id) {
            inner.descriptor.session_listeners.push(session_id);
        }
        Ok(())
    }

    /// Record a session established on the bound port.
    pub fn on_joined(&self, session_id: SessionId) {
        let mut inner = self.inner.lock();
        inner.descriptor.session_id = Some(session_id);
        if !inner.descriptor.sessions.contains(&session_id) {
            inner.descriptor.sessions.push(session_id);
        }
    }

    /// Forget a lost session.
    pub fn on_lost(&self, session_id: SessionId) {
        let mut inner = self.inner.lock();
        inner.descriptor.sessions.retain(|&id| id != session_id);
        inner.descriptor.session_listeners.retain(|&id| id != session_id);
        if inner.descriptor.session_id == Some(session_id) {
            inner.descriptor.session_id = inner.descriptor.sessions.last().copied();
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn port(&self) -> Option<SessionPort> {
        self.inner.lock().descriptor.port
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().descriptor.session_id
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        self.inner.lock().descriptor.clone()
    }

    pub fn opts(&self) -> &SessionOpts {
        &self.opts
    }

    fn release_port(&self, bus: &dyn BusAttachment, port: SessionPort) {
        if port == SESSION_PORT_ANY {
            return;
        }
        let status = bus.unbind_session_port(port);
        if !status.is_ok() {
            tracing::debug!("Unbinding session port {} before bind: {}", port, status);
        }
    }
}
