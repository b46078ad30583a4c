//! An in-process [`BusAttachment`].
//!
//! `LoopbackBus` keeps objects, listeners and session ports in memory and
//! delivers notifications on its own dispatcher thread, the way a native bus
//! library calls back on threads it owns. Remote peers are simulated through
//! the methods on [`LoopbackBus`] that are not part of the trait:
//! [`request_join`](LoopbackBus::request_join),
//! [`announce`](LoopbackBus::announce),
//! [`emit_properties_changed`](LoopbackBus::emit_properties_changed) and
//! friends. Property requests issued through the trait are served by the
//! locally registered bus objects, each on a short-lived reply thread.

mod dispatcher;
mod path;

#[cfg(test)]
mod scenarios;

pub use path::is_valid_object_path;

use busbridge_core::{
    AboutListenerCallbacks, BusAttachment, BusObjectCallbacks, Context, GetPropertyCompleteFn,
    ListenerId, MsgArg, ObjectDescription, ObjectId, PropertiesChangedFn, ProxyBusObject,
    SESSION_PORT_ANY, SessionId, SessionListenerCallbacks, SessionLostReason, SessionOpts,
    SessionPort, SessionPortListenerCallbacks, SetPropertyCompleteFn, Status,
};
use dispatcher::Dispatcher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// First port handed out for `SESSION_PORT_ANY`.
pub const FIRST_DYNAMIC_PORT: SessionPort = 1024;

#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error("failed to start dispatcher: {0}")]
    Spawn(#[from] std::io::Error),
}

struct ObjectEntry {
    path: String,
    callbacks: BusObjectCallbacks,
    context: Context,
    registered: bool,
}

struct SessionEntry {
    port: SessionPort,
    members: Vec<String>,
    listener: Option<(SessionListenerCallbacks, Context)>,
}

struct ChangedListener {
    proxy: ProxyBusObject,
    interface_name: String,
    callback: PropertiesChangedFn,
    context: Context,
}

#[derive(Default)]
struct Registry {
    objects: HashMap<ObjectId, ObjectEntry>,
    port_listeners: HashMap<ListenerId, (SessionPortListenerCallbacks, Context)>,
    bound_ports: HashMap<SessionPort, (ListenerId, SessionOpts)>,
    sessions: HashMap<SessionId, SessionEntry>,
    about_listeners: HashMap<ListenerId, (AboutListenerCallbacks, Context)>,
    changed_listeners: Vec<ChangedListener>,
}

struct Shared {
    unique_name: String,
    connected: AtomicBool,
    next_id: AtomicU64,
    next_session: AtomicU32,
    reply_delay: Mutex<Duration>,
    registry: Mutex<Registry>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Session ids are never 0, including after the counter wraps.
    fn next_session_id(&self) -> SessionId {
        loop {
            let id = self.next_session.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn session_listener(
        &self,
        session_id: SessionId,
    ) -> Option<(SessionListenerCallbacks, Context)> {
        self.registry
            .lock()
            .sessions
            .get(&session_id)
            .and_then(|s| s.listener)
    }

    fn join(
        &self,
        port: SessionPort,
        joiner: &str,
        opts: &SessionOpts,
    ) -> Result<SessionId, Status> {
        if !self.is_connected() {
            return Err(Status::BUS_NOT_CONNECTED);
        }
        let (callbacks, context, bound_opts) = {
            let registry = self.registry.lock();
            let &(listener, bound_opts) =
                registry.bound_ports.get(&port).ok_or(Status::BUS_NO_SESSION)?;
            let &(callbacks, context) = registry
                .port_listeners
                .get(&listener)
                .ok_or(Status::BUS_NO_SESSION)?;
            (callbacks, context, bound_opts)
        };

        if !bound_opts.is_compatible(opts) {
            tracing::debug!("Join of port {} by {} has incompatible options", port, joiner);
            return Err(Status::SESSION_JOIN_REJECTED);
        }
        if !(callbacks.accept_session_joiner)(context, port, joiner, opts) {
            tracing::debug!("Join of port {} by {} rejected", port, joiner);
            return Err(Status::SESSION_JOIN_REJECTED);
        }

        let session_id = self.next_session_id();
        self.registry.lock().sessions.insert(
            session_id,
            SessionEntry {
                port,
                members: vec![joiner.to_string()],
                listener: None,
            },
        );
        tracing::info!("Session {} joined by {} on port {}", session_id, joiner, port);

        if let Some(joined) = callbacks.session_joined {
            joined(context, port, session_id, joiner);
        }
        Ok(session_id)
    }

    /// Locate the registered object serving `proxy`.
    fn serving_object(
        &self,
        proxy: &ProxyBusObject,
    ) -> Result<(BusObjectCallbacks, Context), Status> {
        let registry = self.registry.lock();
        if proxy.session != 0 && !registry.sessions.contains_key(&proxy.session) {
            return Err(Status::BUS_NO_SESSION);
        }
        registry
            .objects
            .values()
            .find(|o| o.registered && o.path == proxy.path)
            .map(|o| (o.callbacks, o.context))
            .ok_or(Status::BUS_NO_SUCH_OBJECT)
    }

    fn serve_get(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
    ) -> (Status, MsgArg) {
        let mut value = MsgArg::new();
        let (get, context) = match self.serving_object(proxy) {
            Ok((BusObjectCallbacks { property_get: Some(get), .. }, context)) => (get, context),
            Ok(_) => return (Status::BUS_NO_SUCH_PROPERTY, value),
            Err(status) => return (status, value),
        };
        let status = get(context, interface_name, property_name, &mut value);
        if status.is_ok() && value.is_empty() {
            tracing::warn!("{}.{} returned no value", interface_name, property_name);
            return (Status::FAIL, value);
        }
        (status, value)
    }

    fn serve_set(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
        value: &MsgArg,
    ) -> Status {
        match self.serving_object(proxy) {
            Ok((BusObjectCallbacks { property_set: Some(set), .. }, context)) => {
                set(context, interface_name, property_name, value)
            }
            Ok(_) => Status::BUS_PROPERTY_ACCESS_DENIED,
            Err(status) => status,
        }
    }

    /// Sleep through the configured reply delay on the calling reply thread.
    /// False if the reply would arrive after `timeout`, in which case the
    /// full timeout has elapsed.
    fn await_reply(&self, timeout: Duration) -> bool {
        let delay = *self.reply_delay.lock();
        if delay >= timeout {
            thread::sleep(timeout);
            return false;
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        true
    }
}

/// In-process bus attachment with simulated remote peers.
pub struct LoopbackBus {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl LoopbackBus {
    pub fn new(unique_name: impl Into<String>) -> Result<Self, LoopbackError> {
        let unique_name = unique_name.into();
        let dispatcher = Dispatcher::spawn("loopback")?;
        tracing::debug!("Loopback bus {} started", unique_name);
        Ok(Self {
            shared: Arc::new(Shared {
                unique_name,
                connected: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                next_session: AtomicU32::new(1),
                reply_delay: Mutex::new(Duration::ZERO),
                registry: Mutex::new(Registry::default()),
            }),
            dispatcher,
        })
    }

    /// Delay applied before every property reply.
    pub fn set_reply_delay(&self, delay: Duration) {
        *self.shared.reply_delay.lock() = delay;
    }

    /// Drop off the bus. Every open session is lost and new requests fail
    /// with `BUS_NOT_CONNECTED`.
    pub fn disconnect(&self) {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Loopback bus {} disconnected", self.shared.unique_name);
        let ids: Vec<SessionId> = self.shared.registry.lock().sessions.keys().copied().collect();
        for id in ids {
            self.lose_session(id, SessionLostReason::RemoteEndClosedAbruptly);
        }
    }

    /// Simulate `joiner` joining `port`. Runs the accept and joined
    /// callbacks on the dispatcher thread and waits for the outcome.
    pub fn request_join(
        &self,
        port: SessionPort,
        joiner: &str,
        opts: &SessionOpts,
    ) -> Result<SessionId, Status> {
        let shared = self.shared.clone();
        let (joiner, opts) = (joiner.to_string(), *opts);
        self.dispatcher
            .call(move || shared.join(port, &joiner, &opts))
            .unwrap_or(Err(Status::BUS_NOT_CONNECTED))
    }

    pub fn add_member(&self, session_id: SessionId, unique_name: &str) -> Status {
        {
            let mut registry = self.shared.registry.lock();
            let Some(session) = registry.sessions.get_mut(&session_id) else {
                return Status::BUS_NO_SESSION;
            };
            session.members.push(unique_name.to_string());
        }
        self.notify_member(session_id, unique_name, true);
        Status::OK
    }

    pub fn remove_member(&self, session_id: SessionId, unique_name: &str) -> Status {
        {
            let mut registry = self.shared.registry.lock();
            let Some(session) = registry.sessions.get_mut(&session_id) else {
                return Status::BUS_NO_SESSION;
            };
            let before = session.members.len();
            session.members.retain(|m| m != unique_name);
            if session.members.len() == before {
                return Status::BAD_ARG;
            }
        }
        self.notify_member(session_id, unique_name, false);
        Status::OK
    }

    fn notify_member(&self, session_id: SessionId, unique_name: &str, added: bool) {
        let shared = self.shared.clone();
        let unique_name = unique_name.to_string();
        self.dispatcher.submit(move || {
            let Some((callbacks, context)) = shared.session_listener(session_id) else {
                return;
            };
            let callback = if added {
                callbacks.session_member_added
            } else {
                callbacks.session_member_removed
            };
            if let Some(callback) = callback {
                callback(context, session_id, &unique_name);
            }
        });
    }

    /// End a session, notifying its listener with `reason`.
    pub fn lose_session(&self, session_id: SessionId, reason: SessionLostReason) -> Status {
        let Some(session) = self.shared.registry.lock().sessions.remove(&session_id) else {
            return Status::BUS_NO_SESSION;
        };
        tracing::info!("Session {} on port {} lost: {}", session_id, session.port, reason);
        if let Some((SessionListenerCallbacks { session_lost: Some(lost), .. }, context)) =
            session.listener
        {
            self.dispatcher.submit(move || lost(context, session_id, reason));
        }
        Status::OK
    }

    /// Members of an open session, joiners first.
    pub fn session_members(&self, session_id: SessionId) -> Option<Vec<String>> {
        self.shared
            .registry
            .lock()
            .sessions
            .get(&session_id)
            .map(|s| s.members.clone())
    }

    pub fn is_port_bound(&self, port: SessionPort) -> bool {
        self.shared.registry.lock().bound_ports.contains_key(&port)
    }

    /// Broadcast an About announcement to every about listener.
    pub fn announce(
        &self,
        name: &str,
        version: u16,
        port: SessionPort,
        description: &ObjectDescription,
        about_data: MsgArg,
    ) {
        let listeners: Vec<_> = self
            .shared
            .registry
            .lock()
            .about_listeners
            .values()
            .copied()
            .collect();
        let name = name.to_string();
        let description = description.to_arg();
        self.dispatcher.submit(move || {
            for (callbacks, context) in listeners {
                (callbacks.announced)(context, &name, version, port, &description, &about_data);
            }
        });
    }

    /// Emit a properties-changed signal from the object at `path`.
    pub fn emit_properties_changed(
        &self,
        path: &str,
        interface_name: &str,
        changed: MsgArg,
        invalidated: MsgArg,
    ) {
        let targets: Vec<_> = self
            .shared
            .registry
            .lock()
            .changed_listeners
            .iter()
            .filter(|l| l.proxy.path == path && l.interface_name == interface_name)
            .map(|l| (l.proxy.clone(), l.callback, l.context))
            .collect();
        if targets.is_empty() {
            return;
        }
        let interface_name = interface_name.to_string();
        self.dispatcher.submit(move || {
            for (proxy, callback, context) in targets {
                callback(&proxy, &interface_name, &changed, &invalidated, context);
            }
        });
    }

    /// Block until every callback queued so far has been delivered.
    ///
    /// Property replies run on their own threads and are not covered.
    pub fn flush(&self) {
        self.dispatcher.flush();
    }

    /// Serve a property request on a reply thread of its own, so a slow
    /// reply never holds up callback delivery and a handler may issue a
    /// blocking request from inside a callback.
    fn spawn_reply(&self, serve: impl FnOnce(&Shared) + Send + 'static) -> Status {
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("loopback-reply".into())
            .spawn(move || serve(&shared));
        match spawned {
            Ok(_) => Status::OK,
            Err(e) => {
                tracing::warn!("Failed to start reply thread: {}", e);
                Status::FAIL
            }
        }
    }
}

impl BusAttachment for LoopbackBus {
    fn unique_name(&self) -> String {
        self.shared.unique_name.clone()
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn create_bus_object(
        &self,
        path: &str,
        _is_placeholder: bool,
        callbacks: BusObjectCallbacks,
        context: Context,
    ) -> Option<ObjectId> {
        if !is_valid_object_path(path) {
            tracing::warn!("Invalid object path '{}'", path);
            return None;
        }
        let mut registry = self.shared.registry.lock();
        if registry.objects.values().any(|o| o.path == path) {
            tracing::warn!("Object already exists at '{}'", path);
            return None;
        }
        let id = ObjectId(self.shared.next_id());
        registry.objects.insert(
            id,
            ObjectEntry {
                path: path.to_string(),
                callbacks,
                context,
                registered: false,
            },
        );
        Some(id)
    }

    fn register_bus_object(&self, object: ObjectId) -> Status {
        if !self.shared.is_connected() {
            return Status::BUS_NOT_CONNECTED;
        }
        let (callbacks, context) = {
            let mut registry = self.shared.registry.lock();
            let Some(entry) = registry.objects.get_mut(&object) else {
                return Status::BUS_NO_SUCH_OBJECT;
            };
            if entry.registered {
                return Status::BUS_OBJ_ALREADY_EXISTS;
            }
            entry.registered = true;
            (entry.callbacks, entry.context)
        };
        if let Some(registered) = callbacks.object_registered {
            self.dispatcher.submit(move || registered(context));
        }
        Status::OK
    }

    fn destroy_bus_object(&self, object: ObjectId) {
        let Some(entry) = self.shared.registry.lock().objects.remove(&object) else {
            return;
        };
        if !entry.registered {
            return;
        }
        if let Some(unregistered) = entry.callbacks.object_unregistered {
            let context = entry.context;
            self.dispatcher.submit(move || unregistered(context));
        }
    }

    fn create_session_port_listener(
        &self,
        callbacks: SessionPortListenerCallbacks,
        context: Context,
    ) -> ListenerId {
        let id = ListenerId(self.shared.next_id());
        self.shared
            .registry
            .lock()
            .port_listeners
            .insert(id, (callbacks, context));
        id
    }

    fn destroy_session_port_listener(&self, listener: ListenerId) {
        let mut registry = self.shared.registry.lock();
        registry.port_listeners.remove(&listener);
        registry.bound_ports.retain(|_, (l, _)| *l != listener);
    }

    fn bind_session_port(
        &self,
        port: &mut SessionPort,
        opts: &SessionOpts,
        listener: ListenerId,
    ) -> Status {
        if !self.shared.is_connected() {
            return Status::BUS_NOT_CONNECTED;
        }
        let mut registry = self.shared.registry.lock();
        if !registry.port_listeners.contains_key(&listener) {
            return Status::BAD_ARG;
        }
        if *port == SESSION_PORT_ANY {
            let free = (FIRST_DYNAMIC_PORT..=SessionPort::MAX)
                .find(|p| !registry.bound_ports.contains_key(p));
            let Some(free) = free else {
                return Status::FAIL;
            };
            *port = free;
        } else if registry.bound_ports.contains_key(port) {
            return Status::SESSION_PORT_ALREADY_BOUND;
        }
        registry.bound_ports.insert(*port, (listener, *opts));
        Status::OK
    }

    fn unbind_session_port(&self, port: SessionPort) -> Status {
        match self.shared.registry.lock().bound_ports.remove(&port) {
            Some(_) => Status::OK,
            None => Status::SESSION_PORT_NOT_BOUND,
        }
    }

    fn set_session_listener(
        &self,
        session_id: SessionId,
        callbacks: SessionListenerCallbacks,
        context: Context,
    ) -> Status {
        match self.shared.registry.lock().sessions.get_mut(&session_id) {
            Some(session) => {
                session.listener = Some((callbacks, context));
                Status::OK
            }
            None => Status::BUS_NO_SESSION,
        }
    }

    fn register_about_listener(
        &self,
        callbacks: AboutListenerCallbacks,
        context: Context,
    ) -> ListenerId {
        let id = ListenerId(self.shared.next_id());
        self.shared
            .registry
            .lock()
            .about_listeners
            .insert(id, (callbacks, context));
        id
    }

    fn unregister_about_listener(&self, listener: ListenerId) {
        self.shared.registry.lock().about_listeners.remove(&listener);
    }

    fn register_properties_changed_listener(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        callback: PropertiesChangedFn,
        context: Context,
    ) -> Status {
        if !self.shared.is_connected() {
            return Status::BUS_NOT_CONNECTED;
        }
        self.shared
            .registry
            .lock()
            .changed_listeners
            .push(ChangedListener {
                proxy: proxy.clone(),
                interface_name: interface_name.to_string(),
                callback,
                context,
            });
        Status::OK
    }

    fn get_property_async(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
        callback: GetPropertyCompleteFn,
        timeout: Duration,
        context: Context,
    ) -> Status {
        if !self.shared.is_connected() {
            return Status::BUS_NOT_CONNECTED;
        }
        let proxy = proxy.clone();
        let interface_name = interface_name.to_string();
        let property_name = property_name.to_string();
        self.spawn_reply(move |shared| {
            if !shared.await_reply(timeout) {
                callback(Status::BUS_TIMEOUT, &proxy, &MsgArg::new(), context);
                return;
            }
            let (status, value) = shared.serve_get(&proxy, &interface_name, &property_name);
            callback(status, &proxy, &value, context);
        })
    }

    fn set_property_async(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        property_name: &str,
        value: MsgArg,
        callback: SetPropertyCompleteFn,
        timeout: Duration,
        context: Context,
    ) -> Status {
        if !self.shared.is_connected() {
            return Status::BUS_NOT_CONNECTED;
        }
        let proxy = proxy.clone();
        let interface_name = interface_name.to_string();
        let property_name = property_name.to_string();
        self.spawn_reply(move |shared| {
            if !shared.await_reply(timeout) {
                callback(Status::BUS_TIMEOUT, &proxy, context);
                return;
            }
            let status = shared.serve_set(&proxy, &interface_name, &property_name, &value);
            callback(status, &proxy, context);
        })
    }
}
