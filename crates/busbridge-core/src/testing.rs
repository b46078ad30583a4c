//! Scripted native layer for unit tests.

use crate::native::*;
use crate::{ArgValue, MsgArg, SessionId, SessionOpts, SessionPort, Status};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

pub(crate) struct MockBus {
    pub connected: bool,
    /// Status delivered to property completions.
    pub reply: Status,
    /// Delay before a property completion fires.
    pub delay: Duration,
    pub bind_result: Status,
    pub unbind_result: Status,
    /// Port handed out for `SESSION_PORT_ANY`.
    pub any_port: SessionPort,
    pub calls: Mutex<Vec<String>>,
    pub objects: Mutex<HashMap<ObjectId, (String, BusObjectCallbacks, Context)>>,
    pub port_listeners: Mutex<HashMap<ListenerId, (SessionPortListenerCallbacks, Context)>>,
    pub session_listeners: Mutex<HashMap<SessionId, (SessionListenerCallbacks, Context)>>,
    pub next_id: AtomicU64,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            connected: true,
            reply: Status::OK,
            delay: Duration::from_millis(10),
            bind_result: Status::OK,
            unbind_result: Status::SESSION_PORT_NOT_BOUND,
            any_port: 1024,
            calls: Mutex::new(Vec::new()),
            objects: Mutex::new(HashMap::new()),
            port_listeners: Mutex::new(HashMap::new()),
            session_listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drive the accept/joined callbacks of `listener` as a join would.
    pub fn join(&self, listener: ListenerId, port: SessionPort, joiner: &str) -> Option<SessionId> {
        let (callbacks, ctx) = *self.port_listeners.lock().get(&listener)?;
        if !(callbacks.accept_session_joiner)(ctx, port, joiner, &SessionOpts::default()) {
            return None;
        }
        let id = self.next() as SessionId;
        if let Some(joined) = callbacks.session_joined {
            joined(ctx, port, id, joiner);
        }
        Some(id)
    }
}

impl BusAttachment for MockBus {
    fn unique_name(&self) -> String {
        ":mock.1".into()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn create_bus_object(
        &self,
        path: &str,
        _is_placeholder: bool,
        callbacks: BusObjectCallbacks,
        context: Context,
    ) -> Option<ObjectId> {
        self.record(format!("create_bus_object {path}"));
        if !path.starts_with('/') {
            return None;
        }
        let id = ObjectId(self.next());
        self.objects
            .lock()
            .insert(id, (path.to_string(), callbacks, context));
        Some(id)
    }

    fn register_bus_object(&self, object: ObjectId) -> Status {
        self.record(format!("register_bus_object {}", object.0));
        if self.objects.lock().contains_key(&object) {
            Status::OK
        } else {
            Status::BUS_NO_SUCH_OBJECT
        }
    }

    fn destroy_bus_object(&self, object: ObjectId) {
        self.record(format!("destroy_bus_object {}", object.0));
        self.objects.lock().remove(&object);
    }

    fn create_session_port_listener(
        &self,
        callbacks: SessionPortListenerCallbacks,
        context: Context,
    ) -> ListenerId {
        let id = ListenerId(self.next());
        self.record(format!("create_session_port_listener {}", id.0));
        self.port_listeners.lock().insert(id, (callbacks, context));
        id
    }

    fn destroy_session_port_listener(&self, listener: ListenerId) {
        self.record(format!("destroy_session_port_listener {}", listener.0));
        self.port_listeners.lock().remove(&listener);
    }

    fn bind_session_port(
        &self,
        port: &mut SessionPort,
        _opts: &SessionOpts,
        listener: ListenerId,
    ) -> Status {
        self.record(format!("bind {} {}", port, listener.0));
        if self.bind_result.is_ok() && *port == crate::SESSION_PORT_ANY {
            *port = self.any_port;
        }
        self.bind_result
    }

    fn unbind_session_port(&self, port: SessionPort) -> Status {
        self.record(format!("unbind {port}"));
        self.unbind_result
    }

    fn set_session_listener(
        &self,
        session_id: SessionId,
        callbacks: SessionListenerCallbacks,
        context: Context,
    ) -> Status {
        self.record(format!("set_session_listener {session_id}"));
        self.session_listeners
            .lock()
            .insert(session_id, (callbacks, context));
        Status::OK
    }

    fn register_about_listener(
        &self,
        _callbacks: AboutListenerCallbacks,
        _context: Context,
    ) -> ListenerId {
        ListenerId(self.next())
    }

    fn unregister_about_listener(&self, _listener: ListenerId) {}

    fn register_properties_changed_listener(
        &self,
        _proxy: &ProxyBusObject,
        interface_name: &str,
        _callback: PropertiesChangedFn,
        _context: Context,
    ) -> Status {
        self.record(format!("properties_changed {interface_name}"));
        Status::OK
    }

    fn get_property_async(
        &self,
        proxy: &ProxyBusObject,
        _interface_name: &str,
        property_name: &str,
        callback: GetPropertyCompleteFn,
        _timeout: Duration,
        context: Context,
    ) -> Status {
        if !self.connected {
            return Status::BUS_NOT_CONNECTED;
        }
        let (proxy, reply, delay) = (proxy.clone(), self.reply, self.delay);
        let value = MsgArg::from_value(ArgValue::String(property_name.to_uppercase()));
        thread::spawn(move || {
            thread::sleep(delay);
            callback(reply, &proxy, &value, context);
        });
        Status::OK
    }

    fn set_property_async(
        &self,
        proxy: &ProxyBusObject,
        _interface_name: &str,
        _property_name: &str,
        _value: MsgArg,
        callback: SetPropertyCompleteFn,
        _timeout: Duration,
        context: Context,
    ) -> Status {
        if !self.connected {
            return Status::BUS_NOT_CONNECTED;
        }
        let (proxy, reply, delay) = (proxy.clone(), self.reply, self.delay);
        thread::spawn(move || {
            thread::sleep(delay);
            callback(reply, &proxy, context);
        });
        Status::OK
    }
}
