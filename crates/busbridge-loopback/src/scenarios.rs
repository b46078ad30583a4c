//! Producer and consumer talking through a loopback bus.

use crate::LoopbackBus;
use busbridge_core::{
    AnnounceHandler, ArgValue, BridgeConfig, BridgeError, BusAttachment, BusObject, DispatchTable,
    MsgArg, ObjectDescription, PropertiesChangedHandler, PropertyAccess, PropertyProvider,
    ProxyBusObject, ServiceObject, SessionId, SessionListener, SessionLostReason, SessionNegotiator,
    SessionOpts, SessionPort, SessionPortListener, SessionState, Status, TransportMask, WeakHandle,
    create_bus_object, subscribe_properties_changed,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const IFACE: &str = "org.example.Thermostat";

struct Thermostat {
    negotiator: SessionNegotiator,
    temperature: Mutex<f64>,
    object: Mutex<Option<BusObject>>,
    joined: Mutex<Vec<(SessionId, String)>>,
    events: Mutex<Vec<String>>,
}

impl Thermostat {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            negotiator: SessionNegotiator::new(42, SessionOpts::default()),
            temperature: Mutex::new(21.5),
            object: Mutex::new(None),
            joined: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }
}

impl PropertyProvider for Thermostat {
    fn on_property_get(&self, _: &str, prop: &str, value: &mut MsgArg) -> Status {
        match prop {
            "Temperature" => value.set(*self.temperature.lock()),
            // Claims success without producing a value.
            "Sensor" => Status::OK,
            _ => Status::BUS_NO_SUCH_PROPERTY,
        }
    }

    fn on_property_set(&self, _: &str, prop: &str, value: &MsgArg) -> Status {
        match (prop, value.get::<f64>()) {
            ("Temperature", Ok(t)) => {
                *self.temperature.lock() = t;
                Status::OK
            }
            ("Temperature", Err(e)) => Status::from(e),
            _ => Status::BUS_PROPERTY_ACCESS_DENIED,
        }
    }
}

impl ServiceObject for Thermostat {
    fn service_object_path(&self) -> String {
        "/thermostat".into()
    }

    fn attach_bus_object(&self, object: BusObject) {
        *self.object.lock() = Some(object);
    }
}

impl SessionPortListener for Thermostat {
    fn on_accept_session_joiner(&self, _: SessionPort, joiner: &str, _: &SessionOpts) -> bool {
        joiner != "peer.Rejected"
    }

    fn on_session_joined(&self, _: SessionPort, session_id: SessionId, joiner: &str) {
        self.negotiator.on_joined(session_id);
        self.joined.lock().push((session_id, joiner.to_string()));
    }
}

impl SessionListener for Thermostat {
    fn on_session_lost(&self, session_id: SessionId, reason: SessionLostReason) {
        self.negotiator.on_lost(session_id);
        self.events.lock().push(format!("lost {session_id}: {reason}"));
    }

    fn on_session_member_added(&self, session_id: SessionId, unique_name: &str) {
        self.events.lock().push(format!("added {session_id}: {unique_name}"));
    }

    fn on_session_member_removed(&self, session_id: SessionId, unique_name: &str) {
        self.events.lock().push(format!("removed {session_id}: {unique_name}"));
    }
}

#[derive(Default)]
struct Consumer {
    announced: Mutex<Vec<(String, SessionPort, ObjectDescription)>>,
    changed: Mutex<Vec<(String, MsgArg)>>,
}

impl AnnounceHandler for Consumer {
    fn on_announce(&self, name: &str, _: u16, port: SessionPort, description: &MsgArg, _: &MsgArg) {
        if let Ok(description) = ObjectDescription::from_arg(description) {
            self.announced.lock().push((name.to_string(), port, description));
        }
    }
}

impl PropertiesChangedHandler for Consumer {
    fn on_property_changed(&self, _: &ProxyBusObject, iface: &str, changed: &MsgArg, _: &MsgArg) {
        self.changed.lock().push((iface.to_string(), changed.clone()));
    }
}

/// Reads the thermostat from inside its own joined callback.
struct Reader {
    bus: Arc<LoopbackBus>,
    read: Mutex<Option<Result<f64, BridgeError>>>,
}

impl SessionPortListener for Reader {
    fn on_accept_session_joiner(&self, _: SessionPort, _: &str, _: &SessionOpts) -> bool {
        true
    }

    fn on_session_joined(&self, _: SessionPort, session_id: SessionId, _: &str) {
        let config = config(1_000);
        let access = PropertyAccess::new(self.bus.as_ref(), &config);
        let read = access.get::<f64>(&proxy(session_id), IFACE, "Temperature");
        *self.read.lock() = Some(read);
    }
}

struct Setup {
    bus: Arc<LoopbackBus>,
    thermostat: Arc<Thermostat>,
    handle: WeakHandle<Thermostat>,
}

fn setup() -> Setup {
    let bus = Arc::new(LoopbackBus::new(":producer.1").unwrap());
    let dyn_bus: Arc<dyn BusAttachment> = bus.clone();
    let thermostat = Thermostat::new();
    let handle = WeakHandle::new(&thermostat);

    create_bus_object(&dyn_bus, &handle).unwrap();
    thermostat.object.lock().as_ref().unwrap().register().unwrap();
    Setup {
        bus,
        thermostat,
        handle,
    }
}

fn config(timeout_ms: u64) -> BridgeConfig {
    BridgeConfig {
        message_timeout_ms: timeout_ms,
        wait_grace_ms: 200,
        ..BridgeConfig::default()
    }
}

fn proxy(session: SessionId) -> ProxyBusObject {
    ProxyBusObject::new(":producer.1", "/thermostat", session)
}

#[test]
fn joiner_is_accepted_on_bound_port() {
    let s = setup();
    let port = s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    assert_eq!(port, 42);
    assert_eq!(s.thermostat.negotiator.state(), SessionState::Bound);

    let id = s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    assert!(id > 0);
    assert_eq!(*s.thermostat.joined.lock(), [(id, "peer.A".to_string())]);
    assert_eq!(s.thermostat.negotiator.session_id(), Some(id));
}

#[test]
fn rejected_joiner_gets_no_session() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();

    assert_eq!(
        s.bus.request_join(42, "peer.Rejected", &SessionOpts::default()),
        Err(Status::SESSION_JOIN_REJECTED)
    );
    assert!(s.thermostat.joined.lock().is_empty());
}

#[test]
fn each_join_is_a_new_session() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();

    let a = s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    let b = s.bus.request_join(42, "peer.B", &SessionOpts::default()).unwrap();
    assert_ne!(a, b);
    assert_eq!(s.thermostat.negotiator.descriptor().sessions, [a, b]);
}

#[test]
fn rebinding_keeps_port_and_single_listener() {
    let s = setup();
    let negotiator = &s.thermostat.negotiator;
    let first = negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    let listener = negotiator.descriptor().port_listener;
    let second = negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();

    assert_eq!(first, second);
    assert_ne!(negotiator.descriptor().port_listener, listener);
    assert!(s.bus.is_port_bound(42));
    assert!(s.bus.request_join(42, "peer.A", &SessionOpts::default()).is_ok());
    assert_eq!(s.thermostat.joined.lock().len(), 1);
}

#[test]
fn stale_binding_is_released_before_bind() {
    let s = setup();
    let other = Thermostat::new();
    let other_handle = WeakHandle::new(&other);
    other.negotiator.bind(s.bus.as_ref(), &other_handle).unwrap();

    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    assert!(other.joined.lock().is_empty());
    assert_eq!(s.thermostat.joined.lock().len(), 1);
}

#[test]
fn incompatible_options_are_rejected() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    let opts = SessionOpts {
        transports: TransportMask::NONE,
        ..SessionOpts::default()
    };
    assert_eq!(
        s.bus.request_join(42, "peer.A", &opts),
        Err(Status::SESSION_JOIN_REJECTED)
    );
}

#[test]
fn unbinding_makes_port_unjoinable() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    s.thermostat.negotiator.unbind(s.bus.as_ref()).unwrap();

    assert!(!s.bus.is_port_bound(42));
    assert_eq!(
        s.bus.request_join(42, "peer.A", &SessionOpts::default()),
        Err(Status::BUS_NO_SESSION)
    );
}

#[test]
fn dropped_producer_rejects_joiners() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    let Setup { bus, thermostat, .. } = s;
    drop(thermostat);

    assert_eq!(
        bus.request_join(42, "peer.A", &SessionOpts::default()),
        Err(Status::SESSION_JOIN_REJECTED)
    );
}

#[test]
fn session_listener_sees_members_and_loss() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    let id = s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    s.thermostat
        .negotiator
        .attach_session_listener(s.bus.as_ref(), &s.handle, id)
        .unwrap();
    assert_eq!(s.thermostat.negotiator.descriptor().session_listeners, [id]);

    assert_eq!(s.bus.add_member(id, "peer.B"), Status::OK);
    assert_eq!(s.bus.remove_member(id, "peer.B"), Status::OK);
    assert_eq!(
        s.bus.session_members(id),
        Some(vec!["peer.A".to_string()])
    );
    assert_eq!(s.bus.lose_session(id, SessionLostReason::LinkTimeout), Status::OK);
    s.bus.flush();

    assert_eq!(
        *s.thermostat.events.lock(),
        [
            format!("added {id}: peer.B"),
            format!("removed {id}: peer.B"),
            format!("lost {id}: link timeout"),
        ]
    );
    assert_eq!(s.thermostat.negotiator.session_id(), None);
    assert!(s.thermostat.negotiator.descriptor().session_listeners.is_empty());
    assert_eq!(s.bus.lose_session(id, SessionLostReason::Other), Status::BUS_NO_SESSION);
}

#[test]
fn session_listener_needs_open_session() {
    let s = setup();
    let err = s
        .thermostat
        .negotiator
        .attach_session_listener(s.bus.as_ref(), &s.handle, 777)
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_NO_SESSION));
}

#[test]
fn remote_property_round_trip() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    let id = s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    let config = config(1_000);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    assert_eq!(access.get::<f64>(&proxy(id), IFACE, "Temperature").unwrap(), 21.5);
    access.set(&proxy(id), IFACE, "Temperature", 19.0_f64).unwrap();
    assert_eq!(*s.thermostat.temperature.lock(), 19.0);

    let err = access.set(&proxy(id), IFACE, "Mode", "eco").unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_PROPERTY_ACCESS_DENIED));
}

#[test]
fn unknown_property_fails_without_waiting_for_timeout() {
    let s = setup();
    let config = config(5_000);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    let started = Instant::now();
    let err = access.get::<f64>(&proxy(0), IFACE, "Humidity").unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_NO_SUCH_PROPERTY));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn success_without_value_is_a_failure() {
    let s = setup();
    let config = config(1_000);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    let err = access.get::<f64>(&proxy(0), IFACE, "Sensor").unwrap_err();
    assert_eq!(err.status(), Some(Status::FAIL));
}

#[test]
fn slow_reply_times_out() {
    let s = setup();
    s.bus.set_reply_delay(Duration::from_millis(500));
    let config = config(100);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    let started = Instant::now();
    let err = access.get::<f64>(&proxy(0), IFACE, "Temperature").unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_TIMEOUT));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn slow_reply_does_not_hold_up_joins() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    s.bus.set_reply_delay(Duration::from_millis(800));

    let bus = s.bus.clone();
    let pending = thread::spawn(move || {
        let config = config(2_000);
        PropertyAccess::new(bus.as_ref(), &config).get::<f64>(&proxy(0), IFACE, "Temperature")
    });
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let id = s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(s.thermostat.negotiator.session_id(), Some(id));

    assert_eq!(pending.join().unwrap().unwrap(), 21.5);
}

#[test]
fn blocking_read_inside_joined_callback() {
    let s = setup();
    let reader = Arc::new(Reader {
        bus: s.bus.clone(),
        read: Mutex::new(None),
    });
    let handle = WeakHandle::new(&reader);
    let negotiator = SessionNegotiator::new(43, SessionOpts::default());
    negotiator.bind(s.bus.as_ref(), &handle).unwrap();

    let started = Instant::now();
    s.bus.request_join(43, "peer.A", &SessionOpts::default()).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(reader.read.lock().take().unwrap().unwrap(), 21.5);
}

#[test]
fn native_timeout_fires_before_wait_grace() {
    let s = setup();
    s.bus.set_reply_delay(Duration::from_secs(5));
    let config = BridgeConfig {
        message_timeout_ms: 100,
        wait_grace_ms: 5_000,
        ..BridgeConfig::default()
    };
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    let started = Instant::now();
    assert!(matches!(
        access.set(&proxy(0), IFACE, "Temperature", 18.0_f64),
        Err(BridgeError::Native(Status::BUS_TIMEOUT))
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(*s.thermostat.temperature.lock(), 21.5);
}

#[test]
fn missing_object_and_session() {
    let s = setup();
    let config = config(1_000);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    let err = access
        .get::<f64>(&ProxyBusObject::new(":producer.1", "/nowhere", 0), IFACE, "Temperature")
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_NO_SUCH_OBJECT));

    let err = access.get::<f64>(&proxy(999), IFACE, "Temperature").unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_NO_SESSION));
}

#[test]
fn destroyed_object_is_not_served() {
    let s = setup();
    s.thermostat.object.lock().take();
    let config = config(1_000);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);

    let err = access.get::<f64>(&proxy(0), IFACE, "Temperature").unwrap_err();
    assert_eq!(err.status(), Some(Status::BUS_NO_SUCH_OBJECT));
}

#[test]
fn disconnect_fails_fast_and_ends_sessions() {
    let s = setup();
    s.thermostat.negotiator.bind(s.bus.as_ref(), &s.handle).unwrap();
    let id = s.bus.request_join(42, "peer.A", &SessionOpts::default()).unwrap();
    s.thermostat
        .negotiator
        .attach_session_listener(s.bus.as_ref(), &s.handle, id)
        .unwrap();

    s.bus.disconnect();
    s.bus.flush();
    assert_eq!(
        *s.thermostat.events.lock(),
        [format!("lost {id}: remote end closed abruptly")]
    );

    let config = config(5_000);
    let access = PropertyAccess::new(s.bus.as_ref(), &config);
    let started = Instant::now();
    assert!(matches!(
        access.get::<f64>(&proxy(0), IFACE, "Temperature"),
        Err(BridgeError::Native(Status::BUS_NOT_CONNECTED))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn announcement_locates_object_path() {
    let s = setup();
    let consumer = Arc::new(Consumer::default());
    let consumer_handle = WeakHandle::new(&consumer);
    let listener = s.bus.register_about_listener(
        DispatchTable::about_listener::<Consumer>(),
        consumer_handle.context(),
    );

    let description = ObjectDescription::new()
        .with_object("/thermostat", [IFACE])
        .with_object("/about", ["org.alljoyn.About"]);
    s.bus.announce(":producer.1", 1, 42, &description, MsgArg::new());
    s.bus.flush();

    let announced = consumer.announced.lock().clone();
    assert_eq!(announced.len(), 1);
    let (name, port, description) = &announced[0];
    assert_eq!((name.as_str(), *port), (":producer.1", 42));
    assert_eq!(description.object_path(IFACE), Some("/thermostat"));

    s.bus.unregister_about_listener(listener);
    s.bus.announce(":producer.1", 1, 42, &ObjectDescription::new(), MsgArg::new());
    s.bus.flush();
    assert_eq!(consumer.announced.lock().len(), 1);
}

#[test]
fn announcement_to_dropped_consumer_is_ignored() {
    let s = setup();
    let consumer = Arc::new(Consumer::default());
    let consumer_handle = WeakHandle::new(&consumer);
    s.bus.register_about_listener(
        DispatchTable::about_listener::<Consumer>(),
        consumer_handle.context(),
    );
    drop(consumer);

    s.bus.announce(":producer.1", 1, 42, &ObjectDescription::new(), MsgArg::new());
    s.bus.flush();
}

#[test]
fn property_changes_reach_subscriber() {
    let s = setup();
    let consumer = Arc::new(Consumer::default());
    let consumer_handle = WeakHandle::new(&consumer);
    subscribe_properties_changed(s.bus.as_ref(), &proxy(0), IFACE, &consumer_handle).unwrap();

    let changed = MsgArg::from_value(ArgValue::Double(19.0));
    s.bus
        .emit_properties_changed("/thermostat", IFACE, changed, MsgArg::new());
    s.bus
        .emit_properties_changed("/thermostat", "org.example.Other", MsgArg::new(), MsgArg::new());
    s.bus.flush();

    let changed = consumer.changed.lock().clone();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].0, IFACE);
    assert_eq!(changed[0].1.get::<f64>().unwrap(), 19.0);
}
