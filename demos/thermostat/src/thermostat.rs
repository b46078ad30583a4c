//! The published thermostat and the peer watching it.

use busbridge_core::{
    AnnounceHandler, BridgeConfig, BusObject, MsgArg, ObjectDescription, PropertiesChangedHandler,
    PropertyProvider, ProxyBusObject, ServiceObject, SessionId, SessionListener, SessionLostReason,
    SessionNegotiator, SessionOpts, SessionPort, SessionPortListener, Status,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub const PATH: &str = "/thermostat";
pub const INTERFACE: &str = "org.example.Thermostat";

struct Readings {
    temperature: f64,
    target: f64,
}

pub struct Thermostat {
    negotiator: SessionNegotiator,
    readings: Mutex<Readings>,
    denied: Vec<String>,
    object: Mutex<Option<BusObject>>,
    events: Mutex<Vec<String>>,
}

impl Thermostat {
    pub fn new(config: &BridgeConfig, temperature: f64, denied: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            negotiator: SessionNegotiator::from_config(config),
            readings: Mutex::new(Readings {
                temperature,
                target: temperature,
            }),
            denied,
            object: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    /// Register the attached bus object so peers can reach it.
    pub fn publish(&self) -> anyhow::Result<()> {
        let object = self.object.lock();
        let object = object
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no bus object attached"))?;
        object.register()?;
        Ok(())
    }

    pub fn target(&self) -> f64 {
        self.readings.lock().target
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: String) {
        tracing::info!("{}", event);
        self.events.lock().push(event);
    }
}

impl PropertyProvider for Thermostat {
    fn on_property_get(&self, _: &str, property_name: &str, value: &mut MsgArg) -> Status {
        let readings = self.readings.lock();
        match property_name {
            "Temperature" => value.set(readings.temperature),
            "TargetTemperature" => value.set(readings.target),
            _ => Status::BUS_NO_SUCH_PROPERTY,
        }
    }

    fn on_property_set(&self, _: &str, property_name: &str, value: &MsgArg) -> Status {
        if property_name != "TargetTemperature" {
            return Status::BUS_PROPERTY_ACCESS_DENIED;
        }
        match value.get::<f64>() {
            Ok(target) if (5.0..=35.0).contains(&target) => {
                self.readings.lock().target = target;
                self.record(format!("target set to {target}"));
                Status::OK
            }
            Ok(_) => Status::BAD_ARG,
            Err(e) => Status::from(e),
        }
    }
}

impl ServiceObject for Thermostat {
    fn service_object_path(&self) -> String {
        PATH.to_string()
    }

    fn attach_bus_object(&self, object: BusObject) {
        *self.object.lock() = Some(object);
    }
}

impl SessionPortListener for Thermostat {
    fn on_accept_session_joiner(&self, port: SessionPort, joiner: &str, _: &SessionOpts) -> bool {
        let accept = !self.denied.iter().any(|d| d == joiner);
        self.record(format!(
            "{} {} on port {}",
            if accept { "accepted" } else { "denied" },
            joiner,
            port
        ));
        accept
    }

    fn on_session_joined(&self, _: SessionPort, session_id: SessionId, joiner: &str) {
        self.negotiator.on_joined(session_id);
        self.record(format!("session {session_id} joined by {joiner}"));
    }
}

impl SessionListener for Thermostat {
    fn on_session_lost(&self, session_id: SessionId, reason: SessionLostReason) {
        self.negotiator.on_lost(session_id);
        self.record(format!("session {session_id} lost: {reason}"));
    }

    fn on_session_member_added(&self, session_id: SessionId, unique_name: &str) {
        self.record(format!("session {session_id} gained {unique_name}"));
    }
}

/// A peer that discovers the thermostat and follows its changes.
#[derive(Default)]
pub struct Watcher {
    found: Mutex<Option<(String, SessionPort, String)>>,
    changes: Mutex<Vec<f64>>,
}

impl Watcher {
    /// Bus name, port and object path from the first matching announcement.
    pub fn found(&self) -> Option<(String, SessionPort, String)> {
        self.found.lock().clone()
    }

    pub fn changes(&self) -> Vec<f64> {
        self.changes.lock().clone()
    }
}

impl AnnounceHandler for Watcher {
    fn on_announce(
        &self,
        name: &str,
        _version: u16,
        port: SessionPort,
        object_description: &MsgArg,
        _about_data: &MsgArg,
    ) {
        let description = match ObjectDescription::from_arg(object_description) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Ignoring announcement from {}: {}", name, e);
                return;
            }
        };
        if let Some(path) = description.object_path(INTERFACE) {
            tracing::info!("Found {} at {}{} on port {}", INTERFACE, name, path, port);
            *self.found.lock() = Some((name.to_string(), port, path.to_string()));
        }
    }
}

impl PropertiesChangedHandler for Watcher {
    fn on_property_changed(
        &self,
        proxy: &ProxyBusObject,
        interface_name: &str,
        changed: &MsgArg,
        _invalidated: &MsgArg,
    ) {
        match changed.get::<f64>() {
            Ok(value) => self.changes.lock().push(value),
            Err(e) => {
                tracing::warn!("Unexpected change from {}.{}: {}", proxy.path, interface_name, e)
            }
        }
    }
}
