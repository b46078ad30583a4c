//! Thermostat published over a loopback bus.
//!
//! Creates the thermostat's bus object, makes it joinable on its session
//! port, announces it, then plays a handful of peers: each joins, reads the
//! temperature through the blocking property wrappers, and the first one
//! lowers the target. Prints a JSON report.
//!
//!   cargo run -p busbridge-demo-thermostat -- --joiner peer.A --joiner peer.B --deny peer.B
//!   cargo run -p busbridge-demo-thermostat -- --config demos/thermostat/thermostat.toml

mod report;
mod thermostat;

use anyhow::Context as _;
use busbridge_core::{
    ArgValue, BridgeConfig, BusAttachment, DispatchTable, MsgArg, ObjectDescription,
    PropertyAccess, ProxyBusObject, SessionLostReason, SessionPort, Status, WeakHandle,
    create_bus_object, subscribe_properties_changed,
};
use busbridge_loopback::LoopbackBus;
use clap::Parser;
use report::{PeerReport, Report};
use std::path::PathBuf;
use std::sync::Arc;
use thermostat::{INTERFACE, PATH, Thermostat, Watcher};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thermostat", about = "Thermostat producer on a loopback bus")]
struct Args {
    /// TOML bridge configuration.
    #[arg(long, env = "THERMOSTAT_CONFIG")]
    config: Option<PathBuf>,

    /// Session port to bind, overriding the configuration.
    #[arg(long, env = "THERMOSTAT_PORT")]
    port: Option<SessionPort>,

    /// Property request timeout, overriding the configuration.
    #[arg(long, env = "THERMOSTAT_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Peers that try to join.
    #[arg(
        long = "joiner",
        env = "THERMOSTAT_JOINERS",
        value_delimiter = ',',
        default_values = ["peer.A", "peer.B"]
    )]
    joiners: Vec<String>,

    /// Peers the thermostat turns away.
    #[arg(long = "deny", env = "THERMOSTAT_DENY", value_delimiter = ',')]
    denied: Vec<String>,

    #[arg(long, default_value_t = 21.5)]
    temperature: f64,

    /// Target the first joined peer asks for.
    #[arg(long, default_value_t = 19.0)]
    target: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("thermostat=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = args.port {
        config.session_port = port;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.message_timeout_ms = timeout_ms;
    }
    config.validate()?;

    let report = run(&args, &config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run(args: &Args, config: &BridgeConfig) -> anyhow::Result<Report> {
    let loopback = Arc::new(LoopbackBus::new(":thermostat.1")?);
    let bus: Arc<dyn BusAttachment> = loopback.clone();
    let service = bus.unique_name();

    let thermostat = Thermostat::new(config, args.temperature, args.denied.clone());
    let handle = WeakHandle::new(&thermostat);
    create_bus_object(&bus, &handle).context("creating bus object")?;
    thermostat.publish()?;
    let port = thermostat
        .negotiator()
        .bind(bus.as_ref(), &handle)
        .context("binding session port")?;
    tracing::info!("Thermostat joinable on port {}", port);

    let watcher = Arc::new(Watcher::default());
    let watcher_handle = WeakHandle::new(&watcher);
    let about = bus.register_about_listener(
        DispatchTable::about_listener::<Watcher>(),
        watcher_handle.context(),
    );
    loopback.announce(
        &service,
        1,
        port,
        &ObjectDescription::new().with_object(PATH, [INTERFACE]),
        MsgArg::new(),
    );
    loopback.flush();
    let discovered = watcher.found().map(|(name, _, path)| format!("{name}{path}"));

    let access = PropertyAccess::new(bus.as_ref(), config);
    let mut peers = Vec::new();
    for joiner in &args.joiners {
        let session_id = match loopback.request_join(port, joiner, &config.session_opts()) {
            Ok(id) => id,
            Err(status) => {
                tracing::warn!("{} could not join: {}", joiner, status);
                peers.push(PeerReport {
                    joiner: joiner.clone(),
                    session_id: None,
                    temperature: None,
                    status: status.to_string(),
                });
                continue;
            }
        };
        thermostat
            .negotiator()
            .attach_session_listener(bus.as_ref(), &handle, session_id)?;

        let proxy = ProxyBusObject::new(&service, PATH, session_id);
        let (temperature, status) = match access.get::<f64>(&proxy, INTERFACE, "Temperature") {
            Ok(t) => (Some(t), Status::OK),
            Err(e) => {
                tracing::warn!("{} failed to read temperature: {}", joiner, e);
                (None, Status::from(e))
            }
        };
        peers.push(PeerReport {
            joiner: joiner.clone(),
            session_id: Some(session_id),
            temperature,
            status: status.to_string(),
        });
    }

    if let Some(session_id) = peers.iter().find_map(|p| p.session_id) {
        let proxy = ProxyBusObject::new(&service, PATH, session_id);
        subscribe_properties_changed(bus.as_ref(), &proxy, INTERFACE, &watcher_handle)?;
        match access.set(&proxy, INTERFACE, "TargetTemperature", args.target) {
            Ok(()) => loopback.emit_properties_changed(
                PATH,
                INTERFACE,
                MsgArg::from_value(ArgValue::Double(thermostat.target())),
                MsgArg::new(),
            ),
            Err(e) => tracing::warn!("Setting target to {} failed: {}", args.target, e),
        }
    }

    for session_id in thermostat.negotiator().descriptor().sessions {
        loopback.lose_session(session_id, SessionLostReason::RemoteEndLeftSession);
    }
    loopback.flush();
    bus.unregister_about_listener(about);
    thermostat.negotiator().unbind(bus.as_ref())?;

    Ok(Report {
        service,
        port,
        discovered,
        peers,
        target: thermostat.target(),
        changes_seen: watcher.changes(),
        events: thermostat.events(),
    })
}
