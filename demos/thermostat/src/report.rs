//! JSON summary printed at the end of a run.

use busbridge_core::{SessionId, SessionPort};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Report {
    pub service: String,
    pub port: SessionPort,
    pub discovered: Option<String>,
    pub peers: Vec<PeerReport>,
    pub target: f64,
    pub changes_seen: Vec<f64>,
    pub events: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PeerReport {
    pub joiner: String,
    pub session_id: Option<SessionId>,
    pub temperature: Option<f64>,
    /// Outcome of the join, e.g. `OK (0x0000)`.
    pub status: String,
}
