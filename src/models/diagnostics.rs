// Diagnostics models (status display only; the core never acts on these)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberState {
    Connecting,
    Active,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberDiagnostics {
    pub id: u64,
    pub state: SubscriberState,
    pub dropped_frames: u64,
    pub queued: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerDiagnostics {
    pub state: SamplerState,
    pub ticks: u64,
    pub slow_ticks: u64,
    pub last_tick_micros: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub config_version: u64,
    pub sampler: SamplerDiagnostics,
    pub subscribers: Vec<SubscriberDiagnostics>,
}
