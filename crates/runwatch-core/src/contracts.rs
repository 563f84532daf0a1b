//! Request/response shapes of the run-start call.

use crate::payload::RosterAgent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SOLVE_PATH: &str = "/api/av/solve";

pub fn events_path(run_id: &str) -> String {
    format!("/api/av/runs/{run_id}/events")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartRunRequest {
    pub problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartRunResponse {
    pub run_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub agents: Vec<RosterAgent>,
}
