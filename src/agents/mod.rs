pub mod coordinator;
pub mod plan;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Outcome of one fan-out branch. Failed branches carry neutral payloads so
/// synthesis never reads a null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: String,
    pub elapsed_ms: u64,
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl AgentResult {
    pub fn completed(agent: &str, elapsed_ms: u64, output: BranchOutput) -> Self {
        Self {
            agent: agent.to_string(),
            elapsed_ms,
            success: true,
            payload: output.payload,
            error: None,
            insights: output.insights,
            recommendations: output.recommendations,
        }
    }

    pub fn failed(agent: &str, elapsed_ms: u64, error: &str) -> Self {
        Self {
            agent: agent.to_string(),
            elapsed_ms,
            success: false,
            payload: json!({}),
            error: Some(error.to_string()),
            insights: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// What a branch computes before it is wrapped into an [`AgentResult`].
#[derive(Debug, Clone, Default)]
pub struct BranchOutput {
    pub payload: Value,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Side-channel status reporting. Observational only: nothing in the fan-out
/// branches on what a reporter does with the messages.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str);
}

pub struct StdoutProgress;

impl ProgressReporter for StdoutProgress {
    fn report(&self, message: &str) {
        println!("[plan] {message}");
    }
}
