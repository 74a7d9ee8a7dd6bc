use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::context::ChatMessage;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
use crate::provider::{ChatModel, resolve_model};
use crate::telemetry::TelemetrySink;

const SELECTION_PROMPT: &str = "You are a tool-dispatch assistant. Decide which of the \
available tools, if any, are needed to answer the user. Call the tools you need; if none \
apply, answer directly.";

const ANSWER_PROMPT: &str = "You are a helpful assistant. Write a clear natural-language \
answer to the user's question using only the tool observations provided.";

#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

/// One logical MCP session: connection flag plus the discovered-tool cache.
/// Not safe for concurrent reuse; hold one per session (see
/// [`McpSessionStore`]).
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
    identity: Option<ServerIdentity>,
    tools: Option<Vec<DiscoveredTool>>,
}

impl McpClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build MCP HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            next_id: AtomicU64::new(1),
            identity: None,
            tools: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("MCP request '{method}' to '{}' failed", self.endpoint))?;

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .with_context(|| format!("MCP response for '{method}' was not a JSON-RPC envelope"))?;

        if let Some(error) = envelope.error {
            return Err(anyhow::anyhow!(
                "MCP server rejected '{method}': {} (code {})",
                error.message,
                error.code
            ));
        }

        envelope.result.ok_or_else(|| {
            anyhow::anyhow!("MCP response for '{method}' carried neither result nor error")
        })
    }

    /// Idempotent handshake; repeated calls reuse the recorded identity.
    pub async fn initialize(&mut self) -> Result<ServerIdentity> {
        if self.identity.is_none() {
            let result = self
                .call(
                    "initialize",
                    json!({
                        "protocolVersion": MCP_PROTOCOL_VERSION,
                        "clientInfo": {
                            "name": "meridian-cli",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    }),
                )
                .await?;

            self.identity = Some(ServerIdentity {
                name: result
                    .pointer("/serverInfo/name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                version: result
                    .pointer("/serverInfo/version")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                protocol_version: result
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        self.identity
            .clone()
            .ok_or_else(|| anyhow::anyhow!("initialize recorded no server identity"))
    }

    /// Discover tools, caching them for the rest of the session. Calling this
    /// before [`initialize`](Self::initialize) is a local ordering bug, not a
    /// server error.
    pub async fn discover_tools(&mut self) -> Result<&[DiscoveredTool]> {
        if self.identity.is_none() {
            return Err(anyhow::anyhow!(
                "MCP client is not initialized; call initialize before discover_tools"
            ));
        }

        if self.tools.is_none() {
            let result = self.call("tools/list", json!({})).await?;
            let tools = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow::anyhow!("tools/list result missing 'tools' array"))?
                .iter()
                .map(|tool| DiscoveredTool {
                    name: tool
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: tool.get("inputSchema").cloned().unwrap_or(json!({})),
                })
                .collect::<Vec<DiscoveredTool>>();
            self.tools = Some(tools);
        }

        Ok(self.tools.as_deref().unwrap_or_default())
    }

    pub fn cached_tools(&self) -> Option<&[DiscoveredTool]> {
        self.tools.as_deref()
    }

    /// Function-calling projection of the cached discovery result.
    pub fn function_declarations(&self) -> Vec<Value> {
        self.tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                })
            })
            .collect()
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        result
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("tools/call result for '{name}' missing text content"))
    }

    /// Drop the connection flag and the tool cache together.
    pub fn reset(&mut self) {
        self.identity = None;
        self.tools = None;
    }

    /// Two-pass AI-mediated dispatch: pass 1 picks and executes tool calls,
    /// pass 2 sees only the observations and writes the answer. Selection and
    /// formatting stay separate passes.
    pub async fn ask(&mut self, model: &dyn ChatModel, question: &str) -> Result<String> {
        self.initialize().await?;
        self.discover_tools().await?;
        let declarations = self.function_declarations();

        let selection = vec![
            ChatMessage::system(SELECTION_PROMPT),
            ChatMessage::user(question),
        ];
        let turn = model.complete(&selection, Some(declarations.as_slice())).await?;

        if turn.tool_calls.is_empty() {
            return Ok(turn.text);
        }

        let mut observations = Vec::with_capacity(turn.tool_calls.len());
        for call in &turn.tool_calls {
            let arguments = serde_json::from_str::<Value>(&call.arguments)
                .unwrap_or_else(|_| Value::String(call.arguments.clone()));
            let observation = self.call_tool(&call.name, arguments).await?;
            observations.push(format!("{}: {}", call.name, observation));
        }

        let answer = vec![
            ChatMessage::system(ANSWER_PROMPT),
            ChatMessage::user(format!(
                "Question: {question}\n\nTool observations:\n{}",
                observations.join("\n")
            )),
        ];
        let turn = model.complete(&answer, None).await?;
        Ok(turn.text)
    }
}

/// Explicit session-keyed client store: create, read, invalidate. Nothing
/// process-wide, nothing ambient.
#[derive(Default)]
pub struct McpSessionStore {
    sessions: HashMap<String, McpClient>,
}

impl McpSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        session_id: &str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<&mut McpClient> {
        let client = McpClient::new(endpoint, timeout)?;
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(client);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => Ok(entry.insert(client)),
        }
    }

    pub fn read(&self, session_id: &str) -> Option<&McpClient> {
        self.sessions.get(session_id)
    }

    pub fn read_mut(&mut self, session_id: &str) -> Option<&mut McpClient> {
        self.sessions.get_mut(session_id)
    }

    pub fn invalidate(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub async fn run_mcp_tools(cfg: &RuntimeConfig, telemetry: &TelemetrySink) -> Result<()> {
    let mut client = McpClient::new(
        &cfg.mcp_endpoint,
        Duration::from_secs(cfg.request_timeout_secs),
    )?;
    let identity = client.initialize().await?;
    let tools = client.discover_tools().await?;

    telemetry.emit(
        "mcp.discovered",
        json!({"endpoint": cfg.mcp_endpoint.clone(), "tools": tools.len()}),
    );

    println!(
        "Connected to '{}' v{} (protocol {}) at {}",
        identity.name, identity.version, identity.protocol_version, cfg.mcp_endpoint
    );
    println!("Discovered {} tool(s):", tools.len());
    for tool in tools {
        println!("- {}: {}", tool.name, tool.description);
    }
    Ok(())
}

pub async fn run_mcp_call(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    name: &str,
    args: Option<String>,
) -> Result<()> {
    let arguments: Value = match args.as_deref() {
        None => json!({}),
        Some(raw) => serde_json::from_str(raw)
            .with_context(|| format!("--args is not valid JSON: '{raw}'"))?,
    };

    let mut client = McpClient::new(
        &cfg.mcp_endpoint,
        Duration::from_secs(cfg.request_timeout_secs),
    )?;
    client.initialize().await?;

    telemetry.emit(
        "tool.requested",
        json!({"tool": name, "transport": "mcp-client"}),
    );
    let result = client.call_tool(name, arguments).await?;
    println!("{result}");
    Ok(())
}

pub async fn run_mcp_ask(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    prompt: &str,
) -> Result<()> {
    let (model, provider, model_name) = resolve_model(cfg)?;
    let mut client = McpClient::new(
        &cfg.mcp_endpoint,
        Duration::from_secs(cfg.request_timeout_secs),
    )?;

    let answer = client.ask(model.as_ref(), prompt).await?;
    telemetry.emit(
        "mcp.ask.completed",
        json!({
            "endpoint": cfg.mcp_endpoint.clone(),
            "provider": format!("{provider:?}").to_ascii_lowercase(),
            "model": model_name,
        }),
    );
    println!("{answer}");
    Ok(())
}
