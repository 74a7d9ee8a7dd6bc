use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::context::{ChatMessage, ToolCallRequest};

/// One model turn: free text plus zero or more structured tool calls.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
        }
    }
}

/// Opaque completion boundary: messages plus optional function declarations
/// in, one turn out. Implementations must not retry internally.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], tools: Option<&[Value]>)
    -> Result<ModelTurn>;
}

pub struct OpenAiCompatModel {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatModel {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build model HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<ModelTurn> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages.iter().map(wire_message).collect::<Vec<Value>>(),
        });

        if let Some(declarations) = tools
            && !declarations.is_empty()
        {
            payload["tools"] = declarations
                .iter()
                .map(|decl| json!({"type": "function", "function": decl}))
                .collect::<Vec<Value>>()
                .into();
            payload["tool_choice"] = json!("auto");
        }

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("model request to '{}' failed", self.base_url))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("model response from '{}' was not JSON", self.base_url))?;

        if !status.is_success() {
            let detail = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no error detail");
            return Err(anyhow::anyhow!(
                "model request rejected with status {status}: {detail}"
            ));
        }

        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| anyhow::anyhow!("model response carried no choices"))?;
        Ok(parse_model_message(message))
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": message.role,
        "content": message.content,
    });
    if let Some(call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(call_id);
    }
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect::<Vec<Value>>()
            .into();
    }
    wire
}

/// Decode one chat-completions assistant message into a turn.
pub fn parse_model_message(message: &Value) -> ModelTurn {
    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCallRequest {
                    id: call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call-{index}")),
                    name: call
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}")
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    ModelTurn { text, tool_calls }
}

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Openai => "gpt-4o-mini",
        Provider::Groq => "llama-3.3-70b-versatile",
        Provider::Deepseek => "deepseek-chat",
        Provider::Ollama => "llama3.2",
        Provider::Auto => "gpt-4o-mini",
    }
}

fn provider_endpoint(provider: Provider) -> (&'static str, Option<&'static str>) {
    match provider {
        Provider::Openai => ("https://api.openai.com/v1", Some("OPENAI_API_KEY")),
        Provider::Groq => ("https://api.groq.com/openai/v1", Some("GROQ_API_KEY")),
        Provider::Deepseek => ("https://api.deepseek.com/v1", Some("DEEPSEEK_API_KEY")),
        Provider::Ollama => ("http://localhost:11434/v1", None),
        Provider::Auto => ("", None),
    }
}

fn detect_provider() -> Provider {
    for candidate in [Provider::Openai, Provider::Groq, Provider::Deepseek] {
        if let (_, Some(env_key)) = provider_endpoint(candidate)
            && std::env::var(env_key).map(|v| !v.trim().is_empty()).unwrap_or(false)
        {
            return candidate;
        }
    }
    Provider::Ollama
}

/// Resolve the configured provider into a ready model client.
pub fn resolve_model(cfg: &RuntimeConfig) -> Result<(Arc<dyn ChatModel>, Provider, String)> {
    let provider = match cfg.provider {
        Provider::Auto => detect_provider(),
        explicit => explicit,
    };

    let (base_url, env_key) = provider_endpoint(provider);
    let api_key = match env_key {
        Some(name) => {
            let key = std::env::var(name).unwrap_or_default();
            if key.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "provider {:?} requires the {} environment variable",
                    provider,
                    name
                ));
            }
            Some(key)
        }
        None => None,
    };

    let model_name = cfg
        .model
        .clone()
        .unwrap_or_else(|| default_model(provider).to_string());
    let model = OpenAiCompatModel::new(
        base_url,
        api_key,
        &model_name,
        Duration::from_secs(cfg.request_timeout_secs),
    )?;

    tracing::info!(provider = ?provider, model = %model_name, "model resolved");
    Ok((Arc::new(model), provider, model_name))
}

/// Deterministic model double for loop tests: replays queued turns and
/// records what it was asked, failing once the queue runs dry.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    pub seen: Mutex<Vec<(Vec<ChatMessage>, bool)>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<ModelTurn> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((messages.to_vec(), tools.is_some()));
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted model has no turns left"))
    }
}
