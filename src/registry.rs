use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value, json};

/// One declared tool parameter. Declaration order matters: the ReAct driver
/// maps positional arguments by this order.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub type_name: String,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, type_name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, type_name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Immutable tool record: the single source of truth both wire projections
/// are derived from.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub test_args: Vec<(String, String)>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
            test_args: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_test_arg(mut self, name: &str, value: &str) -> Self {
        self.test_args.push((name.to_string(), value.to_string()));
        self
    }

    pub fn test_arg_map(&self) -> HashMap<String, String> {
        self.test_args.iter().cloned().collect()
    }
}

/// Caller-side context threaded into executors (the MCP server fills in the
/// remote address; in-process callers leave it empty).
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub client_ip: Option<String>,
}

pub type ExecutorFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
pub type ToolExecutor =
    Arc<dyn Fn(HashMap<String, String>, CallerContext) -> ExecutorFuture + Send + Sync>;

/// Catalog of invocable capabilities: immutable specs plus a capability table
/// wired once at construction time.
#[derive(Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    executors: HashMap<String, ToolExecutor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, executor: ToolExecutor) -> Result<()> {
        if self.executors.contains_key(&spec.name) {
            return Err(anyhow::anyhow!(
                "tool '{}' is already registered; names must be unique",
                spec.name
            ));
        }
        self.executors.insert(spec.name.clone(), executor);
        self.specs.push(spec);
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, spec: ToolSpec, executor: F) -> Result<()>
    where
        F: Fn(HashMap<String, String>, CallerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.register(spec, Arc::new(move |args, ctx| Box::pin(executor(args, ctx))))
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    /// Specs in declaration order, as `tools/list` reports them.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Shared argument parser for every transport. Blank or `{}` input means
    /// no parameters; scalar values are coerced to their display form.
    pub fn parse_call_args(args_json: &str) -> Result<HashMap<String, String>> {
        let trimmed = args_json.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return Ok(HashMap::new());
        }

        let value: Value = serde_json::from_str(trimmed)?;
        let Value::Object(map) = value else {
            return Err(anyhow::anyhow!("expected a JSON object of named arguments"));
        };

        Ok(map
            .into_iter()
            .map(|(name, value)| (name, coerce_arg_value(value)))
            .collect())
    }

    /// Execute a tool. Never returns an error past this boundary: unknown
    /// tools, malformed arguments, and executor failures each become a
    /// textual result safe to feed back into a model prompt.
    pub async fn execute(&self, name: &str, args_json: &str, ctx: CallerContext) -> String {
        if self.get(name).is_none() {
            return format!("Unknown function {name}");
        }

        let args = match Self::parse_call_args(args_json) {
            Ok(args) => args,
            Err(err) => return format!("Error parsing arguments: {err}"),
        };

        self.execute_with_args(name, args, ctx).await
    }

    pub async fn execute_with_args(
        &self,
        name: &str,
        args: HashMap<String, String>,
        ctx: CallerContext,
    ) -> String {
        let Some(executor) = self.executors.get(name) else {
            return format!("Unknown function {name}");
        };

        match executor(args, ctx).await {
            Ok(result) => result,
            Err(err) => format!("Error executing {name}: {err:#}"),
        }
    }
}

fn coerce_arg_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Object schema shared by both wire projections, so they cannot diverge.
pub fn parameters_schema(spec: &ToolSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in &spec.params {
        properties.insert(
            param.name.clone(),
            json!({"type": param.type_name, "description": param.description}),
        );
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// MCP `tools/list` projection.
pub fn mcp_tool_entry(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "inputSchema": parameters_schema(spec),
    })
}

/// Function-calling projection.
pub fn function_declaration(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "description": spec.description,
        "parameters": parameters_schema(spec),
    })
}

pub fn function_declarations(registry: &ToolRegistry) -> Vec<Value> {
    registry.specs().iter().map(function_declaration).collect()
}
