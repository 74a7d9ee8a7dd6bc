use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::tempdir;

use crate::agents::coordinator::*;
use crate::agents::plan::*;
use crate::agents::*;
use crate::chat::*;
use crate::cli::*;
use crate::config::*;
use crate::context::*;
use crate::error::*;
use crate::mcp::*;
use crate::protocol::*;
use crate::provider::*;
use crate::react::*;
use crate::registry::*;
use crate::server::*;
use crate::telemetry::*;
use crate::tools::*;

fn base_cfg() -> RuntimeConfig {
    RuntimeConfig {
        profile: "default".to_string(),
        config_path: ".meridian/config.toml".to_string(),
        provider: Provider::Auto,
        model: None,
        session_id: "test-session".to_string(),
        max_iterations: 10,
        history_max_messages: 40,
        request_timeout_secs: 5,
        default_city: "London".to_string(),
        mcp_endpoint: "http://127.0.0.1:1/mcp".to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        telemetry_enabled: false,
        telemetry_path: ".meridian/test-telemetry.jsonl".to_string(),
    }
}

fn test_telemetry(cfg: &RuntimeConfig) -> TelemetrySink {
    TelemetrySink::new(cfg, "test".to_string())
}

fn test_cli(config_path: &str, profile: &str) -> Cli {
    Cli {
        provider: Provider::Auto,
        model: None,
        profile: profile.to_string(),
        config_path: config_path.to_string(),
        session_id: None,
        mcp_endpoint: None,
        max_iterations: None,
        history_max_messages: None,
        request_timeout_secs: None,
        default_city: None,
        telemetry_enabled: Some(false),
        telemetry_path: None,
        log_filter: "warn".to_string(),
        command: Commands::Chat,
    }
}

fn builtin_registry() -> ToolRegistry {
    build_builtin_registry().expect("builtin registry should build")
}

fn failing_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register_fn(
            ToolSpec::new("boom", "always fails"),
            |_args, _ctx| async move { Err(anyhow::anyhow!("synthetic failure")) },
        )
        .expect("boom should register");
    registry
}

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

fn test_server_state() -> McpServerState {
    McpServerState {
        registry: Arc::new(builtin_registry()),
        telemetry: test_telemetry(&base_cfg()),
    }
}

async fn spawn_test_server() -> SocketAddr {
    let state = Arc::new(test_server_state());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should expose addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            build_mcp_router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("test server should serve");
    });
    addr
}

fn test_client(addr: SocketAddr) -> McpClient {
    McpClient::new(&format!("http://{addr}/mcp"), Duration::from_secs(5))
        .expect("client should build")
}

#[derive(Default)]
struct MemoryProgress(Mutex<Vec<String>>);

impl MemoryProgress {
    fn messages(&self) -> Vec<String> {
        self.0.lock().expect("progress lock should not poison").clone()
    }
}

impl ProgressReporter for MemoryProgress {
    fn report(&self, message: &str) {
        self.0
            .lock()
            .expect("progress lock should not poison")
            .push(message.to_string());
    }
}

fn agent_payload(agent: &str, payload: Value) -> AgentResult {
    AgentResult::completed(
        agent,
        5,
        BranchOutput {
            payload,
            ..Default::default()
        },
    )
}

async fn panicking_branch() -> anyhow::Result<BranchOutput> {
    panic!("synthetic panic");
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_zero_required_param_tools_accept_empty_args() {
    let registry = builtin_registry();
    for spec in registry.specs() {
        if spec.params.iter().any(|param| param.required) {
            continue;
        }
        for args in ["{}", "", "   "] {
            let result = registry
                .execute(&spec.name, args, CallerContext::default())
                .await;
            assert!(!result.is_empty(), "tool '{}' returned nothing", spec.name);
        }
    }
}

#[tokio::test]
async fn registry_unknown_tool_is_text_result() {
    let registry = builtin_registry();
    let result = registry.execute("nope", "{}", CallerContext::default()).await;
    assert_eq!(result, "Unknown function nope");
}

#[tokio::test]
async fn registry_malformed_args_are_text_result() {
    let registry = builtin_registry();
    let result = registry
        .execute("hello_world", "{not json", CallerContext::default())
        .await;
    assert!(result.starts_with("Error parsing arguments:"), "got: {result}");
}

#[tokio::test]
async fn registry_non_object_args_are_text_result() {
    let registry = builtin_registry();
    let result = registry
        .execute("hello_world", "[1,2]", CallerContext::default())
        .await;
    assert!(result.starts_with("Error parsing arguments:"), "got: {result}");
}

#[tokio::test]
async fn registry_executor_failure_is_text_result() {
    let registry = failing_registry();
    let result = registry.execute("boom", "{}", CallerContext::default()).await;
    assert!(result.starts_with("Error executing boom:"), "got: {result}");
    assert!(result.contains("synthetic failure"));
}

#[test]
fn registry_rejects_duplicate_names() {
    let mut registry = ToolRegistry::new();
    registry
        .register_fn(ToolSpec::new("dup", "first"), |_args, _ctx| async move {
            Ok("one".to_string())
        })
        .expect("first registration should succeed");
    let second = registry.register_fn(ToolSpec::new("dup", "second"), |_args, _ctx| async move {
        Ok("two".to_string())
    });
    assert!(second.is_err());
    assert_eq!(registry.len(), 1);
}

#[test]
fn registry_projections_never_diverge() {
    let registry = builtin_registry();
    for spec in registry.specs() {
        let mcp = mcp_tool_entry(spec);
        let declaration = function_declaration(spec);
        assert_eq!(mcp["name"], declaration["name"]);
        assert_eq!(mcp["description"], declaration["description"]);
        assert_eq!(
            mcp["inputSchema"], declaration["parameters"],
            "schemas diverged for '{}'",
            spec.name
        );

        let required = mcp["inputSchema"]["required"]
            .as_array()
            .expect("required should be an array");
        let expected = spec
            .params
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
            .collect::<Vec<&str>>();
        let listed = required
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<&str>>();
        assert_eq!(listed, expected, "required mismatch for '{}'", spec.name);
    }
}

#[test]
fn parse_call_args_coerces_scalars() {
    let args = ToolRegistry::parse_call_args(r#"{"limit": 5, "flag": true, "name": "x"}"#)
        .expect("args should parse");
    assert_eq!(args.get("limit").map(String::as_str), Some("5"));
    assert_eq!(args.get("flag").map(String::as_str), Some("true"));
    assert_eq!(args.get("name").map(String::as_str), Some("x"));
}

#[test]
fn parse_call_args_blank_means_no_parameters() {
    assert!(ToolRegistry::parse_call_args("").expect("blank should parse").is_empty());
    assert!(ToolRegistry::parse_call_args("{}").expect("{} should parse").is_empty());
    assert!(ToolRegistry::parse_call_args("  ").expect("spaces should parse").is_empty());
}

#[test]
fn hello_world_response_uses_name() {
    let mut args = std::collections::HashMap::new();
    args.insert("name".to_string(), "Ada".to_string());
    assert_eq!(hello_world_response(&args), "Hello, Ada!");
    assert_eq!(
        hello_world_response(&std::collections::HashMap::new()),
        "Hello, world!"
    );
}

#[test]
fn current_time_response_is_json() {
    let raw = current_time_response();
    let value: Value = serde_json::from_str(&raw).expect("time response should be JSON");
    assert!(value["unix_seconds"].as_i64().unwrap_or(0) > 0);
    assert!(value["utc_iso"].as_str().unwrap_or("").contains('T'));
}

// ---------------------------------------------------------------------------
// Conversation state
// ---------------------------------------------------------------------------

#[test]
fn conversation_starts_with_one_system_message() {
    let conversation = ConversationState::new("be helpful", 10);
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.messages()[0].role, "system");
}

#[test]
fn conversation_trims_oldest_non_system_first() {
    let mut conversation = ConversationState::new("be helpful", 4);
    for index in 1..=8 {
        conversation.push(ChatMessage::user(format!("m{index}")));
    }
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation.messages()[0].role, "system");
    assert_eq!(conversation.messages()[1].content, "m6");
    assert_eq!(conversation.messages()[3].content, "m8");
}

#[test]
fn conversation_reset_returns_to_single_system_message() {
    let mut conversation = ConversationState::new("be helpful", 10);
    conversation.push(ChatMessage::user("hi"));
    conversation.push(ChatMessage::assistant("hello"));
    conversation.reset("be helpful");
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.messages()[0].role, "system");
}

// ---------------------------------------------------------------------------
// ReAct loop
// ---------------------------------------------------------------------------

#[test]
fn final_answer_marker_is_case_insensitive() {
    assert_eq!(
        extract_final_answer("FINAL ANSWER:  42  "),
        Some("42".to_string())
    );
    assert_eq!(
        extract_final_answer("Thought: easy\nfinal Answer: 42"),
        Some("42".to_string())
    );
    assert_eq!(extract_final_answer("no marker here"), None);
}

#[test]
fn parse_action_takes_first_match_only() {
    let reply = "Action: hello_world(Test)\nAction: hello_world(Ignored)";
    let action = parse_action(reply).expect("action should parse");
    assert_eq!(action.name, "hello_world");
    assert_eq!(action.args, vec!["Test".to_string()]);
}

#[test]
fn parse_action_strips_quotes_and_splits_on_commas() {
    let action = parse_action("Action: news_headlines('rust', \"3\")")
        .expect("action should parse");
    assert_eq!(action.name, "news_headlines");
    assert_eq!(action.args, vec!["rust".to_string(), "3".to_string()]);
}

#[test]
fn parse_action_rejects_invalid_names() {
    assert!(parse_action("Action: do something(x)").is_none());
    assert!(parse_action("Action: no parens here").is_none());
    assert!(parse_action("nothing to see").is_none());
}

#[test]
fn parse_action_empty_args_mean_no_parameters() {
    let action = parse_action("Action: current_time()").expect("action should parse");
    assert_eq!(action.name, "current_time");
    assert!(action.args.is_empty());
}

#[test]
fn positional_args_map_by_declared_order() {
    let registry = builtin_registry();
    let spec = registry.get("news_headlines").expect("spec should exist");
    let named = positional_to_named(spec, &["rust".to_string(), "3".to_string()]);
    assert_eq!(named.get("topic").map(String::as_str), Some("rust"));
    assert_eq!(named.get("limit").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn react_honors_only_first_action_per_reply() {
    let registry = builtin_registry();
    let scripted = ScriptedModel::new(vec![
        ModelTurn::text("Thought: greet them\nAction: hello_world(Test)\nAction: hello_world(Ignored)"),
        ModelTurn::text("Final Answer: done"),
    ]);

    let run = run_react_loop(&scripted, &registry, "greet", 10, 40)
        .await
        .expect("loop should run");
    assert_eq!(run.outcome, LoopOutcome::Final("done".to_string()));
    assert_eq!(run.iterations, 2);

    let seen = scripted.seen.lock().expect("seen lock should not poison");
    let second_turn_messages = &seen[1].0;
    let observation = second_turn_messages
        .iter()
        .find(|message| message.content.starts_with("Observation:"))
        .expect("observation should be fed back");
    assert!(observation.content.contains("Test"));
    assert!(!observation.content.contains("Ignored"));
}

#[tokio::test]
async fn react_terminates_on_final_answer() {
    let registry = builtin_registry();
    let scripted = ScriptedModel::new(vec![ModelTurn::text("Final answer: 42")]);
    let run = run_react_loop(&scripted, &registry, "what is 6*7?", 10, 40)
        .await
        .expect("loop should run");
    assert_eq!(run.outcome, LoopOutcome::Final("42".to_string()));
    assert_eq!(run.iterations, 1);
}

#[tokio::test]
async fn react_without_markers_is_non_error_no_action() {
    let registry = builtin_registry();
    let scripted = ScriptedModel::new(vec![ModelTurn::text("I am not sure what to do.")]);
    let run = run_react_loop(&scripted, &registry, "help", 10, 40)
        .await
        .expect("loop should run");
    assert!(matches!(run.outcome, LoopOutcome::NoAction(_)));
}

#[tokio::test]
async fn react_stops_at_iteration_cap() {
    let registry = builtin_registry();
    let scripted = ScriptedModel::new(vec![
        ModelTurn::text("Action: hello_world(one)"),
        ModelTurn::text("Action: hello_world(two)"),
    ]);
    let run = run_react_loop(&scripted, &registry, "loop forever", 2, 40)
        .await
        .expect("loop should run");
    assert_eq!(run.outcome, LoopOutcome::IterationLimit);
    assert_eq!(run.iterations, 2);
}

#[tokio::test]
async fn react_unknown_action_feeds_error_observation_back() {
    let registry = builtin_registry();
    let scripted = ScriptedModel::new(vec![
        ModelTurn::text("Action: imaginary(thing)"),
        ModelTurn::text("Final Answer: gave up"),
    ]);
    let run = run_react_loop(&scripted, &registry, "try", 10, 40)
        .await
        .expect("loop should run");
    assert_eq!(run.outcome, LoopOutcome::Final("gave up".to_string()));

    let seen = scripted.seen.lock().expect("seen lock should not poison");
    let observation = seen[1]
        .0
        .iter()
        .find(|message| message.content.starts_with("Observation:"))
        .expect("observation should be fed back");
    assert!(observation.content.contains("Unknown function imaginary"));
}

#[tokio::test]
async fn react_outbound_failure_is_run_fatal() {
    let registry = builtin_registry();
    let scripted = ScriptedModel::new(Vec::new());
    let result = run_react_loop(&scripted, &registry, "hello", 10, 40).await;
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Function-calling loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn function_loop_answers_each_call_exactly_once() {
    let registry = builtin_registry();
    let declarations = function_declarations(&registry);
    let scripted = ScriptedModel::new(vec![
        ModelTurn::with_calls(
            "",
            vec![
                tool_call("call-1", "hello_world", r#"{"name":"A"}"#),
                tool_call("call-2", "hello_world", r#"{"name":"B"}"#),
            ],
        ),
        ModelTurn::text("both greeted"),
    ]);

    let mut conversation = ConversationState::new("system", 40);
    conversation.push(ChatMessage::user("greet A and B"));
    let outcome = run_function_loop(&scripted, &registry, &mut conversation, &declarations, 10)
        .await
        .expect("loop should run");
    assert_eq!(outcome, LoopOutcome::Final("both greeted".to_string()));

    let tool_replies = conversation
        .messages()
        .iter()
        .filter(|message| message.role == "tool")
        .collect::<Vec<&ChatMessage>>();
    assert_eq!(tool_replies.len(), 2);
    assert_eq!(tool_replies[0].tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(tool_replies[0].content, "Hello, A!");
    assert_eq!(tool_replies[1].tool_call_id.as_deref(), Some("call-2"));
    assert_eq!(tool_replies[1].content, "Hello, B!");

    // Both tool replies were visible before the next model turn.
    let seen = scripted.seen.lock().expect("seen lock should not poison");
    let second_turn_tool_messages = seen[1]
        .0
        .iter()
        .filter(|message| message.role == "tool")
        .count();
    assert_eq!(second_turn_tool_messages, 2);
}

#[tokio::test]
async fn function_loop_zero_calls_terminates_with_text() {
    let registry = builtin_registry();
    let declarations = function_declarations(&registry);
    let scripted = ScriptedModel::new(vec![ModelTurn::text("direct answer")]);

    let mut conversation = ConversationState::new("system", 40);
    conversation.push(ChatMessage::user("just answer"));
    let outcome = run_function_loop(&scripted, &registry, &mut conversation, &declarations, 10)
        .await
        .expect("loop should run");
    assert_eq!(outcome, LoopOutcome::Final("direct answer".to_string()));
    assert_eq!(
        conversation.messages().last().map(|message| message.role.as_str()),
        Some("assistant")
    );
}

#[tokio::test]
async fn function_loop_stops_at_iteration_cap() {
    let registry = builtin_registry();
    let declarations = function_declarations(&registry);
    let scripted = ScriptedModel::new(vec![
        ModelTurn::with_calls("", vec![tool_call("c1", "hello_world", r#"{"name":"x"}"#)]),
        ModelTurn::with_calls("", vec![tool_call("c2", "hello_world", r#"{"name":"y"}"#)]),
    ]);

    let mut conversation = ConversationState::new("system", 40);
    conversation.push(ChatMessage::user("loop"));
    let outcome = run_function_loop(&scripted, &registry, &mut conversation, &declarations, 2)
        .await
        .expect("loop should run");
    assert_eq!(outcome, LoopOutcome::IterationLimit);
}

#[tokio::test]
async fn function_loop_outbound_failure_is_run_fatal() {
    let registry = builtin_registry();
    let declarations = function_declarations(&registry);
    let scripted = ScriptedModel::new(Vec::new());
    let mut conversation = ConversationState::new("system", 40);
    conversation.push(ChatMessage::user("hello"));
    let result =
        run_function_loop(&scripted, &registry, &mut conversation, &declarations, 10).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn function_loop_shares_the_registry_argument_parser() {
    let registry = builtin_registry();
    let declarations = function_declarations(&registry);
    let scripted = ScriptedModel::new(vec![
        ModelTurn::with_calls("", vec![tool_call("c1", "hello_world", "{broken")]),
        ModelTurn::text("noted"),
    ]);

    let mut conversation = ConversationState::new("system", 40);
    conversation.push(ChatMessage::user("greet"));
    run_function_loop(&scripted, &registry, &mut conversation, &declarations, 10)
        .await
        .expect("loop should run");

    let tool_reply = conversation
        .messages()
        .iter()
        .find(|message| message.role == "tool")
        .expect("tool reply should exist");
    assert!(tool_reply.content.starts_with("Error parsing arguments:"));
}

// ---------------------------------------------------------------------------
// Chat surface
// ---------------------------------------------------------------------------

#[test]
fn chat_commands_parse() {
    assert_eq!(
        parse_chat_command("/reset"),
        ParsedChatCommand::Command(ChatCommand::Reset)
    );
    assert_eq!(
        parse_chat_command("exit"),
        ParsedChatCommand::Command(ChatCommand::Exit)
    );
    assert_eq!(parse_chat_command("hello there"), ParsedChatCommand::NotACommand);
    assert_eq!(
        parse_chat_command("/bogus"),
        ParsedChatCommand::UnknownCommand("/bogus".to_string())
    );
}

#[test]
fn chat_session_reset_clears_conversation_and_tool_cache() {
    let registry = builtin_registry();
    let mut session = ChatSession::new("system", 10);
    session.conversation.push(ChatMessage::user("hi"));
    let declarations = session.declarations(&registry);
    assert_eq!(declarations.len(), registry.len());
    assert!(session.has_cached_declarations());

    session.reset();
    assert_eq!(session.conversation.len(), 1);
    assert!(!session.has_cached_declarations());
}

// ---------------------------------------------------------------------------
// Protocol engine: server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rpc_parse_error_forces_null_id() {
    let state = test_server_state();
    let response = dispatch_rpc(&state, CallerContext::default(), "{not json").await;
    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_none());
    assert_eq!(
        response.error.as_ref().expect("error should be set").code,
        PARSE_ERROR
    );
}

#[tokio::test]
async fn rpc_unknown_method_preserves_id() {
    let state = test_server_state();
    let body = r#"{"jsonrpc":"2.0","id":7,"method":"bogus"}"#;
    let response = dispatch_rpc(&state, CallerContext::default(), body).await;
    assert_eq!(response.id, json!(7));
    assert_eq!(
        response.error.as_ref().expect("error should be set").code,
        METHOD_NOT_FOUND
    );
}

#[tokio::test]
async fn rpc_initialize_is_idempotent() {
    let state = test_server_state();
    let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
    let first = dispatch_rpc(&state, CallerContext::default(), body).await;
    let second = dispatch_rpc(&state, CallerContext::default(), body).await;
    for response in [&first, &second] {
        let result = response.result.as_ref().expect("result should be set");
        assert_eq!(
            result["protocolVersion"].as_str(),
            Some(MCP_PROTOCOL_VERSION)
        );
        assert_eq!(result["serverInfo"]["name"].as_str(), Some(SERVER_NAME));
    }
}

#[tokio::test]
async fn rpc_tools_list_matches_registry_in_declaration_order() {
    let state = test_server_state();
    let body = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
    let response = dispatch_rpc(&state, CallerContext::default(), body).await;
    let tools = response.result.expect("result should be set")["tools"]
        .as_array()
        .expect("tools should be an array")
        .clone();

    assert_eq!(tools.len(), state.registry.len());
    let listed = tools
        .iter()
        .filter_map(|tool| tool.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect::<Vec<String>>();
    let declared = state
        .registry
        .specs()
        .iter()
        .map(|spec| spec.name.clone())
        .collect::<Vec<String>>();
    assert_eq!(listed, declared);
}

#[tokio::test]
async fn rpc_tools_call_without_name_is_invalid_params() {
    let state = test_server_state();
    let body = r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"arguments":{}}}"#;
    let response = dispatch_rpc(&state, CallerContext::default(), body).await;
    assert_eq!(response.id, json!(3));
    assert!(response.result.is_none());
    assert_eq!(
        response.error.as_ref().expect("error should be set").code,
        INVALID_PARAMS
    );
}

#[tokio::test]
async fn rpc_tools_call_unknown_tool_is_successful_envelope() {
    let state = test_server_state();
    let body =
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#;
    let response = dispatch_rpc(&state, CallerContext::default(), body).await;
    assert!(response.is_success());
    let text = response.result.expect("result should be set")["content"][0]["text"]
        .as_str()
        .expect("text content should be set")
        .to_string();
    assert_eq!(text, "Unknown function nope");
}

#[tokio::test]
async fn rpc_tools_call_executes_registry_tool() {
    let state = test_server_state();
    let body = r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"hello_world","arguments":{"name":"Test"}}}"#;
    let response = dispatch_rpc(&state, CallerContext::default(), body).await;
    let text = response.result.expect("result should be set")["content"][0]["text"]
        .as_str()
        .expect("text content should be set")
        .to_string();
    assert_eq!(text, "Hello, Test!");
}

#[test]
fn rpc_envelope_has_exactly_one_of_result_and_error() {
    let ok = serde_json::to_value(JsonRpcResponse::ok(json!(1), json!({"x": 1})))
        .expect("ok envelope should serialize");
    assert_eq!(ok["jsonrpc"], "2.0");
    assert!(ok.get("result").is_some());
    assert!(ok.get("error").is_none());

    let err = serde_json::to_value(JsonRpcResponse::err(json!(2), METHOD_NOT_FOUND, "nope"))
        .expect("err envelope should serialize");
    assert_eq!(err["jsonrpc"], "2.0");
    assert!(err.get("result").is_none());
    assert_eq!(err["error"]["code"], json!(METHOD_NOT_FOUND));
}

// ---------------------------------------------------------------------------
// Protocol engine: client
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_discover_before_initialize_is_local_error() {
    let mut client = McpClient::new("http://127.0.0.1:1/mcp", Duration::from_secs(1))
        .expect("client should build");
    let result = client.discover_tools().await;
    let err = result.expect_err("discover before initialize should fail");
    assert!(err.to_string().contains("not initialized"), "got: {err}");
}

#[tokio::test]
async fn client_round_trip_discovers_and_calls() {
    let addr = spawn_test_server().await;
    let mut client = test_client(addr);

    let identity = client.initialize().await.expect("initialize should succeed");
    assert_eq!(identity.name, SERVER_NAME);
    assert_eq!(identity.protocol_version, MCP_PROTOCOL_VERSION);

    let tools = client
        .discover_tools()
        .await
        .expect("discover should succeed")
        .to_vec();
    assert_eq!(tools.len(), builtin_registry().len());

    let declarations = client.function_declarations();
    assert_eq!(declarations.len(), tools.len());

    let result = client
        .call_tool("hello_world", json!({"name": "Wire"}))
        .await
        .expect("call should succeed");
    assert_eq!(result, "Hello, Wire!");

    client.reset();
    assert!(!client.is_initialized());
    assert!(client.cached_tools().is_none());
}

#[tokio::test]
async fn client_ask_runs_two_separate_passes() {
    let addr = spawn_test_server().await;
    let mut client = test_client(addr);
    let scripted = ScriptedModel::new(vec![
        ModelTurn::with_calls(
            "",
            vec![tool_call("call-1", "hello_world", r#"{"name":"Pass"}"#)],
        ),
        ModelTurn::text("final wording"),
    ]);

    let answer = client
        .ask(&scripted, "greet Pass")
        .await
        .expect("ask should succeed");
    assert_eq!(answer, "final wording");

    let seen = scripted.seen.lock().expect("seen lock should not poison");
    assert_eq!(seen.len(), 2);
    assert!(seen[0].1, "selection pass should carry tool declarations");
    assert!(!seen[1].1, "answer pass should carry no tools");
    assert!(
        seen[1]
            .0
            .iter()
            .any(|message| message.content.contains("Hello, Pass!")),
        "answer pass should only see collected observations"
    );
}

#[test]
fn session_store_supports_create_read_invalidate() {
    let mut store = McpSessionStore::new();
    assert!(store.read("alpha").is_none());

    store
        .create("alpha", "http://127.0.0.1:1/mcp", Duration::from_secs(1))
        .expect("session should create");
    assert!(store.read("alpha").is_some());
    assert_eq!(store.len(), 1);

    assert!(store.invalidate("alpha"));
    assert!(!store.invalidate("alpha"));
    assert!(store.read("alpha").is_none());
    assert!(store.is_empty());
}

// ---------------------------------------------------------------------------
// Parallel agent coordinator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn coordinator_contains_a_single_branch_failure() {
    let branches = vec![
        Branch::new(WEATHER_AGENT, async {
            Ok(BranchOutput {
                payload: json!({"favorability": "good", "summary": "Clear skies"}),
                ..Default::default()
            })
        }),
        Branch::new(MARKET_AGENT, async {
            Ok(BranchOutput {
                payload: json!({"price": 50000.0}),
                ..Default::default()
            })
        }),
        Branch::new(NEWS_AGENT, async {
            Err(anyhow::anyhow!("feed unavailable"))
        }),
        Branch::new(SKY_AGENT, async {
            Ok(BranchOutput {
                payload: json!({"sunrise": "2026-08-07T05:30", "sunset": "2026-08-07T20:15"}),
                ..Default::default()
            })
        }),
    ];

    let progress = MemoryProgress::default();
    let results = run_branches(branches, &progress).await;
    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|result| result.success).count(), 3);
    for result in &results {
        assert!(!result.payload.is_null(), "payload must never be null");
    }

    let failed = results
        .iter()
        .find(|result| !result.success)
        .expect("one branch should fail");
    assert_eq!(failed.agent, NEWS_AGENT);
    assert!(failed.error.as_deref().unwrap_or("").contains("feed unavailable"));
    assert!(failed.insights.is_empty());

    let brief = synthesize_brief("Lisbon", &results);
    assert_eq!(brief.successful_agents, 3);
    assert_eq!(brief.total_agents, 4);
    assert!(
        brief
            .sections
            .get(NEWS_AGENT)
            .expect("failed branch still gets a section")
            .is_object()
    );
    assert!(brief.summary.contains("3/4"));
}

#[tokio::test]
async fn coordinator_contains_branch_panics() {
    let branches = vec![
        Branch::new("panicky", panicking_branch()),
        Branch::new("steady", async { Ok(BranchOutput::default()) }),
    ];

    let progress = MemoryProgress::default();
    let results = run_branches(branches, &progress).await;
    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert!(results[0].error.as_deref().unwrap_or("").contains("aborted"));
    assert!(results[1].success);
}

#[tokio::test]
async fn coordinator_reports_progress_on_the_side_channel() {
    let branches = vec![
        Branch::new("one", async { Ok(BranchOutput::default()) }),
        Branch::new("two", async { Ok(BranchOutput::default()) }),
    ];

    let progress = MemoryProgress::default();
    run_branches(branches, &progress).await;

    let messages = progress.messages();
    assert!(messages[0].contains("Launching 2"));
    assert_eq!(messages.iter().filter(|m| m.contains("started")).count(), 2);
    assert_eq!(messages.iter().filter(|m| m.contains("finished")).count(), 2);
}

#[test]
fn timeline_starts_outdoor_when_favorability_is_positive() {
    for signal in ["good", "perfect"] {
        let results = vec![
            agent_payload(
                WEATHER_AGENT,
                json!({"favorability": signal, "summary": "Nice day"}),
            ),
            agent_payload(
                SKY_AGENT,
                json!({"sunrise": "2026-08-07T05:30", "sunset": "2026-08-07T20:15"}),
            ),
        ];
        let brief = synthesize_brief("Lisbon", &results);
        assert_eq!(brief.timeline[0].category, TimelineCategory::Outdoor);
        assert_eq!(brief.timeline[0].start, "05:30");
    }
}

#[test]
fn timeline_starts_indoor_otherwise() {
    let results = vec![
        agent_payload(
            WEATHER_AGENT,
            json!({"favorability": "poor", "summary": "Heavy rain"}),
        ),
        agent_payload(
            SKY_AGENT,
            json!({"sunrise": "2026-08-07T05:30", "sunset": "2026-08-07T20:15"}),
        ),
    ];
    let brief = synthesize_brief("Lisbon", &results);
    assert_eq!(brief.timeline[0].category, TimelineCategory::Indoor);
    let last = brief.timeline.last().expect("timeline should not be empty");
    assert_eq!(last.start, "20:15");
}

#[test]
fn timeline_survives_missing_sky_branch() {
    let results = vec![agent_payload(
        WEATHER_AGENT,
        json!({"favorability": "good", "summary": "Bright"}),
    )];
    let brief = synthesize_brief("Lisbon", &results);
    assert_eq!(brief.timeline[0].start, "07:00");
    assert_eq!(brief.timeline[0].category, TimelineCategory::Outdoor);
}

#[test]
fn favorability_signal_matching() {
    assert!(favorability_is_positive("conditions look good"));
    assert!(favorability_is_positive("PERFECT day ahead"));
    assert!(!favorability_is_positive("fair at best"));
    assert!(!favorability_is_positive(""));
}

#[test]
fn failed_agent_result_defaults_are_neutral() {
    let result = AgentResult::failed("x", 3, "boom");
    assert!(!result.success);
    assert_eq!(result.payload, json!({}));
    assert!(result.insights.is_empty());
    assert!(result.recommendations.is_empty());
    assert_eq!(result.error.as_deref(), Some("boom"));
}

// ---------------------------------------------------------------------------
// Domain providers (pure parts)
// ---------------------------------------------------------------------------

#[test]
fn weather_codes_and_favorability() {
    assert_eq!(weather::describe_weather_code(0), "Clear sky");
    assert_eq!(weather::describe_weather_code(95), "Thunderstorm");
    assert_eq!(weather::favorability(0, 10, 10.0), "perfect");
    assert_eq!(weather::favorability(2, 30, 20.0), "good");
    assert_eq!(weather::favorability(3, 50, 10.0), "fair");
    assert_eq!(weather::favorability(80, 90, 30.0), "poor");
}

#[test]
fn weather_summary_from_raw_forecast() {
    let raw = json!({
        "city": "Lisbon, Portugal",
        "current": {"temperature_2m": 24.5, "weather_code": 1, "wind_speed_10m": 12.0},
        "daily": {
            "temperature_2m_max": [27.0],
            "temperature_2m_min": [18.0],
            "precipitation_probability_max": [10],
        },
    });
    let summary = weather::summarize_forecast(&raw);
    assert_eq!(summary["favorability"].as_str(), Some("perfect"));
    assert_eq!(summary["city"].as_str(), Some("Lisbon, Portugal"));
    assert!(summary["summary"].as_str().unwrap_or("").contains("perfect"));
}

#[test]
fn market_quote_summary_and_missing_asset() {
    let raw = json!({"bitcoin": {"usd": 50000.0, "usd_24h_change": 2.5}});
    let quote = market::summarize_quote("bitcoin", "usd", &raw).expect("quote should parse");
    assert_eq!(quote["price"].as_f64(), Some(50000.0));
    assert_eq!(quote["direction"].as_str(), Some("up"));

    assert!(market::summarize_quote("dogecoin", "usd", &raw).is_err());
}

#[test]
fn news_hits_summary_respects_limit() {
    let raw = json!({"hits": [
        {"title": "First", "url": "https://a", "points": 10},
        {"title": "Second", "url": "https://b", "points": 5},
        {"title": "Third", "url": "https://c", "points": 1},
    ]});
    let summary = news::summarize_hits("rust", &raw, 2);
    assert_eq!(summary["count"].as_u64(), Some(2));
    assert_eq!(summary["headlines"][0]["title"].as_str(), Some("First"));
}

#[test]
fn geo_lookup_summary_and_failure() {
    let ok = json!({
        "status": "success", "query": "8.8.8.8", "city": "Mountain View",
        "regionName": "California", "country": "United States",
        "lat": 37.4, "lon": -122.0, "isp": "Google LLC",
    });
    let summary = geo::summarize_lookup(&ok).expect("lookup should parse");
    assert!(summary["summary"].as_str().unwrap_or("").contains("Mountain View"));

    let failed = json!({"status": "fail", "message": "reserved range"});
    let err = geo::summarize_lookup(&failed).expect_err("failed lookup should error");
    assert!(err.to_string().contains("reserved range"));
}

#[tokio::test]
async fn geo_tool_rejects_missing_and_loopback_addresses() {
    assert!(geo::ip_tool_response(None).await.is_err());
    assert!(geo::ip_tool_response(Some("127.0.0.1".to_string())).await.is_err());
    assert!(geo::ip_tool_response(Some("  ".to_string())).await.is_err());
}

#[test]
fn sun_schedule_summary() {
    assert_eq!(crate::tools::astronomy::local_time_of("2026-08-07T05:30"), "05:30");
    assert_eq!(crate::tools::astronomy::local_time_of("05:30"), "05:30");

    let raw = json!({
        "city": "Lisbon, Portugal",
        "daily": {
            "sunrise": ["2026-08-07T05:30"],
            "sunset": ["2026-08-07T20:15"],
            "daylight_duration": [53100.0],
        },
    });
    let summary = crate::tools::astronomy::summarize_sun(&raw);
    assert_eq!(summary["sunrise"].as_str(), Some("2026-08-07T05:30"));
    assert_eq!(summary["daylight_hours"].as_f64(), Some(14.8));
    assert!(summary["summary"].as_str().unwrap_or("").contains("05:30"));
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[test]
fn telemetry_sink_writes_jsonl_and_summarizes() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg();
    cfg.telemetry_enabled = true;
    cfg.telemetry_path = dir
        .path()
        .join("events.jsonl")
        .to_string_lossy()
        .to_string();

    let sink = TelemetrySink::new(&cfg, "test".to_string());
    sink.emit("loop.completed", json!({"iterations": 2}));
    sink.emit("tool.requested", json!({"tool": "hello_world"}));
    sink.emit("agent.failed", json!({"agent": "news_digest"}));

    let lines = std::fs::read_to_string(&cfg.telemetry_path)
        .expect("telemetry file should exist")
        .lines()
        .map(str::to_string)
        .collect::<Vec<String>>();
    assert_eq!(lines.len(), 3);

    let summary = summarize_telemetry_lines(lines, 50);
    assert_eq!(summary.parsed_events, 3);
    assert_eq!(summary.loop_completed, 1);
    assert_eq!(summary.tool_requested, 1);
    assert_eq!(summary.agent_failed, 1);
    assert_eq!(summary.unique_runs.len(), 1);
}

#[test]
fn telemetry_disabled_sink_writes_nothing() {
    let dir = tempdir().expect("temp directory should create");
    let mut cfg = base_cfg();
    cfg.telemetry_path = dir
        .path()
        .join("events.jsonl")
        .to_string_lossy()
        .to_string();

    let sink = TelemetrySink::new(&cfg, "test".to_string());
    sink.emit("loop.completed", json!({}));
    assert!(!std::path::Path::new(&cfg.telemetry_path).exists());
}

#[test]
fn telemetry_summary_counts_parse_errors() {
    let lines = vec!["not json".to_string(), r#"{"event":"command.completed"}"#.to_string()];
    let summary = summarize_telemetry_lines(lines, 50);
    assert_eq!(summary.parse_errors, 1);
    assert_eq!(summary.command_completed, 1);
}

// ---------------------------------------------------------------------------
// Config and errors
// ---------------------------------------------------------------------------

#[test]
fn config_profiles_layer_under_cli_overrides() {
    let dir = tempdir().expect("temp directory should create");
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[profiles.default]\nmax_iterations = 7\n\n[profiles.fast]\nmax_iterations = 3\ndefault_city = \"Porto\"\n",
    )
    .expect("config file should write");
    let config_path = config_path.to_string_lossy().to_string();

    let cfg = resolve_runtime_config(&test_cli(&config_path, "default"))
        .expect("default profile should resolve");
    assert_eq!(cfg.max_iterations, 7);
    assert_eq!(cfg.default_city, "London");

    let cfg = resolve_runtime_config(&test_cli(&config_path, "fast"))
        .expect("fast profile should resolve");
    assert_eq!(cfg.max_iterations, 3);
    assert_eq!(cfg.default_city, "Porto");

    let mut cli = test_cli(&config_path, "fast");
    cli.max_iterations = Some(5);
    let cfg = resolve_runtime_config(&cli).expect("override should resolve");
    assert_eq!(cfg.max_iterations, 5);
}

#[test]
fn config_missing_profile_is_an_error() {
    let dir = tempdir().expect("temp directory should create");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "[profiles.default]\nmax_iterations = 7\n")
        .expect("config file should write");

    let result = resolve_runtime_config(&test_cli(&config_path.to_string_lossy(), "missing"));
    assert!(result.is_err());
}

#[test]
fn config_without_file_uses_defaults() {
    let cfg = resolve_runtime_config(&test_cli("/nonexistent/meridian.toml", "default"))
        .expect("defaults should resolve");
    assert_eq!(cfg.max_iterations, DEFAULT_MAX_ITERATIONS);
    assert_eq!(cfg.mcp_endpoint, DEFAULT_MCP_ENDPOINT);
    assert_eq!(cfg.server_port, DEFAULT_SERVER_PORT);
}

#[test]
fn errors_categorize_by_surface() {
    let provider = anyhow::anyhow!("provider Openai requires the OPENAI_API_KEY environment variable");
    assert_eq!(categorize_error(&provider), ErrorCategory::Provider);

    let protocol = anyhow::anyhow!("MCP server rejected 'tools/list': method not found (code -32601)");
    assert_eq!(categorize_error(&protocol), ErrorCategory::Protocol);

    let tooling = anyhow::anyhow!("tool 'dup' is already registered; names must be unique");
    assert_eq!(categorize_error(&tooling), ErrorCategory::Tooling);

    let input = anyhow::anyhow!("profile 'missing' not found in config file. Available profiles: default");
    assert_eq!(categorize_error(&input), ErrorCategory::Input);

    let internal = anyhow::anyhow!("something entirely else");
    assert_eq!(categorize_error(&internal), ErrorCategory::Internal);

    let rendered = format_cli_error(&provider);
    assert!(rendered.starts_with("[PROVIDER]"));
    assert!(rendered.contains("Hint:"));
}
