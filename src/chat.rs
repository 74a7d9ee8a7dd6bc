use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::context::{ChatMessage, ConversationState};
use crate::error::format_cli_error;
use crate::provider::{ChatModel, resolve_model};
use crate::react::{ITERATION_LIMIT_MESSAGE, LoopOutcome};
use crate::registry::{CallerContext, ToolRegistry, function_declarations};
use crate::telemetry::TelemetrySink;
use crate::tools::build_builtin_registry;

const ASSISTANT_PROMPT: &str = "You are Meridian, an assistant in the user's terminal. \
Answer directly when you can; call the available tools for live weather, market, \
geolocation, news, or sun data. Be concise and concrete.";

/// Structured tool-calling loop. Each model turn may request several tool
/// calls; every one gets exactly one tool-role reply keyed by its call id
/// before the model is consulted again. A turn with zero calls ends the run.
pub async fn run_function_loop(
    model: &dyn ChatModel,
    registry: &ToolRegistry,
    conversation: &mut ConversationState,
    declarations: &[Value],
    max_iterations: u32,
) -> Result<LoopOutcome> {
    for _iteration in 1..=max_iterations {
        let turn = model
            .complete(conversation.messages(), Some(declarations))
            .await?;

        if turn.tool_calls.is_empty() {
            conversation.push(ChatMessage::assistant(&turn.text));
            return Ok(LoopOutcome::Final(turn.text));
        }

        conversation.push(ChatMessage::assistant_with_calls(
            &turn.text,
            turn.tool_calls.clone(),
        ));

        for call in &turn.tool_calls {
            let result = registry
                .execute(&call.name, &call.arguments, CallerContext::default())
                .await;
            tracing::debug!(tool = %call.name, call_id = %call.id, "tool call answered");
            conversation.push(ChatMessage::tool(&call.id, result));
        }
    }

    Ok(LoopOutcome::IterationLimit)
}

/// Session-scoped chat surface: the conversation and the cached registry
/// projections live and die together.
pub struct ChatSession {
    pub conversation: ConversationState,
    system_prompt: String,
    tool_declarations: Option<Vec<Value>>,
}

impl ChatSession {
    pub fn new(system_prompt: &str, history_max_messages: usize) -> Self {
        Self {
            conversation: ConversationState::new(system_prompt, history_max_messages),
            system_prompt: system_prompt.to_string(),
            tool_declarations: None,
        }
    }

    pub fn declarations(&mut self, registry: &ToolRegistry) -> Vec<Value> {
        if self.tool_declarations.is_none() {
            self.tool_declarations = Some(function_declarations(registry));
        }
        self.tool_declarations.clone().unwrap_or_default()
    }

    pub fn has_cached_declarations(&self) -> bool {
        self.tool_declarations.is_some()
    }

    /// Clear conversation and tool cache together.
    pub fn reset(&mut self) {
        self.conversation.reset(&self.system_prompt);
        self.tool_declarations = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Help,
    Status,
    Tools,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    UnknownCommand(String),
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("/exit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    match trimmed.trim_start_matches('/').to_ascii_lowercase().as_str() {
        "exit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        "tools" => ParsedChatCommand::Command(ChatCommand::Tools),
        "reset" => ParsedChatCommand::Command(ChatCommand::Reset),
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

pub fn print_chat_help() {
    println!("Chat commands:");
    println!("- /help: show this quick reference");
    println!("- /status: show profile, provider, model, and session size");
    println!("- /tools: list the registered tools");
    println!("- /reset: clear the conversation and the tool cache");
    println!("- /exit: end interactive chat");
}

/// One-shot prompt through the function-calling loop.
pub async fn run_ask(cfg: &RuntimeConfig, telemetry: &TelemetrySink, prompt: &str) -> Result<()> {
    let registry = build_builtin_registry()?;
    let (model, provider, model_name) = resolve_model(cfg)?;
    let declarations = function_declarations(&registry);

    let mut conversation = ConversationState::new(ASSISTANT_PROMPT, cfg.history_max_messages);
    conversation.push(ChatMessage::user(prompt));

    let outcome = run_function_loop(
        model.as_ref(),
        &registry,
        &mut conversation,
        &declarations,
        cfg.max_iterations,
    )
    .await?;

    telemetry.emit(
        "loop.completed",
        json!({
            "loop": "function-calling",
            "provider": format!("{provider:?}").to_ascii_lowercase(),
            "model": model_name,
            "messages": conversation.len(),
        }),
    );

    match outcome {
        LoopOutcome::Final(answer) => println!("{answer}"),
        LoopOutcome::NoAction(reply) => println!("{reply}"),
        LoopOutcome::IterationLimit => println!("{ITERATION_LIMIT_MESSAGE}"),
    }
    Ok(())
}

pub async fn run_chat(cfg: &RuntimeConfig, telemetry: &TelemetrySink) -> Result<()> {
    let registry = build_builtin_registry()?;
    let (model, provider, model_name) = resolve_model(cfg)?;
    let mut session = ChatSession::new(ASSISTANT_PROMPT, cfg.history_max_messages);

    let mut editor = DefaultEditor::new().context("failed to initialize chat line editor")?;
    println!(
        "meridian chat: session '{}', {} tool(s) available. /help for commands.",
        cfg.session_id,
        registry.len()
    );

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("failed to read chat input"),
        };
        let _ = editor.add_history_entry(line.as_str());

        match parse_chat_command(&line) {
            ParsedChatCommand::Command(ChatCommand::Exit) => break,
            ParsedChatCommand::Command(ChatCommand::Help) => print_chat_help(),
            ParsedChatCommand::Command(ChatCommand::Status) => {
                println!(
                    "profile={} provider={:?} model={} session={} messages={} tool_cache={}",
                    cfg.profile,
                    provider,
                    model_name,
                    cfg.session_id,
                    session.conversation.len(),
                    if session.has_cached_declarations() {
                        "warm"
                    } else {
                        "cold"
                    }
                );
            }
            ParsedChatCommand::Command(ChatCommand::Tools) => {
                crate::tools::run_tools_list(&registry)?;
            }
            ParsedChatCommand::Command(ChatCommand::Reset) => {
                session.reset();
                println!("Session cleared: conversation and tool cache reset.");
            }
            ParsedChatCommand::UnknownCommand(command) => {
                println!("Unknown command {command}. Try /help.");
            }
            ParsedChatCommand::NotACommand => {
                let prompt = line.trim();
                if prompt.is_empty() {
                    continue;
                }

                session.conversation.push(ChatMessage::user(prompt));
                let declarations = session.declarations(&registry);
                let result = run_function_loop(
                    model.as_ref(),
                    &registry,
                    &mut session.conversation,
                    &declarations,
                    cfg.max_iterations,
                )
                .await;

                // A failed run ends this exchange, not the whole session.
                match result {
                    Ok(LoopOutcome::Final(answer)) => println!("{answer}"),
                    Ok(LoopOutcome::NoAction(reply)) => println!("{reply}"),
                    Ok(LoopOutcome::IterationLimit) => println!("{ITERATION_LIMIT_MESSAGE}"),
                    Err(err) => {
                        telemetry.emit("loop.failed", json!({"error": format!("{err:#}")}));
                        println!("{}", format_cli_error(&err));
                    }
                }
            }
        }
    }

    println!("Ending chat session '{}'.", cfg.session_id);
    Ok(())
}
