use std::collections::HashMap;

use anyhow::Result;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::context::{ChatMessage, ConversationState};
use crate::provider::{ChatModel, resolve_model};
use crate::registry::{CallerContext, ToolRegistry, ToolSpec};
use crate::telemetry::TelemetrySink;
use crate::tools::build_builtin_registry;

pub const ITERATION_LIMIT_MESSAGE: &str =
    "The agent did not complete within the iteration limit.";

const FINAL_ANSWER_MARKER: &str = "final answer:";
const ACTION_MARKER: &str = "action:";

/// How a reasoning loop ended. Outbound-call failures are not represented
/// here: they abort the run as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Final(String),
    NoAction(String),
    IterationLimit,
}

#[derive(Debug, Clone)]
pub struct ReactRun {
    pub outcome: LoopOutcome,
    pub iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub name: String,
    pub args: Vec<String>,
}

/// First case-insensitive `Final Answer:` wins; everything after it is the
/// answer.
pub fn extract_final_answer(reply: &str) -> Option<String> {
    let lower = reply.to_ascii_lowercase();
    let index = lower.find(FINAL_ANSWER_MARKER)?;
    Some(reply[index + FINAL_ANSWER_MARKER.len()..].trim().to_string())
}

/// First `Action: name(args)` wins. The free-text contract is deliberately
/// narrow: comma-separated positional arguments, surrounding quotes stripped,
/// nothing nested. Kept behind this function so a structured replacement can
/// swap in without touching the driver.
pub fn parse_action(reply: &str) -> Option<ParsedAction> {
    let lower = reply.to_ascii_lowercase();
    let index = lower.find(ACTION_MARKER)?;
    let rest = reply[index + ACTION_MARKER.len()..].trim_start();

    let open = rest.find('(')?;
    let name = rest[..open].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return None;
    }

    let close = rest[open + 1..].find(')')?;
    let args = split_action_args(&rest[open + 1..open + 1 + close]);
    Some(ParsedAction {
        name: name.to_string(),
        args,
    })
}

pub fn split_action_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .map(|part| strip_quotes(part.trim()).to_string())
        .collect()
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
        })
        .unwrap_or(value)
}

/// Map positional arguments onto parameter names by declaration order.
/// Surplus positions are dropped; missing ones stay absent.
pub fn positional_to_named(spec: &ToolSpec, args: &[String]) -> HashMap<String, String> {
    spec.params
        .iter()
        .zip(args.iter())
        .map(|(param, value)| (param.name.clone(), value.clone()))
        .collect()
}

pub fn render_tool_catalog(registry: &ToolRegistry) -> String {
    registry
        .specs()
        .iter()
        .map(|spec| {
            let params = spec
                .params
                .iter()
                .map(|param| param.name.as_str())
                .collect::<Vec<&str>>()
                .join(", ");
            format!("- {}({}): {}", spec.name, params, spec.description)
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub fn react_system_prompt(registry: &ToolRegistry) -> String {
    format!(
        "You solve tasks by reasoning in explicit steps. Available tools:\n{}\n\n\
         Use exactly this format:\n\
         Thought: what you are considering\n\
         Action: tool_name(arg1, arg2)\n\
         Then stop and wait for an Observation before continuing.\n\
         Pass arguments as comma-separated values in the declared parameter order.\n\
         Issue at most one Action per reply.\n\
         When you know the answer, reply with:\n\
         Final Answer: <your answer>",
        render_tool_catalog(registry)
    )
}

/// Synchronous Thought/Action/Observation loop. One model call per
/// iteration, at most one tool execution after it; an outbound failure
/// aborts the whole run.
pub async fn run_react_loop(
    model: &dyn ChatModel,
    registry: &ToolRegistry,
    question: &str,
    max_iterations: u32,
    history_max_messages: usize,
) -> Result<ReactRun> {
    let mut conversation =
        ConversationState::new(&react_system_prompt(registry), history_max_messages);
    conversation.push(ChatMessage::user(question));

    for iteration in 1..=max_iterations {
        let turn = model.complete(conversation.messages(), None).await?;
        conversation.push(ChatMessage::assistant(&turn.text));

        if let Some(answer) = extract_final_answer(&turn.text) {
            return Ok(ReactRun {
                outcome: LoopOutcome::Final(answer),
                iterations: iteration,
            });
        }

        let Some(action) = parse_action(&turn.text) else {
            return Ok(ReactRun {
                outcome: LoopOutcome::NoAction(turn.text),
                iterations: iteration,
            });
        };

        let named_args = registry
            .get(&action.name)
            .map(|spec| positional_to_named(spec, &action.args))
            .unwrap_or_default();
        let observation = registry
            .execute_with_args(&action.name, named_args, CallerContext::default())
            .await;
        tracing::debug!(tool = %action.name, iteration, "react observation collected");
        conversation.push(ChatMessage::user(format!("Observation: {observation}")));
    }

    Ok(ReactRun {
        outcome: LoopOutcome::IterationLimit,
        iterations: max_iterations,
    })
}

pub async fn run_react(
    cfg: &RuntimeConfig,
    telemetry: &TelemetrySink,
    prompt: &str,
) -> Result<()> {
    let registry = build_builtin_registry()?;
    let (model, provider, model_name) = resolve_model(cfg)?;

    let run = run_react_loop(
        model.as_ref(),
        &registry,
        prompt,
        cfg.max_iterations,
        cfg.history_max_messages,
    )
    .await?;

    telemetry.emit(
        "loop.completed",
        json!({
            "loop": "react",
            "provider": format!("{provider:?}").to_ascii_lowercase(),
            "model": model_name,
            "iterations": run.iterations,
        }),
    );

    match run.outcome {
        LoopOutcome::Final(answer) => println!("{answer}"),
        LoopOutcome::NoAction(reply) => {
            println!("No action or final answer found; last model reply:\n{reply}");
        }
        LoopOutcome::IterationLimit => println!("{ITERATION_LIMIT_MESSAGE}"),
    }
    Ok(())
}
