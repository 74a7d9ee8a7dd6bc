use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::{Cli, Provider};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_HISTORY_MAX_MESSAGES: usize = 40;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_MCP_ENDPOINT: &str = "http://127.0.0.1:8900/mcp";
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 8900;
pub const DEFAULT_CITY: &str = "London";
pub const DEFAULT_TELEMETRY_PATH: &str = ".meridian/telemetry.jsonl";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub session_id: String,
    pub max_iterations: u32,
    pub history_max_messages: usize,
    pub request_timeout_secs: u64,
    pub default_city: String,
    pub mcp_endpoint: String,
    pub server_host: String,
    pub server_port: u16,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub max_iterations: Option<u32>,
    pub history_max_messages: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub default_city: Option<String>,
    pub mcp_endpoint: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles_file(path: &str) -> Result<ProfilesFile> {
    if !Path::new(path).exists() {
        return Ok(ProfilesFile::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{path}'"))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config file '{path}'"))
}

pub fn select_profile(file: &ProfilesFile, profile: &str) -> Result<ProfileConfig> {
    if let Some(config) = file.profiles.get(profile) {
        return Ok(config.clone());
    }

    if profile == "default" {
        return Ok(ProfileConfig::default());
    }

    Err(anyhow::anyhow!(
        "profile '{}' not found in config file. Available profiles: {}",
        profile,
        if file.profiles.is_empty() {
            "<none>".to_string()
        } else {
            let mut names = file.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            names.join(", ")
        }
    ))
}

/// Layered resolution: CLI/env overrides win over the profile, which wins
/// over built-in defaults.
pub fn resolve_runtime_config(cli: &Cli) -> Result<RuntimeConfig> {
    let file = load_profiles_file(&cli.config_path)?;
    let profile = select_profile(&file, &cli.profile)?;

    let provider = match cli.provider {
        Provider::Auto => profile.provider.unwrap_or(Provider::Auto),
        explicit => explicit,
    };

    Ok(RuntimeConfig {
        profile: cli.profile.clone(),
        config_path: cli.config_path.clone(),
        provider,
        model: cli.model.clone().or(profile.model),
        session_id: cli
            .session_id
            .clone()
            .or(profile.session_id)
            .unwrap_or_else(|| "default".to_string()),
        max_iterations: cli
            .max_iterations
            .or(profile.max_iterations)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
            .max(1),
        history_max_messages: cli
            .history_max_messages
            .or(profile.history_max_messages)
            .unwrap_or(DEFAULT_HISTORY_MAX_MESSAGES),
        request_timeout_secs: cli
            .request_timeout_secs
            .or(profile.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
            .max(1),
        default_city: cli
            .default_city
            .clone()
            .or(profile.default_city)
            .unwrap_or_else(|| DEFAULT_CITY.to_string()),
        mcp_endpoint: cli
            .mcp_endpoint
            .clone()
            .or(profile.mcp_endpoint)
            .unwrap_or_else(|| DEFAULT_MCP_ENDPOINT.to_string()),
        server_host: profile
            .server_host
            .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
        server_port: profile.server_port.unwrap_or(DEFAULT_SERVER_PORT),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string()),
    })
}
