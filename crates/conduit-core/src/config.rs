//! Configuration loading: YAML descriptors for tool servers and agent
//! profiles, plus env-var-driven runtime settings.
//!
//! Grounded in the teacher's `mcp::config` loader (`${VAR}` expansion with a
//! credential-store fallback) and in the original's
//! `app/mcp/config_loader.py` YAML schema and `enabled` filtering rules.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

fn config_dir() -> PathBuf {
    env::var("CONDUIT_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"))
}

/// One tool server entry from `mcp_servers.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One agent profile entry from `agent_profiles.yaml`. `enabled` is
/// intentionally lenient here: missing or omitted means enabled, matching
/// the original loader's asymmetry between listing profiles (strict,
/// `enabled == true`) and looking one up by id (lenient, `enabled != false`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfileConfig {
    pub id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub role_prompt: String,
    /// `["*"]` grants every connected tool server; otherwise an allow-list
    /// of server ids.
    #[serde(default)]
    pub allowed_mcp_servers: Vec<String>,
    #[serde(default)]
    pub approval_required_tools: Vec<String>,
}

impl AgentProfileConfig {
    fn is_enabled_for_lookup(&self) -> bool {
        self.enabled != Some(false)
    }

    fn is_enabled_for_listing(&self) -> bool {
        self.enabled == Some(true)
    }

    pub fn allows_server(&self, server_id: &str) -> bool {
        self.allowed_mcp_servers.iter().any(|s| s == "*") || {
            self.allowed_mcp_servers.iter().any(|s| s == server_id)
        }
    }
}

fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Validation(format!("reading {}: {e}", path.display())))?;
    let expanded = expand_env_vars(&raw);
    let items: Vec<T> = serde_yaml::from_str(&expanded)
        .map_err(|e| EngineError::Validation(format!("parsing {}: {e}", path.display())))?;
    Ok(items)
}

/// Expands `${VAR}` references, falling back to an empty string (and a
/// logged warning) when the variable is unset — mirroring the teacher's
/// credential-store-fallback expansion, minus the credential store, which
/// has no counterpart in this engine.
fn expand_env_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if bytes[i] == b'$' && raw[i..].starts_with("${") {
            if let Some(end) = raw[i..].find('}') {
                let var = &raw[i + 2..i + end];
                match env::var(var) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => {
                        tracing::warn!(var, "env var referenced in config not set; using empty string");
                    }
                }
                i += end + 1;
                continue;
            }
        }
        let ch = raw[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    let _ = &mut chars;
    out
}

pub fn load_tool_servers() -> Result<Vec<ToolServerConfig>> {
    load_yaml(&config_dir().join("mcp_servers.yaml"))
}

pub fn enabled_tool_servers() -> Result<Vec<ToolServerConfig>> {
    Ok(load_tool_servers()?.into_iter().filter(|s| s.enabled).collect())
}

pub fn load_agent_profiles() -> Result<Vec<AgentProfileConfig>> {
    load_yaml(&config_dir().join("agent_profiles.yaml"))
}

pub fn enabled_agent_profiles() -> Result<Vec<AgentProfileConfig>> {
    Ok(load_agent_profiles()?
        .into_iter()
        .filter(|p| p.is_enabled_for_listing())
        .collect())
}

pub fn find_agent_profile(profile_id: &str) -> Result<Option<AgentProfileConfig>> {
    Ok(load_agent_profiles()?
        .into_iter()
        .find(|p| p.id == profile_id && p.is_enabled_for_lookup()))
}

/// Runtime settings sourced from environment variables (spec §6.3).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub run_queue_url: Option<String>,
    pub planner_llm_timeout_seconds: u64,
    pub planner_tool_timeout_seconds: u64,
    pub prompt_injection_filter_enabled: bool,
    pub webhook_secret: Option<String>,
    pub webhook_dedup_ttl_seconds: u64,
    pub webhook_max_concurrent_runs: usize,
    pub webhook_require_auth: bool,
    pub graceful_shutdown_timeout_seconds: u64,
    pub api_keys: Vec<String>,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_url: env_or("DATABASE_URL", "conduit.sqlite3"),
            run_queue_url: env::var("RUN_QUEUE_URL").ok().filter(|s| !s.is_empty()),
            planner_llm_timeout_seconds: env_parse("PLANNER_LLM_TIMEOUT_SECONDS", 60),
            planner_tool_timeout_seconds: env_parse("PLANNER_TOOL_TIMEOUT_SECONDS", 30),
            prompt_injection_filter_enabled: env_parse("PROMPT_INJECTION_FILTER_ENABLED", true),
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            webhook_dedup_ttl_seconds: env_parse("WEBHOOK_DEDUP_TTL_SECONDS", 300),
            webhook_max_concurrent_runs: env_parse("WEBHOOK_MAX_CONCURRENT_RUNS", 5),
            webhook_require_auth: env_parse("WEBHOOK_REQUIRE_AUTH", true),
            graceful_shutdown_timeout_seconds: env_parse("GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS", 30),
            api_keys: env::var("API_KEYS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_env_var() {
        env::set_var("CONDUIT_TEST_VAR", "secret123");
        let out = expand_env_vars("token: ${CONDUIT_TEST_VAR}");
        assert_eq!(out, "token: secret123");
        env::remove_var("CONDUIT_TEST_VAR");
    }

    #[test]
    fn missing_var_expands_to_empty() {
        env::remove_var("CONDUIT_DEFINITELY_UNSET");
        let out = expand_env_vars("token: ${CONDUIT_DEFINITELY_UNSET}");
        assert_eq!(out, "token: ");
    }

    #[test]
    fn agent_profile_enabled_semantics_differ_for_lookup_vs_listing() {
        let p = AgentProfileConfig {
            id: "a".into(),
            enabled: None,
            name: None,
            description: None,
            role_prompt: String::new(),
            allowed_mcp_servers: vec![],
            approval_required_tools: vec![],
        };
        assert!(p.is_enabled_for_lookup());
        assert!(!p.is_enabled_for_listing());
    }

    #[test]
    fn wildcard_allows_any_server() {
        let p = AgentProfileConfig {
            id: "a".into(),
            enabled: Some(true),
            name: None,
            description: None,
            role_prompt: String::new(),
            allowed_mcp_servers: vec!["*".into()],
            approval_required_tools: vec![],
        };
        assert!(p.allows_server("anything"));
    }

    #[test]
    fn nonexistent_config_dir_yields_empty_list() {
        env::set_var("CONDUIT_CONFIG_DIR", "/nonexistent/conduit/config/dir");
        let servers = load_tool_servers().unwrap();
        assert!(servers.is_empty());
        env::remove_var("CONDUIT_CONFIG_DIR");
    }
}
