//! Engine-wide configuration: defaults for timeouts, retry, the mock
//! server, and the debug mailbox, plus a `${ENV_*}`/`${AMBER_*}`-style
//! variable resolution pass over loaded flow documents (kept from the
//! engine's original variable-resolver pattern, generalized from
//! per-engine parameters to arbitrary JSON config values).

use anyhow::{anyhow, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineCoreConfig {
    pub default_step_timeout_ms: u64,
    pub default_retry: RetryDefaults,
    pub mock_server: MockServerDefaults,
    pub debug_mailbox_capacity: usize,
    pub strict_unresolved_references: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryDefaults {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        RetryDefaults { max_attempts: 1, delay_ms: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MockServerDefaults {
    pub default_delay_ms: u64,
    pub enable_cors: bool,
    pub enable_logging: bool,
    pub record_requests: bool,
}

impl Default for MockServerDefaults {
    fn default() -> Self {
        MockServerDefaults {
            default_delay_ms: 0,
            enable_cors: true,
            enable_logging: true,
            record_requests: false,
        }
    }
}

impl Default for EngineCoreConfig {
    fn default() -> Self {
        EngineCoreConfig {
            default_step_timeout_ms: 30_000,
            default_retry: RetryDefaults::default(),
            mock_server: MockServerDefaults::default(),
            debug_mailbox_capacity: 16,
            strict_unresolved_references: false,
        }
    }
}

/// Load engine configuration from a JSON/YAML string, falling back to
/// defaults for any field the document omits.
pub fn load_engine_core_config(content: &str) -> Result<EngineCoreConfig> {
    if content.trim().is_empty() {
        return Ok(EngineCoreConfig::default());
    }
    let config: EngineCoreConfig = serde_yaml::from_str(content)
        .or_else(|_| serde_json::from_str(content))
        .map_err(|e| anyhow!("failed to parse engine config: {}", e))?;
    Ok(config)
}

pub trait VariableResolver: Send + Sync {
    fn is_resolvable(&self, key: &str) -> bool;
    fn resolve(&self, key: &str) -> Result<String>;
}

pub struct EnvVarResolver;
pub struct AmberVarResolver;
pub struct CredentialResolver {
    credentials: HashMap<String, String>,
}

impl CredentialResolver {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        CredentialResolver { credentials }
    }
}

impl VariableResolver for CredentialResolver {
    fn is_resolvable(&self, key: &str) -> bool {
        key.starts_with("CREDENTIAL_")
    }

    fn resolve(&self, key: &str) -> Result<String> {
        let credential_key = &key[11..];
        self.credentials
            .get(credential_key)
            .cloned()
            .ok_or_else(|| anyhow!("failed to find credential '{}'", credential_key))
    }
}

impl VariableResolver for EnvVarResolver {
    fn is_resolvable(&self, key: &str) -> bool {
        key.starts_with("ENV_")
    }

    fn resolve(&self, key: &str) -> Result<String> {
        let env_key = &key[4..];
        env::var(env_key).map_err(|e| anyhow!("failed to find environment variable '{}': {}", env_key, e))
    }
}

impl VariableResolver for AmberVarResolver {
    fn is_resolvable(&self, key: &str) -> bool {
        key.starts_with("AMBER_")
    }

    fn resolve(&self, key: &str) -> Result<String> {
        let env_key = &key[6..];
        if !env_key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(anyhow!("invalid key format: {}", key));
        }
        let amber_path = which::which("amber").map_err(|_| anyhow!("amber command not found in PATH"))?;
        let output = std::process::Command::new(amber_path)
            .arg("print")
            .env_clear()
            .output()
            .map_err(|e| anyhow!("failed to execute amber command: {}", e))?;
        if !output.status.success() {
            return Err(anyhow!("amber command failed: {}", String::from_utf8_lossy(&output.stderr)));
        }
        let stdout = String::from_utf8(output.stdout).map_err(|e| anyhow!("invalid utf-8 in amber output: {}", e))?;
        for line in stdout.lines() {
            if line.contains(env_key) {
                if let Some((_, value)) = line.split_once('=') {
                    return Ok(value.trim().trim_matches('"').to_string());
                }
            }
        }
        Err(anyhow!("amber key not found: {}", env_key))
    }
}

/// Resolves `ENV_*`/`AMBER_*`/`CREDENTIAL_*`-prefixed string leaves anywhere
/// in a loaded JSON document (a flow document, or this config itself).
pub struct ConfigVariableResolver {
    resolvers: Vec<Arc<dyn VariableResolver>>,
}

impl ConfigVariableResolver {
    pub fn new(credentials: &HashMap<String, String>) -> Self {
        ConfigVariableResolver {
            resolvers: vec![
                Arc::new(EnvVarResolver),
                Arc::new(AmberVarResolver),
                Arc::new(CredentialResolver::new(credentials.clone())),
            ],
        }
    }

    pub fn resolve_in_place(&self, value: &mut Value) -> Result<()> {
        match value {
            Value::String(s) => {
                for resolver in &self.resolvers {
                    if resolver.is_resolvable(s) {
                        debug!("resolving config variable reference");
                        *s = resolver.resolve(s)?;
                        return Ok(());
                    }
                }
                Ok(())
            }
            Value::Object(map) => {
                for v in map.values_mut() {
                    self.resolve_in_place(v)?;
                }
                Ok(())
            }
            Value::Array(arr) => {
                for item in arr.iter_mut() {
                    self.resolve_in_place(item)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timeouts() {
        let cfg = EngineCoreConfig::default();
        assert_eq!(cfg.default_step_timeout_ms, 30_000);
        assert_eq!(cfg.debug_mailbox_capacity, 16);
    }

    #[test]
    fn env_resolver_reads_environment() {
        std::env::set_var("FLOW_CORE_TEST_VAR", "hello");
        let resolver = EnvVarResolver;
        assert_eq!(resolver.resolve("ENV_FLOW_CORE_TEST_VAR").unwrap(), "hello");
    }

    #[test]
    fn credential_resolver_looks_up_by_stripped_key() {
        let mut creds = HashMap::new();
        creds.insert("DB_PASSWORD".to_string(), "secret".to_string());
        let resolver = CredentialResolver::new(creds);
        assert_eq!(resolver.resolve("CREDENTIAL_DB_PASSWORD").unwrap(), "secret");
    }

    #[test]
    fn loads_yaml_config_with_partial_overrides() {
        let cfg = load_engine_core_config("default_step_timeout_ms: 5000\n").unwrap();
        assert_eq!(cfg.default_step_timeout_ms, 5000);
        assert_eq!(cfg.debug_mailbox_capacity, 16);
    }
}
