//! Environment-driven configuration.

use std::str::FromStr;

use tracing::{info, warn};

pub const ENV_ALLOW_RAW_OUTPUT: &str = "MDS_ALLOW_RAW_OUTPUT";
pub const ENV_SANDBOX_MAX_MEMORY: &str = "MDS_SANDBOX_MAX_MEMORY";
pub const ENV_SANDBOX_MAX_STACK: &str = "MDS_SANDBOX_MAX_STACK";

const DEFAULT_SANDBOX_MAX_MEMORY: usize = 64 * 1024 * 1024;
const DEFAULT_SANDBOX_MAX_STACK: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Let `outraw` widgets receive unrendered HTML.
    pub allow_raw_output: bool,
    /// Memory hard limit per sandbox; `None` is unlimited.
    pub sandbox_max_memory: Option<usize>,
    pub sandbox_max_stack: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allow_raw_output: false,
            sandbox_max_memory: Some(DEFAULT_SANDBOX_MAX_MEMORY),
            sandbox_max_stack: DEFAULT_SANDBOX_MAX_STACK,
        }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from `lookup`, falling back to defaults (with a
    /// warning) on unparsable values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let (allow_raw_output, allow_raw_output_source) = resolve(
            &lookup,
            ENV_ALLOW_RAW_OUTPUT,
            defaults.allow_raw_output,
            |raw| Flag::from_str(raw).map(|f| f.0),
        );

        let (sandbox_max_memory, sandbox_max_memory_source) = resolve(
            &lookup,
            ENV_SANDBOX_MAX_MEMORY,
            defaults.sandbox_max_memory,
            |raw| match raw.parse::<usize>() {
                Ok(0) => Ok(None),
                Ok(n) => Ok(Some(n)),
                Err(e) => Err(e.to_string()),
            },
        );

        let (sandbox_max_stack, sandbox_max_stack_source) = resolve(
            &lookup,
            ENV_SANDBOX_MAX_STACK,
            defaults.sandbox_max_stack,
            |raw| raw.parse::<usize>().map_err(|e| e.to_string()),
        );

        info!(
            allow_raw_output,
            allow_raw_output_source,
            sandbox_max_memory = sandbox_max_memory.map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
            sandbox_max_memory_source,
            sandbox_max_stack,
            sandbox_max_stack_source,
            "resolved configuration"
        );

        Self {
            allow_raw_output,
            sandbox_max_memory,
            sandbox_max_stack,
        }
    }
}

fn resolve<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> (T, &'static str) {
    match lookup(key) {
        None => (default, "default"),
        Some(raw) if raw.trim().is_empty() => (default, "default_env_empty"),
        Some(raw) => match parse(raw.trim()) {
            Ok(value) => (value, "env"),
            Err(err) => {
                warn!(key, %raw, %err, "invalid value; falling back to default");
                (default, "default_invalid_env")
            }
        },
    }
}

struct Flag(bool);

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Self(true)),
            "0" | "false" | "no" | "off" => Ok(Self(false)),
            other => Err(format!("expected a boolean, got `{other}`")),
        }
    }
}
