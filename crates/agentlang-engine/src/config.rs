// ABOUTME: Layered run configuration: definition-set defaults, environment overrides, per-run options.
// ABOUTME: Resolves the three layers into the EffectiveConfig that a single run executes under.

use std::time::Duration;

use thiserror::Error;

use agentlang_core::GlobalConfig;

/// Errors that can occur while loading configuration overrides.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} is not a valid {expected}: {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be at least 1")]
    ZeroIterations(&'static str),
}

/// Overrides read from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub mock: Option<bool>,
    pub max_iterations: Option<u32>,
    pub default_retry: Option<u32>,
}

impl EnvOverrides {
    /// Load overrides from environment variables.
    ///
    /// Environment variables:
    /// - AGENTLANG_MOCK_LLM: force the mock provider (true/false, 1/0, yes/no)
    /// - AGENTLANG_MAX_ITERATIONS: provider-call cap per agent attempt
    /// - AGENTLANG_DEFAULT_RETRY: retry count when no policy is declared
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EnvOverrides::from_env`] but reading from an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mock = read("AGENTLANG_MOCK_LLM")
            .map(|v| parse_bool("AGENTLANG_MOCK_LLM", &v))
            .transpose()?;

        let max_iterations = read("AGENTLANG_MAX_ITERATIONS")
            .map(|v| parse_u32("AGENTLANG_MAX_ITERATIONS", &v))
            .transpose()?;
        if max_iterations == Some(0) {
            return Err(ConfigError::ZeroIterations("AGENTLANG_MAX_ITERATIONS"));
        }

        let default_retry = read("AGENTLANG_DEFAULT_RETRY")
            .map(|v| parse_u32("AGENTLANG_DEFAULT_RETRY", &v))
            .transpose()?;

        Ok(Self {
            mock,
            max_iterations,
            default_retry,
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            expected: "boolean",
            value: value.to_string(),
        }),
    }
}

fn parse_u32(name: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        expected: "non-negative integer",
        value: value.to_string(),
    })
}

/// Per-run overrides supplied by the caller. These win over everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mock: Option<bool>,
    pub max_iterations: Option<u32>,
    pub default_retry: Option<u32>,
}

impl RunOptions {
    pub fn mock(mut self, mock: bool) -> Self {
        self.mock = Some(mock);
        self
    }

    pub fn max_iterations(mut self, cap: u32) -> Self {
        self.max_iterations = Some(cap);
        self
    }

    pub fn default_retry(mut self, retry: u32) -> Self {
        self.default_retry = Some(retry);
        self
    }
}

/// The configuration one run executes under. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveConfig {
    pub mock: bool,
    pub max_iterations: u32,
    pub default_retry: u32,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub provider_timeout: Duration,
    pub tool_timeout: Duration,
}

impl EffectiveConfig {
    /// Merge the layers: per-run options over environment over definition defaults.
    pub fn resolve(
        global: &GlobalConfig,
        env: &EnvOverrides,
        run: &RunOptions,
    ) -> Result<Self, ConfigError> {
        let max_iterations = run
            .max_iterations
            .or(env.max_iterations)
            .unwrap_or(global.max_iterations);
        if max_iterations == 0 {
            return Err(ConfigError::ZeroIterations("max_iterations"));
        }

        Ok(Self {
            mock: run.mock.or(env.mock).unwrap_or(global.mock),
            max_iterations,
            default_retry: run
                .default_retry
                .or(env.default_retry)
                .unwrap_or(global.default_retry),
            default_temperature: global.default_temperature,
            default_max_tokens: global.default_max_tokens,
            provider_timeout: global.provider_timeout(),
            tool_timeout: global.tool_timeout(),
        })
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        let global = GlobalConfig::default();
        Self {
            mock: global.mock,
            max_iterations: global.max_iterations,
            default_retry: global.default_retry,
            default_temperature: global.default_temperature,
            default_max_tokens: global.default_max_tokens,
            provider_timeout: global.provider_timeout(),
            tool_timeout: global.tool_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_parse_known_variables() {
        let env = EnvOverrides::from_lookup(lookup(&[
            ("AGENTLANG_MOCK_LLM", "Yes"),
            ("AGENTLANG_MAX_ITERATIONS", "4"),
            ("AGENTLANG_DEFAULT_RETRY", " 2 "),
        ]))
        .unwrap();

        assert_eq!(env.mock, Some(true));
        assert_eq!(env.max_iterations, Some(4));
        assert_eq!(env.default_retry, Some(2));
    }

    #[test]
    fn overrides_reject_garbage() {
        let err =
            EnvOverrides::from_lookup(lookup(&[("AGENTLANG_MOCK_LLM", "maybe")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "AGENTLANG_MOCK_LLM", .. }
        ));

        let err =
            EnvOverrides::from_lookup(lookup(&[("AGENTLANG_MAX_ITERATIONS", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroIterations("AGENTLANG_MAX_ITERATIONS"));

        assert!(EnvOverrides::from_lookup(lookup(&[("AGENTLANG_DEFAULT_RETRY", "-1")])).is_err());
    }

    #[test]
    fn empty_values_are_ignored() {
        let env = EnvOverrides::from_lookup(lookup(&[("AGENTLANG_MOCK_LLM", "")])).unwrap();
        assert_eq!(env, EnvOverrides::default());
    }

    #[test]
    fn layers_resolve_run_over_env_over_definitions() {
        let global = GlobalConfig {
            max_iterations: 10,
            default_retry: 1,
            ..GlobalConfig::default()
        };
        let env = EnvOverrides {
            mock: Some(true),
            max_iterations: Some(5),
            default_retry: None,
        };
        let run = RunOptions::default().max_iterations(2);

        let config = EffectiveConfig::resolve(&global, &env, &run).unwrap();
        assert!(config.mock);
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.default_retry, 1);
        assert_eq!(config.provider_timeout, Duration::from_secs(120));

        let run = RunOptions::default().mock(false);
        let config = EffectiveConfig::resolve(&global, &env, &run).unwrap();
        assert!(!config.mock);
        assert_eq!(config.max_iterations, 5);
    }

    #[test]
    fn zero_iteration_cap_is_rejected() {
        let run = RunOptions::default().max_iterations(0);
        let err = EffectiveConfig::resolve(&GlobalConfig::default(), &EnvOverrides::default(), &run)
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroIterations("max_iterations"));
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe {
            std::env::set_var("AGENTLANG_MOCK_LLM", "1");
            std::env::remove_var("AGENTLANG_MAX_ITERATIONS");
            std::env::remove_var("AGENTLANG_DEFAULT_RETRY");
        }

        let env = EnvOverrides::from_env();

        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe {
            std::env::remove_var("AGENTLANG_MOCK_LLM");
        }

        assert_eq!(env.unwrap().mock, Some(true));
    }
}
