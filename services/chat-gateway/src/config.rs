//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the LLM_API_KEYS env var or `llm.keys_file`,
//! never from the TOML itself, so the config file can be committed.

use common::ApiKey;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use key_pool::DispatchPolicy;
use llm_client::ChatSettings;

/// Env var holding a comma-separated list of API keys.
pub const KEYS_ENV_VAR: &str = "LLM_API_KEYS";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Resolved from env or keys_file, in configured order
    #[serde(skip)]
    pub api_keys: Vec<ApiKey>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Per-attempt timeout for provider calls
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Provider and generation settings
#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// File with one API key per line (`#` starts a comment)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
            keys_file: None,
        }
    }
}

/// Retry behaviour for transient provider failures
#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_transient_delay_ms")]
    pub transient_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: default_max_transient_retries(),
            transient_delay_ms: default_transient_delay_ms(),
        }
    }
}

/// Chat session settings
#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// First assistant message of every new session
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            idle_ttl_secs: default_idle_ttl(),
            max_sessions: default_max_sessions(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_base_url() -> String {
    llm_client::openai::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    llm_client::openai::DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_transient_delay_ms() -> u64 {
    2000
}

fn default_greeting() -> String {
    "Hi! Send me any problem and we'll work through it together.".to_string()
}

fn default_idle_ttl() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file, then resolve API keys.
    ///
    /// Key resolution order:
    /// 1. LLM_API_KEYS env var (comma-separated)
    /// 2. keys_file path from config
    ///
    /// Blank entries are skipped. Ending up with no keys is a fatal error.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        config.api_keys = match std::env::var(KEYS_ENV_VAR) {
            Ok(raw) => parse_keys(raw.split(',')),
            Err(_) => match &config.llm.keys_file {
                Some(keys_file) => {
                    let raw = std::fs::read_to_string(keys_file).map_err(|source| {
                        common::Error::KeysFile {
                            path: keys_file.clone(),
                            source,
                        }
                    })?;
                    parse_keys(raw.lines().filter(|l| !l.trim_start().starts_with('#')))
                }
                None => Vec::new(),
            },
        };

        if config.api_keys.is_empty() {
            return Err(common::Error::Config(format!(
                "no API keys configured: set {KEYS_ENV_VAR} or llm.keys_file"
            )));
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.llm.base_url
            )));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(common::Error::Config(format!(
                "temperature must be between 0.0 and 2.0, got: {}",
                self.llm.temperature
            )));
        }
        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(common::Error::Config(
                "max_sessions must be greater than 0".into(),
            ));
        }
        if self.sessions.idle_ttl_secs == 0 || self.sessions.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "idle_ttl_secs and sweep_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("keyring-chat.toml")
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            system_prompt: self.llm.system_prompt.clone(),
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_transient_retries: self.dispatch.max_transient_retries,
            transient_delay: Duration::from_millis(self.dispatch.transient_delay_ms),
        }
    }
}

fn parse_keys<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<ApiKey> {
    raw.map(ApiKey::new).filter(|k| !k.is_blank()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("keyring-chat.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn minimal_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"
"#
    }

    fn exposed(config: &Config) -> Vec<&str> {
        config.api_keys.iter().map(|k| k.expose()).collect()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());
        unsafe { set_env(KEYS_ENV_VAR, "gsk_a") };

        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV_VAR) };

        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.llm.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.dispatch.max_transient_retries, 3);
        assert_eq!(config.dispatch.transient_delay_ms, 2000);
        assert_eq!(config.sessions.max_sessions, 1000);
        assert_eq!(exposed(&config), vec!["gsk_a"]);
    }

    #[test]
    fn full_config_overrides_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "0.0.0.0:9000"
timeout_secs = 30
max_connections = 50

[llm]
base_url = "https://openrouter.ai/api/v1"
model = "meta-llama/llama-3.3-70b-instruct"
temperature = 0.7
max_tokens = 1024
system_prompt = "You are an elite math teacher."

[dispatch]
max_transient_retries = 5
transient_delay_ms = 500

[sessions]
greeting = "Salut!"
idle_ttl_secs = 120
max_sessions = 10
sweep_interval_secs = 5
"#,
        );
        unsafe { set_env(KEYS_ENV_VAR, "k1,k2") };

        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV_VAR) };

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.llm.max_tokens, Some(1024));
        assert_eq!(
            config.chat_settings().system_prompt.as_deref(),
            Some("You are an elite math teacher.")
        );
        let policy = config.dispatch_policy();
        assert_eq!(policy.max_transient_retries, 5);
        assert_eq!(policy.transient_delay, Duration::from_millis(500));
        assert_eq!(config.sessions.greeting, "Salut!");
        assert_eq!(config.sessions.max_sessions, 10);
    }

    #[test]
    fn keys_from_env_keep_order_and_skip_blanks() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());
        unsafe { set_env(KEYS_ENV_VAR, " k1 , ,k2,k3, ") };

        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV_VAR) };

        assert_eq!(exposed(&config), vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn keys_from_file_skip_comments() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let keys_path = dir.path().join("keys");
        std::fs::write(&keys_path, "# primary\nkey-one\n\n  # backup\nkey-two\n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"
[server]
listen_addr = "127.0.0.1:8080"

[llm]
keys_file = "{}"
"#,
                keys_path.display()
            ),
        );
        unsafe { remove_env(KEYS_ENV_VAR) };

        let config = Config::load(&path).unwrap();
        assert_eq!(exposed(&config), vec!["key-one", "key-two"]);
    }

    #[test]
    fn env_keys_override_keys_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[llm]
keys_file = "/nonexistent/keys"
"#,
        );
        unsafe { set_env(KEYS_ENV_VAR, "from-env") };

        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV_VAR) };

        assert_eq!(
            exposed(&config),
            vec!["from-env"],
            "LLM_API_KEYS must win over a keys_file, even a missing one"
        );
    }

    #[test]
    fn missing_keys_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[llm]
keys_file = "/nonexistent/keys"
"#,
        );
        unsafe { remove_env(KEYS_ENV_VAR) };

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::KeysFile { .. }), "got: {err}");
    }

    #[test]
    fn no_keys_is_fatal() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, minimal_toml());
        unsafe { set_env(KEYS_ENV_VAR, " , ") };

        let result = Config::load(&path);
        unsafe { remove_env(KEYS_ENV_VAR) };

        let err = result.unwrap_err().to_string();
        assert!(err.contains("no API keys configured"), "got: {err}");
    }

    #[test]
    fn invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[llm]
base_url = "api.groq.com/openai/v1"
"#,
        );
        unsafe { set_env(KEYS_ENV_VAR, "k") };

        let result = Config::load(&path);
        unsafe { remove_env(KEYS_ENV_VAR) };

        let err = result.unwrap_err().to_string();
        assert!(err.contains("base_url must start with http"), "got: {err}");
    }

    #[test]
    fn out_of_range_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        unsafe { set_env(KEYS_ENV_VAR, "k") };

        for (name, body) in [
            ("temperature", "[llm]\ntemperature = 3.5\n"),
            ("timeout", "[server]\nlisten_addr = \"127.0.0.1:1\"\ntimeout_secs = 0\n"),
            ("max_sessions", "[sessions]\nmax_sessions = 0\n"),
        ] {
            let toml = if body.starts_with("[server]") {
                body.to_string()
            } else {
                format!("{}\n{body}", minimal_toml())
            };
            let path = write_config(&dir, &toml);
            assert!(Config::load(&path).is_err(), "{name} must be rejected");
        }

        unsafe { remove_env(KEYS_ENV_VAR) };
    }

    #[test]
    fn missing_file_and_invalid_toml_fail() {
        assert!(Config::load(Path::new("/nonexistent/keyring-chat.toml")).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::Toml(_)));
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("keyring-chat.toml"));
    }
}
