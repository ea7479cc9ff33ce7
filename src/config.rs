//! Configuration parsing and validation for trae-proxy.
//!
//! Configuration comes from an optional TOML file. String values in the
//! `[upstream]` section may reference environment variables as `${VAR}`, and
//! the conventional `TRAE_*` variables (plus `PORT`) override whatever the
//! file says. Those variables may also come from a `.env` file; the process
//! environment wins over it.

use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Env file read before the `TRAE_*` overrides are applied.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Default vendor API base URL.
pub const DEFAULT_BASE_URL: &str = "https://trae-api-sg.mchost.guru";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Vendor endpoint and the device identity sent with every upstream call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the vendor API, without the `/api/ide/v1` suffix
    pub base_url: String,
    pub app_id: String,
    pub device_brand: String,
    pub device_cpu: String,
    pub device_id: String,
    pub device_type: String,
    pub ide_version: String,
    pub ide_version_code: String,
    pub ide_version_type: String,
    pub machine_id: String,
    pub os_version: String,
    /// TCP connect timeout in seconds. Responses themselves are not timed out.
    pub connect_timeout_secs: u64,
    /// `owned_by` value reported by `/v1/models`
    pub owned_by: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id: String::new(),
            device_brand: String::new(),
            device_cpu: String::new(),
            device_id: String::new(),
            device_type: String::new(),
            ide_version: String::new(),
            ide_version_code: String::new(),
            ide_version_type: String::new(),
            machine_id: String::new(),
            os_version: String::new(),
            connect_timeout_secs: 30,
            owned_by: "trae".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Identity fields paired with the environment variable that overrides each.
    fn fields_mut(&mut self) -> [(&'static str, &mut String); 11] {
        [
            ("TRAE_API_BASE_URL", &mut self.base_url),
            ("TRAE_APP_ID", &mut self.app_id),
            ("TRAE_DEVICE_BRAND", &mut self.device_brand),
            ("TRAE_DEVICE_CPU", &mut self.device_cpu),
            ("TRAE_DEVICE_ID", &mut self.device_id),
            ("TRAE_DEVICE_TYPE", &mut self.device_type),
            ("TRAE_IDE_VERSION", &mut self.ide_version),
            ("TRAE_IDE_VERSION_CODE", &mut self.ide_version_code),
            ("TRAE_IDE_VERSION_TYPE", &mut self.ide_version_type),
            ("TRAE_MACHINE_ID", &mut self.machine_id),
            ("TRAE_OS_VERSION", &mut self.os_version),
        ]
    }

    /// Identity headers sent on every upstream call, paired with their values.
    pub fn identity_headers(&self) -> [(&'static str, &str); 10] {
        [
            ("x-app-id", &self.app_id),
            ("x-device-brand", &self.device_brand),
            ("x-device-cpu", &self.device_cpu),
            ("x-device-id", &self.device_id),
            ("x-device-type", &self.device_type),
            ("x-ide-version", &self.ide_version),
            ("x-ide-version-code", &self.ide_version_code),
            ("x-ide-version-type", &self.ide_version_type),
            ("x-machine-id", &self.machine_id),
            ("x-os-version", &self.os_version),
        ]
    }
}

/// Settings that shape the translated chat payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Locale tagged on history entries and sent in `variables`
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    "zh-cn".to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Variables read from a dotenv-style file.
///
/// Lookups prefer the process environment; the file only fills in variables
/// that are not set at all.
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    vars: HashMap<String, String>,
}

impl EnvFile {
    /// Read `path`. A missing file yields an empty set.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let env = Self::parse(&content);
                tracing::debug!(path = %path.display(), vars = env.vars.len(), "Loaded env file");
                Ok(env)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Parse `KEY=value` lines. Blank lines, `#` comments, lines without `=`
    /// and empty values are skipped; surrounding quotes are stripped.
    pub fn parse(content: &str) -> Self {
        let mut vars = HashMap::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(['"', '\'']);
            if value.is_empty() {
                continue;
            }
            vars.entry(key.trim().to_string())
                .or_insert_with(|| value.to_string());
        }
        Self { vars }
    }

    /// Process environment first, then the file.
    pub fn lookup(&self, name: &str) -> Option<String> {
        env_lookup(name).or_else(|| self.vars.get(name).cloned())
    }
}

impl Config {
    /// Load configuration for `serve`, reading `.env` from the working directory.
    ///
    /// A missing file falls back to defaults; environment overrides and
    /// validation apply either way.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let env = EnvFile::read(DEFAULT_ENV_FILE)?;
        Self::load_with_env(path, &env)
    }

    /// Like [`load`](Self::load), with an explicit env file.
    pub fn load_with_env(path: impl AsRef<Path>, env: &EnvFile) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file_with_env(path, env)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Config::default().finish_with(|name| env.lookup(name))
        }
    }

    /// Load configuration from a TOML file, reading `.env` from the working directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let env = EnvFile::read(DEFAULT_ENV_FILE)?;
        Self::from_file_with_env(path, &env)
    }

    /// Load configuration from a TOML file with an explicit env file.
    pub fn from_file_with_env(path: impl AsRef<Path>, env: &EnvFile) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str_with(&content, |name| env.lookup(name))
    }

    /// Parse configuration from a TOML string with a custom variable lookup.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config: Config = toml::from_str(content)?;
        config.finish_with(lookup)
    }

    /// Expand `${VAR}` references, apply environment overrides, then validate.
    fn finish_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, value) in self.upstream.fields_mut() {
            *value = expand_env_vars_with(value.as_str(), var, &lookup)?;
        }
        self.apply_env_overrides(&lookup);
        self.validate()?;
        Ok(self)
    }

    /// Apply the conventional `TRAE_*` and `PORT` variables. Empty values are ignored.
    fn apply_env_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        for (var, value) in self.upstream.fields_mut() {
            if let Some(v) = non_empty(var) {
                *value = v;
            }
        }
        if let Some(locale) = non_empty("TRAE_LOCALE") {
            self.chat.locale = locale;
        }
        if let Some(port) = non_empty("PORT") {
            self.server.listen = format!("0.0.0.0:{}", port);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.upstream.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                base
            )));
        }

        if self.chat.locale.trim().is_empty() {
            return Err(ConfigError::Validation(
                "chat.locale must not be empty".to_string(),
            ));
        }

        self.listen_addr()?;

        for (name, value) in self.upstream.identity_headers() {
            if HeaderValue::from_str(value).is_err() {
                return Err(ConfigError::Validation(format!(
                    "upstream value for header '{}' contains characters not allowed in HTTP headers",
                    name
                )));
            }
        }

        if self.upstream.app_id.is_empty() || self.upstream.device_id.is_empty() {
            tracing::warn!("Upstream identity is incomplete - the vendor may reject requests");
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "server.listen is not a socket address: '{}'",
                self.server.listen
            ))
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = Config::parse_str_with("", no_env).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8000");
        assert_eq!(config.upstream.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.upstream.connect_timeout_secs, 30);
        assert_eq!(config.upstream.owned_by, "trae");
        assert_eq!(config.chat.locale, "zh-cn");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [upstream]
            base_url = "http://localhost:1234"
            app_id = "app"
            device_brand = "brand"
            device_cpu = "cpu"
            device_id = "dev-1"
            device_type = "mac"
            ide_version = "1.2.3"
            ide_version_code = "20250101"
            ide_version_type = "stable"
            machine_id = "machine"
            os_version = "14.0"
            connect_timeout_secs = 5
            owned_by = "vendor"

            [chat]
            locale = "en"

            [logging]
            level = "debug"
        "#;

        let config = Config::parse_str_with(toml, no_env).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.upstream.device_id, "dev-1");
        assert_eq!(config.upstream.ide_version_code, "20250101");
        assert_eq!(config.upstream.connect_timeout_secs, 5);
        assert_eq!(config.upstream.owned_by, "vendor");
        assert_eq!(config.chat.locale, "en");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let toml = r#"
            [upstream]
            base_url = "ftp://example.com"
        "#;
        let err = Config::parse_str_with(toml, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_empty_locale_rejected() {
        let toml = r#"
            [chat]
            locale = "  "
        "#;
        let err = Config::parse_str_with(toml, no_env).unwrap_err();
        assert!(err.to_string().contains("locale"));
    }

    #[test]
    fn test_bad_listen_rejected() {
        let toml = r#"
            [server]
            listen = "not-an-address"
        "#;
        let err = Config::parse_str_with(toml, no_env).unwrap_err();
        assert!(err.to_string().contains("server.listen"));
    }

    #[test]
    fn test_env_file_parse() {
        let env = EnvFile::parse(
            r#"
# device identity
TRAE_APP_ID = "app-quoted"
TRAE_DEVICE_ID='dev-single'
TRAE_MACHINE_ID=machine
TRAE_OS_VERSION=
not a pair
TRAE_APP_ID=second
"#,
        );

        assert_eq!(env.vars.get("TRAE_APP_ID").unwrap(), "app-quoted");
        assert_eq!(env.vars.get("TRAE_DEVICE_ID").unwrap(), "dev-single");
        assert_eq!(env.vars.get("TRAE_MACHINE_ID").unwrap(), "machine");
        assert!(!env.vars.contains_key("TRAE_OS_VERSION"));
        assert_eq!(env.vars.len(), 3);
    }

    #[test]
    fn test_identity_value_must_be_header_safe() {
        let toml = "[upstream]\ndevice_id = \"dev\\u0001id\"\n";
        let err = Config::parse_str_with(toml, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("x-device-id"));
    }

    #[test]
    fn test_env_reference_expanded_in_upstream_field() {
        let toml = r#"
            [upstream]
            machine_id = "${MY_MACHINE}"
        "#;
        let lookup = |name: &str| match name {
            "MY_MACHINE" => Some("m-42".to_string()),
            _ => None,
        };
        let config = Config::parse_str_with(toml, lookup).unwrap();
        assert_eq!(config.upstream.machine_id, "m-42");
    }

    #[test]
    fn test_missing_env_reference_fails() {
        let toml = r#"
            [upstream]
            app_id = "${NOPE}"
        "#;
        let err = Config::parse_str_with(toml, no_env).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NOPE"), "Error should name the variable: {}", msg);
        assert!(msg.contains("TRAE_APP_ID"), "Error should name the field: {}", msg);
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [upstream]
            app_id = "from-file"
            device_id = "dev-file"

            [chat]
            locale = "en"
        "#;
        let lookup = |name: &str| match name {
            "TRAE_APP_ID" => Some("from-env".to_string()),
            "TRAE_DEVICE_ID" => Some("".to_string()),
            "TRAE_LOCALE" => Some("ja".to_string()),
            "TRAE_API_BASE_URL" => Some("http://127.0.0.1:4000".to_string()),
            "PORT" => Some("8123".to_string()),
            _ => None,
        };
        let config = Config::parse_str_with(toml, lookup).unwrap();
        assert_eq!(config.upstream.app_id, "from-env");
        // Empty values do not override
        assert_eq!(config.upstream.device_id, "dev-file");
        assert_eq!(config.chat.locale, "ja");
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:4000");
        assert_eq!(config.server.listen, "0.0.0.0:8123");
    }

    // ── Expansion tests ──

    #[test]
    fn test_expand_multiple_vars() {
        let lookup = |name: &str| match name {
            "SCHEME" => Some("https".to_string()),
            "HOST" => Some("example.com".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${SCHEME}://${HOST}", "base_url", lookup).unwrap();
        assert_eq!(result, "https://example.com");
    }

    #[test]
    fn test_expand_no_vars_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("literal-value", "app_id", lookup).unwrap();
        assert_eq!(result, "literal-value");
    }

    #[test]
    fn test_expand_unclosed_brace_fails() {
        let result = expand_env_vars_with("${UNCLOSED", "app_id", no_env);
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(err.contains("unclosed"), "Error should mention unclosed brace");
    }

    #[test]
    fn test_expand_empty_var_name_fails() {
        let result = expand_env_vars_with("${}", "app_id", no_env);
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(err.contains("empty"), "Error should mention empty variable name");
    }

    #[test]
    fn test_expand_dollar_without_brace_passthrough() {
        let result = expand_env_vars_with("$NOT_A_VAR", "app_id", no_env).unwrap();
        assert_eq!(result, "$NOT_A_VAR");
    }
}
