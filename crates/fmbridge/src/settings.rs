use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::engine::GenerationOptions;
use crate::errors::{BridgeError, BridgeResult};
use crate::proxy::DEFAULT_PLACEHOLDER;

/// Text of a reply whose turn ended in tool calls
pub const DEFAULT_TOOL_CALL_TEXT: &str = "Tool calls requested.";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationSettings {
    /// Used when the caller leaves temperature at the engine default
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl GenerationSettings {
    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolSettings {
    /// Returned to the engine by every proxy tool
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Reply text when the turn produced tool calls
    #[serde(default = "default_tool_call_text")]
    pub tool_call_text: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            placeholder: default_placeholder(),
            tool_call_text: default_tool_call_text(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    /// Ask the engine to relax its content guardrails. Engines that offer no
    /// such option ignore it.
    #[serde(default)]
    pub permissive_guardrails: bool,
}

impl Settings {
    /// Defaults overlaid with `FMBRIDGE_*` environment variables
    pub fn new() -> BridgeResult<Self> {
        Self::load(None)
    }

    /// Defaults, then a TOML file, then environment variables
    pub fn from_file<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        Self::load(Some(path.as_ref()))
    }

    fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let mut builder = Config::builder()
            .set_default("stream.channel_capacity", default_channel_capacity() as i64)?
            .set_default("tools.placeholder", default_placeholder())?
            .set_default("tools.tool_call_text", default_tool_call_text())?
            .set_default("permissive_guardrails", false)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("FMBRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize().map_err(|e| {
            tracing::debug!("Configuration error: {:?}", &e);
            BridgeError::from(e)
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.stream.channel_capacity == 0 {
            return Err(BridgeError::Config(
                "stream.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_channel_capacity() -> usize {
    32
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

fn default_tool_call_text() -> String {
    DEFAULT_TOOL_CALL_TEXT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("FMBRIDGE_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.stream.channel_capacity, 32);
        assert_eq!(settings.tools.placeholder, DEFAULT_PLACEHOLDER);
        assert_eq!(settings.generation.options(), GenerationOptions::default());
        assert!(!settings.permissive_guardrails);
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("FMBRIDGE_GENERATION__TEMPERATURE", "0.4");
        env::set_var("FMBRIDGE_GENERATION__MAX_TOKENS", "512");
        env::set_var("FMBRIDGE_STREAM__CHANNEL_CAPACITY", "8");
        env::set_var("FMBRIDGE_PERMISSIVE_GUARDRAILS", "true");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.generation.temperature, Some(0.4));
        assert_eq!(settings.generation.max_tokens, Some(512));
        assert_eq!(settings.stream.channel_capacity, 8);
        assert!(settings.permissive_guardrails);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_file_then_environment() {
        clean_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[tools]\nplaceholder = \"queued\"\n\n[generation]\ntemperature = 0.9"
        )
        .unwrap();
        env::set_var("FMBRIDGE_GENERATION__TEMPERATURE", "0.1");

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.tools.placeholder, "queued");
        assert_eq!(settings.tools.tool_call_text, DEFAULT_TOOL_CALL_TEXT);
        assert_eq!(settings.generation.temperature, Some(0.1));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_invalid_settings() {
        clean_env();
        env::set_var("FMBRIDGE_STREAM__CHANNEL_CAPACITY", "0");
        assert!(matches!(Settings::new(), Err(BridgeError::Config(_))));

        env::set_var("FMBRIDGE_STREAM__CHANNEL_CAPACITY", "lots");
        assert!(matches!(Settings::new(), Err(BridgeError::Config(_))));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        clean_env();
        let result = Settings::from_file("/nonexistent/fmbridge.toml");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
