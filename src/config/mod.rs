use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::paths::Paths;

/// Bounds accepted for Revit server timeouts, in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 10;
pub const MAX_TIMEOUT_SECS: u64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// File this config was loaded from (not serialized)
    #[serde(skip)]
    pub file: PathBuf,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub revit: RevitConfig,

    #[serde(default)]
    pub capabilities: CapabilityDefaults,

    #[serde(default)]
    pub codegen: CodegenConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model used by the tool-calling assistant
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used by the code generator
    #[serde(default = "default_codegen_model")]
    pub codegen_model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens for LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tool steps a single plan may take before control returns to the user
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,

    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,

    #[serde(default)]
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,

    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,
}

/// Where the Revit add-in listens and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevitConfig {
    #[serde(default = "default_revit_base_url")]
    pub base_url: String,

    /// Timeout for `/execute` calls
    #[serde(default = "default_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Timeout for `/execute_code` calls (compilation happens server side)
    #[serde(default = "default_timeout_secs")]
    pub code_timeout_secs: u64,
}

/// Values filled in when the model (or a batch item) leaves a field out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityDefaults {
    #[serde(default)]
    pub create_wall: WallDefaults,

    #[serde(default)]
    pub add_window_to_wall: WindowDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallDefaults {
    /// "x,y,z" in feet
    #[serde(default = "default_start_point")]
    pub start_point: String,

    #[serde(default = "default_end_point")]
    pub end_point: String,

    #[serde(default = "default_wall_height")]
    pub height: f64,

    #[serde(default = "default_wall_width")]
    pub width: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDefaults {
    #[serde(default = "default_window_width")]
    pub window_width: f64,

    #[serde(default = "default_window_height")]
    pub window_height: f64,

    #[serde(default = "default_distance_from_start")]
    pub distance_from_start: f64,

    #[serde(default = "default_sill_height")]
    pub sill_height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenConfig {
    /// Print generated C# before it is sent to Revit
    #[serde(default = "default_true")]
    pub show_code: bool,

    /// Revit release the generated code targets
    #[serde(default = "default_revit_version")]
    pub revit_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_codegen_model() -> String {
    "claude-3-7-sonnet-latest".to_string()
}
fn default_max_tokens() -> usize {
    4096
}
fn default_max_plan_steps() -> usize {
    25
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_revit_base_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_timeout_secs() -> u64 {
    1000
}
fn default_start_point() -> String {
    "0,0,0".to_string()
}
fn default_end_point() -> String {
    "10,0,0".to_string()
}
fn default_wall_height() -> f64 {
    10.0
}
fn default_wall_width() -> f64 {
    0.5
}
fn default_window_width() -> f64 {
    3.0
}
fn default_window_height() -> f64 {
    4.0
}
fn default_distance_from_start() -> f64 {
    5.0
}
fn default_sill_height() -> f64 {
    3.0
}
fn default_true() -> bool {
    true
}
fn default_revit_version() -> String {
    "2024".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            codegen_model: default_codegen_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            max_plan_steps: default_max_plan_steps(),
        }
    }
}

impl Default for RevitConfig {
    fn default() -> Self {
        Self {
            base_url: default_revit_base_url(),
            tool_timeout_secs: default_timeout_secs(),
            code_timeout_secs: default_timeout_secs(),
        }
    }
}

impl RevitConfig {
    pub fn tool_timeout(&self) -> Duration {
        clamp_timeout("revit.tool_timeout_secs", self.tool_timeout_secs)
    }

    pub fn code_timeout(&self) -> Duration {
        clamp_timeout("revit.code_timeout_secs", self.code_timeout_secs)
    }
}

fn clamp_timeout(key: &str, secs: u64) -> Duration {
    let clamped = secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
    if clamped != secs {
        warn!(
            "{} = {} is outside {}..={}, using {}",
            key, secs, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, clamped
        );
    }
    Duration::from_secs(clamped)
}

impl Default for WallDefaults {
    fn default() -> Self {
        Self {
            start_point: default_start_point(),
            end_point: default_end_point(),
            height: default_wall_height(),
            width: default_wall_width(),
        }
    }
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            window_width: default_window_width(),
            window_height: default_window_height(),
            distance_from_start: default_distance_from_start(),
            sill_height: default_sill_height(),
        }
    }
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            show_code: default_true(),
            revit_version: default_revit_version(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from `path`, or from the XDG config file when `None`.
    /// A missing file is created from the commented template.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).to_string()),
            None => {
                let paths = Paths::resolve()?;
                paths.ensure_dirs()?;
                paths.config_file()
            }
        };

        if !path.exists() {
            let config = Config {
                file: path,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.file = path;

        Ok(config)
    }

    /// Parse TOML text. `${VAR}` references in credentials stay as written
    /// until `resolve_credentials`.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&self.file, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.file, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", self.file.display());

        Ok(())
    }

    /// File this config was loaded from (and is saved to).
    pub fn file_path(&self) -> &Path {
        &self.file
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    /// Expand `${VAR}` in provider keys and fill absent provider tables from
    /// `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`.
    ///
    /// Only for the in-memory config handed to providers: `load_from` never
    /// calls this, so `save` writes keys exactly as the user wrote them.
    pub fn resolve_credentials<F>(&mut self, env_fn: F)
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        if let Some(ref mut openai) = self.providers.openai {
            openai.api_key = expand_env(&openai.api_key, &env_fn);
        }
        if let Some(ref mut anthropic) = self.providers.anthropic {
            anthropic.api_key = expand_env(&anthropic.api_key, &env_fn);
        }

        if self.providers.openai.is_none()
            && let Ok(key) = env_fn("OPENAI_API_KEY")
            && !key.is_empty()
        {
            self.providers.openai = Some(OpenAIConfig {
                api_key: key,
                base_url: default_openai_base_url(),
            });
        }
        if self.providers.anthropic.is_none()
            && let Ok(key) = env_fn("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            self.providers.anthropic = Some(AnthropicConfig {
                api_key: key,
                base_url: default_anthropic_base_url(),
            });
        }
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();
        let wall = &self.capabilities.create_wall;
        let window = &self.capabilities.add_window_to_wall;

        match parts.as_slice() {
            ["agent", "default_model"] => Ok(self.agent.default_model.clone()),
            ["agent", "codegen_model"] => Ok(self.agent.codegen_model.clone()),
            ["agent", "temperature"] => Ok(self.agent.temperature.to_string()),
            ["agent", "max_tokens"] => Ok(self.agent.max_tokens.to_string()),
            ["agent", "max_plan_steps"] => Ok(self.agent.max_plan_steps.to_string()),
            ["revit", "base_url"] => Ok(self.revit.base_url.clone()),
            ["revit", "tool_timeout_secs"] => Ok(self.revit.tool_timeout_secs.to_string()),
            ["revit", "code_timeout_secs"] => Ok(self.revit.code_timeout_secs.to_string()),
            ["capabilities", "create_wall", "start_point"] => Ok(wall.start_point.clone()),
            ["capabilities", "create_wall", "end_point"] => Ok(wall.end_point.clone()),
            ["capabilities", "create_wall", "height"] => Ok(wall.height.to_string()),
            ["capabilities", "create_wall", "width"] => Ok(wall.width.to_string()),
            ["capabilities", "add_window_to_wall", "window_width"] => {
                Ok(window.window_width.to_string())
            }
            ["capabilities", "add_window_to_wall", "window_height"] => {
                Ok(window.window_height.to_string())
            }
            ["capabilities", "add_window_to_wall", "distance_from_start"] => {
                Ok(window.distance_from_start.to_string())
            }
            ["capabilities", "add_window_to_wall", "sill_height"] => {
                Ok(window.sill_height.to_string())
            }
            ["codegen", "show_code"] => Ok(self.codegen.show_code.to_string()),
            ["codegen", "revit_version"] => Ok(self.codegen.revit_version.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        let wall = &mut self.capabilities.create_wall;
        let window = &mut self.capabilities.add_window_to_wall;

        match parts.as_slice() {
            ["agent", "default_model"] => self.agent.default_model = value.to_string(),
            ["agent", "codegen_model"] => self.agent.codegen_model = value.to_string(),
            ["agent", "temperature"] => self.agent.temperature = value.parse()?,
            ["agent", "max_tokens"] => self.agent.max_tokens = value.parse()?,
            ["agent", "max_plan_steps"] => self.agent.max_plan_steps = value.parse()?,
            ["revit", "base_url"] => self.revit.base_url = value.to_string(),
            ["revit", "tool_timeout_secs"] => self.revit.tool_timeout_secs = value.parse()?,
            ["revit", "code_timeout_secs"] => self.revit.code_timeout_secs = value.parse()?,
            ["capabilities", "create_wall", "start_point"] => wall.start_point = value.to_string(),
            ["capabilities", "create_wall", "end_point"] => wall.end_point = value.to_string(),
            ["capabilities", "create_wall", "height"] => wall.height = value.parse()?,
            ["capabilities", "create_wall", "width"] => wall.width = value.parse()?,
            ["capabilities", "add_window_to_wall", "window_width"] => {
                window.window_width = value.parse()?
            }
            ["capabilities", "add_window_to_wall", "window_height"] => {
                window.window_height = value.parse()?
            }
            ["capabilities", "add_window_to_wall", "distance_from_start"] => {
                window.distance_from_start = value.parse()?
            }
            ["capabilities", "add_window_to_wall", "sill_height"] => {
                window.sill_height = value.parse()?
            }
            ["codegen", "show_code"] => self.codegen.show_code = value.parse()?,
            ["codegen", "revit_version"] => self.codegen.revit_version = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand_env<F>(s: &str, env_fn: &F) -> String
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    let var_name = s
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .or_else(|| s.strip_prefix('$'));
    match var_name {
        Some(name) => env_fn(name).unwrap_or_else(|_| s.to_string()),
        None => s.to_string(),
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Revit Assistant Configuration
# Auto-created on first run. Edit as needed.

[agent]
# Tool-calling assistant model: gpt-4o, claude-3-7-sonnet-latest, llama3.1 (ollama), ...
default_model = "gpt-4o"
# Model that writes C# for `revit-assistant codegen`
codegen_model = "claude-3-7-sonnet-latest"
temperature = 0.0
max_plan_steps = 25

# OpenAI API (for gpt-* / o* models). Falls back to $OPENAI_API_KEY when omitted.
# [providers.openai]
# api_key = "${OPENAI_API_KEY}"

# Anthropic API (for claude-* models). Falls back to $ANTHROPIC_API_KEY when omitted.
# [providers.anthropic]
# api_key = "${ANTHROPIC_API_KEY}"

# Local models through Ollama
# [providers.ollama]
# endpoint = "http://localhost:11434"

[revit]
# Address of the Revit add-in HTTP listener
base_url = "http://localhost:5000"
# Seconds, 10..=1000
tool_timeout_secs = 1000
code_timeout_secs = 1000

# Values used when a request leaves a field out
[capabilities.create_wall]
start_point = "0,0,0"
end_point = "10,0,0"
height = 10.0
width = 0.5

[capabilities.add_window_to_wall]
window_width = 3.0
window_height = 4.0
distance_from_start = 5.0
sill_height = 3.0

[codegen]
show_code = true
revit_version = "2024"

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config = Config::parse(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.agent.default_model, "gpt-4o");
        assert_eq!(config.revit.base_url, "http://localhost:5000");
        assert_eq!(config.capabilities.create_wall.start_point, "0,0,0");
        assert_eq!(config.capabilities.create_wall.height, 10.0);
        assert_eq!(config.capabilities.add_window_to_wall.sill_height, 3.0);
        assert!(config.providers.openai.is_none());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.agent.max_plan_steps, 25);
        assert_eq!(config.revit.tool_timeout_secs, 1000);
        assert_eq!(config.capabilities.add_window_to_wall.window_width, 3.0);
        assert!(config.codegen.show_code);
    }

    #[test]
    fn partial_capability_table_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [capabilities.create_wall]
            height = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(config.capabilities.create_wall.height, 12.5);
        assert_eq!(config.capabilities.create_wall.width, 0.5);
        assert_eq!(config.capabilities.create_wall.end_point, "10,0,0");
    }

    #[test]
    fn timeouts_are_clamped() {
        let revit = RevitConfig {
            base_url: default_revit_base_url(),
            tool_timeout_secs: 1,
            code_timeout_secs: 5000,
        };
        assert_eq!(revit.tool_timeout(), Duration::from_secs(MIN_TIMEOUT_SECS));
        assert_eq!(revit.code_timeout(), Duration::from_secs(MAX_TIMEOUT_SECS));
    }

    #[test]
    fn get_and_set_dotted_keys() {
        let mut config = Config::default();
        config
            .set_value("capabilities.create_wall.width", "0.75")
            .unwrap();
        config.set_value("revit.base_url", "http://10.0.0.2:5000").unwrap();

        assert_eq!(
            config.get_value("capabilities.create_wall.width").unwrap(),
            "0.75"
        );
        assert_eq!(
            config.get_value("revit.base_url").unwrap(),
            "http://10.0.0.2:5000"
        );
        assert!(config.get_value("memory.workspace").is_err());
        assert!(config.set_value("agent.max_plan_steps", "many").is_err());
    }

    #[test]
    fn env_fallback_fills_missing_providers_only() {
        let mut config = Config::parse(
            r#"
            [providers.anthropic]
            api_key = "from-file"
            "#,
        )
        .unwrap();
        config.resolve_credentials(|key| match key {
            "OPENAI_API_KEY" => Ok("sk-env".to_string()),
            "ANTHROPIC_API_KEY" => Ok("ignored".to_string()),
            _ => Err(std::env::VarError::NotPresent),
        });

        assert_eq!(config.providers.openai.unwrap().api_key, "sk-env");
        assert_eq!(config.providers.anthropic.unwrap().api_key, "from-file");
    }

    #[test]
    fn key_references_expand_only_when_resolved() {
        let mut config = Config::parse(
            r#"
            [providers.openai]
            api_key = "${RA_OPENAI_KEY}"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.providers.openai.as_ref().unwrap().api_key,
            "${RA_OPENAI_KEY}"
        );

        config.resolve_credentials(|key| match key {
            "RA_OPENAI_KEY" => Ok("sk-secret".to_string()),
            _ => Err(std::env::VarError::NotPresent),
        });
        assert_eq!(config.providers.openai.unwrap().api_key, "sk-secret");
    }

    #[test]
    fn save_keeps_key_references_unexpanded() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[providers.openai]\napi_key = \"${PATH}\"\n",
        )
        .unwrap();

        let mut config = Config::load_from(Some(&path)).unwrap();
        config.set_value("revit.base_url", "http://10.0.0.9:5000").unwrap();
        config.save().unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("api_key = \"${PATH}\""), "{}", written);
    }

    #[test]
    fn load_from_creates_template_then_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        let mut config = Config::load_from(Some(&path)).unwrap();
        assert!(path.exists());

        config.set_value("agent.default_model", "gpt-4.1").unwrap();
        config.save().unwrap();

        let reloaded = Config::load_from(Some(&path)).unwrap();
        assert_eq!(reloaded.agent.default_model, "gpt-4.1");
        assert_eq!(reloaded.file, path);
    }
}
