use std::path::Path;

use chrono_tz::Tz;
use serde::Deserialize;

/// Typed view over the single JSON configuration document.
///
/// String values of the form `env:NAME` or `${NAME}` are resolved from the
/// environment when the value is consumed; an unresolved reference in a
/// provider that actually gets selected is a startup error.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub tide: TideConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default)]
    pub models: Vec<ProviderEntry>,
    /// Optional explicit fallbacks for capabilities the main list lacks.
    pub vision: Option<ProviderEntry>,
    pub image: Option<ProviderEntry>,
    pub speech: Option<ProviderEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    /// Optional handle so other config sections can reference this entry.
    pub name: Option<String>,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    pub embedding_model: Option<String>,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    OpenaiCompatible,
    /// Deterministic offline model used by the test entry-point.
    Stub,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Embed,
    Vision,
    Image,
    Speech,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_capabilities() -> Vec<Capability> {
    vec![Capability::Chat]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfig {
    #[serde(default = "default_enabled_skills")]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub shell: ShellConfig,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_skills(),
            shell: ShellConfig::default(),
        }
    }
}

fn default_enabled_skills() -> Vec<String> {
    ["memory", "cron", "edit_file", "read_file"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Guardrails for the shell skill, kept as data rather than scattered checks.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    #[serde(default = "default_allowed_prefixes")]
    pub allowed_prefixes: Vec<String>,
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_shell_output_chars")]
    pub max_output_chars: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: default_allowed_prefixes(),
            timeout_secs: default_shell_timeout_secs(),
            max_output_chars: default_shell_output_chars(),
        }
    }
}

fn default_allowed_prefixes() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "echo", "date", "whoami", "pwd", "wc", "grep", "find",
        "file", "stat", "uname", "df", "du", "which", "uptime",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_shell_timeout_secs() -> u64 {
    30
}
fn default_shell_output_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override the workspace directory (defaults to `<state>/workspace`).
    pub workspace_dir: Option<String>,
    /// Override the index database path (defaults to `<state>/memory/index.db`).
    pub index_path: Option<String>,
    /// Explicit selector for the embedding provider: the `name` of an entry
    /// in `llm.models`. Unset means "first entry advertising embed".
    pub embedding: Option<String>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace_dir: None,
            index_path: None,
            embedding: None,
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_target_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    #[serde(default = "default_search_k")]
    pub k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k: default_search_k(),
            min_score: default_min_score(),
        }
    }
}

fn default_search_k() -> usize {
    6
}
fn default_min_score() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_minutes")]
    pub interval_minutes: u64,
    /// Directories to index as one-chunk-per-directory listings.
    #[serde(default)]
    pub filesystem_roots: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_sync_interval_minutes(),
            filesystem_roots: Vec::new(),
        }
    }
}

fn default_sync_interval_minutes() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TideConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_silence_cooldown_minutes")]
    pub silence_cooldown_minutes: u64,
    /// Seconds-resolution override for tests; wins over the minutes field.
    pub silence_cooldown_secs: Option<u64>,
    #[serde(default = "default_inactive_start")]
    pub inactive_start: String,
    #[serde(default = "default_inactive_end")]
    pub inactive_end: String,
    /// Target chat. Unset falls back to the owner chat; with neither set,
    /// Tide stays off.
    pub jid: Option<String>,
}

impl Default for TideConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            silence_cooldown_minutes: default_silence_cooldown_minutes(),
            silence_cooldown_secs: None,
            inactive_start: default_inactive_start(),
            inactive_end: default_inactive_end(),
            jid: None,
        }
    }
}

fn default_silence_cooldown_minutes() -> u64 {
    30
}
fn default_inactive_start() -> String {
    "22:00".to_string()
}
fn default_inactive_end() -> String {
    "08:00".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_user_timezone")]
    pub user_timezone: String,
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            user_timezone: default_user_timezone(),
            time_format: default_time_format(),
        }
    }
}

fn default_user_timezone() -> String {
    "UTC".to_string()
}
fn default_time_format() -> String {
    "24h".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OwnerConfig {
    pub telegram_user_id: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub bot_token: String,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Malformed config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Parse the configured user timezone, defaulting to UTC on bad input.
    pub fn user_tz(&self) -> Tz {
        self.agents
            .defaults
            .user_timezone
            .parse()
            .unwrap_or(chrono_tz::UTC)
    }

    pub fn tide_cooldown_secs(&self) -> u64 {
        self.tide
            .silence_cooldown_secs
            .unwrap_or(self.tide.silence_cooldown_minutes * 60)
            .max(1)
    }
}

/// Resolve `env:NAME` / `${NAME}` references against the environment.
/// Plain strings pass through unchanged.
pub fn resolve_env_ref(value: &str) -> anyhow::Result<String> {
    let name = if let Some(rest) = value.strip_prefix("env:") {
        rest
    } else if let Some(inner) = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        inner
    } else {
        return Ok(value.to_string());
    };
    std::env::var(name.trim())
        .map_err(|_| anyhow::anyhow!("Config references unset environment variable '{}'", name))
}
