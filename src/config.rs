use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub telegram: TelegramConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// The single authorized conversation. Messages and button taps from any
    /// other chat are ignored.
    pub chat_id: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub api_key: String,
    pub database_id: String,
    pub data_source_id: String,
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
}

fn default_source_tag() -> String {
    "taskdaemon-input".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// Directory holding state.json and logs/.
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Conversation window in user+assistant pairs.
    #[serde(default = "default_history_pairs")]
    pub history_pairs: usize,
    /// Concurrent tool executions per round (store rate-limit budget).
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            call_timeout_secs: default_call_timeout_secs(),
            history_pairs: default_history_pairs(),
            tool_concurrency: default_tool_concurrency(),
        }
    }
}

fn default_max_rounds() -> usize {
    5
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_history_pairs() -> usize {
    4
}
fn default_tool_concurrency() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Daily job: digest check-in followed by a cleanup drain.
    #[serde(default = "default_daily_schedule")]
    pub daily: String,
    /// Hourly digest check-ins outside the daily slot.
    #[serde(default = "default_hourly_schedule")]
    pub hourly: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            tick_interval_secs: default_tick_interval_secs(),
            daily: default_daily_schedule(),
            hourly: default_hourly_schedule(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}
fn default_tick_interval_secs() -> u64 {
    30
}
fn default_daily_schedule() -> String {
    "daily at 9am".to_string()
}
fn default_hourly_schedule() -> String {
    "0 10-23 * * *".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    /// Items offered per drain run.
    #[serde(default = "default_drain_per_run")]
    pub drain_per_run: usize,
    /// Queue age after which a rebuild is forced.
    #[serde(default = "default_queue_stale_days")]
    pub queue_stale_days: i64,
    /// Candidate cutoff: open records created more than this many days ago.
    #[serde(default = "default_candidate_age_days")]
    pub candidate_age_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            drain_per_run: default_drain_per_run(),
            queue_stale_days: default_queue_stale_days(),
            candidate_age_days: default_candidate_age_days(),
        }
    }
}

fn default_drain_per_run() -> usize {
    3
}
fn default_queue_stale_days() -> i64 {
    7
}
fn default_candidate_age_days() -> i64 {
    180
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
