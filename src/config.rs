use crate::snapshot::DiffTool;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FILENAME: &str = "revly.config.toml";

const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_REFERER: &str = "https://github.com/nareshkarthigeyan/revly";

const DEFAULT_MODELS: &[&str] = &[
    "qwen/qwen3-coder:free",
    "qwen/qwen3-235b-a22b-2507:free",
    "moonshotai/kimi-k2:free",
    "deepseek/deepseek-r1-0528:free",
    "mistralai/mistral-small-3.2-24b-instruct:free",
];

/// Settings for the chat-completion backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Full URL of an OpenAI-compatible `chat/completions` endpoint.
    #[serde(default = "default_endpoint")]
    pub api_base_url: String,

    /// Models to try, in order of preference.
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent as `HTTP-Referer`; OpenRouter uses it for attribution.
    #[serde(default = "default_referer")]
    pub referer: String,
}

/// Settings for `revly pair`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// State directory, relative to the monitored root unless absolute.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub diff_tool: DiffTool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitConfig {
    /// Print the diff before the review.
    #[serde(default)]
    pub show_diff: bool,
}

/// Optional minijinja templates for the user message. Each is rendered with
/// `diff` in scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Everything read from `revly.config.toml`. Built once in `main` and passed
/// down by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pair: PairConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub prompts: PromptTemplates,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}

fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|s| s.to_string()).collect()
}

fn default_api_key_env() -> String {
    "LLM_API_KEY".into()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_referer() -> String {
    DEFAULT_REFERER.into()
}

fn default_interval_secs() -> u64 {
    15
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".revly")
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_endpoint(),
            models: default_models(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            referer: default_referer(),
        }
    }
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            state_dir: default_state_dir(),
            diff_tool: DiffTool::default(),
        }
    }
}

impl PairConfig {
    /// Resolve the state directory against the monitored root.
    pub fn state_dir_in(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir)
    }
}

impl Config {
    /// Candidate config files, most specific first.
    pub fn search_paths(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![cwd.join(FILENAME)];
        if let Some(home) = home {
            paths.push(home.join(".revly").join("config.toml"));
            paths.push(home.join(FILENAME));
        }
        paths
    }

    /// Load from `explicit` if given, otherwise from the first existing file in
    /// [`Config::search_paths`]. With no file at all, defaults apply.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path)?
                .with_context(|| format!("config file {} not found", path.display()));
        }
        let home = dirs::home_dir();
        for path in Self::search_paths(cwd, home.as_deref()) {
            if let Some(config) = Self::load_from(&path)? {
                tracing::debug!("loaded config from {}", path.display());
                return Ok(config);
            }
        }
        tracing::debug!("no {FILENAME} found, using defaults");
        Ok(Self::default())
    }

    /// Parse one file. Returns `None` if it doesn't exist. Missing keys are
    /// filled in with defaults via serde.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

/// The file `revly init` writes. Kept as hand-written TOML so the comments
/// survive.
pub const DEFAULT_CONFIG: &str = r#"# Revly configuration

[llm]
# Any OpenAI-compatible chat completions endpoint.
api_base_url = "https://openrouter.ai/api/v1/chat/completions"

# Tried in order; the first model that answers wins.
models = [
  "qwen/qwen3-coder:free",
  "qwen/qwen3-235b-a22b-2507:free",
  "moonshotai/kimi-k2:free",
  "deepseek/deepseek-r1-0528:free",
  "mistralai/mistral-small-3.2-24b-instruct:free",
]

# The API key is read from this environment variable, or from a .env file
# in the current directory.
api_key_env = "LLM_API_KEY"
timeout_secs = 120

[pair]
# Seconds between change checks.
interval_secs = 15
state_dir = ".revly"
# "builtin" or "git" (uses `git diff --no-index`).
diff_tool = "builtin"

[git]
show_diff = false

# [prompts]
# review = "Please review this Git diff:\n\n{{ diff }}"
"#;
