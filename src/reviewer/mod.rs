mod client;

pub use client::ChatClient;

use crate::config::{Config, PromptTemplates};
use async_trait::async_trait;
use minijinja::{context, Environment};
use thiserror::Error;

/// Why a reviewer produced no feedback.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(
        "missing API key: set the {0} environment variable \
         or add it to .env in the current directory"
    )]
    MissingApiKey(String),

    #[error("no models configured under [llm] models")]
    NoModels,

    #[error("building HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("rendering prompt template: {0}")]
    Prompt(#[from] minijinja::Error),

    #[error("request to {model} failed: {source}")]
    Transport {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{model} returned HTTP {status}: {body}")]
    Status {
        model: String,
        status: u16,
        body: String,
    },

    #[error("{model} sent a response that is not a chat completion: {source}")]
    Decode {
        model: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{model} returned an empty answer")]
    Empty { model: String },

    #[error("all models failed, last error: {0}")]
    Exhausted(Box<ReviewError>),
}

/// Turns diff bytes into feedback text. The loop treats the text as opaque.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn analyze(&self, diff: &[u8]) -> Result<String, ReviewError>;
}

/// What the model is asked to do with a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Full code review of a git diff.
    Review,
    /// Short running commentary while pairing.
    Pair,
    /// One-line conventional commit message.
    CommitMessage,
}

impl Task {
    fn system_prompt(self) -> &'static str {
        match self {
            Task::Review => REVIEW_SYSTEM_PROMPT,
            Task::Pair => PAIR_SYSTEM_PROMPT,
            Task::CommitMessage => COMMIT_SYSTEM_PROMPT,
        }
    }

    fn default_template(self) -> &'static str {
        match self {
            Task::Review => "Please review this Git diff:\n\n{{ diff }}",
            Task::Pair => "Here is everything that changed since we started pairing:\n\n{{ diff }}",
            Task::CommitMessage => "{{ diff }}",
        }
    }

    fn template(self, prompts: &PromptTemplates) -> Option<&str> {
        match self {
            Task::Review => prompts.review.as_deref(),
            Task::Pair => prompts.pair.as_deref(),
            Task::CommitMessage => prompts.commit.as_deref(),
        }
    }
}

/// [`Reviewer`] backed by a chat-completion endpoint.
pub struct LlmReviewer {
    client: ChatClient,
    task: Task,
    template: String,
}

impl LlmReviewer {
    pub fn new(client: ChatClient, task: Task, prompts: &PromptTemplates) -> Self {
        let template = task
            .template(prompts)
            .unwrap_or_else(|| task.default_template())
            .to_string();
        Self {
            client,
            task,
            template,
        }
    }

    /// Build a client from `config`, taking the API key from the environment
    /// variable it names.
    pub fn from_config(config: &Config, task: Task) -> Result<Self, ReviewError> {
        let api_key = std::env::var(&config.llm.api_key_env).ok();
        let client = ChatClient::new(&config.llm, api_key)?;
        Ok(Self::new(client, task, &config.prompts))
    }

    fn render_user_message(&self, diff: &str) -> Result<String, ReviewError> {
        let env = Environment::new();
        let tmpl = env.template_from_str(&self.template)?;
        Ok(tmpl.render(context! { diff })?)
    }
}

#[async_trait]
impl Reviewer for LlmReviewer {
    async fn analyze(&self, diff: &[u8]) -> Result<String, ReviewError> {
        let diff = String::from_utf8_lossy(diff);
        let user = self.render_user_message(&diff)?;
        self.client.complete(self.task.system_prompt(), &user).await
    }
}

const REVIEW_SYSTEM_PROMPT: &str = "\
You are Revly, a code review assistant acting as an experienced senior engineer. \
Review the Git diff you are given for correctness, performance, readability, \
maintainability and security. Open with a short greeting and a summary of the \
change in under 150 words. Then list each finding as:

[SEVERITY] File Name: Line <line number>: <brief summary>
Suggestion: <actionable recommendation>
Explanation: <concise reasoning or tradeoff>

SEVERITY is one of CRITICAL (bugs, security or performance problems that must \
be fixed), WARNING (practices that hurt readability or maintainability) or INFO \
(optional improvements). Comment only on lines that need it, never invent \
context the diff does not show, and say so when context is missing. Use \
markdown for code. Close with a brief positive summary when it is deserved.";

const PAIR_SYSTEM_PROMPT: &str = "\
You are Revly, pair programming with the user. You are shown the cumulative diff \
of their work since the session started. Reply with at most a few sentences: \
point out a bug, a risky pattern or a clear next step in the newest changes. \
Do not restate the diff and do not repeat advice about code that has not changed.";

const COMMIT_SYSTEM_PROMPT: &str = "\
You write Git commit messages. Given a staged diff, output exactly one line in \
conventional commit format: <type>(optional scope): <description>. Types are \
feat, fix, refactor, docs, style, test and chore. Output nothing else: no \
explanation, no quotes, no extra lines.";

#[cfg(test)]
mod tests;
