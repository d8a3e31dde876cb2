//! Coaching chat client. A remote coach is asked first; when it is not configured, fails,
//! or does not answer within the timeout, a scripted responder answers instead.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("coach endpoint is not configured")]
    NotConfigured,
    #[error("coach request timed out after {0:?}")]
    Timeout(Duration),
    #[error("coach returned HTTP {0}")]
    Http(u16),
    #[error("coach request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("coach reply was not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("coach reply was empty")]
    EmptyReply,
}

#[derive(Debug, Clone)]
pub struct CoachConfig {
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachUser {
    pub goal: String,
    pub current_habits: Vec<String>,
    pub struggles: String,
    pub time_per_day: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<ChatTurn>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachRequest {
    pub user: CoachUser,
}

impl CoachRequest {
    /// The text the user actually typed: the follow-up when present, else the struggles.
    pub fn message(&self) -> &str {
        self.user
            .follow_up_message
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&self.user.struggles)
    }
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    reply: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Remote,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoachReply {
    pub text: String,
    pub source: ReplySource,
}

pub struct CoachClient {
    client: Client,
    config: CoachConfig,
}

impl CoachClient {
    pub fn new(config: CoachConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    /// Never fails: any remote problem falls back to [`offline_reply`].
    pub async fn ask(&self, request: &CoachRequest) -> CoachReply {
        match self.ask_remote(request).await {
            Ok(text) => CoachReply {
                text,
                source: ReplySource::Remote,
            },
            Err(err) => {
                match err {
                    CoachError::NotConfigured => debug!("no coach endpoint, answering offline"),
                    other => warn!(error = %other, "coach unavailable, answering offline"),
                }
                CoachReply {
                    text: offline_reply(request.message()).to_string(),
                    source: ReplySource::Fallback,
                }
            }
        }
    }

    pub async fn ask_remote(&self, request: &CoachRequest) -> Result<String, CoachError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(CoachError::NotConfigured)?;
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.send(endpoint, request))
            .await
            .map_err(|_| CoachError::Timeout(timeout))?
    }

    async fn send(&self, endpoint: &str, request: &CoachRequest) -> Result<String, CoachError> {
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoachError::Http(status.as_u16()));
        }
        let raw = response.text().await?;
        let body: ReplyBody = serde_json::from_str(&raw)?;
        let text = body.reply.trim();
        if text.is_empty() {
            return Err(CoachError::EmptyReply);
        }
        debug!(chars = text.len(), "coach replied");
        Ok(text.to_string())
    }
}

const MOTIVATION: &str = "Motivation follows action more often than it leads it. Pick the \
smallest version of your habit, something you can finish in two minutes, and do just that \
today. Momentum will do the rest.";
const TIME: &str = "When the day is packed, attach the habit to something you already do: \
after coffee, after brushing your teeth, on the commute. Shrink it to five minutes and keep \
the chain alive.";
const CONSISTENCY: &str = "Consistency is about not missing twice. If you skip a day, make \
the next one non-negotiable, even if it is a tiny version. Track it so you can see the \
streak recover.";
const STRESS: &str = "It sounds like a lot right now. Drop to one keystone habit, such as \
a short walk or a few minutes of breathing, and let the rest wait until things calm down.";
const NEW_HABIT: &str = "Start a new habit by being specific: decide when, where and how \
long. Pair it with an existing routine and begin smaller than feels useful for the first \
week.";
const PROGRESS: &str = "Look at your completion rate for the last 30 days rather than any \
single day. Anything above 80% is excellent; below 50% means the habit needs to be made \
easier, not that you failed.";
const DEFAULT_REPLY: &str = "Tell me a bit more about what is getting in the way. In the \
meantime, pick one habit, make it as small as possible, and do it at the same time every \
day.";

/// Scripted coach used when the remote one is unavailable. Deterministic: matches lowercase
/// keywords in a fixed order and the first rule wins.
pub fn offline_reply(message: &str) -> &'static str {
    let text = message.to_lowercase();
    let rules: [(&[&str], &'static str); 6] = [
        (&["motivation", "motivated"], MOTIVATION),
        (&["time", "busy", "schedule"], TIME),
        (&["consistency", "consistent"], CONSISTENCY),
        (&["stress", "overwhelmed"], STRESS),
        (&["new habit", "new-habit"], NEW_HABIT),
        (&["progress", "track"], PROGRESS),
    ];
    rules
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|kw| text.contains(kw)))
        .map(|(_, reply)| *reply)
        .unwrap_or(DEFAULT_REPLY)
}
