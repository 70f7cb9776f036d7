//! Typed step configuration.
//!
//! Steps are stored with a free-form JSON map. It is parsed once, at read time,
//! into a closed per-step-type union. Missing or malformed fields fall back to
//! defaults (no template, no prompt, `like` reaction, no note) and never fail
//! the read.

use chrono::NaiveTime;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::types::StepType;

/// Content source for steps that send text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageConfig {
    /// Static text to send as-is.
    pub template: Option<String>,
    /// Reference to a prompt held by the content provider.
    pub ai_prompt_id: Option<String>,
    pub tone: Option<String>,
    pub language: Option<String>,
    /// Ask the provider to include lead research in generation.
    pub use_research: bool,
    /// Example messages the provider may imitate.
    pub examples: Vec<String>,
}

impl MessageConfig {
    pub fn has_prompt(&self) -> bool {
        self.ai_prompt_id.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    fn from_json(v: &Value) -> Self {
        Self {
            template: str_field(v, &["message_template", "template", "message"]),
            ai_prompt_id: str_field(v, &["ai_prompt_id", "prompt_id"]),
            tone: str_field(v, &["tone"]),
            language: str_field(v, &["language"]),
            use_research: bool_field(v, &["use_research"]).unwrap_or(false),
            examples: v
                .get("examples")
                .and_then(|e| e.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|x| x.as_str())
                        .filter(|s| !s.trim().is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn write_json(&self, out: &mut Map<String, Value>) {
        if let Some(t) = &self.template {
            out.insert("message_template".into(), json!(t));
        }
        if let Some(p) = &self.ai_prompt_id {
            out.insert("ai_prompt_id".into(), json!(p));
        }
        if let Some(t) = &self.tone {
            out.insert("tone".into(), json!(t));
        }
        if let Some(l) = &self.language {
            out.insert("language".into(), json!(l));
        }
        if self.use_research {
            out.insert("use_research".into(), json!(true));
        }
        if !self.examples.is_empty() {
            out.insert("examples".into(), json!(self.examples));
        }
    }
}

/// Reaction used by like steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    #[default]
    Like,
    Celebrate,
    Support,
    Love,
    Insightful,
    Funny,
}

impl ReactionType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "celebrate" | "praise" => ReactionType::Celebrate,
            "support" | "appreciation" => ReactionType::Support,
            "love" | "empathy" => ReactionType::Love,
            "insightful" | "interest" => ReactionType::Insightful,
            "funny" | "entertainment" => ReactionType::Funny,
            _ => ReactionType::Like,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionType::Like => "like",
            ReactionType::Celebrate => "celebrate",
            ReactionType::Support => "support",
            ReactionType::Love => "love",
            ReactionType::Insightful => "insightful",
            ReactionType::Funny => "funny",
        }
    }
}

/// Per-step-type action settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Message(MessageConfig),
    Connect {
        send_note: bool,
        note: MessageConfig,
        /// Days to wait for acceptance before the invitation is withdrawn.
        timeout_days: Option<u32>,
    },
    Like {
        post_url: Option<String>,
        reaction: ReactionType,
        keyword_filter: Option<String>,
    },
    Comment {
        post_url: Option<String>,
        keyword_filter: Option<String>,
        message: MessageConfig,
    },
    Email {
        subject: Option<String>,
        message: MessageConfig,
    },
    Unsupported,
}

/// Parsed configuration for one cadence step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepConfig {
    /// Cadence-local time of day the step fires at.
    pub scheduled_time: Option<NaiveTime>,
    pub action: StepAction,
}

impl StepConfig {
    /// Parse the stored JSON map for a step of the given type.
    pub fn from_json(step_type: &StepType, v: &Value) -> Self {
        let scheduled_time = str_field(v, &["scheduled_time", "time"]).and_then(|s| {
            let parsed = parse_time_of_day(&s);
            if parsed.is_none() {
                tracing::warn!(value = %s, "Ignoring malformed scheduled_time in step config");
            }
            parsed
        });

        let action = match step_type {
            StepType::LinkedinMessage => StepAction::Message(MessageConfig::from_json(v)),
            StepType::LinkedinConnect => StepAction::Connect {
                send_note: bool_field(v, &["send_note", "sendNote"]).unwrap_or(false),
                note: MessageConfig::from_json(v),
                timeout_days: u32_field(v, &["timeout_days"]),
            },
            StepType::LinkedinLike => StepAction::Like {
                post_url: str_field(v, &["post_url"]),
                reaction: str_field(v, &["reaction", "reaction_type"])
                    .map(|r| ReactionType::parse(&r))
                    .unwrap_or_default(),
                keyword_filter: str_field(v, &["keyword_filter"]),
            },
            StepType::LinkedinComment => StepAction::Comment {
                post_url: str_field(v, &["post_url"]),
                keyword_filter: str_field(v, &["keyword_filter"]),
                message: MessageConfig::from_json(v),
            },
            StepType::SendEmail => StepAction::Email {
                subject: str_field(v, &["subject"]),
                message: MessageConfig::from_json(v),
            },
            StepType::Unsupported(_) => StepAction::Unsupported,
        };

        Self {
            scheduled_time,
            action,
        }
    }

    /// Serialize back into the flat storage map read by `from_json`.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        if let Some(t) = self.scheduled_time {
            out.insert("scheduled_time".into(), json!(t.format("%H:%M").to_string()));
        }
        match &self.action {
            StepAction::Message(m) => m.write_json(&mut out),
            StepAction::Connect {
                send_note,
                note,
                timeout_days,
            } => {
                out.insert("send_note".into(), json!(send_note));
                note.write_json(&mut out);
                if let Some(d) = timeout_days {
                    out.insert("timeout_days".into(), json!(d));
                }
            }
            StepAction::Like {
                post_url,
                reaction,
                keyword_filter,
            } => {
                if let Some(u) = post_url {
                    out.insert("post_url".into(), json!(u));
                }
                out.insert("reaction".into(), json!(reaction.as_str()));
                if let Some(k) = keyword_filter {
                    out.insert("keyword_filter".into(), json!(k));
                }
            }
            StepAction::Comment {
                post_url,
                keyword_filter,
                message,
            } => {
                if let Some(u) = post_url {
                    out.insert("post_url".into(), json!(u));
                }
                if let Some(k) = keyword_filter {
                    out.insert("keyword_filter".into(), json!(k));
                }
                message.write_json(&mut out);
            }
            StepAction::Email { subject, message } => {
                if let Some(s) = subject {
                    out.insert("subject".into(), json!(s));
                }
                message.write_json(&mut out);
            }
            StepAction::Unsupported => {}
        }
        Value::Object(out)
    }

    /// Content settings, for step types that send text.
    /// A connect step only has them when it is set to send a note.
    pub fn message(&self) -> Option<&MessageConfig> {
        match &self.action {
            StepAction::Message(m) => Some(m),
            StepAction::Connect {
                send_note: true,
                note,
                ..
            } => Some(note),
            StepAction::Connect { .. } => None,
            StepAction::Comment { message, .. } => Some(message),
            StepAction::Email { message, .. } => Some(message),
            StepAction::Like { .. } | StepAction::Unsupported => None,
        }
    }

    /// Whether the step sends text at all.
    pub fn requires_content(&self) -> bool {
        match &self.action {
            StepAction::Message(_) | StepAction::Comment { .. } | StepAction::Email { .. } => true,
            StepAction::Connect { send_note, .. } => *send_note,
            StepAction::Like { .. } | StepAction::Unsupported => false,
        }
    }

    /// Whether the step can still be dispatched with no text.
    /// A connect step without a note is a plain invitation.
    pub fn tolerates_empty_content(&self) -> bool {
        matches!(
            self.action,
            StepAction::Connect { .. } | StepAction::Like { .. }
        )
    }

    pub fn post_url(&self) -> Option<&str> {
        match &self.action {
            StepAction::Like { post_url, .. } | StepAction::Comment { post_url, .. } => {
                post_url.as_deref()
            }
            _ => None,
        }
    }

    pub fn keyword_filter(&self) -> Option<&str> {
        match &self.action {
            StepAction::Like { keyword_filter, .. }
            | StepAction::Comment { keyword_filter, .. } => keyword_filter.as_deref(),
            _ => None,
        }
    }
}

/// Parse "HH:MM" or "HH:MM:SS".
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k))
        .filter_map(|x| x.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn bool_field(v: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().filter_map(|k| v.get(*k)).find_map(|x| match x {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn u32_field(v: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().filter_map(|k| v.get(*k)).find_map(|x| match x {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
