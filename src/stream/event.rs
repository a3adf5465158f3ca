//! Typed events decoded from the planning stream

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PENDING_MESSAGE: &str = "Waiting to start...";
pub const DEFAULT_RUNNING_MESSAGE: &str = "Processing...";

/// The four backend sub-computations whose progress is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    Attractions,
    Weather,
    Hotels,
    Planning,
}

impl AgentId {
    pub const ALL: [AgentId; 4] = [
        AgentId::Attractions,
        AgentId::Weather,
        AgentId::Hotels,
        AgentId::Planning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Attractions => "attractions",
            AgentId::Weather => "weather",
            AgentId::Hotels => "hotels",
            AgentId::Planning => "planning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|agent| agent.as_str() == s)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AgentStatus::Pending),
            "running" => Some(AgentStatus::Running),
            "completed" => Some(AgentStatus::Completed),
            "failed" => Some(AgentStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProgress {
    pub agent: AgentId,
    pub status: AgentStatus,
    /// Percentage, always within 0..=100.
    pub progress: u8,
    pub message: String,
}

impl AgentProgress {
    pub fn pending(agent: AgentId) -> Self {
        Self {
            agent,
            status: AgentStatus::Pending,
            progress: 0,
            message: DEFAULT_PENDING_MESSAGE.to_string(),
        }
    }
}

/// Final itinerary returned by the backend. Carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripPlan(pub Value);

impl TripPlan {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Backend acknowledged the session.
    Start { message: Option<String> },
    Progress(AgentProgress),
    /// Intermediate results for one agent; replaces earlier data for it.
    Data { agent: AgentId, payload: Vec<Value> },
    /// Only terminal when `plan` is present.
    Complete {
        plan: Option<TripPlan>,
        message: Option<String>,
        requires_login: bool,
    },
    Error { message: Option<String> },
}

impl StreamEvent {
    /// Whether this event ends the session's resolution.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Complete { plan, .. } => plan.is_some(),
            StreamEvent::Error { .. } => true,
            StreamEvent::Start { .. } | StreamEvent::Progress(_) | StreamEvent::Data { .. } => {
                false
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Data { .. } => "data",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Wire shape of one frame body. Only `type` is required; every other field
/// is kept as raw JSON and checked when read, so a field of the wrong type
/// falls back to its default instead of discarding the frame.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    agent: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    progress: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    plan: Option<Value>,
    #[serde(default)]
    requires_login: Option<Value>,
}

impl RawFrame {
    fn text(&self, field: &str, value: &Option<Value>) -> Option<String> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                tracing::warn!(
                    "Ignoring non-string '{}' in {} frame: {}",
                    field,
                    self.kind,
                    other
                );
                None
            }
        }
    }

    fn message(&self) -> Option<String> {
        self.text("message", &self.message)
    }

    fn percent(&self) -> Option<f64> {
        match &self.progress {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(p) => Some(p),
                Err(_) => {
                    tracing::warn!("Ignoring malformed progress in {} frame: {:?}", self.kind, s);
                    None
                }
            },
            Some(other) => {
                tracing::warn!("Ignoring malformed progress in {} frame: {}", self.kind, other);
                None
            }
        }
    }

    fn requires_login(&self) -> bool {
        match &self.requires_login {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                tracing::warn!("Ignoring non-boolean requires_login: {}", other);
                false
            }
        }
    }
}

/// Parse one frame body into an event.
///
/// Malformed or unknown frames yield `None` and are logged; they never
/// abort the stream.
pub fn interpret(body: &str) -> Option<StreamEvent> {
    let raw: RawFrame = match serde_json::from_str(body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Failed to parse stream frame: {} ({})", e, body);
            return None;
        }
    };

    match raw.kind.as_str() {
        "start" => Some(StreamEvent::Start {
            message: raw.message(),
        }),
        "progress" => {
            let agent = parse_agent(raw.text("agent", &raw.agent).as_deref(), "progress")?;
            let status = match raw.text("status", &raw.status) {
                None => AgentStatus::Running,
                Some(s) => AgentStatus::parse(&s).unwrap_or_else(|| {
                    tracing::warn!("Unknown agent status '{}' for {}, assuming running", s, agent);
                    AgentStatus::Running
                }),
            };
            Some(StreamEvent::Progress(AgentProgress {
                agent,
                status,
                progress: clamp_percent(raw.percent()),
                message: raw
                    .message()
                    .unwrap_or_else(|| DEFAULT_RUNNING_MESSAGE.to_string()),
            }))
        }
        "data" => {
            let agent = parse_agent(raw.text("agent", &raw.agent).as_deref(), "data")?;
            let payload = match raw.data {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
            };
            Some(StreamEvent::Data { agent, payload })
        }
        "complete" => {
            let message = raw.message();
            let requires_login = raw.requires_login();
            let plan = match raw.plan {
                Some(plan @ Value::Object(_)) => Some(TripPlan(plan)),
                Some(Value::Null) | None => {
                    tracing::warn!("Received complete event without a plan; not treating it as terminal");
                    None
                }
                Some(other) => {
                    tracing::warn!("Ignoring complete event with non-object plan: {}", other);
                    None
                }
            };
            Some(StreamEvent::Complete {
                plan,
                message,
                requires_login,
            })
        }
        "error" => Some(StreamEvent::Error {
            message: raw.message(),
        }),
        other => {
            tracing::warn!("Ignoring stream frame with unknown type '{}'", other);
            None
        }
    }
}

fn parse_agent(agent: Option<&str>, kind: &str) -> Option<AgentId> {
    match agent {
        Some(name) => {
            let parsed = AgentId::parse(name);
            if parsed.is_none() {
                tracing::warn!("Ignoring {} event for unknown agent '{}'", kind, name);
            }
            parsed
        }
        None => {
            tracing::warn!("Ignoring {} event without an agent", kind);
            None
        }
    }
}

fn clamp_percent(progress: Option<f64>) -> u8 {
    match progress {
        Some(p) if p.is_finite() => p.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}
