use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, time::Duration};
use uuid::Uuid;

/// A developer request entering the orchestration runtime.
///
/// Requests are the fundamental unit of work. `id`, `prompt` and `user_id`
/// are required and validated once at ingress; the struct is treated as
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub id: Uuid,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent_type: Option<AgentType>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            content: None,
            file_path: None,
            user_id: user_id.into(),
            preferred_agent_type: None,
            context: HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_preferred_type(mut self, agent_type: AgentType) -> Self {
        self.preferred_agent_type = Some(agent_type);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// True when the caller asked for the workflow collaborator, either via
    /// the `UseWorkflow` context flag or a multi-step marker in the prompt.
    pub fn wants_workflow(&self) -> bool {
        if self
            .context
            .get("UseWorkflow")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return true;
        }
        let prompt = self.prompt.to_lowercase();
        prompt.contains("multi-step") || prompt.contains("workflow")
    }
}

/// Error details attached to a failed [`AgentResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of processing one request.
///
/// Metadata may carry routing decisions, recovery flags, attempt counts and
/// provider telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub agent_name: String,
    #[serde(with = "duration_millis")]
    pub processing_time: Duration,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl AgentResult {
    pub fn success(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            content: None,
            agent_name: agent_name.into(),
            processing_time: Duration::ZERO,
            metadata: HashMap::new(),
            error: None,
        }
    }

    pub fn failure(
        agent_name: impl Into<String>,
        message: impl Into<String>,
        error: Option<ErrorInfo>,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            content: None,
            agent_name: agent_name.into(),
            processing_time: Duration::ZERO,
            metadata: HashMap::new(),
            error,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Retryable iff the failure is a timeout/transient kind, or the agent
    /// reported `success = false` with no error attached and no explicit
    /// non-retryable marker in its metadata.
    pub fn is_retryable_failure(&self) -> bool {
        if self.success {
            return false;
        }
        match &self.error {
            Some(info) => info.kind.is_retryable(),
            None => !self
                .metadata
                .get("non_retryable")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

/// Serialize `Duration` as integer milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Advisory agent classification; actual capability is resolved through
/// `Agent::can_handle`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentType {
    CSharp,
    JavaScript,
    Python,
    Fixer,
    Refactor,
    Validator,
    Knowledge,
    Shell,
    Dispatcher,
    IntentRouter,
    Utility,
    Unknown,
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CSharp" => Ok(AgentType::CSharp),
            "JavaScript" => Ok(AgentType::JavaScript),
            "Python" => Ok(AgentType::Python),
            "Fixer" => Ok(AgentType::Fixer),
            "Refactor" => Ok(AgentType::Refactor),
            "Validator" => Ok(AgentType::Validator),
            "Knowledge" => Ok(AgentType::Knowledge),
            "Shell" => Ok(AgentType::Shell),
            "Dispatcher" => Ok(AgentType::Dispatcher),
            "IntentRouter" => Ok(AgentType::IntentRouter),
            "Utility" => Ok(AgentType::Utility),
            "Unknown" => Ok(AgentType::Unknown),
            _ => Err(format!("Unknown agent type: {s}")),
        }
    }
}

impl AgentType {
    /// Best-guess agent type for a file extension, used by the routing
    /// heuristics when the request carries a `file_path`.
    pub fn from_extension(path: &str) -> Option<Self> {
        match path.rsplit('.').next().unwrap_or("") {
            "cs" => Some(AgentType::CSharp),
            "js" | "ts" | "jsx" | "tsx" => Some(AgentType::JavaScript),
            "py" => Some(AgentType::Python),
            _ => None,
        }
    }
}

/// Queue priority. Dequeue order scans Critical first, Low last.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentState {
    Pending,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

/// Health rollup for a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Routing hint produced by the intent-router agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_type: Option<AgentType>,
    pub confidence: f64,
}
