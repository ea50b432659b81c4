use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Suspended,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Suspended => "suspended",
        }
    }

}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AgentStatus {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "suspended" => Ok(AgentStatus::Suspended),
            other => Err(format!("invalid agent status: {other}")),
        }
    }
}

/// A forecasting agent as stored by the registry service. The engine only
/// reads agents; creation and profile edits live behind the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    /// Specialization domains used for category routing; order irrelevant.
    pub specializations: Vec<String>,
    /// Cached reputation in [0, 1], refreshed on resolution.
    pub trust_score: f64,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Check whether this agent declares expertise in a category.
    pub fn is_specialized_in(&self, category: &str) -> bool {
        self.specializations.iter().any(|s| s == category)
    }
}
