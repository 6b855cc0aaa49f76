use crate::task::TaskKind;
use crate::{PenmanError, PenmanResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an [`Agent`]. Agents are created externally, so ids are free-form.
pub type AgentId = String;

/// Whether the scheduler may claim new work for an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Paused,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = PenmanError;

    fn from_str(s: &str) -> PenmanResult<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AgentStatus::Active),
            "paused" => Ok(AgentStatus::Paused),
            "stopped" => Ok(AgentStatus::Stopped),
            other => Err(PenmanError::InvalidState(format!(
                "unknown agent status '{other}'"
            ))),
        }
    }
}

/// Article shapes an agent can focus on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Pillar,
    Cluster,
    Supporting,
    Listicle,
    Comparison,
}

/// Content strategy an agent works towards. Tuned by strategy auto-adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub niche: String,
    #[serde(default = "default_articles_per_week")]
    pub articles_per_week: u32,
    #[serde(default = "default_target_keywords")]
    pub target_keywords: u32,
    #[serde(default)]
    pub focus_formats: Vec<ContentFormat>,
    /// Minimum quality score (0-100) for a result to complete without review.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_cluster_size")]
    pub content_cluster_size: u32,
}

fn default_articles_per_week() -> u32 {
    3
}

fn default_target_keywords() -> u32 {
    20
}

fn default_quality_threshold() -> f64 {
    75.0
}

fn default_cluster_size() -> u32 {
    5
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            niche: String::new(),
            articles_per_week: default_articles_per_week(),
            target_keywords: default_target_keywords(),
            focus_formats: vec![ContentFormat::Pillar, ContentFormat::Cluster],
            quality_threshold: default_quality_threshold(),
            content_cluster_size: default_cluster_size(),
        }
    }
}

/// Which kinds of pipeline steps may run without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autonomy {
    #[serde(default = "enabled")]
    pub auto_research: bool,
    #[serde(default = "enabled")]
    pub auto_write: bool,
    #[serde(default = "enabled")]
    pub auto_optimize: bool,
    #[serde(default)]
    pub auto_publish: bool,
    #[serde(default = "enabled")]
    pub auto_internal_link: bool,
    #[serde(default)]
    pub auto_refresh: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Autonomy {
    fn default() -> Self {
        Self {
            auto_research: true,
            auto_write: true,
            auto_optimize: true,
            auto_publish: false,
            auto_internal_link: true,
            auto_refresh: false,
        }
    }
}

impl Autonomy {
    /// Everything may run unattended.
    pub fn full() -> Self {
        Self {
            auto_research: true,
            auto_write: true,
            auto_optimize: true,
            auto_publish: true,
            auto_internal_link: true,
            auto_refresh: true,
        }
    }

    /// Whether a step of this kind may run unattended.
    pub fn permits(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::Research => self.auto_research,
            TaskKind::Write => self.auto_write,
            TaskKind::Optimize => self.auto_optimize,
            TaskKind::Link => self.auto_internal_link,
            TaskKind::Refresh => self.auto_refresh,
            TaskKind::Publish => self.auto_publish,
        }
    }
}

/// Derived health snapshot for an agent. Always recomputable from its tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// `complete / (complete + failed)`, 0.0 when nothing has settled yet.
    pub success_rate: f64,
    pub avg_quality_score: f64,
    pub avg_execution_time_ms: f64,
    pub articles_in_review: usize,
    pub failed_tasks: usize,
    pub completed_tasks: usize,
    pub total_tasks: usize,
}

/// A configured content-production persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub autonomy: Autonomy,
    #[serde(default)]
    pub status: AgentStatus,
    /// Maximum number of simultaneously running tasks.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Cached snapshot; never read back as a source of truth.
    #[serde(default)]
    pub metrics: Option<AgentMetrics>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn default_concurrency_limit() -> usize {
    2
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strategy: Strategy::default(),
            autonomy: Autonomy::default(),
            status: AgentStatus::Active,
            concurrency_limit: default_concurrency_limit(),
            metrics: None,
            created_at: Utc::now(),
            last_run_at: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_autonomy(mut self, autonomy: Autonomy) -> Self {
        self.autonomy = autonomy;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// One planned article from a content calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub keyword: String,
    #[serde(default)]
    pub title: Option<String>,
    pub format: ContentFormat,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub target_publish_date: Option<NaiveDate>,
    #[serde(default)]
    pub estimated_word_count: Option<u32>,
}
