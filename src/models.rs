use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::packed::PackedProgress;

/// One (book, child) difficulty rating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyRating {
    pub seq: i64,
    pub book_id: Uuid,
    pub child_id: Uuid,
    pub rating: i32,
    pub reading_level_at_rating_time: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    pub level: Option<i32>,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatedEntity {
    Book,
    Child,
    None,
}

/// Result of a rating submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingOutcome {
    #[serde(rename = "updatedEntity")]
    pub updated: UpdatedEntity,
    #[serde(rename = "oldLevel")]
    pub old_level: Option<i32>,
    #[serde(rename = "newLevel")]
    pub new_level: Option<i32>,
}

impl RatingOutcome {
    pub fn unchanged() -> Self {
        Self {
            updated: UpdatedEntity::None,
            old_level: None,
            new_level: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Completion,
    Count,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Completion => "completion",
            Metric::Count => "count",
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "completion" => Ok(Metric::Completion),
            "count" => Ok(Metric::Count),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

/// Who owns a goal and how its progress is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum GoalScope {
    /// Progress is inlined on the goal itself.
    Child { child_id: Uuid, progress: i64 },
    Class { classroom_code: String },
    ClassAggregate { classroom_code: String },
}

impl GoalScope {
    pub fn kind(&self) -> &'static str {
        match self {
            GoalScope::Child { .. } => "child",
            GoalScope::Class { .. } => "class",
            GoalScope::ClassAggregate { .. } => "class_aggregate",
        }
    }

    pub fn classroom_code(&self) -> Option<&str> {
        match self {
            GoalScope::Child { .. } => None,
            GoalScope::Class { classroom_code } | GoalScope::ClassAggregate { classroom_code } => {
                Some(classroom_code)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Goal {
    pub id: Uuid,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target: i64,
    pub metric: Metric,
    pub scope: GoalScope,
}

impl Goal {
    /// Caller-side expiry check; the engine itself accepts progress on any date.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub target: i64,
    pub metric: Metric,
    pub owner: GoalOwner,
}

#[derive(Debug, Clone)]
pub enum GoalOwner {
    Child(Uuid),
    Class(String),
    ClassAggregate(String),
}

#[derive(Debug, Clone, Default)]
pub struct GoalEdit {
    pub title: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub target: Option<i64>,
}

impl GoalEdit {
    pub fn apply(&self, goal: &mut Goal) {
        if let Some(title) = &self.title {
            goal.title = title.clone();
        }
        if let Some(start) = self.start_date {
            goal.start_date = start;
        }
        if let Some(end) = self.end_date {
            goal.end_date = end;
        }
        if let Some(target) = self.target {
            goal.target = target;
        }
    }
}

/// Validates the definition fields shared by creation and editing.
pub fn validate_goal_definition(
    metric: Metric,
    target: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<()> {
    if metric == Metric::Count && target <= 0 {
        return Err(EngineError::InvalidTarget(target));
    }
    if end_date < start_date {
        return Err(EngineError::ProgressInfoInvalid("goal ends before it starts"));
    }
    Ok(())
}

/// A (goal, child) log row for class-scoped goals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressLog {
    pub goal_id: Uuid,
    pub child_id: Uuid,
    pub classroom_code: String,
    pub progress: i64,
}

/// Metric-shaped progress submission. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressPayload {
    pub progress: Option<f64>,
    pub duration: Option<i64>,
    pub count: Option<i64>,
}

/// A validated submission ready to be folded into a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Replaces the stored packed value.
    Snapshot(PackedProgress),
    /// Adds to the stored count.
    Delta(i64),
}

impl ProgressUpdate {
    pub fn apply_to(self, current: i64) -> Result<i64> {
        let next = match self {
            ProgressUpdate::Snapshot(value) => value.encode(),
            ProgressUpdate::Delta(count) => current.checked_add(count),
        };
        next.ok_or(EngineError::ProgressInfoInvalid("progress value out of range"))
    }
}

impl ProgressPayload {
    pub fn validate(&self, metric: Metric) -> Result<ProgressUpdate> {
        match metric {
            Metric::Completion => {
                let (progress, duration) = match (self.progress, self.duration) {
                    (Some(progress), Some(duration)) => (progress, duration),
                    (None, None) => {
                        return Err(EngineError::ProgressInfoMissing("progress and duration"))
                    }
                    (None, Some(_)) => return Err(EngineError::ProgressInfoMissing("progress")),
                    (Some(_), None) => return Err(EngineError::ProgressInfoMissing("duration")),
                };
                if !progress.is_finite() || progress <= 0.0 {
                    return Err(EngineError::ProgressInfoInvalid("progress must be positive"));
                }
                if duration <= 0 {
                    return Err(EngineError::ProgressInfoInvalid("duration must be positive"));
                }
                Ok(ProgressUpdate::Snapshot(PackedProgress::from_fraction(
                    progress, duration,
                )))
            }
            Metric::Count => match self.count {
                None => Err(EngineError::ProgressInfoMissing("count")),
                Some(count) if count <= 0 => {
                    Err(EngineError::ProgressInfoInvalid("count must be positive"))
                }
                Some(count) => Ok(ProgressUpdate::Delta(count)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrolledChild {
    pub child_id: Uuid,
    pub name: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentProgress {
    pub child_id: Uuid,
    pub name: String,
    pub icon: String,
    pub progress: i64,
    pub completed: bool,
}

/// Metric-specific headline number of a summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryProgress {
    /// Per-child completion goal: mean duration over completed logs only.
    AverageCompletionTime { average_completion_time: Option<f64> },
    /// Per-child count goal: mean raw count over existing logs.
    AverageProgress { average_progress: Option<f64> },
    /// Shared count goal: the classroom total.
    Total { total: i64 },
    /// Shared completion goal: component means over every enrolled child.
    AverageCompletion {
        average_duration: Option<f64>,
        average_percentage: Option<f64>,
    },
    /// Private goal: the child's raw progress value.
    Own { progress: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalSummary {
    #[serde(rename = "goalId")]
    pub goal_id: Uuid,
    pub title: String,
    pub metric: Metric,
    #[serde(rename = "studentsTotal")]
    pub students_total: usize,
    #[serde(rename = "studentsCompleted")]
    pub students_completed: usize,
    pub progress: SummaryProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    #[serde(rename = "perStudent", skip_serializing_if = "Option::is_none")]
    pub per_student: Option<Vec<StudentProgress>>,
}
