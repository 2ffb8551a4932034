//! Folding progress submissions into goal logs.

use tracing::info;
use uuid::Uuid;

use crate::aggregate;
use crate::completion;
use crate::error::{EngineError, EntityKind, Result};
use crate::models::{EnrolledChild, Goal, GoalScope, ProgressLog, ProgressPayload};

/// What a submission wrote and whether it completed the goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressWrite {
    /// New inline progress of a child goal.
    Inline(i64),
    /// The (goal, child) log after the submission.
    Log(ProgressLog),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecorded {
    pub write: ProgressWrite,
    pub completed: bool,
}

/// Applies one submission to a goal and its current logs.
///
/// `roster` is the owning classroom's enrollment and is ignored for child
/// goals. `logs` holds every existing log of the goal and is updated in place.
pub fn record_progress(
    goal: &mut Goal,
    roster: &[EnrolledChild],
    logs: &mut Vec<ProgressLog>,
    child_id: Uuid,
    payload: &ProgressPayload,
) -> Result<ProgressRecorded> {
    let update = payload.validate(goal.metric)?;
    let goal_id = goal.id;
    let shared = matches!(goal.scope, GoalScope::ClassAggregate { .. });

    let recorded = match &mut goal.scope {
        GoalScope::Child {
            child_id: owner,
            progress,
        } => {
            if *owner != child_id {
                return Err(EngineError::not_found(
                    EntityKind::ProgressLog,
                    format!("{goal_id}/{child_id}"),
                ));
            }
            *progress = update.apply_to(*progress)?;
            ProgressRecorded {
                write: ProgressWrite::Inline(*progress),
                completed: completion::is_complete(goal.metric, *progress, goal.target)?,
            }
        }
        GoalScope::Class { classroom_code } | GoalScope::ClassAggregate { classroom_code } => {
            let classroom_code = classroom_code.clone();
            if !roster.iter().any(|child| child.child_id == child_id) {
                return Err(EngineError::not_found(EntityKind::Child, child_id));
            }
            let existing = logs.iter().position(|log| log.child_id == child_id);
            let next = update.apply_to(existing.map_or(0, |index| logs[index].progress))?;
            let index = match existing {
                Some(index) => index,
                None => {
                    logs.push(ProgressLog {
                        goal_id,
                        child_id,
                        classroom_code,
                        progress: 0,
                    });
                    logs.len() - 1
                }
            };
            logs[index].progress = next;
            let log = logs[index].clone();

            let completed = if shared {
                let values: Vec<i64> = logs
                    .iter()
                    .filter(|log| roster.iter().any(|child| child.child_id == log.child_id))
                    .map(|log| log.progress)
                    .collect();
                aggregate::shared_goal_complete(goal, &values, roster.len())?
            } else {
                completion::is_complete(goal.metric, log.progress, goal.target)?
            };

            ProgressRecorded {
                write: ProgressWrite::Log(log),
                completed,
            }
        }
    };

    if recorded.completed {
        info!(goal_id = %goal_id, child_id = %child_id, "goal completed");
    }

    Ok(recorded)
}
