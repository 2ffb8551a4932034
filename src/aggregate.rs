use std::collections::HashMap;

use uuid::Uuid;

use crate::completion;
use crate::error::Result;
use crate::models::{
    EnrolledChild, Goal, GoalScope, GoalSummary, Metric, ProgressLog, StudentProgress,
    SummaryProgress,
};
use crate::packed::{self, PackedTotals};

/// Rolls a goal's logs up into a summary.
///
/// `enrolled` is the classroom roster for class goals and the owning child
/// for a child goal. Logs of children missing from `enrolled` are ignored.
pub fn summarize_goal(
    goal: &Goal,
    enrolled: &[EnrolledChild],
    logs: &[ProgressLog],
    extended: bool,
) -> Result<GoalSummary> {
    let by_child: HashMap<Uuid, i64> = match &goal.scope {
        GoalScope::Child { child_id, progress } => HashMap::from([(*child_id, *progress)]),
        GoalScope::Class { .. } | GoalScope::ClassAggregate { .. } => logs
            .iter()
            .filter(|log| log.goal_id == goal.id)
            .map(|log| (log.child_id, log.progress))
            .collect(),
    };
    let enrolled_logs: Vec<i64> = enrolled
        .iter()
        .filter_map(|child| by_child.get(&child.child_id).copied())
        .collect();
    let students_total = enrolled.len();

    let (students_completed, progress, shared_complete) = match &goal.scope {
        GoalScope::Child { progress, .. } => {
            let done = completion::is_complete(goal.metric, *progress, goal.target)?;
            (
                usize::from(done),
                SummaryProgress::Own {
                    progress: *progress,
                },
                None,
            )
        }
        GoalScope::Class { .. } => per_child_rollup(goal, &enrolled_logs)?,
        GoalScope::ClassAggregate { .. } => {
            let (done, progress) = shared_rollup(goal, &enrolled_logs, students_total)?;
            let completed = if done { students_total } else { 0 };
            (completed, progress, Some(done))
        }
    };

    let per_student = if extended {
        let mut rows = Vec::with_capacity(enrolled.len());
        for child in enrolled {
            let value = by_child.get(&child.child_id).copied().unwrap_or(0);
            let completed = match shared_complete {
                Some(done) => done,
                None => completion::is_complete(goal.metric, value, goal.target)?,
            };
            rows.push(StudentProgress {
                child_id: child.child_id,
                name: child.name.clone(),
                icon: child.icon.clone(),
                progress: value,
                completed,
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Some(rows)
    } else {
        None
    };

    Ok(GoalSummary {
        goal_id: goal.id,
        title: goal.title.clone(),
        metric: goal.metric,
        students_total,
        students_completed,
        progress,
        target: match goal.metric {
            Metric::Count => Some(goal.target),
            Metric::Completion => None,
        },
        per_student,
    })
}

fn per_child_rollup(
    goal: &Goal,
    logs: &[i64],
) -> Result<(usize, SummaryProgress, Option<bool>)> {
    let mut completed = Vec::new();
    for value in logs {
        if completion::is_complete(goal.metric, *value, goal.target)? {
            completed.push(*value);
        }
    }

    let progress = match goal.metric {
        Metric::Completion => {
            let durations: Vec<i64> = completed
                .iter()
                .map(|value| packed::decode(*value).duration)
                .collect();
            SummaryProgress::AverageCompletionTime {
                average_completion_time: mean(&durations),
            }
        }
        Metric::Count => SummaryProgress::AverageProgress {
            average_progress: mean(logs),
        },
    };

    Ok((completed.len(), progress, None))
}

/// Single completion state of a class aggregate goal.
pub fn shared_goal_complete(goal: &Goal, logs: &[i64], students_total: usize) -> Result<bool> {
    shared_rollup(goal, logs, students_total).map(|(done, _)| done)
}

fn shared_rollup(goal: &Goal, logs: &[i64], students_total: usize) -> Result<(bool, SummaryProgress)> {
    match goal.metric {
        Metric::Count => {
            let total: i64 = logs.iter().sum();
            Ok((
                completion::is_complete(Metric::Count, total, goal.target)?,
                SummaryProgress::Total { total },
            ))
        }
        Metric::Completion => {
            let totals: PackedTotals = logs.iter().copied().collect();
            let averages = totals.average_over(students_total as i64);
            let done = averages
                .map(|(_, percentage)| percentage >= packed::COMPLETE_PERCENTAGE as f64)
                .unwrap_or(false);
            Ok((
                done,
                SummaryProgress::AverageCompletion {
                    average_duration: averages.map(|(duration, _)| duration),
                    average_percentage: averages.map(|(_, percentage)| percentage),
                },
            ))
        }
    }
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
    }
}
