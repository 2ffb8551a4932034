use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{GoalSummary, Metric, StudentProgress, SummaryProgress};
use crate::packed;

fn describe_progress(progress: &SummaryProgress) -> String {
    match progress {
        SummaryProgress::AverageCompletionTime {
            average_completion_time: Some(time),
        } => format!("average completion time {time:.1}"),
        SummaryProgress::AverageCompletionTime {
            average_completion_time: None,
        } => "no student has finished yet".to_string(),
        SummaryProgress::AverageProgress {
            average_progress: Some(avg),
        } => format!("average progress {avg:.1}"),
        SummaryProgress::AverageProgress {
            average_progress: None,
        } => "no progress logged yet".to_string(),
        SummaryProgress::Total { total } => format!("classroom total {total}"),
        SummaryProgress::AverageCompletion {
            average_duration: Some(duration),
            average_percentage: Some(percentage),
        } => format!("average {percentage:.0}% complete over {duration:.1}"),
        SummaryProgress::AverageCompletion { .. } => "no students enrolled".to_string(),
        SummaryProgress::Own { progress } => format!("own progress {progress}"),
    }
}

fn describe_student(metric: Metric, student: &StudentProgress) -> String {
    match metric {
        Metric::Completion => {
            let value = packed::decode(student.progress);
            format!("{}% after {}", value.percentage, value.duration)
        }
        Metric::Count => student.progress.to_string(),
    }
}

pub fn build_goal_report(summary: &GoalSummary, generated_on: NaiveDate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Goal Report: {}", summary.title);
    let _ = writeln!(
        output,
        "Generated {} for goal {} ({} metric)",
        generated_on,
        summary.goal_id,
        summary.metric.as_str()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(
        output,
        "- {} of {} students completed",
        summary.students_completed, summary.students_total
    );
    if let Some(target) = summary.target {
        let _ = writeln!(output, "- target {target}");
    }
    let _ = writeln!(output, "- {}", describe_progress(&summary.progress));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    match &summary.per_student {
        Some(rows) if !rows.is_empty() => {
            for student in rows {
                let mark = if student.completed { "x" } else { " " };
                let _ = writeln!(
                    output,
                    "- [{}] {} {}: {}",
                    mark,
                    student.icon,
                    student.name,
                    describe_student(summary.metric, student)
                );
            }
        }
        _ => {
            let _ = writeln!(output, "No students enrolled for this goal.");
        }
    }

    output
}
