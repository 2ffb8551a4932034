use chrono::NaiveDate;
use uuid::Uuid;

use reading_progress::aggregate::summarize_goal;
use reading_progress::error::EngineError;
use reading_progress::ledger::RatingLedger;
use reading_progress::leveling::{apply_rating, RatingSubmission};
use reading_progress::models::{
    BookLevel, EnrolledChild, Goal, GoalEdit, GoalScope, Metric, ProgressLog, ProgressPayload,
    SummaryProgress, UpdatedEntity,
};
use reading_progress::progress::record_progress;
use reading_progress::LevelingPolicy;

struct Shelf {
    book_id: Uuid,
    book: BookLevel,
    ledger: RatingLedger,
    next_seq: i64,
    policy: LevelingPolicy,
}

impl Shelf {
    fn new() -> Self {
        Self {
            book_id: Uuid::new_v4(),
            book: BookLevel {
                level: None,
                locked: false,
            },
            ledger: RatingLedger::new(),
            next_seq: 1,
            policy: LevelingPolicy::default(),
        }
    }

    fn rate(
        &mut self,
        child_id: Uuid,
        child_level: Option<i32>,
        rating: i32,
    ) -> reading_progress::Result<reading_progress::leveling::RatingEffects> {
        let effects = apply_rating(
            RatingSubmission {
                book_id: self.book_id,
                child_id,
                rating,
            },
            self.book,
            child_level,
            &mut self.ledger,
            self.next_seq,
            &self.policy,
        )?;
        self.next_seq += 1;
        self.book = effects.book;
        Ok(effects)
    }
}

#[test]
fn two_ratings_average_into_book_level() {
    let mut shelf = Shelf::new();

    let first = shelf.rate(Uuid::new_v4(), Some(20), 4).unwrap();
    assert_eq!(first.outcome.updated, UpdatedEntity::Book);
    assert_eq!(first.outcome.old_level, None);
    assert_eq!(first.outcome.new_level, Some(23));

    let second = shelf.rate(Uuid::new_v4(), Some(50), 2).unwrap();
    let expected = ((23.0 + 47.0) / 2.0_f64).round() as i32;
    assert_eq!(second.outcome.old_level, Some(23));
    assert_eq!(second.outcome.new_level, Some(expected));
    assert_eq!(shelf.ledger.len(), 2);
}

#[test]
fn same_child_cannot_rate_twice() {
    let mut shelf = Shelf::new();
    let child = Uuid::new_v4();
    shelf.rate(child, Some(30), 3).unwrap();
    let err = shelf.rate(child, Some(30), 5).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateRating { .. }));
    assert_eq!(shelf.book.level, Some(30));
}

#[test]
fn two_hundred_and_first_rating_locks_and_rolls_over() {
    let mut shelf = Shelf::new();
    for i in 0..200 {
        let effects = shelf.rate(Uuid::new_v4(), Some(40), 1 + (i % 5)).unwrap();
        assert!(effects.discarded.is_empty());
    }
    assert!(!shelf.book.locked);
    assert_eq!(shelf.ledger.len(), 200);

    let last = shelf.rate(Uuid::new_v4(), Some(40), 3).unwrap();
    assert!(shelf.book.locked);
    assert_eq!(last.discarded.len(), 200);
    assert_eq!(shelf.ledger.len(), 1);
    assert_eq!(shelf.book.level, Some(40));

    // the frozen level now calibrates and nudges children instead
    let newcomer = shelf.rate(Uuid::new_v4(), None, 5).unwrap();
    assert_eq!(newcomer.outcome.updated, UpdatedEntity::Child);
    assert_eq!(newcomer.outcome.new_level, Some(46));

    let reader = shelf.rate(Uuid::new_v4(), Some(60), 1).unwrap();
    assert_eq!(reader.outcome.updated, UpdatedEntity::Child);
    assert_eq!(reader.outcome.old_level, Some(60));
    // implied 34, quarter of the -26 gap
    assert_eq!(reader.outcome.new_level, Some(54));
    assert_eq!(shelf.book.level, Some(40));
}

#[test]
fn calibrated_newcomers_count_once_toward_the_book() {
    let mut shelf = Shelf::new();
    shelf.rate(Uuid::new_v4(), Some(30), 3).unwrap();
    assert_eq!(shelf.book.level, Some(30));

    for _ in 0..10 {
        let newcomer = shelf.rate(Uuid::new_v4(), None, 5).unwrap();
        assert_eq!(newcomer.outcome.updated, UpdatedEntity::Child);
        assert_eq!(newcomer.outcome.new_level, Some(36));
        assert_eq!(newcomer.recorded.unwrap().reading_level_at_rating_time, 30);
    }
    assert_eq!(shelf.book.level, Some(30));

    // (30 + 10 * 36 + 30) / 12
    let reader = shelf.rate(Uuid::new_v4(), Some(30), 3).unwrap();
    assert_eq!(reader.outcome.updated, UpdatedEntity::Book);
    assert_eq!(reader.outcome.new_level, Some(35));
}

#[test]
fn unknown_book_and_child_is_a_no_op() {
    let mut shelf = Shelf::new();
    let effects = shelf.rate(Uuid::new_v4(), None, 2).unwrap();
    assert_eq!(effects.outcome.updated, UpdatedEntity::None);
    assert_eq!(shelf.book.level, None);
    assert!(shelf.ledger.is_empty());
}

fn roster(names: &[&str]) -> Vec<EnrolledChild> {
    names
        .iter()
        .map(|name| EnrolledChild {
            child_id: Uuid::new_v4(),
            name: name.to_string(),
            icon: "book".to_string(),
        })
        .collect()
}

fn class_goal(metric: Metric, target: i64) -> Goal {
    Goal {
        id: Uuid::new_v4(),
        title: "Autumn reading".to_string(),
        start_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 11, 30).unwrap(),
        target,
        metric,
        scope: GoalScope::Class {
            classroom_code: "MAPLE1".to_string(),
        },
    }
}

fn count(value: i64) -> ProgressPayload {
    ProgressPayload {
        count: Some(value),
        ..ProgressPayload::default()
    }
}

fn completion(progress: f64, duration: i64) -> ProgressPayload {
    ProgressPayload {
        progress: Some(progress),
        duration: Some(duration),
        count: None,
    }
}

#[test]
fn count_goal_completes_per_child() {
    let children = roster(&["Avery", "Jules"]);
    let mut goal = class_goal(Metric::Count, 2);
    let mut logs: Vec<ProgressLog> = Vec::new();
    let avery = children[0].child_id;

    let first = record_progress(&mut goal, &children, &mut logs, avery, &count(1)).unwrap();
    assert!(!first.completed);
    let second = record_progress(&mut goal, &children, &mut logs, avery, &count(2)).unwrap();
    assert!(second.completed);

    let summary = summarize_goal(&goal, &children, &logs, false).unwrap();
    assert_eq!(summary.students_total, 2);
    assert_eq!(summary.students_completed, 1);
    assert_eq!(summary.target, Some(2));
}

#[test]
fn completion_goal_averages_only_finished_students() {
    let children = roster(&["Avery", "Jules"]);
    let mut goal = class_goal(Metric::Completion, 0);
    let mut logs = Vec::new();

    let done = record_progress(
        &mut goal,
        &children,
        &mut logs,
        children[0].child_id,
        &completion(1.0, 25),
    )
    .unwrap();
    assert!(done.completed);
    let partial = record_progress(
        &mut goal,
        &children,
        &mut logs,
        children[1].child_id,
        &completion(0.15, 25),
    )
    .unwrap();
    assert!(!partial.completed);

    let stored: Vec<i64> = logs.iter().map(|log| log.progress).collect();
    assert_eq!(stored, vec![25_100, 25_015]);

    let summary = summarize_goal(&goal, &children, &logs, true).unwrap();
    assert_eq!(summary.students_completed, 1);
    assert_eq!(
        summary.progress,
        SummaryProgress::AverageCompletionTime {
            average_completion_time: Some(25.0)
        }
    );
    assert_eq!(summary.per_student.map(|rows| rows.len()), Some(2));
}

#[test]
fn zero_pair_is_invalid_and_empty_pair_is_missing() {
    let children = roster(&["Avery"]);
    let mut goal = class_goal(Metric::Completion, 0);
    let mut logs = Vec::new();
    let child = children[0].child_id;

    let invalid = record_progress(&mut goal, &children, &mut logs, child, &completion(0.0, 0));
    assert!(matches!(invalid, Err(EngineError::ProgressInfoInvalid(_))));

    let missing = record_progress(
        &mut goal,
        &children,
        &mut logs,
        child,
        &ProgressPayload::default(),
    );
    assert!(matches!(missing, Err(EngineError::ProgressInfoMissing(_))));
}

#[test]
fn aggregate_goal_sums_contributions() {
    let children = roster(&["Avery", "Jules", "Kiara"]);
    let mut goal = class_goal(Metric::Count, 5);
    goal.scope = GoalScope::ClassAggregate {
        classroom_code: "MAPLE1".to_string(),
    };
    let mut logs = Vec::new();

    let a = record_progress(&mut goal, &children, &mut logs, children[0].child_id, &count(3)).unwrap();
    assert!(!a.completed);
    let b = record_progress(&mut goal, &children, &mut logs, children[1].child_id, &count(2)).unwrap();
    assert!(b.completed);

    let summary = summarize_goal(&goal, &children, &logs, false).unwrap();
    assert_eq!(summary.progress, SummaryProgress::Total { total: 5 });
    assert_eq!(summary.students_completed, 3);
}

#[test]
fn aggregate_completion_goal_finishes_when_everyone_finishes() {
    let children = roster(&["Avery", "Jules", "Kiara"]);
    let mut goal = class_goal(Metric::Completion, 0);
    goal.scope = GoalScope::ClassAggregate {
        classroom_code: "MAPLE1".to_string(),
    };
    let mut logs = Vec::new();

    let durations = [20, 30, 40];
    let mut finished = Vec::new();
    for (child, duration) in children.iter().zip(durations) {
        let recorded = record_progress(
            &mut goal,
            &children,
            &mut logs,
            child.child_id,
            &completion(1.0, duration),
        )
        .unwrap();
        finished.push(recorded.completed);
    }
    assert_eq!(finished, vec![false, false, true]);

    let summary = summarize_goal(&goal, &children, &logs, true).unwrap();
    assert_eq!(summary.students_total, 3);
    assert_eq!(summary.students_completed, summary.students_total);
    assert_eq!(
        summary.progress,
        SummaryProgress::AverageCompletion {
            average_duration: Some(30.0),
            average_percentage: Some(100.0)
        }
    );
}

#[test]
fn lowering_a_target_reevaluates_on_read() {
    let children = roster(&["Avery"]);
    let mut goal = class_goal(Metric::Count, 5);
    let mut logs = Vec::new();
    record_progress(&mut goal, &children, &mut logs, children[0].child_id, &count(3)).unwrap();
    assert_eq!(
        summarize_goal(&goal, &children, &logs, false)
            .unwrap()
            .students_completed,
        0
    );

    GoalEdit {
        target: Some(3),
        ..GoalEdit::default()
    }
    .apply(&mut goal);
    assert_eq!(
        summarize_goal(&goal, &children, &logs, false)
            .unwrap()
            .students_completed,
        1
    );
    assert_eq!(logs.len(), 1);
}
