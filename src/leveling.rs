//! Book difficulty and child reading level estimation.
//!
//! Both directions are plain functions over a ledger snapshot; the caller
//! owns loading and persisting state.

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LevelingPolicy;
use crate::error::Result;
use crate::ledger::RatingLedger;
use crate::models::{BookLevel, DifficultyRating, RatingOutcome, UpdatedEntity};

pub const MIN_LEVEL: i32 = 0;
pub const MAX_LEVEL: i32 = 100;
pub const NEUTRAL_RATING: i32 = 3;

pub fn clamp_level(value: f64) -> i32 {
    (value.round() as i64).clamp(MIN_LEVEL as i64, MAX_LEVEL as i64) as i32
}

/// Level implied by one rating given against a known level.
pub fn implied_level(level: i32, rating: i32, policy: &LevelingPolicy) -> i32 {
    level + policy.rating_step * (rating - NEUTRAL_RATING)
}

/// Mean of the per-rating estimates, or `None` for an empty ledger.
pub fn estimate_book_level<'a, I>(ratings: I, policy: &LevelingPolicy) -> Option<i32>
where
    I: IntoIterator<Item = &'a DifficultyRating>,
{
    let (sum, count) = ratings.into_iter().fold((0i64, 0i64), |(sum, count), record| {
        let estimate = implied_level(record.reading_level_at_rating_time, record.rating, policy);
        (sum + estimate as i64, count + 1)
    });

    if count == 0 {
        return None;
    }
    Some(clamp_level(sum as f64 / count as f64))
}

/// One-shot level for a child who has none yet.
pub fn calibrate_child_level(book_level: i32, rating: i32, policy: &LevelingPolicy) -> i32 {
    clamp_level(implied_level(book_level, rating, policy) as f64)
}

/// Moves a leveled child part of the way toward the level implied by one
/// rating on a locked book.
pub fn adjust_child_level(
    current: i32,
    book_level: i32,
    rating: i32,
    policy: &LevelingPolicy,
) -> i32 {
    let implied = implied_level(book_level, rating, policy) as f64;
    let current = current as f64;
    clamp_level(current + policy.child_adjust_weight * (implied - current))
}

/// Which entity a rating is allowed to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingPlan {
    RecomputeBook { child_level: i32 },
    CalibrateChild { book_level: i32 },
    AdjustChild { child_level: i32, book_level: i32 },
    Skip,
}

pub fn plan_rating(book: BookLevel, child_level: Option<i32>) -> RatingPlan {
    match (book.locked, book.level, child_level) {
        (true, Some(book_level), Some(child_level)) => RatingPlan::AdjustChild {
            child_level,
            book_level,
        },
        (_, Some(book_level), None) => RatingPlan::CalibrateChild { book_level },
        (false, _, Some(child_level)) => RatingPlan::RecomputeBook { child_level },
        // a locked book always carries a level; treat a corrupt row as unknown
        (true, None, Some(_)) | (_, None, None) => RatingPlan::Skip,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookRecompute {
    pub old_level: Option<i32>,
    pub new_level: Option<i32>,
    pub locked: bool,
    pub discarded: Vec<DifficultyRating>,
}

/// Recomputes an unlocked book's level and applies the lock/rollover rule.
pub fn recompute_book(
    book: BookLevel,
    ledger: &mut RatingLedger,
    policy: &LevelingPolicy,
) -> BookRecompute {
    let new_level = estimate_book_level(ledger.iter(), policy);
    let mut discarded = Vec::new();
    let locked = ledger.len() > policy.lock_threshold;

    if locked {
        discarded = ledger.discard_oldest(policy.lock_threshold);
        info!(
            level = ?new_level,
            discarded = discarded.len(),
            remaining = ledger.len(),
            "book level locked"
        );
    }

    BookRecompute {
        old_level: book.level,
        new_level,
        locked,
        discarded,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RatingSubmission {
    pub book_id: Uuid,
    pub child_id: Uuid,
    pub rating: i32,
}

/// Everything a rating changed, for the caller to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingEffects {
    pub outcome: RatingOutcome,
    pub recorded: Option<DifficultyRating>,
    pub book: BookLevel,
    pub child_level: Option<i32>,
    pub discarded: Vec<DifficultyRating>,
}

/// Applies one rating to in-memory state.
///
/// `ledger` must hold the book's current entries when the book is unlocked;
/// for a locked book it only serves duplicate detection. `seq` is the
/// sequence number given to the new entry.
pub fn apply_rating(
    submission: RatingSubmission,
    book: BookLevel,
    child_level: Option<i32>,
    ledger: &mut RatingLedger,
    seq: i64,
    policy: &LevelingPolicy,
) -> Result<RatingEffects> {
    let record = |level_at_time: i32| DifficultyRating {
        seq,
        book_id: submission.book_id,
        child_id: submission.child_id,
        rating: submission.rating,
        reading_level_at_rating_time: level_at_time,
    };

    let effects = match plan_rating(book, child_level) {
        RatingPlan::RecomputeBook { child_level } => {
            let entry = record(child_level);
            ledger.append(entry.clone())?;
            let recompute = recompute_book(book, ledger, policy);
            RatingEffects {
                outcome: RatingOutcome {
                    updated: UpdatedEntity::Book,
                    old_level: recompute.old_level,
                    new_level: recompute.new_level,
                },
                recorded: Some(entry),
                book: BookLevel {
                    level: recompute.new_level,
                    locked: recompute.locked,
                },
                child_level: Some(child_level),
                discarded: recompute.discarded,
            }
        }
        RatingPlan::CalibrateChild { book_level } => {
            let new_level = calibrate_child_level(book_level, submission.rating, policy);
            // the entry's implied level must equal the calibrated level
            let entry = record(book_level);
            ledger.append(entry.clone())?;
            RatingEffects {
                outcome: RatingOutcome {
                    updated: UpdatedEntity::Child,
                    old_level: None,
                    new_level: Some(new_level),
                },
                recorded: Some(entry),
                book,
                child_level: Some(new_level),
                discarded: Vec::new(),
            }
        }
        RatingPlan::AdjustChild {
            child_level,
            book_level,
        } => {
            let new_level = adjust_child_level(child_level, book_level, submission.rating, policy);
            let entry = record(child_level);
            ledger.append(entry.clone())?;
            RatingEffects {
                outcome: RatingOutcome {
                    updated: UpdatedEntity::Child,
                    old_level: Some(child_level),
                    new_level: Some(new_level),
                },
                recorded: Some(entry),
                book,
                child_level: Some(new_level),
                discarded: Vec::new(),
            }
        }
        RatingPlan::Skip => {
            debug!(
                book_id = %submission.book_id,
                child_id = %submission.child_id,
                "neither book nor child has a level, rating ignored"
            );
            RatingEffects {
                outcome: RatingOutcome::unchanged(),
                recorded: None,
                book,
                child_level,
                discarded: Vec::new(),
            }
        }
    };

    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(seq: i64, level: i32, value: i32) -> DifficultyRating {
        DifficultyRating {
            seq,
            book_id: Uuid::nil(),
            child_id: Uuid::new_v4(),
            rating: value,
            reading_level_at_rating_time: level,
        }
    }

    #[test]
    fn empty_ledger_has_no_level() {
        let ledger = RatingLedger::new();
        assert_eq!(estimate_book_level(ledger.iter(), &LevelingPolicy::default()), None);
    }

    #[test]
    fn neutral_rating_does_not_move_estimate() {
        let policy = LevelingPolicy::default();
        assert_eq!(implied_level(42, 3, &policy), 42);
        assert_eq!(implied_level(42, 5, &policy), 48);
        assert_eq!(implied_level(42, 1, &policy), 36);
    }

    #[test]
    fn estimate_is_order_independent() {
        let policy = LevelingPolicy::default();
        let ratings = vec![rating(1, 20, 4), rating(2, 50, 2), rating(3, 33, 5), rating(4, 71, 1)];
        let forward = estimate_book_level(ratings.iter(), &policy);
        let backward = estimate_book_level(ratings.iter().rev(), &policy);
        let shuffled = [&ratings[2], &ratings[0], &ratings[3], &ratings[1]];
        assert_eq!(forward, backward);
        assert_eq!(forward, estimate_book_level(shuffled, &policy));
    }

    #[test]
    fn estimate_is_clamped() {
        let policy = LevelingPolicy::default();
        assert_eq!(estimate_book_level([&rating(1, 99, 5)], &policy), Some(100));
        assert_eq!(estimate_book_level([&rating(1, 1, 1)], &policy), Some(0));
    }

    #[test]
    fn calibration_uses_single_rating() {
        let policy = LevelingPolicy::default();
        assert_eq!(calibrate_child_level(40, 5, &policy), 46);
        assert_eq!(calibrate_child_level(2, 1, &policy), 0);
    }

    #[test]
    fn adjustment_closes_a_quarter_of_the_gap() {
        let policy = LevelingPolicy::default();
        // implied 60 + 3 * 2 = 66, gap 26 from 40
        assert_eq!(adjust_child_level(40, 60, 5, &policy), 47);
        assert_eq!(adjust_child_level(40, 40, 3, &policy), 40);
    }

    #[test]
    fn adjustment_stays_within_level_bounds() {
        let policy = LevelingPolicy::default();
        // implied 106 and -6 fall outside the scale
        assert_eq!(adjust_child_level(100, 100, 5, &policy), 100);
        assert_eq!(adjust_child_level(0, 0, 1, &policy), 0);

        let full_step = LevelingPolicy {
            child_adjust_weight: 1.0,
            ..LevelingPolicy::default()
        };
        assert_eq!(adjust_child_level(50, 99, 5, &full_step), 100);
        assert_eq!(adjust_child_level(50, 2, 1, &full_step), 0);
    }

    #[test]
    fn calibration_entry_carries_the_book_level() {
        let mut ledger = RatingLedger::new();
        let effects = apply_rating(
            RatingSubmission {
                book_id: Uuid::new_v4(),
                child_id: Uuid::new_v4(),
                rating: 5,
            },
            BookLevel {
                level: Some(30),
                locked: false,
            },
            None,
            &mut ledger,
            2,
            &LevelingPolicy::default(),
        )
        .unwrap();
        assert_eq!(effects.child_level, Some(36));
        let entry = effects.recorded.unwrap();
        assert_eq!(entry.reading_level_at_rating_time, 30);
        assert_eq!(
            estimate_book_level(ledger.iter(), &LevelingPolicy::default()),
            Some(36)
        );
    }

    #[test]
    fn plan_follows_lock_and_level_state() {
        let unlocked = BookLevel {
            level: Some(30),
            locked: false,
        };
        let locked = BookLevel {
            level: Some(30),
            locked: true,
        };
        let unknown = BookLevel {
            level: None,
            locked: false,
        };

        assert_eq!(
            plan_rating(unlocked, Some(20)),
            RatingPlan::RecomputeBook { child_level: 20 }
        );
        assert_eq!(
            plan_rating(locked, Some(20)),
            RatingPlan::AdjustChild {
                child_level: 20,
                book_level: 30
            }
        );
        assert_eq!(
            plan_rating(locked, None),
            RatingPlan::CalibrateChild { book_level: 30 }
        );
        assert_eq!(
            plan_rating(unlocked, None),
            RatingPlan::CalibrateChild { book_level: 30 }
        );
        assert_eq!(
            plan_rating(unknown, Some(20)),
            RatingPlan::RecomputeBook { child_level: 20 }
        );
        assert_eq!(plan_rating(unknown, None), RatingPlan::Skip);
    }

    #[test]
    fn skip_records_nothing() {
        let mut ledger = RatingLedger::new();
        let effects = apply_rating(
            RatingSubmission {
                book_id: Uuid::new_v4(),
                child_id: Uuid::new_v4(),
                rating: 4,
            },
            BookLevel {
                level: None,
                locked: false,
            },
            None,
            &mut ledger,
            1,
            &LevelingPolicy::default(),
        )
        .unwrap();
        assert_eq!(effects.outcome.updated, UpdatedEntity::None);
        assert!(effects.recorded.is_none());
        assert!(ledger.is_empty());
    }
}
