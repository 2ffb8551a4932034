use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate;
use crate::config::LevelingPolicy;
use crate::error::{EngineError, EntityKind, Result};
use crate::ledger::RatingLedger;
use crate::leveling::{self, RatingSubmission};
use crate::models::{
    validate_goal_definition, BookLevel, DifficultyRating, EnrolledChild, Goal, GoalEdit,
    GoalOwner, GoalScope, GoalSummary, Metric, NewGoal, ProgressLog, ProgressPayload,
    RatingOutcome, UpdatedEntity,
};
use crate::progress::{self, ProgressWrite};

const RATING_PAIR_CONSTRAINT: &str = "difficulty_ratings_book_child_key";

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Records a difficulty rating and moves at most one of the book level or
/// the child level, all inside one transaction.
///
/// The book row is locked before the child row so concurrent submissions
/// touching the same pair always queue in the same order.
pub async fn submit_rating(
    pool: &PgPool,
    policy: &LevelingPolicy,
    submission: RatingSubmission,
) -> Result<RatingOutcome> {
    let RatingSubmission {
        book_id, child_id, ..
    } = submission;
    let mut tx = pool.begin().await?;

    let book_row = sqlx::query(
        "SELECT level, level_is_locked FROM reading_progress.books WHERE id = $1 FOR UPDATE",
    )
    .bind(book_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EngineError::not_found(EntityKind::Book, book_id))?;
    let book = BookLevel {
        level: book_row.get("level"),
        locked: book_row.get("level_is_locked"),
    };

    let child_level: Option<i32> = sqlx::query(
        "SELECT reading_level FROM reading_progress.children WHERE id = $1 FOR UPDATE",
    )
    .bind(child_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EngineError::not_found(EntityKind::Child, child_id))?
    .get("reading_level");

    let already_rated: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM reading_progress.difficulty_ratings \
         WHERE book_id = $1 AND child_id = $2)",
    )
    .bind(book_id)
    .bind(child_id)
    .fetch_one(&mut *tx)
    .await?;
    if already_rated {
        warn!(%book_id, %child_id, "duplicate rating rejected");
        return Err(EngineError::DuplicateRating { book_id, child_id });
    }

    // a locked book is never re-estimated, so its ledger is not needed
    let mut ledger = if book.locked {
        RatingLedger::new()
    } else {
        load_ledger(&mut tx, book_id).await?
    };
    let next_seq = ledger.iter().last().map_or(0, |entry| entry.seq + 1);
    let effects =
        leveling::apply_rating(submission, book, child_level, &mut ledger, next_seq, policy)?;

    if let Some(record) = &effects.recorded {
        insert_rating(&mut tx, record).await?;
    }

    match effects.outcome.updated {
        UpdatedEntity::Book => {
            sqlx::query(
                "UPDATE reading_progress.books SET level = $2, level_is_locked = $3 WHERE id = $1",
            )
            .bind(book_id)
            .bind(effects.book.level)
            .bind(effects.book.locked)
            .execute(&mut *tx)
            .await?;

            if !effects.discarded.is_empty() {
                let seqs: Vec<i64> = effects.discarded.iter().map(|entry| entry.seq).collect();
                sqlx::query("DELETE FROM reading_progress.difficulty_ratings WHERE seq = ANY($1)")
                    .bind(&seqs)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        UpdatedEntity::Child => {
            sqlx::query("UPDATE reading_progress.children SET reading_level = $2 WHERE id = $1")
                .bind(child_id)
                .bind(effects.child_level)
                .execute(&mut *tx)
                .await?;
        }
        UpdatedEntity::None => {}
    }

    tx.commit().await?;

    info!(
        %book_id,
        %child_id,
        updated = ?effects.outcome.updated,
        old_level = ?effects.outcome.old_level,
        new_level = ?effects.outcome.new_level,
        "rating applied"
    );
    Ok(effects.outcome)
}

async fn load_ledger(conn: &mut PgConnection, book_id: Uuid) -> Result<RatingLedger> {
    let rows = sqlx::query(
        "SELECT seq, book_id, child_id, rating, reading_level_at_rating_time \
         FROM reading_progress.difficulty_ratings WHERE book_id = $1 ORDER BY seq",
    )
    .bind(book_id)
    .fetch_all(&mut *conn)
    .await?;

    let records = rows
        .into_iter()
        .map(|row| DifficultyRating {
            seq: row.get("seq"),
            book_id: row.get("book_id"),
            child_id: row.get("child_id"),
            rating: row.get("rating"),
            reading_level_at_rating_time: row.get("reading_level_at_rating_time"),
        })
        .collect();
    Ok(RatingLedger::from_records(records))
}

async fn insert_rating(conn: &mut PgConnection, record: &DifficultyRating) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reading_progress.difficulty_ratings
        (book_id, child_id, rating, reading_level_at_rating_time)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(record.book_id)
    .bind(record.child_id)
    .bind(record.rating)
    .bind(record.reading_level_at_rating_time)
    .execute(&mut *conn)
    .await
    .map_err(|err| {
        let duplicate = matches!(
            &err,
            sqlx::Error::Database(db) if db.constraint() == Some(RATING_PAIR_CONSTRAINT)
        );
        if duplicate {
            EngineError::DuplicateRating {
                book_id: record.book_id,
                child_id: record.child_id,
            }
        } else {
            EngineError::Database(err)
        }
    })?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct GoalRow {
    id: Uuid,
    title: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    target: i64,
    metric: String,
    scope: String,
    child_id: Option<Uuid>,
    classroom_code: Option<String>,
    progress: i64,
}

impl GoalRow {
    fn into_goal(self) -> Result<Goal> {
        let metric: Metric = self.metric.parse().map_err(|e: String| {
            EngineError::Database(sqlx::Error::Decode(
                format!("invalid goal metric in database: {e}").into(),
            ))
        })?;
        let corrupt = |what: &str| {
            EngineError::Database(sqlx::Error::Decode(
                format!("goal {} has scope '{}' without {what}", self.id, self.scope).into(),
            ))
        };

        let scope = match (self.scope.as_str(), self.child_id, self.classroom_code.clone()) {
            ("child", Some(child_id), _) => GoalScope::Child {
                child_id,
                progress: self.progress,
            },
            ("class", _, Some(classroom_code)) => GoalScope::Class { classroom_code },
            ("class_aggregate", _, Some(classroom_code)) => {
                GoalScope::ClassAggregate { classroom_code }
            }
            ("child", None, _) => return Err(corrupt("a child")),
            _ => return Err(corrupt("a classroom")),
        };

        Ok(Goal {
            id: self.id,
            title: self.title,
            start_date: self.start_date,
            end_date: self.end_date,
            target: self.target,
            metric,
            scope,
        })
    }
}

async fn fetch_goal(conn: &mut PgConnection, goal_id: Uuid, for_update: bool) -> Result<Goal> {
    let mut query = String::from(
        "SELECT id, title, start_date, end_date, target, metric, scope, child_id, \
         classroom_code, progress FROM reading_progress.goals WHERE id = $1",
    );
    if for_update {
        query.push_str(" FOR UPDATE");
    }

    sqlx::query_as::<_, GoalRow>(&query)
        .bind(goal_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Goal, goal_id))?
        .into_goal()
}

async fn fetch_roster(conn: &mut PgConnection, classroom_code: &str) -> Result<Vec<EnrolledChild>> {
    let rows = sqlx::query(
        "SELECT c.id, c.full_name, c.icon FROM reading_progress.enrollments e \
         JOIN reading_progress.children c ON c.id = e.child_id \
         WHERE e.classroom_code = $1 ORDER BY c.full_name",
    )
    .bind(classroom_code)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| EnrolledChild {
            child_id: row.get("id"),
            name: row.get("full_name"),
            icon: row.get("icon"),
        })
        .collect())
}

async fn fetch_child(conn: &mut PgConnection, child_id: Uuid) -> Result<EnrolledChild> {
    let row = sqlx::query("SELECT id, full_name, icon FROM reading_progress.children WHERE id = $1")
        .bind(child_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| EngineError::not_found(EntityKind::Child, child_id))?;
    Ok(EnrolledChild {
        child_id: row.get("id"),
        name: row.get("full_name"),
        icon: row.get("icon"),
    })
}

async fn fetch_logs(conn: &mut PgConnection, goal_id: Uuid) -> Result<Vec<ProgressLog>> {
    let rows = sqlx::query(
        "SELECT goal_id, child_id, classroom_code, progress \
         FROM reading_progress.goal_progress_logs WHERE goal_id = $1",
    )
    .bind(goal_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ProgressLog {
            goal_id: row.get("goal_id"),
            child_id: row.get("child_id"),
            classroom_code: row.get("classroom_code"),
            progress: row.get("progress"),
        })
        .collect())
}

pub async fn create_goal(pool: &PgPool, new_goal: NewGoal) -> Result<Goal> {
    validate_goal_definition(
        new_goal.metric,
        new_goal.target,
        new_goal.start_date,
        new_goal.end_date,
    )?;

    let mut tx = pool.begin().await?;
    let scope = match new_goal.owner {
        GoalOwner::Child(child_id) => {
            fetch_child(&mut tx, child_id).await?;
            GoalScope::Child {
                child_id,
                progress: 0,
            }
        }
        GoalOwner::Class(classroom_code) => {
            ensure_classroom(&mut tx, &classroom_code).await?;
            GoalScope::Class { classroom_code }
        }
        GoalOwner::ClassAggregate(classroom_code) => {
            ensure_classroom(&mut tx, &classroom_code).await?;
            GoalScope::ClassAggregate { classroom_code }
        }
    };

    let goal = Goal {
        id: Uuid::new_v4(),
        title: new_goal.title,
        start_date: new_goal.start_date,
        end_date: new_goal.end_date,
        target: new_goal.target,
        metric: new_goal.metric,
        scope,
    };
    let child_id = match &goal.scope {
        GoalScope::Child { child_id, .. } => Some(*child_id),
        _ => None,
    };

    sqlx::query(
        r#"
        INSERT INTO reading_progress.goals
        (id, title, start_date, end_date, target, metric, scope, child_id, classroom_code)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(goal.id)
    .bind(&goal.title)
    .bind(goal.start_date)
    .bind(goal.end_date)
    .bind(goal.target)
    .bind(goal.metric.as_str())
    .bind(goal.scope.kind())
    .bind(child_id)
    .bind(goal.scope.classroom_code())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(goal_id = %goal.id, scope = goal.scope.kind(), metric = goal.metric.as_str(), "goal created");
    Ok(goal)
}

async fn ensure_classroom(conn: &mut PgConnection, classroom_code: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM reading_progress.classrooms WHERE code = $1)",
    )
    .bind(classroom_code)
    .fetch_one(&mut *conn)
    .await?;
    if !exists {
        return Err(EngineError::not_found(EntityKind::Classroom, classroom_code));
    }
    Ok(())
}

/// Edits a goal in place; existing logs are kept and completion is
/// re-derived on the next read.
pub async fn edit_goal(pool: &PgPool, goal_id: Uuid, edit: &GoalEdit) -> Result<Goal> {
    let mut tx = pool.begin().await?;
    let mut goal = fetch_goal(&mut tx, goal_id, true).await?;
    edit.apply(&mut goal);
    validate_goal_definition(goal.metric, goal.target, goal.start_date, goal.end_date)?;

    sqlx::query(
        "UPDATE reading_progress.goals \
         SET title = $2, start_date = $3, end_date = $4, target = $5 WHERE id = $1",
    )
    .bind(goal.id)
    .bind(&goal.title)
    .bind(goal.start_date)
    .bind(goal.end_date)
    .bind(goal.target)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(%goal_id, "goal edited");
    Ok(goal)
}

pub async fn delete_goal(pool: &PgPool, goal_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM reading_progress.goals WHERE id = $1")
        .bind(goal_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::not_found(EntityKind::Goal, goal_id));
    }
    info!(%goal_id, "goal deleted");
    Ok(())
}

/// Folds one progress submission into its log and reports whether the
/// submission leaves the goal completed.
///
/// The goal row is locked for the whole read-modify-write, which serializes
/// submissions per goal.
pub async fn submit_progress(
    pool: &PgPool,
    goal_id: Uuid,
    child_id: Uuid,
    payload: &ProgressPayload,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let mut goal = fetch_goal(&mut tx, goal_id, true).await?;

    let (roster, mut logs) = match goal.scope.classroom_code() {
        Some(code) => {
            let code = code.to_string();
            (
                fetch_roster(&mut tx, &code).await?,
                fetch_logs(&mut tx, goal_id).await?,
            )
        }
        None => (Vec::new(), Vec::new()),
    };

    let recorded = progress::record_progress(&mut goal, &roster, &mut logs, child_id, payload)?;

    match &recorded.write {
        ProgressWrite::Inline(value) => {
            sqlx::query("UPDATE reading_progress.goals SET progress = $2 WHERE id = $1")
                .bind(goal_id)
                .bind(*value)
                .execute(&mut *tx)
                .await?;
        }
        ProgressWrite::Log(log) => {
            sqlx::query(
                r#"
                INSERT INTO reading_progress.goal_progress_logs
                (goal_id, child_id, classroom_code, progress)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (goal_id, child_id) DO UPDATE SET progress = EXCLUDED.progress
                "#,
            )
            .bind(log.goal_id)
            .bind(log.child_id)
            .bind(&log.classroom_code)
            .bind(log.progress)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(recorded.completed)
}

/// Summarizes a goal from one consistent snapshot.
pub async fn goal_summary(pool: &PgPool, goal_id: Uuid, extended: bool) -> Result<GoalSummary> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;

    let goal = fetch_goal(&mut tx, goal_id, false).await?;
    let (enrolled, logs) = match &goal.scope {
        GoalScope::Child { child_id, .. } => (vec![fetch_child(&mut tx, *child_id).await?], Vec::new()),
        GoalScope::Class { classroom_code } | GoalScope::ClassAggregate { classroom_code } => (
            fetch_roster(&mut tx, classroom_code).await?,
            fetch_logs(&mut tx, goal_id).await?,
        ),
    };

    tx.commit().await?;
    aggregate::summarize_goal(&goal, &enrolled, &logs, extended)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Bulk-submits ratings from a CSV with `book_id,child_id,rating` columns.
pub async fn import_csv(
    pool: &PgPool,
    policy: &LevelingPolicy,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportStats> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        book_id: Uuid,
        child_id: Uuid,
        rating: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut stats = ImportStats::default();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if !(1..=5).contains(&row.rating) {
            warn!(book_id = %row.book_id, child_id = %row.child_id, rating = row.rating, "rating out of range, skipped");
            stats.skipped += 1;
            continue;
        }

        let submission = RatingSubmission {
            book_id: row.book_id,
            child_id: row.child_id,
            rating: row.rating,
        };
        match submit_rating(pool, policy, submission).await {
            Ok(_) => stats.applied += 1,
            Err(EngineError::DuplicateRating { .. }) => stats.duplicates += 1,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(stats)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let classroom = ("MAPLE1", "Maple Room");
    sqlx::query(
        "INSERT INTO reading_progress.classrooms (code, name) VALUES ($1, $2) \
         ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name",
    )
    .bind(classroom.0)
    .bind(classroom.1)
    .execute(pool)
    .await?;

    let children = vec![
        (
            Uuid::parse_str("6f0c3a52-5d1e-4c39-9a49-2d8c3f4a1b10")?,
            "Avery Lee",
            "fox",
            Some(20),
        ),
        (
            Uuid::parse_str("a1d4e7b2-0f3c-4b58-8e6d-7c2a9b1f3e21")?,
            "Jules Moreno",
            "owl",
            Some(50),
        ),
        (
            Uuid::parse_str("c93b2f18-6a4d-4e07-b1c5-3f8e2d7a6c32")?,
            "Kiara Patel",
            "whale",
            None,
        ),
    ];

    for (id, name, icon, level) in &children {
        sqlx::query(
            r#"
            INSERT INTO reading_progress.children (id, full_name, icon, reading_level)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET full_name = EXCLUDED.full_name, icon = EXCLUDED.icon
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(icon)
        .bind(level)
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO reading_progress.enrollments (classroom_code, child_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(classroom.0)
        .bind(id)
        .execute(pool)
        .await?;
    }

    let books = vec![
        (
            Uuid::parse_str("0b7e4c21-93d5-4f6a-a2b8-5e1c7d9f4a01")?,
            "The Lighthouse Cat",
        ),
        (
            Uuid::parse_str("e2a9c6d4-17b3-4c8e-9f05-6d3b8a2e7c02")?,
            "Rivers of the North",
        ),
    ];

    for (id, title) in &books {
        sqlx::query(
            "INSERT INTO reading_progress.books (id, title) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title",
        )
        .bind(id)
        .bind(title)
        .execute(pool)
        .await?;
    }

    let start = NaiveDate::from_ymd_opt(2026, 9, 1).context("invalid date")?;
    let end = NaiveDate::from_ymd_opt(2026, 12, 18).context("invalid date")?;
    let goals = vec![
        (
            Uuid::parse_str("5c1f8e02-4b7a-4d93-8a61-2e9d3c7b5f41")?,
            "Read two chapter books",
            2_i64,
            Metric::Count,
            "class",
            None,
        ),
        (
            Uuid::parse_str("9d3a6b14-2c8f-4e71-b5d0-8f4e1a6c3b52")?,
            "Finish The Lighthouse Cat",
            0,
            Metric::Completion,
            "class",
            None,
        ),
        (
            Uuid::parse_str("b7e2d9c6-5f1a-4a38-9c74-1d6b8e3f2a63")?,
            "Classroom hundred-book challenge",
            100,
            Metric::Count,
            "class_aggregate",
            None,
        ),
        (
            Uuid::parse_str("f4c8a1e3-7d2b-4f65-8b19-3a5e9c2d7f74")?,
            "Read every night this week",
            7,
            Metric::Count,
            "child",
            Some(children[0].0),
        ),
    ];

    for (id, title, target, metric, scope, child_id) in goals {
        let classroom_code = child_id.is_none().then_some(classroom.0);
        sqlx::query(
            r#"
            INSERT INTO reading_progress.goals
            (id, title, start_date, end_date, target, metric, scope, child_id, classroom_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(start)
        .bind(end)
        .bind(target)
        .bind(metric.as_str())
        .bind(scope)
        .bind(child_id)
        .bind(classroom_code)
        .execute(pool)
        .await?;
    }

    info!(
        children = children.len(),
        books = books.len(),
        "seed data inserted"
    );
    Ok(())
}
