use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the leveling and goal engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("child {child_id} already rated book {book_id}")]
    DuplicateRating { book_id: Uuid, child_id: Uuid },

    #[error("count goals need a positive target, got {0}")]
    InvalidTarget(i64),

    #[error("progress info missing: {0}")]
    ProgressInfoMissing(&'static str),

    #[error("progress info invalid: {0}")]
    ProgressInfoInvalid(&'static str),

    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Book,
    Child,
    Goal,
    Classroom,
    ProgressLog,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EntityKind::Book => "book",
            EntityKind::Child => "child",
            EntityKind::Goal => "goal",
            EntityKind::Classroom => "classroom",
            EntityKind::ProgressLog => "progress log",
        };
        f.write_str(label)
    }
}

impl EngineError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        EngineError::EntityNotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
