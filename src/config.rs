use anyhow::{bail, Context};

pub const DEFAULT_LOCK_THRESHOLD: usize = 200;
pub const DEFAULT_RATING_STEP: i32 = 3;
pub const DEFAULT_CHILD_ADJUST_WEIGHT: f64 = 0.25;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Knobs for the level estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelingPolicy {
    /// A book ledger holding more entries than this locks the book level.
    pub lock_threshold: usize,
    /// Levels moved per rating point away from neutral (3).
    pub rating_step: i32,
    /// Share of the gap closed when a leveled child rates a locked book.
    pub child_adjust_weight: f64,
}

impl Default for LevelingPolicy {
    fn default() -> Self {
        Self {
            lock_threshold: DEFAULT_LOCK_THRESHOLD,
            rating_step: DEFAULT_RATING_STEP,
            child_adjust_weight: DEFAULT_CHILD_ADJUST_WEIGHT,
        }
    }
}

impl LevelingPolicy {
    pub fn validate(self) -> anyhow::Result<Self> {
        if self.lock_threshold == 0 {
            bail!("lock threshold must be at least 1");
        }
        if !(self.child_adjust_weight > 0.0 && self.child_adjust_weight <= 1.0) {
            bail!(
                "child adjust weight must be in (0, 1], got {}",
                self.child_adjust_weight
            );
        }
        Ok(self)
    }
}

/// Connection settings read from the environment.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let max_connections = match std::env::var("READING_PROGRESS_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid READING_PROGRESS_MAX_CONNECTIONS '{raw}'"))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Self {
            url,
            max_connections,
        })
    }
}
