use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use reading_progress::config::{DatabaseConfig, LevelingPolicy};
use reading_progress::leveling::RatingSubmission;
use reading_progress::models::{
    GoalEdit, GoalOwner, Metric, NewGoal, ProgressPayload, SummaryProgress, UpdatedEntity,
};
use reading_progress::{db, report, telemetry};

#[derive(Parser)]
#[command(name = "reading-progress")]
#[command(about = "Book leveling and reading goal tracker", long_about = None)]
struct Cli {
    /// Ratings a book ledger may hold before its level locks
    #[arg(long, global = true, default_value_t = reading_progress::config::DEFAULT_LOCK_THRESHOLD)]
    lock_threshold: usize,
    /// Share of the gap a leveled child closes per locked-book rating
    #[arg(long, global = true, default_value_t = reading_progress::config::DEFAULT_CHILD_ADJUST_WEIGHT)]
    child_adjust_weight: f64,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo classroom, children, books and goals
    Seed,
    /// Import difficulty ratings from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Submit one difficulty rating
    Rate {
        #[arg(long)]
        book: Uuid,
        #[arg(long)]
        child: Uuid,
        #[arg(long, value_parser = clap::value_parser!(i32).range(1..=5))]
        rating: i32,
    },
    /// Create a goal for a child or a classroom
    #[command(group(
        ArgGroup::new("owner")
            .args(["child", "class", "aggregate"])
            .required(true)
            .multiple(false)
    ))]
    CreateGoal {
        #[arg(long)]
        title: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value_t = 0)]
        target: i64,
        #[arg(long)]
        metric: Metric,
        #[arg(long)]
        child: Option<Uuid>,
        /// Classroom code, progress tracked per child
        #[arg(long)]
        class: Option<String>,
        /// Classroom code, progress summed across children
        #[arg(long)]
        aggregate: Option<String>,
    },
    /// Edit a goal's title, dates or target
    EditGoal {
        #[arg(long)]
        goal: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        target: Option<i64>,
    },
    /// Delete a goal and its logs
    DeleteGoal {
        #[arg(long)]
        goal: Uuid,
    },
    /// Log progress toward a goal
    Progress {
        #[arg(long)]
        goal: Uuid,
        #[arg(long)]
        child: Uuid,
        /// Fraction read, 1.0 when finished
        #[arg(long)]
        progress: Option<f64>,
        #[arg(long)]
        duration: Option<i64>,
        #[arg(long)]
        count: Option<i64>,
    },
    /// Summarize a goal across its students
    Summary {
        #[arg(long)]
        goal: Uuid,
        #[arg(long)]
        extended: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown goal report
    Report {
        #[arg(long)]
        goal: Uuid,
        #[arg(long, default_value = "goal-report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let policy = LevelingPolicy {
        lock_threshold: cli.lock_threshold,
        child_adjust_weight: cli.child_adjust_weight,
        ..LevelingPolicy::default()
    }
    .validate()?;
    let database = DatabaseConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .connect(&database.url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let stats = db::import_csv(&pool, &policy, &csv).await?;
            println!(
                "Applied {} ratings from {} ({} duplicates, {} skipped).",
                stats.applied,
                csv.display(),
                stats.duplicates,
                stats.skipped
            );
        }
        Commands::Rate {
            book,
            child,
            rating,
        } => {
            let outcome = db::submit_rating(
                &pool,
                &policy,
                RatingSubmission {
                    book_id: book,
                    child_id: child,
                    rating,
                },
            )
            .await?;
            let level = |value: Option<i32>| value.map_or("unset".to_string(), |l| l.to_string());
            match outcome.updated {
                UpdatedEntity::Book => println!(
                    "Book level {} -> {}.",
                    level(outcome.old_level),
                    level(outcome.new_level)
                ),
                UpdatedEntity::Child => println!(
                    "Child level {} -> {}.",
                    level(outcome.old_level),
                    level(outcome.new_level)
                ),
                UpdatedEntity::None => println!("No level known yet; nothing changed."),
            }
        }
        Commands::CreateGoal {
            title,
            start,
            end,
            target,
            metric,
            child,
            class,
            aggregate,
        } => {
            let owner = match (child, class, aggregate) {
                (Some(child_id), _, _) => GoalOwner::Child(child_id),
                (_, Some(code), _) => GoalOwner::Class(code),
                (_, _, Some(code)) => GoalOwner::ClassAggregate(code),
                (None, None, None) => anyhow::bail!("a goal needs an owner"),
            };
            let goal = db::create_goal(
                &pool,
                NewGoal {
                    title,
                    start_date: start,
                    end_date: end,
                    target,
                    metric,
                    owner,
                },
            )
            .await?;
            println!("Created goal {}.", goal.id);
        }
        Commands::EditGoal {
            goal,
            title,
            start,
            end,
            target,
        } => {
            let edit = GoalEdit {
                title,
                start_date: start,
                end_date: end,
                target,
            };
            let updated = db::edit_goal(&pool, goal, &edit).await?;
            println!(
                "Goal {} now '{}' from {} to {} with target {}.",
                updated.id, updated.title, updated.start_date, updated.end_date, updated.target
            );
        }
        Commands::DeleteGoal { goal } => {
            db::delete_goal(&pool, goal).await?;
            println!("Deleted goal {goal}.");
        }
        Commands::Progress {
            goal,
            child,
            progress,
            duration,
            count,
        } => {
            let payload = ProgressPayload {
                progress,
                duration,
                count,
            };
            let completed = db::submit_progress(&pool, goal, child, &payload).await?;
            if completed {
                println!("Progress saved. Goal completed!");
            } else {
                println!("Progress saved.");
            }
        }
        Commands::Summary {
            goal,
            extended,
            json,
        } => {
            let summary = db::goal_summary(&pool, goal, extended).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!(
                "{}: {} of {} students completed",
                summary.title, summary.students_completed, summary.students_total
            );
            match summary.progress {
                SummaryProgress::AverageCompletionTime {
                    average_completion_time,
                } => println!("Average completion time: {average_completion_time:?}"),
                SummaryProgress::AverageProgress { average_progress } => {
                    println!("Average progress: {average_progress:?}")
                }
                SummaryProgress::Total { total } => println!("Classroom total: {total}"),
                SummaryProgress::AverageCompletion {
                    average_duration,
                    average_percentage,
                } => println!(
                    "Average completion: {average_percentage:?}% over {average_duration:?}"
                ),
                SummaryProgress::Own { progress } => println!("Progress: {progress}"),
            }
            for student in summary.per_student.iter().flatten() {
                println!(
                    "- {} {}: {}{}",
                    student.icon,
                    student.name,
                    student.progress,
                    if student.completed { " (done)" } else { "" }
                );
            }
        }
        Commands::Report { goal, out } => {
            let summary = db::goal_summary(&pool, goal, true).await?;
            let report = report::build_goal_report(&summary, Utc::now().date_naive());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
