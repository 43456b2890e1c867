use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::{Row, SqlitePool};

use rbac_core::authz::PermissionCatalog;
use rbac_core::db::{self, SqliteRoleGrantStore};
use rbac_core::drift::{self, DriftInputs, DEFAULT_REPORT_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about = "rbac-core maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare guarded, seeded and documented permission names
    DriftCheck {
        /// Rust source roots scanned for guard calls
        #[arg(long = "code", default_value = "src")]
        code: Vec<PathBuf>,
        /// Seed SQL files or directories
        #[arg(long = "catalog", default_value = "migrations")]
        catalog: Vec<PathBuf>,
        /// Markdown documentation roots
        #[arg(long = "docs", default_value = "docs")]
        docs: Vec<PathBuf>,
        /// Where to write the JSON report
        #[arg(long, default_value = DEFAULT_REPORT_PATH)]
        output: PathBuf,
    },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Print the seeded permission catalog grouped by category
    Catalog,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::DriftCheck {
            code,
            catalog,
            docs,
            output,
        } => {
            let report = drift::run(&DriftInputs { code, catalog, docs })?;
            report.write_json(&output)?;
            print!("{}", report.summary());
            println!("Report written to {}", output.display());
            if report.has_critical() {
                std::process::exit(report.exit_code());
            }
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Catalog => {
            let pool = get_pool().await?;
            let store = SqliteRoleGrantStore::new(pool);
            let catalog = PermissionCatalog::load(&store).await?;
            for (category, entries) in catalog.by_category() {
                println!("{category}");
                for entry in entries {
                    println!("  {:<36} {}", entry.name.to_string(), entry.description);
                }
            }
            println!("\n{} permissions", catalog.len());
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    db::connect(&database_url).await
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let tracked = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} Name", "Status", "Version");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // ./migrations when run from the repo root, otherwise the crate's own.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {display}"))
}
