//! Manual backfill of narrow-id caches.
//!
//! Usage: `carebridge-backfill <table>|all`
//!
//! Connects with the same `CAREBRIDGE_DB_*` settings as the server, applies
//! pending migrations, then recomputes the cached narrow id of every row with
//! a wide reference. Prints one JSON report per table on stdout.

use carebridge_api::telemetry::{init_tracing, TelemetryConfig};
use carebridge_api::{ApiError, ApiResult, DbClient, DbConfig};
use carebridge_core::{DependentTable, ReconcileConfig};
use carebridge_storage::{backfill, backfill_all, BackfillReport};

const USAGE: &str = "usage: carebridge-backfill <table>|all";

enum Target {
    All,
    Table(DependentTable),
}

fn parse_target(arg: Option<String>) -> ApiResult<Target> {
    let arg = arg.ok_or_else(|| ApiError::invalid_input(USAGE))?;
    if arg.eq_ignore_ascii_case("all") {
        return Ok(Target::All);
    }
    arg.parse::<DependentTable>()
        .map(Target::Table)
        .map_err(|e| ApiError::invalid_input(format!("{}\n{}", e, USAGE)))
}

fn print_report(report: &BackfillReport) {
    println!("{}", report.to_json());
}

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::for_service("carebridge-backfill"))?;

    let target = parse_target(std::env::args().nth(1))?;
    let config = ReconcileConfig::from_env();

    let db = DbClient::from_config(&DbConfig::from_env())?;
    db.run_migrations().await?;

    match target {
        Target::Table(table) => {
            let report = backfill(&db, table, &config).await?;
            print_report(&report);
        }
        Target::All => {
            for report in backfill_all(&db, &config).await? {
                print_report(&report);
            }
        }
    }

    tracing::info!("Backfill finished");
    Ok(())
}
