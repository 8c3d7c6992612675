//! bank_ledger - ledger service entry point
//!
//! ```text
//! bank_ledger [--env dev]                                 # health check + schema bootstrap
//! bank_ledger [--env dev] transfer <from> <to> <amount>   # run one transfer, print JSON
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};

use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::store::PgStore;
use bank_ledger::{TransferCoordinator, TransferParams};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// `transfer <from> <to> <amount>` if present on the command line
fn get_transfer_args() -> anyhow::Result<Option<TransferParams>> {
    let args: Vec<String> = std::env::args().collect();
    let Some(pos) = args.iter().position(|a| a == "transfer") else {
        return Ok(None);
    };
    if pos + 3 >= args.len() {
        bail!("usage: bank_ledger transfer <from_account_id> <to_account_id> <amount>");
    }

    let parse = |i: usize, name: &str| -> anyhow::Result<i64> {
        args[i]
            .parse()
            .with_context(|| format!("invalid {}: {}", name, args[i]))
    };
    Ok(Some(TransferParams::new(
        parse(pos + 1, "from_account_id")?,
        parse(pos + 2, "to_account_id")?,
        parse(pos + 3, "amount")?,
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = bank_ledger::logging::init_logging(&app_config);

    tracing::info!(
        "Starting bank_ledger ({}) in {} mode",
        env!("GIT_HASH"),
        env
    );

    let postgres_url = app_config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured")?;
    let db = Database::connect_with(postgres_url, &app_config.pool)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check().await.context("Health check failed")?;
    db.bootstrap_schema().await?;

    let Some(params) = get_transfer_args()? else {
        tracing::info!("Database healthy, nothing else to do");
        return Ok(());
    };

    let store = Arc::new(PgStore::with_options(
        db.pool().clone(),
        app_config.transfer.session_options(),
    ));
    let coordinator =
        TransferCoordinator::new(store).with_deadline(app_config.transfer.deadline());

    match coordinator.transfer(params).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(code = e.code(), retryable = e.is_retryable(), "{}", e);
            Err(e.into())
        }
    }
}
