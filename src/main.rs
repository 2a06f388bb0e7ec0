use clap::Parser;
use dotenvy::dotenv;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voucher_desk::{
    catalog::InMemoryCatalog,
    config::{database, operator, settings},
    console::{self, cli::Cli, messages},
    desk::VoucherDesk,
    errors::Result,
};

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Initialize tracing (as early as possible), on stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // 2. Load .env before parsing, clap reads VOUCHER_DESK_CONFIG from the environment
    dotenv().ok();

    let cli = Cli::parse();

    // 3. Ctrl-C cancels in-flight reads and their retry backoff
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("{}", messages::describe(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<String> {
    let settings = match &cli.global.config {
        Some(path) => settings::load_settings(path)?,
        None => settings::load_default_settings()?,
    };
    let operator = operator::resolve_operator(cli.global.operator.as_deref())?;

    let database_url = database::get_database_url();
    database::ensure_sqlite_directory(&database_url)?;
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;
    info!("Database initialized successfully.");

    let catalog = InMemoryCatalog::from_settings(&settings.catalog);
    let desk = VoucherDesk::new(db, Arc::new(catalog), &settings);

    console::execute(&desk, &operator, cli.command, cancel).await
}
