//! Curator - imports video files into a movie and TV library, keeping only
//! the best available quality of every title.

use std::sync::Arc;

use anyhow::Result;

use curator::cli::{CliOptions, Command, USAGE};
use curator::config::Config;
use curator::db::Database;
use curator::services::file_utils::collect_video_files;
use curator::services::importer::parser_from_config;
use curator::services::{
    ImportJob, ImportService, LocalLeaseManager, PathPlanner, init_tracing, spawn_import_queue,
};

#[tokio::main]
async fn main() -> Result<()> {
    let options = CliOptions::from_args()?;
    let config = Config::from_env()?;
    init_tracing(options.log_format_override.unwrap_or(config.log_format));

    match options.command {
        Command::Help => println!("{}", USAGE),
        Command::Parse(filename) => {
            let identity = parser_from_config(&config)?.parse(&filename)?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Command::Plan(filename) => {
            let identity = parser_from_config(&config)?.parse(&filename)?;
            let planner = PathPlanner::new(&config.movies_dir, &config.tv_dir);
            println!("{}", planner.plan(&identity).relative_path().display());
        }
        Command::Import(inputs) => run_import(&config, &inputs).await?,
    }

    Ok(())
}

async fn run_import(config: &Config, inputs: &[std::path::PathBuf]) -> Result<()> {
    tracing::info!("Starting Curator import");

    let db = Database::connect(&config.database_path).await?;
    db.migrate().await?;
    tracing::info!("Database connected");

    let service = Arc::new(ImportService::from_config(
        config,
        Arc::new(db),
        Arc::new(LocalLeaseManager::new()),
    )?);

    let files = collect_video_files(inputs);
    tracing::info!(count = files.len(), "Queueing files for import");

    let (queue, summary) =
        spawn_import_queue(service, config.requeue.clone(), config.import_concurrency);
    for path in files {
        queue.submit(ImportJob::new(path)).await?;
    }
    queue.wait_idle().await;

    let summary = summary.lock().clone();
    tracing::info!(
        admitted = summary.admitted,
        replaced = summary.replaced,
        rejected = summary.rejected,
        failed = summary.failed,
        requeued = summary.requeued,
        "Import finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
