use std::process::ExitCode;

use anyhow::Context;
use ccsbatch_infra::jobs::ProcessEngine;
use ccsbatch_infra::results::SqliteResultStore;
use ccsbatch_runner::{Aggregator, RunConfig};
use ccsbatch_spec::SpecParser;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = RunConfig::from_env(std::env::args().skip(1))?;
    ccsbatch_observability::init(config.log_format);

    let store = SqliteResultStore::open(&config.database_url)
        .await
        .with_context(|| format!("failed to open result store at {}", config.database_url))?;
    let engine = ProcessEngine::new(&config.engine);
    let parser = SpecParser::new(config.parse_options());

    let summary = Aggregator::new(store)
        .run(&parser, &config.spec_path, engine, config.scheduler_config())
        .await
        .with_context(|| format!("batch run for {} failed", config.spec_path.display()))?;

    println!("{summary}");

    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("run finished with problems; see summary");
        Ok(ExitCode::FAILURE)
    }
}
