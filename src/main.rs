use std::process::ExitCode;

use anyhow::Context;
use bioage::cli::Cli;
use bioage::config::{ConfigLoader, RunConfig};
use bioage::error::AppError;
use bioage::observability::init_tracing;
use bioage::services::{BatchRunner, RunReport};
use clap::Parser;
use tracing::{info, warn};

/// Ctrl-C 中断时的退出码
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => return report_error(&anyhow::Error::new(e)),
    };

    // guard 需要存活到进程结束，否则文件日志会丢失
    let _guard = match init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: {e}");
            None
        }
    };

    info!("Starting bioage...");

    tokio::select! {
        result = run(config) => match result {
            Ok(report) => {
                println!("{}", report.summary.render());
                println!("Done. Results written to {}", report.output_path.display());
                ExitCode::SUCCESS
            }
            Err(e) => report_error(&e),
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, the last checkpoint on disk is intact and can be resumed");
            eprintln!("interrupted; rerun with the same arguments to resume");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn run(config: RunConfig) -> anyhow::Result<RunReport> {
    let output = config.output_path.clone();
    let mut runner = BatchRunner::with_ollama(config).context("failed to set up inference client")?;
    let report = runner
        .run()
        .await
        .with_context(|| format!("batch run for {} failed", output.display()))?;
    Ok(report)
}

fn report_error(err: &anyhow::Error) -> ExitCode {
    eprintln!("error: {err:#}");
    let code = err
        .downcast_ref::<AppError>()
        .map(AppError::exit_code)
        .unwrap_or(1);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
