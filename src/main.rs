use arena::EXIT_BOT_FAILURE;
use arena::EXIT_SUCCESS;
use arena::EXIT_SYSTEM_FAILURE;
use arena::error::Error;
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

fn main() -> ExitCode {
    arena::subprocess::stop::install();

    let args = arena::cli::Args::parse();
    let batch = match arena::cli::to_batch(args) {
        Ok(batch) => batch,
        Err(e) => {
            eprintln!("arena: {e}");
            return ExitCode::from(EXIT_SYSTEM_FAILURE);
        }
    };
    arena::init(batch.debug);

    match arena::tournament::run_batch(&batch) {
        Ok(contexts) => {
            log::info!("===== ALL RUNS COMPLETE =====");
            let mut had_bot_failure = false;
            for (i, ctx) in contexts.iter().enumerate() {
                log::info!("Run {}/{} ({}):", i + 1, contexts.len(), ctx.label);
                ctx.stats.log_summary();
                had_bot_failure |= ctx.stats.crashes.load(Ordering::Relaxed) > 0;
            }
            if let Some(path) = &batch.export_results {
                log::info!("Results exported to: {}", path.display());
            }
            ExitCode::from(if had_bot_failure {
                EXIT_BOT_FAILURE
            } else {
                EXIT_SUCCESS
            })
        }
        Err(Error::Terminated) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            log::error!("Fatal error: {e}");
            ExitCode::from(EXIT_SYSTEM_FAILURE)
        }
    }
}
