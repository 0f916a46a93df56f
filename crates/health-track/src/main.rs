// The binary uses the library, not duplicate modules
use clap::Parser;
use health_track::logging::{log_version_info, setup_logging_and_profiling};
use health_track::{Settings, run};

fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    let _guard = setup_logging_and_profiling(settings.verbose, settings.debug);
    log_version_info();

    let summary = run(&settings.command)?;
    if summary.is_clean() {
        println!("No issues");
    } else {
        println!("Skipped: {summary}");
    }
    Ok(())
}
