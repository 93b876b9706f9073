use std::process::ExitCode;

use clap::Parser;
use keytrail::{logging, Config, KeytrailResult, Supervisor};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    logging::init(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> KeytrailResult<()> {
    let supervisor = Supervisor::start(config)?;

    info!(
        devices = supervisor.devices().len(),
        "monitoring device inputs, press Ctrl+C to exit"
    );

    let reports = supervisor.run().await?;
    let written: u64 = reports.iter().map(|report| report.written).sum();

    info!(written, "logged key presses");

    Ok(())
}
