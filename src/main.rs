use std::io;

use clap::Parser;
use color_eyre::eyre::Result;

use tealoop::{
    app,
    infrastructure::{cli::Cli, config::Config},
    integration::app_runner::{AppRunner, ShutdownHandle},
    run,
    utils::{initialize_logging, initialize_panic_handler},
};

async fn tokio_main() -> Result<()> {
    initialize_logging()?;

    initialize_panic_handler()?;

    let args = <Cli as Parser>::parse();

    let mut config = Config::new()?;
    args.apply(&mut config);

    let shutdown = ShutdownHandle::new();
    let program = app::program(&config.demo, io::stdout(), shutdown.clone())?;
    let runtime = run(program, config.runtime.clone())?;

    let runtime = AppRunner::with_shutdown(runtime, shutdown).run().await?;
    let stats = runtime.stats();
    tracing::info!(?stats, "exiting");
    println!(
        "{} ticks, {} messages applied, {} renders",
        stats.ticks, stats.messages_applied, stats.renders
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = tokio_main().await {
        eprintln!("{} error: Something went wrong", env!("CARGO_PKG_NAME"));
        Err(e)
    } else {
        Ok(())
    }
}
