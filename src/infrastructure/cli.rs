use clap::Parser;

use crate::{infrastructure::config::Config, utils::version};

#[derive(Parser, Debug)]
#[command(author, version = version(), about)]
pub struct Cli {
    #[arg(short, long, value_name = "MILLIS", help = "Milliseconds between clock ticks")]
    pub tick_ms: Option<u64>,

    #[arg(short = 'n', long, value_name = "COUNT", help = "Stop after this many ticks")]
    pub ticks: Option<u64>,

    #[arg(long, value_name = "COUNT", help = "Maximum messages applied per tick")]
    pub max_batch: Option<usize>,

    #[arg(long, help = "Log every dispatch and update at trace level")]
    pub trace_messages: bool,
}

impl Cli {
    /// Command line flags take precedence over the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(tick_ms) = self.tick_ms {
            config.demo.tick_ms = tick_ms.max(1);
        }
        if let Some(ticks) = self.ticks {
            config.demo.ticks = ticks;
        }
        if let Some(max_batch) = self.max_batch {
            config.runtime.max_batch = Some(max_batch.max(1));
        }
        if self.trace_messages {
            config.runtime.trace_messages = true;
        }
    }
}
