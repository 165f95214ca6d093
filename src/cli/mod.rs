//! Command-line interface parsing and handling
//!
//! Parses arguments, loads configuration, installs logging and hands over to
//! the line-oriented front end in [`repl`].

pub mod repl;

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::core::config::{path_display, Config};
use crate::utils::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "turnwise")]
#[command(version)]
#[command(about = "Drive a chat agent turn by turn from the terminal")]
#[command(
    long_about = "Turnwise runs a line-oriented chat session against a scripted demo agent. \
Each line you type starts a turn; typing while a turn runs interrupts it, and typing while \
the conversation is being compacted queues the message until compaction finishes.\n\n\
Input:\n\
  <text>            Send a message\n\
  !<command>        Ask the agent to run a shell command (needs approval)\n\
  ?<question>       Have the agent ask you a question\n\
  /help             List slash commands\n\n\
Controls:\n\
  :interrupt        Reject or cancel an open prompt, else stop the turn\n\
  :approve          Approve the pending tool call\n\
  :always [save]    Approve and stop asking for this tool\n\
  :auto             Approve and turn on auto-approve\n\
  :reject           Reject the pending tool call\n\
  :answer <text>    Answer the pending question\n\
  :cancel           Cancel the pending question and the turn"
)]
pub struct Args {
    /// Config file to use instead of the platform default
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write tracing output to this file
    #[arg(short = 'l', long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Approve tool calls for enabled tools without asking
    #[arg(long)]
    pub auto_approve: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<Config, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load()?,
        };
        if self.auto_approve {
            config.auto_approve = true;
        }
        Ok(config)
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = args.load_config()?;

    if init_tracing(&config.logging, args.log_file.as_deref())? {
        info!(
            config = %args.config.as_ref().map(path_display).unwrap_or_else(|| "default".into()),
            "turnwise starting"
        );
    }

    repl::run(config).await
}
