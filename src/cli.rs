use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::unddit::config::load_config;
use crate::unddit::tree::{CommentFilter, SortOrder};

#[derive(Parser)]
#[command(name = "unddit", version)]
#[command(
    about = "Rebuild the full comment history of a thread, removed comments included",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a thread (or one comment of it) and print the reconciled tree
    Thread(ThreadArgs),
    /// Rebuild a comment tree offline from a saved snapshot
    Tree(TreeArgs),
    /// Print the resolved configuration
    Config {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ThreadArgs {
    /// Thread id, with or without the `t3_` prefix
    pub thread_id: String,
    /// Open the permalink view of this comment
    #[arg(long)]
    pub comment: Option<String>,
    /// Ancestors to show above a permalinked comment (at most 8)
    #[arg(long)]
    pub context: Option<u8>,
    /// Comments to load in the first round
    #[arg(long)]
    pub max_comments: Option<f64>,
    #[arg(long, value_enum)]
    pub sort: Option<SortOrder>,
    #[arg(long, value_enum)]
    pub filter: Option<CommentFilter>,
    /// Extra load-more rounds, one per occurrence
    #[arg(long = "more")]
    pub more: Vec<usize>,
    /// Write the loaded view to this file
    #[arg(long)]
    pub save: Option<PathBuf>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TreeArgs {
    #[arg(long)]
    pub snapshot: PathBuf,
    /// Build the view rooted at this comment instead of the saved one
    #[arg(long)]
    pub root: Option<String>,
    #[arg(long, value_enum)]
    pub sort: Option<SortOrder>,
    #[arg(long, value_enum)]
    pub filter: Option<CommentFilter>,
    #[arg(long)]
    pub context: Option<u8>,
    #[arg(long)]
    pub json: bool,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for line in &report.details {
        println!("{line}");
    }
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    Ok(())
}

/// Parse arguments, run one command, print its report. Returns the exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config()?;

    let (report, json) = match cli.command {
        Command::Thread(args) => (commands::thread::run(&cfg, &args)?, args.json),
        Command::Tree(args) => (commands::tree::run(&cfg, &args)?, args.json),
        Command::Config { json } => (commands::config::run(&cfg)?, json),
    };

    print_report(&report, json)?;
    Ok(if report.ok { 0 } else { 1 })
}
