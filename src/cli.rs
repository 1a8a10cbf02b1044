use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::env_loader;

#[derive(Debug, Parser)]
#[command(name = "waypoint")]
#[command(about = "Hook handler and bounded state store for phased agent workflows")]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Handle one host hook event read from stdin.
    Hook,
    Record(RecordArgs),
    Usage,
    Report,
    Active,
    #[command(subcommand)]
    Session(SessionCommand),
    Query(QueryArgs),
    Compact,
    Status,
    #[command(name = "scan-knowledge", hide = true)]
    ScanKnowledge(ScanKnowledgeArgs),
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[arg(long)]
    pub agent: String,
    #[arg(long)]
    pub amount: u64,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    Start {
        #[arg(long)]
        summary: Option<String>,
    },
    Touch,
    End,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[arg(long)]
    pub description: String,
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,
    #[arg(long)]
    pub cached_only: bool,
}

#[derive(Debug, Args)]
pub struct ScanKnowledgeArgs {
    #[arg(long)]
    pub docs_dir: PathBuf,
    pub request_file: PathBuf,
}

fn print_report(report: &commands::CommandReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("command: {}", report.command);
    println!("ok: {}", report.ok);
    if !report.details.is_empty() {
        println!("details:");
        for detail in &report.details {
            println!("- {detail}");
        }
    }
    if !report.issues.is_empty() {
        println!("issues:");
        for issue in &report.issues {
            println!("- {issue}");
        }
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let _ = env_loader::load_dotenv();
    let cli = Cli::parse();

    let report = match &cli.command {
        Command::Hook => return commands::hook::run(),
        Command::ScanKnowledge(args) => {
            return commands::scan_knowledge::run(&args.docs_dir, &args.request_file);
        }
        Command::Record(args) => commands::record::run(&commands::record::RecordOptions {
            agent: args.agent.clone(),
            amount: args.amount,
        })?,
        Command::Usage => commands::usage::run()?,
        Command::Report => commands::report::run()?,
        Command::Active => commands::active::run()?,
        Command::Session(action) => {
            let (action, summary) = match action {
                SessionCommand::Start { summary } => {
                    (commands::session::SessionAction::Start, summary.clone())
                }
                SessionCommand::Touch => (commands::session::SessionAction::Touch, None),
                SessionCommand::End => (commands::session::SessionAction::End, None),
            };
            commands::session::run(&commands::session::SessionOptions { action, summary })?
        }
        Command::Query(args) => commands::query::run(&commands::query::QueryOptions {
            description: args.description.clone(),
            keywords: args.keywords.clone(),
            cached_only: args.cached_only,
        })?,
        Command::Compact => commands::compact::run()?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;

    if report.ok {
        Ok(())
    } else {
        std::process::exit(2);
    }
}
