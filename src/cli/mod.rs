pub mod output;
pub mod process;
pub mod range;

use std::{env, io::IsTerminal, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use process::{kill_previous_recorders, restart_recorder};
use range::RangeArgs;
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        create_dispatcher,
        dispatcher::Command,
        start_daemon, start_recorder,
        storage::{
            activity_store::{ActivityStore, JsonActivityStore},
            entities::ActivityRecord,
        },
        transport::Framing,
    },
    settings::SettingsStore,
    utils::{
        clock::default_clock,
        dir::AppPaths,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "activity-recorder", version, long_about = None)]
#[command(about = "Records what you are doing from periodic screenshots", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Serve commands from stdin. This is what the browser launches through native messaging"
    )]
    Serve {
        #[arg(long, help = "Use line-delimited JSON instead of native messaging frames")]
        lines: bool,
    },
    #[command(
        about = "Record in the current console until interrupted. Used by `start` and for debugging"
    )]
    Record {
        #[arg(long, help = "Seconds between captures. Defaults to the configured interval")]
        interval: Option<u64>,
    },
    #[command(about = "Start recording in the background")]
    Start {
        #[arg(long, help = "Seconds between captures. Defaults to the configured interval")]
        interval: Option<u64>,
    },
    #[command(about = "Stop the background recorder")]
    Stop {},
    #[command(about = "Capture and analyze the screen once")]
    Capture {},
    #[command(about = "Show the most recent activities")]
    List {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long, help = "Only show activities of this UTC day, formatted as YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
    #[command(about = "Show activities in a time range")]
    Range {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long, help = "Ask the summary model about the range")]
        summarize: bool,
        #[arg(long, requires = "summarize", help = "Question for the summary model")]
        query: Option<String>,
    },
    #[command(about = "Show statistics over all activities")]
    Stats {},
    #[command(about = "Write activities into a standalone JSON file")]
    Export {
        #[arg(short, long, help = "Defaults to activity_export_<timestamp>.json")]
        output: Option<PathBuf>,
        #[command(flatten)]
        range: RangeArgs,
    },
    #[command(about = "Remove old activities and screenshots according to the settings")]
    Prune {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let paths = AppPaths::resolve(args.dir.clone())?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &paths.logs(), logging_level, args.log)?;

    let colour = std::io::stdout().is_terminal();

    match args.commands {
        Commands::Serve { lines } => {
            let framing = if lines {
                Framing::Lines
            } else {
                Framing::Native
            };
            start_daemon(paths, framing).await
        }
        Commands::Record { interval } => start_recorder(paths, interval).await,
        Commands::Start { interval } => restart_recorder(args.dir, interval),
        Commands::Stop {} => {
            let process_name = env::current_exe()?;
            let stopped = kill_previous_recorders(&process_name)?;
            println!("Stopped {stopped} recorder(s)");
            Ok(())
        }
        Commands::Capture {} => {
            let mut dispatcher = create_dispatcher(&paths, default_clock()).await?;
            let response = dispatcher.handle(Command::CaptureNow).await;
            let record: ActivityRecord = match response.get("activity") {
                Some(activity) => serde_json::from_value(activity.clone())?,
                None => return Err(anyhow!("Capture failed: {}", response["error"])),
            };
            output::print_records(&[record], colour);
            Ok(())
        }
        Commands::List { limit, date } => {
            let store = JsonActivityStore::open(&paths, Utc::now()).await?;
            output::print_records(&store.list(limit, date), colour);
            Ok(())
        }
        Commands::Range {
            range,
            summarize,
            query,
        } => {
            let (start, end) = range.resolve(Local::now())?;
            if summarize {
                let mut dispatcher = create_dispatcher(&paths, default_clock()).await?;
                let response = dispatcher
                    .handle(Command::QueryTimeRange {
                        start_time: start,
                        end_time: end,
                        query,
                    })
                    .await;
                match response.get("summary").and_then(|v| v.as_str()) {
                    Some(summary) => println!("{summary}"),
                    None => return Err(anyhow!("Summary failed: {}", response["error"])),
                }
            } else {
                let store = JsonActivityStore::open(&paths, Utc::now()).await?;
                output::print_records(&store.query_range(start, end), colour);
            }
            Ok(())
        }
        Commands::Stats {} => {
            let store = JsonActivityStore::open(&paths, Utc::now()).await?;
            println!("{}", output::format_statistics(&store.statistics()));
            Ok(())
        }
        Commands::Export { output, range } => {
            let now = Utc::now();
            let store = JsonActivityStore::open(&paths, now).await?;
            let range = if range.is_unbounded() {
                None
            } else {
                Some(range.resolve(now.with_timezone(&Local))?)
            };
            let output = output.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "activity_export_{}.json",
                    now.with_timezone(&Local).format("%Y%m%d_%H%M%S")
                ))
            });
            let count = store.export(&output, range, now).await?;
            println!("Exported {count} activities to {}", output.display());
            Ok(())
        }
        Commands::Prune {} => {
            let settings = SettingsStore::load(paths.settings()).await?;
            let settings = settings.get();
            let mut store = JsonActivityStore::open(&paths, Utc::now()).await?;
            let report = store
                .prune(settings.retention_days, settings.max_screenshots, Utc::now())
                .await
                .context("Failed to prune activities")?;
            println!(
                "Removed {} activities and {} screenshots",
                report.removed_records, report.removed_screenshots
            );
            Ok(())
        }
    }
}
