use std::env::args;

use activity_recorder::{
    daemon::{args::HostArgs, start_daemon},
    utils::{
        dir::AppPaths,
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};
use anyhow::Result;
use clap::Parser;
use tracing::error;

fn main() -> Result<()> {
    run_host(args().collect::<Vec<_>>())
}

fn run_host(command_args: Vec<String>) -> Result<()> {
    let args = HostArgs::parse_from(&command_args);
    let paths = AppPaths::resolve(args.dir.clone())?;
    enable_logging(HOST_PREFIX, &paths.logs(), args.log, args.log_console)?;

    let runtime = single_thread_runtime()?;
    let result = runtime.block_on(start_daemon(paths, args.framing()));
    // Reading stdin occupies a blocking thread that can't be interrupted.
    runtime.shutdown_background();

    result.inspect_err(|e| error!("Host stopped with an error {e:?}"))
}
