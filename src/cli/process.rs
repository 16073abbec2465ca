use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Signal, System};
use tracing::info;

/// Subcommand run by the background recorder.
pub const RECORD_COMMAND: &str = "record";

fn is_recorder(cmd: &[impl AsRef<OsStr>]) -> bool {
    cmd.iter().skip(1).any(|v| v.as_ref() == RECORD_COMMAND)
}

/// Stops every background recorder started from `name`. Returns how many were stopped.
pub fn kill_previous_recorders(name: &Path) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't get the current pid: {e}"))?;
    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        let same_executable = process
            .exe()
            .filter(|v| v.exists())
            .is_some_and(|v| name == v);
        if same_executable && is_recorder(process.cmd()) {
            info!("Stopping recorder {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            killed += 1;
        }
    }
    Ok(killed)
}

fn recorder_args(dir: Option<&Path>, interval: Option<u64>) -> Vec<String> {
    let mut args = vec![];
    if let Some(dir) = dir {
        args.push("--dir".to_string());
        args.push(dir.to_string_lossy().to_string());
    }
    args.push(RECORD_COMMAND.to_string());
    if let Some(interval) = interval {
        args.push("--interval".to_string());
        args.push(interval.to_string());
    }
    args
}

/// Stops a running recorder and starts a new one as a detached process of the current executable.
pub fn restart_recorder(dir: Option<PathBuf>, interval: Option<u64>) -> Result<()> {
    let process_name = env::current_exe()?;
    kill_previous_recorders(&process_name)?;
    let mut command = std::process::Command::new(process_name);
    command.args(recorder_args(dir.as_deref(), interval));
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[allow(clippy::zombie_processes)]
    let child = command.spawn()?;
    println!("Started recorder with pid {}", child.id());
    Ok(())
}
