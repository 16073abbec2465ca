use std::{
    env, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};

pub const APPLICATION_NAME: &str = "activity-recorder";

const ACTIVITY_LOG_FILE: &str = "activity_log.json";
const SETTINGS_FILE: &str = "settings.json";
const SCREENSHOT_DIR: &str = "screenshots";
const LOG_DIR: &str = "logs";

pub fn create_application_default_path() -> Result<PathBuf> {
    let path = {
        #[cfg(windows)]
        {
            let mut path = env::var("APPDATA")
                .map(PathBuf::from)
                .map_err(|_| anyhow!("APPDATA should be present on Windows"))?;
            path.push(APPLICATION_NAME);
            path
        }
        #[cfg(not(windows))]
        {
            let mut path = env::var("XDG_STATE_HOME")
                .map(PathBuf::from)
                .or_else(|_| {
                    env::var("HOME").map(|home| {
                        let mut path = PathBuf::from(home);
                        path.push(".local/state");
                        path
                    })
                })
                .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))?;
            path.push(APPLICATION_NAME);
            path
        }
    };

    ensure_dir(path)
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

/// Layout of the application directory. The dashboard and the extension read the same files, so
/// the names are fixed.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Uses `dir` when given, otherwise the platform default. The directory is created.
    pub fn resolve(dir: Option<PathBuf>) -> Result<Self> {
        let root = match dir {
            Some(dir) => ensure_dir(dir)?,
            None => create_application_default_path()?,
        };
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn activity_log(&self) -> PathBuf {
        self.root.join(ACTIVITY_LOG_FILE)
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn screenshots(&self) -> PathBuf {
        self.root.join(SCREENSHOT_DIR)
    }

    /// Screenshot location as it is written into records.
    pub fn relative_screenshot(&self, file_name: &str) -> String {
        format!("{SCREENSHOT_DIR}/{file_name}")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }
}
