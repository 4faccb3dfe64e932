/// Where `config.json` may live, in the order the configurator and daemon search:
///
///   1. %ProgramFiles%\HPButtonRemap\config.json   written by the configurator
///   2. <exe dir>\config.json                       next to the daemon binary
///   3. %LOCALAPPDATA%\HPButtonRemap\config.json    configurator fallback without admin rights
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "HPButtonRemap";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directory containing the running executable, or the working directory if unknown.
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Builds the candidate list from the three base directories; absent bases are skipped.
pub fn candidates(
    program_files: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    local_app_data: Option<PathBuf>,
) -> Vec<PathBuf> {
    [
        program_files.map(|d| d.join(APP_DIR_NAME)),
        exe_dir,
        local_app_data.map(|d| d.join(APP_DIR_NAME)),
    ]
    .into_iter()
    .flatten()
    .map(|dir| dir.join(CONFIG_FILE_NAME))
    .collect()
}

/// Returns the first candidate that exists, else `default` (where the sample gets written).
pub fn first_existing(candidates: &[PathBuf], default: PathBuf) -> PathBuf {
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .unwrap_or(default)
}

/// Resolves the config path for this process from the environment.
pub fn config_file_path() -> PathBuf {
    let exe = exe_dir();
    let list = candidates(
        std::env::var_os("ProgramFiles").map(PathBuf::from),
        Some(exe.clone()),
        std::env::var_os("LOCALAPPDATA").map(PathBuf::from),
    );
    first_existing(&list, exe.join(CONFIG_FILE_NAME))
}
