use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading the action list. Fatal to starting the monitor,
/// never to the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No config file existed; a sample was written in its place.
    #[error(
        "Configuration file not found: {}. A sample was written there; edit it and signal a reload",
        .path.display()
    )]
    Missing { path: PathBuf },

    #[error("Failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}: {source}. Fix the JSON and signal a reload", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No button actions configured in {}", .path.display())]
    Empty { path: PathBuf },
}

/// One action's hardware-event subscription could not be opened.
#[derive(Error, Debug)]
#[error("Failed to subscribe to '{query}': {reason}")]
pub struct RegistrationError {
    pub query: String,
    pub reason: String,
}

/// Key-combo precondition failures. Either one aborts the combo before any key is pressed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("Unknown key: '{0}'")]
    UnknownKey(String),

    #[error("Key combo contains no keys")]
    EmptyCombo,
}

/// The native step of a cross-session launch that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStep {
    EnablePrivilege,
    QueryUserToken,
    DuplicateToken,
    EnvironmentBlock,
    CreateProcess,
}

impl fmt::Display for LaunchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchStep::EnablePrivilege => "AdjustTokenPrivileges",
            LaunchStep::QueryUserToken => "WTSQueryUserToken",
            LaunchStep::DuplicateToken => "DuplicateTokenEx",
            LaunchStep::EnvironmentBlock => "CreateEnvironmentBlock",
            LaunchStep::CreateProcess => "CreateProcessAsUser",
        };
        f.write_str(name)
    }
}

/// A platform failure reported by a single native call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsError {
    pub code: u32,
    pub message: String,
}

impl OsError {
    /// System messages end in ".\r\n"; that tail is trimmed so the text can be embedded.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = message.trim_end_matches(|c: char| c.is_whitespace() || c == '.');
        Self { code, message: message.to_string() }
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error code {}: {}", self.code, self.message)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// Nobody is logged on at the console.
    #[error("No active console session found")]
    NoActiveSession,

    #[error("{step} failed with {os}. App: {path}, Args: {}", display_args(.arguments))]
    Native {
        step: LaunchStep,
        os: OsError,
        path: String,
        arguments: String,
    },

    #[error("Launching into the user session is not supported on this platform")]
    Unsupported,
}

fn display_args(arguments: &str) -> &str {
    if arguments.is_empty() {
        "(none)"
    } else {
        arguments
    }
}

/// Everything `ActionExecutor::try_execute` can report. Never leaves `execute`.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("LaunchPath is not specified")]
    MissingPath,

    #[error("WebsiteUrl is not specified")]
    MissingUrl,

    #[error("KeyCombo is not specified")]
    MissingCombo,

    #[error("Unknown action type: '{0}'")]
    UnknownType(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Failed to open '{target}': {os}")]
    Open { target: String, os: OsError },

    #[error("Opening files and URLs is not supported on this platform")]
    Unsupported,
}
