use tracing::{error, info, warn, Level};

use crate::config::{ActionKind, ButtonAction};
use crate::error::ActionError;
use crate::key_combo::{self, KeyInjector, SendInputInjector};
use crate::monitor::ActionHandler;
use crate::session::{UserSessionLauncher, WtsLauncher};
use crate::shell::{ShellExecuteOpener, ShellOpener};

/// Runs one configured action.
///
/// Holds no mutable state, so it can be shared across every subscription callback and
/// called concurrently, including overlapping calls for the same action.
pub struct ActionExecutor<L, S, K> {
    launcher: L,
    opener: S,
    injector: K,
}

pub type NativeExecutor = ActionExecutor<WtsLauncher, ShellExecuteOpener, SendInputInjector>;

impl NativeExecutor {
    pub fn native() -> Self {
        ActionExecutor::new(WtsLauncher, ShellExecuteOpener, SendInputInjector)
    }
}

impl<L, S, K> ActionExecutor<L, S, K>
where
    L: UserSessionLauncher,
    S: ShellOpener,
    K: KeyInjector,
{
    pub fn new(launcher: L, opener: S, injector: K) -> Self {
        Self { launcher, opener, injector }
    }

    /// Executes `action`, logging any failure. Never returns an error and never panics
    /// on a misconfigured action: the caller is an event-delivery thread.
    pub fn execute(&self, action: &ButtonAction) {
        info!(action = %action.name, kind = action.kind.type_name(), "Executing action");
        if let Err(e) = self.try_execute(action) {
            if failure_level(&e) == Level::WARN {
                warn!(action = %action.name, "Action skipped: {e}");
            } else {
                error!(action = %action.name, "Failed to execute action: {e}");
            }
        }
    }

    pub fn try_execute(&self, action: &ButtonAction) -> Result<(), ActionError> {
        match &action.kind {
            ActionKind::LaunchApp { path, arguments } => self.launch_app(path, arguments),
            ActionKind::OpenWebsite { url } => self.open_website(url),
            ActionKind::SendKeys { combo } => self.send_keys(combo),
            ActionKind::Unknown { type_name } => Err(ActionError::UnknownType(type_name.clone())),
        }
    }

    fn launch_app(&self, path: &str, arguments: &str) -> Result<(), ActionError> {
        if path.is_empty() {
            return Err(ActionError::MissingPath);
        }
        if self.launcher.is_running_elevated_service() {
            self.launcher.launch_in_user_session(path, arguments)?;
        } else {
            self.opener.open(path, arguments)?;
        }
        info!(path, arguments, "Launched application");
        Ok(())
    }

    fn open_website(&self, url: &str) -> Result<(), ActionError> {
        if url.is_empty() {
            return Err(ActionError::MissingUrl);
        }
        if self.launcher.is_running_elevated_service() {
            // CreateProcessAsUser needs an executable; `start` does the URL association lookup.
            let cmd = cmd_exe_path();
            self.launcher
                .launch_in_user_session(&cmd, &start_url_arguments(url))?;
        } else {
            self.opener.open(url, "")?;
        }
        info!(url, "Opened website");
        Ok(())
    }

    fn send_keys(&self, combo: &str) -> Result<(), ActionError> {
        if combo.trim().is_empty() {
            return Err(ActionError::MissingCombo);
        }
        key_combo::press(&self.injector, combo)?;
        info!(combo, "Sent key combo");
        Ok(())
    }
}

impl<L, S, K> ActionHandler for ActionExecutor<L, S, K>
where
    L: UserSessionLauncher,
    S: ShellOpener,
    K: KeyInjector,
{
    fn handle(&self, action: &ButtonAction) {
        self.execute(action);
    }
}

/// An action type this build does not know is a config mismatch, not a failure.
fn failure_level(error: &ActionError) -> Level {
    match error {
        ActionError::UnknownType(_) => Level::WARN,
        _ => Level::ERROR,
    }
}

/// `%SystemRoot%\System32\cmd.exe`, defaulting to `C:\Windows`.
pub fn cmd_exe_path() -> String {
    let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
    format!(r"{}\System32\cmd.exe", root.trim_end_matches('\\'))
}

/// `/c start "" "<url>"`. The empty title keeps `start` from treating the quoted URL as
/// a window title; a literal quote in the URL is percent-encoded so it cannot end the argument.
pub fn start_url_arguments(url: &str) -> String {
    format!(r#"/c start "" "{}""#, url.replace('"', "%22"))
}
