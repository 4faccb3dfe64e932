/// Direct launches for a foreground (interactive session) process: hands a path or URL
/// to the shell's `open` verb, which resolves file associations and the default browser.
use crate::error::ActionError;

pub trait ShellOpener: Send + Sync {
    /// Opens `target` (an executable, document or URL), passing `arguments` through.
    fn open(&self, target: &str, arguments: &str) -> Result<(), ActionError>;
}

/// `ShellOpener` backed by `ShellExecuteW`.
///
/// On non-Windows platforms opening reports `ActionError::Unsupported`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExecuteOpener;

impl ShellOpener for ShellExecuteOpener {
    fn open(&self, target: &str, arguments: &str) -> Result<(), ActionError> {
        #[cfg(windows)]
        {
            imp::shell_execute(target, arguments)
        }
        #[cfg(not(windows))]
        {
            let _ = (target, arguments);
            Err(ActionError::Unsupported)
        }
    }
}

#[cfg(windows)]
mod imp {
    use windows::core::{w, HSTRING, PCWSTR};
    use windows::Win32::Foundation::GetLastError;
    use windows::Win32::UI::Shell::ShellExecuteW;
    use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    use crate::error::{ActionError, OsError};

    pub fn shell_execute(target: &str, arguments: &str) -> Result<(), ActionError> {
        let file = HSTRING::from(target);
        let params = HSTRING::from(arguments);
        let result = unsafe {
            ShellExecuteW(
                None,
                w!("open"),
                &file,
                if arguments.is_empty() { PCWSTR::null() } else { PCWSTR(params.as_ptr()) },
                PCWSTR::null(),
                SW_SHOWNORMAL,
            )
        };

        // Values above 32 mean success; anything else is an SE_ERR_* / Win32 code.
        if result.0 as isize > 32 {
            return Ok(());
        }
        let last = unsafe { GetLastError() };
        let e = windows::core::Error::from(last.to_hresult());
        Err(ActionError::Open {
            target: target.to_string(),
            os: OsError::new(last.0, e.message().to_string()),
        })
    }
}
