/// Launching a process into the interactive user's desktop from a Session 0 service.
///
/// A service runs in the non-interactive session 0, so a plain process start would put
/// the window somewhere nobody can see it.  Instead the service borrows the console
/// user's token:
///
///   1. enable `SeIncreaseQuotaPrivilege` + `SeAssignPrimaryTokenPrivilege` on our own token
///   2. find the active console session
///   3. query that session's user token
///   4. duplicate it into a primary token
///   5. build the user's environment block from the duplicate
///   6. `CreateProcessAsUser` on `winsta0\default` with the user's environment
///
/// Tokens and the environment block are owned values that release their OS resource on
/// drop, so every exit path (including each early `?`) frees whatever was acquired so far.
use tracing::info;

use crate::error::{LaunchError, LaunchStep, OsError};

pub const SE_INCREASE_QUOTA_NAME: &str = "SeIncreaseQuotaPrivilege";
pub const SE_ASSIGNPRIMARYTOKEN_NAME: &str = "SeAssignPrimaryTokenPrivilege";
/// Interactive window station and desktop of the logged-on user.
pub const INTERACTIVE_DESKTOP: &str = r"winsta0\default";
/// Session reserved for services.
#[cfg_attr(not(windows), allow(dead_code))]
pub const SERVICE_SESSION_ID: u32 = 0;

/// The platform capability the executor needs for privileged launches.
pub trait UserSessionLauncher: Send + Sync {
    /// True iff this process lives in the services session.
    fn is_running_elevated_service(&self) -> bool;

    /// Starts `path` with `arguments` inside the active console user's session.
    fn launch_in_user_session(&self, path: &str, arguments: &str) -> Result<(), LaunchError>;
}

/// What `CreateProcessAsUser` is asked to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    /// `"<path>" <arguments>`; the executable is located from the quoted first token.
    pub command_line: String,
    /// Directory containing the executable, `None` when the path has no directory part.
    pub working_directory: Option<String>,
    pub desktop: &'static str,
}

impl ProcessRequest {
    pub fn new(path: &str, arguments: &str) -> Self {
        let command_line = if arguments.is_empty() {
            format!("\"{path}\"")
        } else {
            format!("\"{path}\" {arguments}")
        };
        Self {
            command_line,
            working_directory: containing_directory(path).map(str::to_string),
            desktop: INTERACTIVE_DESKTOP,
        }
    }
}

/// Windows-style parent directory of `path`, accepting either separator.
pub fn containing_directory(path: &str) -> Option<&str> {
    let idx = path.rfind(['\\', '/'])?;
    let dir = &path[..idx];
    match dir {
        "" => None,
        // "C:\app.exe" → "C:\" rather than the drive-relative "C:"
        d if d.len() == 2 && d.ends_with(':') => Some(&path[..=idx]),
        d => Some(d),
    }
}

/// The native calls behind a cross-session launch.
///
/// `Token` and `Environment` own their OS resource and must release it on drop.
pub trait SessionApi {
    type Token;
    type Environment;

    fn enable_privilege(&self, name: &str) -> Result<(), OsError>;
    /// `None` when no user is attached to the console.
    fn active_console_session(&self) -> Option<u32>;
    fn query_user_token(&self, session_id: u32) -> Result<Self::Token, OsError>;
    fn duplicate_primary_token(&self, token: &Self::Token) -> Result<Self::Token, OsError>;
    fn create_environment_block(&self, token: &Self::Token) -> Result<Self::Environment, OsError>;
    /// Returns the new process id. Process and thread handles are closed before returning.
    fn create_process_as_user(
        &self,
        token: &Self::Token,
        environment: &Self::Environment,
        request: &ProcessRequest,
    ) -> Result<u32, OsError>;
}

/// Runs the launch algorithm against `api`. Returns the started process id.
pub fn launch_with<A: SessionApi>(api: &A, path: &str, arguments: &str) -> Result<u32, LaunchError> {
    let fail = |step: LaunchStep| {
        move |os: OsError| LaunchError::Native {
            step,
            os,
            path: path.to_string(),
            arguments: arguments.to_string(),
        }
    };

    api.enable_privilege(SE_INCREASE_QUOTA_NAME)
        .map_err(fail(LaunchStep::EnablePrivilege))?;
    api.enable_privilege(SE_ASSIGNPRIMARYTOKEN_NAME)
        .map_err(fail(LaunchStep::EnablePrivilege))?;

    let session_id = api.active_console_session().ok_or(LaunchError::NoActiveSession)?;

    let user_token = api
        .query_user_token(session_id)
        .map_err(fail(LaunchStep::QueryUserToken))?;
    let primary_token = api
        .duplicate_primary_token(&user_token)
        .map_err(fail(LaunchStep::DuplicateToken))?;
    let environment = api
        .create_environment_block(&primary_token)
        .map_err(fail(LaunchStep::EnvironmentBlock))?;

    let request = ProcessRequest::new(path, arguments);
    let pid = api
        .create_process_as_user(&primary_token, &environment, &request)
        .map_err(fail(LaunchStep::CreateProcess))?;

    info!(pid, session_id, path, arguments, "Launched process in user session");
    // Locals drop in reverse: environment block first, then both tokens.
    Ok(pid)
}

// ── Production launcher ───────────────────────────────────────────────────────

/// `UserSessionLauncher` backed by the WTS/token APIs.
///
/// On non-Windows platforms the process is never a service and launching reports
/// `LaunchError::Unsupported`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WtsLauncher;

impl UserSessionLauncher for WtsLauncher {
    fn is_running_elevated_service(&self) -> bool {
        #[cfg(windows)]
        {
            imp::current_session_id() == Some(SERVICE_SESSION_ID)
        }
        #[cfg(not(windows))]
        {
            false
        }
    }

    fn launch_in_user_session(&self, path: &str, arguments: &str) -> Result<(), LaunchError> {
        #[cfg(windows)]
        {
            launch_with(&imp::Win32SessionApi, path, arguments).map(|_| ())
        }
        #[cfg(not(windows))]
        {
            let _ = (path, arguments);
            Err(LaunchError::Unsupported)
        }
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::mem;

    use windows::core::{HSTRING, PCWSTR, PWSTR};
    use windows::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_NOT_ALL_ASSIGNED, FALSE, HANDLE, LUID,
    };
    use windows::Win32::Security::{
        AdjustTokenPrivileges, DuplicateTokenEx, LookupPrivilegeValueW, SecurityIdentification,
        TokenPrimary, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES,
        TOKEN_ALL_ACCESS, TOKEN_PRIVILEGES, TOKEN_QUERY,
    };
    use windows::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
    use windows::Win32::System::RemoteDesktop::{
        ProcessIdToSessionId, WTSGetActiveConsoleSessionId, WTSQueryUserToken,
    };
    use windows::Win32::System::Threading::{
        CreateProcessAsUserW, GetCurrentProcess, GetCurrentProcessId, OpenProcessToken,
        CREATE_UNICODE_ENVIRONMENT, NORMAL_PRIORITY_CLASS, PROCESS_INFORMATION, STARTUPINFOW,
    };

    use super::{ProcessRequest, SessionApi};
    use crate::error::OsError;

    /// WTSGetActiveConsoleSessionId's "no session attached" value.
    const NO_SESSION: u32 = 0xFFFF_FFFF;

    /// Converts to a Win32 error code where the HRESULT wraps one.
    pub fn os_error(e: windows::core::Error) -> OsError {
        let hr = e.code().0 as u32;
        let code = if hr & 0xFFFF_0000 == 0x8007_0000 { hr & 0xFFFF } else { hr };
        OsError::new(code, e.message().to_string())
    }

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn current_session_id() -> Option<u32> {
        let mut session_id = 0u32;
        unsafe { ProcessIdToSessionId(GetCurrentProcessId(), &mut session_id) }.ok()?;
        Some(session_id)
    }

    /// Closes the handle on drop.
    pub struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            if !self.0.is_invalid() {
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
    }

    /// Destroys the environment block on drop.
    pub struct EnvironmentBlock(*mut c_void);

    impl Drop for EnvironmentBlock {
        fn drop(&mut self) {
            if !self.0.is_null() {
                unsafe {
                    let _ = DestroyEnvironmentBlock(self.0);
                }
            }
        }
    }

    pub struct Win32SessionApi;

    impl SessionApi for Win32SessionApi {
        type Token = OwnedHandle;
        type Environment = EnvironmentBlock;

        fn enable_privilege(&self, name: &str) -> Result<(), OsError> {
            unsafe {
                let mut raw = HANDLE::default();
                OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY, &mut raw)
                    .map_err(os_error)?;
                let token = OwnedHandle(raw);

                let mut luid = LUID::default();
                LookupPrivilegeValueW(PCWSTR::null(), &HSTRING::from(name), &mut luid)
                    .map_err(os_error)?;

                let privileges = TOKEN_PRIVILEGES {
                    PrivilegeCount: 1,
                    Privileges: [LUID_AND_ATTRIBUTES { Luid: luid, Attributes: SE_PRIVILEGE_ENABLED }],
                };
                AdjustTokenPrivileges(token.0, FALSE, Some(&privileges), 0, None, None)
                    .map_err(os_error)?;

                // AdjustTokenPrivileges "succeeds" when the account simply lacks the privilege.
                let last = GetLastError();
                if last == ERROR_NOT_ALL_ASSIGNED {
                    return Err(os_error(windows::core::Error::from(last.to_hresult())));
                }
                Ok(())
            }
        }

        fn active_console_session(&self) -> Option<u32> {
            match unsafe { WTSGetActiveConsoleSessionId() } {
                NO_SESSION => None,
                id => Some(id),
            }
        }

        fn query_user_token(&self, session_id: u32) -> Result<OwnedHandle, OsError> {
            let mut raw = HANDLE::default();
            unsafe { WTSQueryUserToken(session_id, &mut raw) }.map_err(os_error)?;
            Ok(OwnedHandle(raw))
        }

        fn duplicate_primary_token(&self, token: &OwnedHandle) -> Result<OwnedHandle, OsError> {
            let mut raw = HANDLE::default();
            unsafe {
                DuplicateTokenEx(
                    token.0,
                    TOKEN_ALL_ACCESS,
                    None,
                    SecurityIdentification,
                    TokenPrimary,
                    &mut raw,
                )
            }
            .map_err(os_error)?;
            Ok(OwnedHandle(raw))
        }

        fn create_environment_block(&self, token: &OwnedHandle) -> Result<EnvironmentBlock, OsError> {
            let mut block: *mut c_void = std::ptr::null_mut();
            unsafe { CreateEnvironmentBlock(&mut block, token.0, FALSE) }.map_err(os_error)?;
            Ok(EnvironmentBlock(block))
        }

        fn create_process_as_user(
            &self,
            token: &OwnedHandle,
            environment: &EnvironmentBlock,
            request: &ProcessRequest,
        ) -> Result<u32, OsError> {
            let mut command_line = to_wide(&request.command_line);
            let mut desktop = to_wide(request.desktop);
            let working_directory = request.working_directory.as_deref().map(HSTRING::from);

            let startup_info = STARTUPINFOW {
                cb: mem::size_of::<STARTUPINFOW>() as u32,
                lpDesktop: PWSTR(desktop.as_mut_ptr()),
                ..Default::default()
            };
            let mut process_info = PROCESS_INFORMATION::default();

            unsafe {
                CreateProcessAsUserW(
                    token.0,
                    PCWSTR::null(),
                    PWSTR(command_line.as_mut_ptr()),
                    None,
                    None,
                    FALSE,
                    CREATE_UNICODE_ENVIRONMENT | NORMAL_PRIORITY_CLASS,
                    Some(environment.0 as *const c_void),
                    match &working_directory {
                        Some(dir) => PCWSTR(dir.as_ptr()),
                        None => PCWSTR::null(),
                    },
                    &startup_info,
                    &mut process_info,
                )
            }
            .map_err(os_error)?;

            // We never wait on the child.
            drop(OwnedHandle(process_info.hThread));
            drop(OwnedHandle(process_info.hProcess));
            Ok(process_info.dwProcessId)
        }
    }
}
