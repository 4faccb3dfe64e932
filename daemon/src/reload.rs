/// Cross-process "reload your configuration" signal.
///
/// The configurator sets the auto-reset named event [`RELOAD_EVENT_NAME`] after saving;
/// the daemon waits on it on a dedicated OS thread and forwards each signal to the main
/// event loop as [`DaemonEvent::ReloadRequested`].  The listener thread exits cleanly
/// when [`ReloadListener::stop`] is called.
///
/// A daemon running as a service lives in session 0, where the session-local name is
/// invisible to the user's configurator.  It listens on [`GLOBAL_RELOAD_EVENT_NAME`]
/// instead, created with a DACL that lets interactive users set it.
///
/// On non-Windows platforms the listener is a no-op and signalling reports an error.
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

pub const RELOAD_EVENT_NAME: &str = "HPButtonRemap_ReloadConfig";
pub const GLOBAL_RELOAD_EVENT_NAME: &str = r"Global\HPButtonRemap_ReloadConfig";

/// SYSTEM and Administrators get full access; interactive users may set and wait.
#[cfg_attr(not(windows), allow(dead_code))]
const SERVICE_EVENT_SDDL: &str = "D:(A;;GA;;;SY)(A;;GA;;;BA)(A;;0x100002;;;IU)";

/// Names tried by [`signal_reload`], service first.
#[cfg_attr(not(windows), allow(dead_code))]
const SIGNAL_EVENT_NAMES: [&str; 2] = [GLOBAL_RELOAD_EVENT_NAME, RELOAD_EVENT_NAME];

#[cfg_attr(not(windows), allow(dead_code))]
fn listen_event_name(in_services_session: bool) -> &'static str {
    if in_services_session {
        GLOBAL_RELOAD_EVENT_NAME
    } else {
        RELOAD_EVENT_NAME
    }
}

/// A handle to the running reload listener.
pub struct ReloadListener {
    #[cfg(windows)]
    thread: Option<std::thread::JoinHandle<()>>,
    #[cfg(windows)]
    stop_event: imp::EventHandle,
}

impl ReloadListener {
    /// Signals the listener thread to stop and blocks until it exits.
    pub fn stop(self) {
        #[cfg(windows)]
        {
            let mut this = self;
            this.stop_event.set();
            if let Some(thread) = this.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

/// Creates (or opens) the named reload event and starts waiting on it.
///
/// Each signal sends `DaemonEvent::ReloadRequested(ReloadSource::Signal)` to `tx`.
/// Signals that arrive while a reload is already queued collapse into one, since the
/// event is auto-reset.
pub fn listen(tx: mpsc::Sender<DaemonEvent>) -> anyhow::Result<ReloadListener> {
    #[cfg(windows)]
    {
        use anyhow::Context;

        use crate::session::{UserSessionLauncher, WtsLauncher};

        let service = WtsLauncher.is_running_elevated_service();
        let name = listen_event_name(service);
        let reload_event = if service {
            imp::EventHandle::named_for_users(name, SERVICE_EVENT_SDDL)
        } else {
            imp::EventHandle::named(name)
        }
        .with_context(|| format!("Failed to create event '{name}'"))?;
        tracing::debug!(name, "Listening for reload signals");
        let stop_event = imp::EventHandle::unnamed().context("Failed to create stop event")?;
        let thread_stop = stop_event.clone();

        let thread = std::thread::Builder::new()
            .name("reload-signal".into())
            .spawn(move || imp::wait_loop(reload_event, thread_stop, tx))
            .context("Failed to spawn reload listener thread")?;

        Ok(ReloadListener { thread: Some(thread), stop_event })
    }

    #[cfg(not(windows))]
    {
        let _ = tx;
        tracing::debug!("Reload signal listener is only available on Windows");
        Ok(ReloadListener {})
    }
}

/// Sets the named reload event so a running daemon re-reads its configuration.
/// A service daemon's global event is tried before the session-local one.
pub fn signal_reload() -> anyhow::Result<()> {
    #[cfg(windows)]
    {
        imp::signal(&SIGNAL_EVENT_NAMES)
    }
    #[cfg(not(windows))]
    {
        anyhow::bail!("Reload signalling is only available on Windows")
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::sync::Arc;

    use anyhow::Context;
    use tokio::sync::mpsc;
    use tracing::{debug, error, info};
    use windows::core::{HSTRING, PCWSTR};
    use windows::Win32::Foundation::{CloseHandle, LocalFree, HANDLE, HLOCAL, WAIT_OBJECT_0};
    use windows::Win32::Security::Authorization::{
        ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
    };
    use windows::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};
    use windows::Win32::System::Threading::{
        CreateEventW, OpenEventW, SetEvent, WaitForMultipleObjects, EVENT_MODIFY_STATE, INFINITE,
    };

    use crate::event::{DaemonEvent, ReloadSource};

    struct RawEvent(HANDLE);

    // Kernel event handles may be waited on and set from any thread.
    unsafe impl Send for RawEvent {}
    unsafe impl Sync for RawEvent {}

    impl Drop for RawEvent {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    /// Shared ownership of an event handle; closed when the last reference drops.
    #[derive(Clone)]
    pub struct EventHandle(Arc<RawEvent>);

    impl EventHandle {
        /// Auto-reset, initially non-signalled, opened if it already exists.
        pub fn named(name: &str) -> windows::core::Result<Self> {
            let handle = unsafe { CreateEventW(None, false, false, &HSTRING::from(name))? };
            Ok(Self(Arc::new(RawEvent(handle))))
        }

        /// Like [`named`](Self::named), with the security descriptor given as SDDL.
        pub fn named_for_users(name: &str, sddl: &str) -> windows::core::Result<Self> {
            let mut descriptor = PSECURITY_DESCRIPTOR::default();
            unsafe {
                ConvertStringSecurityDescriptorToSecurityDescriptorW(
                    &HSTRING::from(sddl),
                    SDDL_REVISION_1,
                    &mut descriptor,
                    None,
                )?;
            }
            let attributes = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: descriptor.0,
                bInheritHandle: false.into(),
            };
            let created = unsafe {
                CreateEventW(Some(&attributes as *const _), false, false, &HSTRING::from(name))
            };
            unsafe {
                let _ = LocalFree(HLOCAL(descriptor.0));
            }
            Ok(Self(Arc::new(RawEvent(created?))))
        }

        /// Manual-reset, so once set it stays set for the waiting thread.
        pub fn unnamed() -> windows::core::Result<Self> {
            let handle = unsafe { CreateEventW(None, true, false, PCWSTR::null())? };
            Ok(Self(Arc::new(RawEvent(handle))))
        }

        pub fn set(&self) {
            unsafe {
                let _ = SetEvent(self.raw());
            }
        }

        fn raw(&self) -> HANDLE {
            self.0 .0
        }
    }

    pub fn wait_loop(reload: EventHandle, stop: EventHandle, tx: mpsc::Sender<DaemonEvent>) {
        let handles = [reload.raw(), stop.raw()];
        loop {
            let woke = unsafe { WaitForMultipleObjects(&handles, false, INFINITE) };
            if woke == WAIT_OBJECT_0 {
                info!("Reload signal received");
                if tx
                    .blocking_send(DaemonEvent::ReloadRequested(ReloadSource::Signal))
                    .is_err()
                {
                    break;
                }
            } else if woke.0 == WAIT_OBJECT_0.0 + 1 {
                break;
            } else {
                error!("Waiting for the reload signal failed ({:#x})", woke.0);
                break;
            }
        }
        debug!("Reload listener thread exited");
    }

    /// Sets the first of `names` that exists.
    pub fn signal(names: &[&str]) -> anyhow::Result<()> {
        for name in names {
            let Ok(handle) = (unsafe { OpenEventW(EVENT_MODIFY_STATE, false, &HSTRING::from(*name)) })
            else {
                continue;
            };
            let event = RawEvent(handle);
            unsafe { SetEvent(event.0) }.with_context(|| format!("Failed to set '{name}'"))?;
            debug!(name, "Reload event set");
            return Ok(());
        }
        anyhow::bail!("No running daemon is listening on '{}'", names.join("' or '"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
