/// WMI event subscriptions for `hpqBEvnt`.
///
/// Each subscription runs on a dedicated OS thread that initialises COM (MTA), connects
/// to the namespace, opens a semi-synchronous notification query and then blocks in
/// `IEnumWbemClassObject::Next`.  Every delivered event invokes the subscription's
/// callback on that thread.  `Next` wakes up every 500 ms to check the stop flag, so
/// stopping a watcher takes at most that long.
///
/// Setup errors (bad namespace, unknown class, malformed query) are reported back to
/// [`EventSource::subscribe`] before it returns, so a failed registration never leaves
/// a thread behind.
///
/// On non-Windows platforms every subscription fails with a `RegistrationError`.
use tracing::warn;

use crate::error::RegistrationError;
use crate::monitor::{EventCallback, EventSource, HardwareEvent, Subscription};

#[derive(Debug, Default, Clone, Copy)]
pub struct WmiEventSource;

impl EventSource for WmiEventSource {
    fn subscribe(
        &self,
        namespace: &str,
        query: &str,
        callback: EventCallback,
    ) -> Result<Box<dyn Subscription>, RegistrationError> {
        #[cfg(windows)]
        {
            let watcher = imp::spawn_watcher(namespace, query, callback)?;
            Ok(Box::new(watcher))
        }
        #[cfg(not(windows))]
        {
            let _ = (namespace, callback);
            Err(RegistrationError {
                query: query.to_string(),
                reason: "WMI event subscriptions are only available on Windows".to_string(),
            })
        }
    }
}

/// Builds the delivered event from its `EventID`/`EventData` properties.
///
/// `EventID` is required.  An unreadable `EventData` is delivered as 0, which only
/// actions matching any data accept, so it is logged rather than dropped quietly.
#[cfg_attr(not(windows), allow(dead_code))]
fn event_from_properties(
    query: &str,
    event_id: Option<u32>,
    event_data: Option<u32>,
) -> Option<HardwareEvent> {
    let Some(event_id) = event_id else {
        warn!(query, "Event without a readable EventID ignored");
        return None;
    };
    let event_data = event_data.unwrap_or_else(|| {
        warn!(
            query,
            event_id,
            "EventData unreadable; delivering as 0, so only actions matching any data will run"
        );
        0
    });
    Some(HardwareEvent { event_id, event_data })
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::thread::JoinHandle;

    use anyhow::anyhow;
    use tracing::{debug, error};
    use windows::core::{w, BSTR, PCWSTR, VARIANT};
    use windows::Win32::System::Com::{
        CoCreateInstance, CoInitializeEx, CoSetProxyBlanket, CoUninitialize, CLSCTX_INPROC_SERVER,
        COINIT_MULTITHREADED, EOAC_NONE, RPC_C_AUTHN_LEVEL_CALL, RPC_C_IMP_LEVEL_IMPERSONATE,
    };
    use windows::Win32::System::Rpc::{RPC_C_AUTHN_WINNT, RPC_C_AUTHZ_NONE};
    use windows::Win32::System::Wmi::{
        IEnumWbemClassObject, IWbemClassObject, IWbemLocator, WbemLocator,
        WBEM_FLAG_FORWARD_ONLY, WBEM_FLAG_RETURN_IMMEDIATELY, WBEM_GENERIC_FLAG_TYPE,
        WBEM_S_TIMEDOUT,
    };

    use super::event_from_properties;
    use crate::error::RegistrationError;
    use crate::monitor::{EventCallback, Subscription};

    /// How long one `Next` call may block before re-checking the stop flag.
    const POLL_TIMEOUT_MS: i32 = 500;

    /// A running watcher thread.
    pub struct WmiWatcher {
        query: String,
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl Subscription for WmiWatcher {
        fn request_stop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(thread) = self.thread.take() {
                thread
                    .join()
                    .map_err(|_| anyhow!("Watcher thread for '{}' panicked", self.query))?;
            }
            Ok(())
        }
    }

    impl Drop for WmiWatcher {
        fn drop(&mut self) {
            let _ = Subscription::stop(self);
        }
    }

    pub fn spawn_watcher(
        namespace: &str,
        query: &str,
        callback: EventCallback,
    ) -> Result<WmiWatcher, RegistrationError> {
        let registration_error = |reason: String| RegistrationError {
            query: query.to_string(),
            reason,
        };

        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let namespace = namespace.to_string();
            let query = query.to_string();
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("wmi-watcher".into())
                .spawn(move || run(&namespace, &query, &callback, &stop, ready_tx))
                .map_err(|e| registration_error(format!("Failed to spawn watcher thread: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(WmiWatcher {
                query: query.to_string(),
                stop,
                thread: Some(thread),
            }),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(registration_error(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(registration_error("Watcher thread exited during setup".to_string()))
            }
        }
    }

    /// Thread body: COM init → subscribe → report readiness → deliver until stopped.
    fn run(
        namespace: &str,
        query: &str,
        callback: &EventCallback,
        stop: &AtomicBool,
        ready_tx: std_mpsc::SyncSender<Result<(), String>>,
    ) {
        if let Err(e) = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.ok() {
            let _ = ready_tx.send(Err(format!("CoInitializeEx failed: {e}")));
            return;
        }

        // COM objects live in this scope so they are released before CoUninitialize.
        {
            match open_query(namespace, query) {
                Ok(enumerator) => {
                    let _ = ready_tx.send(Ok(()));
                    drop(ready_tx);
                    deliver(&enumerator, query, callback, stop);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!(
                        "{} (0x{:08X})",
                        e.message(),
                        e.code().0 as u32
                    )));
                }
            }
        }

        unsafe { CoUninitialize() };
        debug!(query, "Watcher thread exited");
    }

    fn open_query(namespace: &str, query: &str) -> windows::core::Result<IEnumWbemClassObject> {
        unsafe {
            let locator: IWbemLocator = CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER)?;
            let services = locator.ConnectServer(
                &BSTR::from(namespace),
                &BSTR::new(),
                &BSTR::new(),
                &BSTR::new(),
                0,
                &BSTR::new(),
                None,
            )?;
            CoSetProxyBlanket(
                &services,
                RPC_C_AUTHN_WINNT,
                RPC_C_AUTHZ_NONE,
                PCWSTR::null(),
                RPC_C_AUTHN_LEVEL_CALL,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
            )?;
            services.ExecNotificationQuery(
                &BSTR::from("WQL"),
                &BSTR::from(query),
                WBEM_GENERIC_FLAG_TYPE(WBEM_FLAG_RETURN_IMMEDIATELY.0 | WBEM_FLAG_FORWARD_ONLY.0),
                None,
            )
        }
    }

    fn deliver(enumerator: &IEnumWbemClassObject, query: &str, callback: &EventCallback, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            let mut objects: [Option<IWbemClassObject>; 1] = [None];
            let mut returned = 0u32;
            let hr = unsafe { enumerator.Next(POLL_TIMEOUT_MS, &mut objects, &mut returned) };

            if hr.0 == WBEM_S_TIMEDOUT.0 {
                continue;
            }
            if hr.is_err() {
                error!(query, "Event delivery failed (0x{:08X}); watcher stopped", hr.0 as u32);
                return;
            }
            if returned == 0 {
                continue;
            }
            let Some(object) = objects[0].take() else { continue };

            let event = event_from_properties(
                query,
                read_u32(&object, w!("EventID")),
                read_u32(&object, w!("EventData")),
            );
            if let Some(event) = event {
                callback(event);
            }
        }
    }

    /// Reads an integer property, accepting either signed or unsigned variants.
    fn read_u32(object: &IWbemClassObject, name: PCWSTR) -> Option<u32> {
        let mut value = VARIANT::default();
        unsafe { object.Get(name, 0, &mut value, None, None) }.ok()?;
        u32::try_from(&value)
            .ok()
            .or_else(|| i32::try_from(&value).ok().map(|v| v as u32))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
