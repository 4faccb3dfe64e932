//! Recording stand-ins for the platform capabilities, used by unit tests.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;

use crate::error::{ActionError, LaunchError, OsError, RegistrationError};
use crate::key_combo::{KeyInjector, KeyStroke};
use crate::monitor::{EventCallback, EventSource, HardwareEvent, Subscription};
use crate::session::{ProcessRequest, SessionApi, UserSessionLauncher};
use crate::shell::ShellOpener;

// ── key injection ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingInjector {
    strokes: Mutex<Vec<KeyStroke>>,
    calls: AtomicUsize,
}

impl RecordingInjector {
    pub fn strokes(&self) -> Vec<KeyStroke> {
        self.strokes.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyInjector for RecordingInjector {
    fn inject(&self, strokes: &[KeyStroke]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.strokes.lock().unwrap().extend_from_slice(strokes);
    }
}

// ── launcher / shell ──────────────────────────────────────────────────────────

pub struct FakeLauncher {
    service: bool,
    failure: Option<LaunchError>,
    launches: Mutex<Vec<(String, String)>>,
}

impl FakeLauncher {
    pub fn new(service: bool) -> Self {
        Self { service, failure: None, launches: Mutex::new(Vec::new()) }
    }

    /// A service-context launcher whose every launch fails with `failure`.
    pub fn failing(failure: LaunchError) -> Self {
        Self { service: true, failure: Some(failure), launches: Mutex::new(Vec::new()) }
    }

    pub fn launches(&self) -> Vec<(String, String)> {
        self.launches.lock().unwrap().clone()
    }
}

impl UserSessionLauncher for FakeLauncher {
    fn is_running_elevated_service(&self) -> bool {
        self.service
    }

    fn launch_in_user_session(&self, path: &str, arguments: &str) -> Result<(), LaunchError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        self.launches.lock().unwrap().push((path.to_string(), arguments.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOpener {
    opens: Mutex<Vec<(String, String)>>,
}

impl FakeOpener {
    pub fn opens(&self) -> Vec<(String, String)> {
        self.opens.lock().unwrap().clone()
    }
}

impl ShellOpener for FakeOpener {
    fn open(&self, target: &str, arguments: &str) -> Result<(), ActionError> {
        self.opens.lock().unwrap().push((target.to_string(), arguments.to_string()));
        Ok(())
    }
}

// ── session api ───────────────────────────────────────────────────────────────

/// Which native step the fake should fail with "access denied" (code 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Nothing,
    Privilege,
    QueryToken,
    Duplicate,
    Environment,
    CreateProcess,
}

#[derive(Default)]
struct Resources {
    acquired: AtomicUsize,
    live: AtomicUsize,
}

/// A token or environment block that counts itself live until dropped.
pub struct FakeResource {
    resources: Arc<Resources>,
    session_id: u32,
    duplicate: bool,
}

impl FakeResource {
    fn acquire(resources: &Arc<Resources>, session_id: u32, duplicate: bool) -> Self {
        resources.acquired.fetch_add(1, Ordering::SeqCst);
        resources.live.fetch_add(1, Ordering::SeqCst);
        Self { resources: Arc::clone(resources), session_id, duplicate }
    }
}

impl Drop for FakeResource {
    fn drop(&mut self) {
        self.resources.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeSessionApi {
    session: Option<u32>,
    fail_at: FailAt,
    resources: Arc<Resources>,
    privileges: Mutex<Vec<String>>,
    launched: Mutex<Vec<ProcessRequest>>,
    process_token: Mutex<Option<(u32, bool)>>,
}

impl FakeSessionApi {
    pub fn new(session: Option<u32>, fail_at: FailAt) -> Self {
        Self {
            session,
            fail_at,
            resources: Arc::default(),
            privileges: Mutex::new(Vec::new()),
            launched: Mutex::new(Vec::new()),
            process_token: Mutex::new(None),
        }
    }

    fn check(&self, step: FailAt) -> Result<(), OsError> {
        if self.fail_at == step {
            return Err(OsError::new(5, "Access is denied."));
        }
        Ok(())
    }

    pub fn acquired_resources(&self) -> usize {
        self.resources.acquired.load(Ordering::SeqCst)
    }

    pub fn live_resources(&self) -> usize {
        self.resources.live.load(Ordering::SeqCst)
    }

    pub fn privileges_enabled(&self) -> Vec<String> {
        self.privileges.lock().unwrap().clone()
    }

    pub fn launched(&self) -> Vec<ProcessRequest> {
        self.launched.lock().unwrap().clone()
    }

    pub fn process_token_session(&self) -> Option<u32> {
        self.process_token.lock().unwrap().map(|(session, _)| session)
    }

    pub fn process_token_was_duplicate(&self) -> bool {
        self.process_token.lock().unwrap().map_or(false, |(_, duplicate)| duplicate)
    }
}

impl SessionApi for FakeSessionApi {
    type Token = FakeResource;
    type Environment = FakeResource;

    fn enable_privilege(&self, name: &str) -> Result<(), OsError> {
        self.check(FailAt::Privilege)?;
        self.privileges.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn active_console_session(&self) -> Option<u32> {
        self.session
    }

    fn query_user_token(&self, session_id: u32) -> Result<FakeResource, OsError> {
        self.check(FailAt::QueryToken)?;
        Ok(FakeResource::acquire(&self.resources, session_id, false))
    }

    fn duplicate_primary_token(&self, token: &FakeResource) -> Result<FakeResource, OsError> {
        self.check(FailAt::Duplicate)?;
        Ok(FakeResource::acquire(&self.resources, token.session_id, true))
    }

    fn create_environment_block(&self, token: &FakeResource) -> Result<FakeResource, OsError> {
        self.check(FailAt::Environment)?;
        Ok(FakeResource::acquire(&self.resources, token.session_id, false))
    }

    fn create_process_as_user(
        &self,
        token: &FakeResource,
        _environment: &FakeResource,
        request: &ProcessRequest,
    ) -> Result<u32, OsError> {
        self.check(FailAt::CreateProcess)?;
        *self.process_token.lock().unwrap() = Some((token.session_id, token.duplicate));
        self.launched.lock().unwrap().push(request.clone());
        Ok(4242)
    }
}

// ── event source ──────────────────────────────────────────────────────────────

struct FakeSubscriptionState {
    callback: EventCallback,
    stopped: Arc<AtomicBool>,
}

#[derive(Default)]
struct FakeSourceState {
    subscribed: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<FakeSubscriptionState>>,
    failing_queries: Mutex<HashSet<String>>,
    failing_stops: Mutex<HashSet<String>>,
    stop_calls: AtomicUsize,
    teardown: Mutex<Vec<String>>,
}

/// Delivers every fired event to every live subscription; filtering is the subscriber's job.
#[derive(Clone, Default)]
pub struct FakeEventSource {
    state: Arc<FakeSourceState>,
}

impl FakeEventSource {
    pub fn fail_query(&self, query: &str) {
        self.state.failing_queries.lock().unwrap().insert(query.to_string());
    }

    pub fn fail_stop(&self, query: &str) {
        self.state.failing_stops.lock().unwrap().insert(query.to_string());
    }

    /// Successful subscriptions as (namespace, query), in order.
    pub fn subscribed(&self) -> Vec<(String, String)> {
        self.state.subscribed.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.state
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.stopped.load(Ordering::SeqCst))
            .count()
    }

    pub fn stop_calls(&self) -> usize {
        self.state.stop_calls.load(Ordering::SeqCst)
    }

    /// `request <query>` / `stop <query>` entries in call order.
    pub fn teardown_log(&self) -> Vec<String> {
        self.state.teardown.lock().unwrap().clone()
    }

    pub fn fire(&self, event: HardwareEvent) {
        let callbacks: Vec<EventCallback> = self
            .state
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.stopped.load(Ordering::SeqCst))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl EventSource for FakeEventSource {
    fn subscribe(
        &self,
        namespace: &str,
        query: &str,
        callback: EventCallback,
    ) -> Result<Box<dyn Subscription>, RegistrationError> {
        if self.state.failing_queries.lock().unwrap().contains(query) {
            return Err(RegistrationError {
                query: query.to_string(),
                reason: "Invalid query".to_string(),
            });
        }
        let stopped = Arc::new(AtomicBool::new(false));
        self.state
            .subscribed
            .lock()
            .unwrap()
            .push((namespace.to_string(), query.to_string()));
        self.state.subscriptions.lock().unwrap().push(FakeSubscriptionState {
            callback,
            stopped: Arc::clone(&stopped),
        });
        Ok(Box::new(FakeSubscription {
            state: Arc::clone(&self.state),
            query: query.to_string(),
            stopped,
        }))
    }
}

struct FakeSubscription {
    state: Arc<FakeSourceState>,
    query: String,
    stopped: Arc<AtomicBool>,
}

impl Subscription for FakeSubscription {
    fn request_stop(&mut self) {
        self.state.teardown.lock().unwrap().push(format!("request {}", self.query));
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.state.teardown.lock().unwrap().push(format!("stop {}", self.query));
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        if self.state.failing_stops.lock().unwrap().contains(&self.query) {
            bail!("Watcher for '{}' did not stop cleanly", self.query);
        }
        Ok(())
    }
}
