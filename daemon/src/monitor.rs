/// Hardware button monitoring: one event subscription per configured action.
///
/// The monitor is the sole owner of its subscriptions.  `start` opens them, `stop`
/// (or dropping the monitor) releases every one of them.  Callbacks arrive on threads
/// owned by the event source, possibly several at once for the same action; each
/// callback owns an immutable copy of its action and shares nothing mutable.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ButtonAction, Config};
use crate::error::RegistrationError;

/// Namespace exposing the HP BIOS event class.
pub const EVENT_NAMESPACE: &str = r"root\wmi";
/// HP hotkey/button event class.
pub const EVENT_CLASS: &str = "hpqBEvnt";

/// One delivered hardware event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareEvent {
    pub event_id: u32,
    pub event_data: u32,
}

/// Subscription filter key for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub event_id: u32,
    /// 0 = any data.
    pub event_data: u32,
}

impl EventFilter {
    pub fn for_action(action: &ButtonAction) -> Self {
        Self { event_id: action.event_id, event_data: action.event_data }
    }

    /// `SELECT * FROM hpqBEvnt WHERE EventID = <n> [AND EventData = <m>]`
    pub fn query(&self) -> String {
        let mut query = format!("SELECT * FROM {EVENT_CLASS} WHERE EventID = {}", self.event_id);
        if self.event_data != 0 {
            query.push_str(&format!(" AND EventData = {}", self.event_data));
        }
        query
    }

    pub fn matches(&self, event: &HardwareEvent) -> bool {
        event.event_id == self.event_id && (self.event_data == 0 || event.event_data == self.event_data)
    }
}

pub type EventCallback = Arc<dyn Fn(HardwareEvent) + Send + Sync>;

/// A live subscription. Stopping releases its provider-side resources.
pub trait Subscription: Send {
    /// Asks the subscription to wind down without waiting for it.  `stop` still has to
    /// be called afterwards; it then only waits for the shutdown already under way.
    fn request_stop(&mut self) {}

    fn stop(&mut self) -> anyhow::Result<()>;
}

/// Something that can deliver hardware events matching a query.
pub trait EventSource {
    fn subscribe(
        &self,
        namespace: &str,
        query: &str,
        callback: EventCallback,
    ) -> Result<Box<dyn Subscription>, RegistrationError>;
}

/// Receives the action whose event fired.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, action: &ButtonAction);
}

struct ActiveSubscription {
    action_name: String,
    inner: Box<dyn Subscription>,
}

pub struct EventMonitor<E: EventSource> {
    source: E,
    subscriptions: Vec<ActiveSubscription>,
}

impl<E: EventSource> EventMonitor<E> {
    pub fn new(source: E) -> Self {
        Self { source, subscriptions: Vec::new() }
    }

    /// Subscribes every action in `config`, in order.  Returns the number of active
    /// subscriptions.  A failed registration is logged and skipped; zero successes is
    /// a warning, not an error.  Any subscriptions from a previous `start` are stopped first.
    pub fn start(&mut self, config: &Config, handler: Arc<dyn ActionHandler>) -> usize {
        self.stop();
        info!(actions = config.button_actions.len(), "Starting HP WMI event monitor");

        for action in &config.button_actions {
            match self.register(action, Arc::clone(&handler)) {
                Ok(inner) => {
                    info!(
                        action = %action.name,
                        event_id = action.event_id,
                        event_data = action.event_data,
                        "Registered"
                    );
                    self.subscriptions.push(ActiveSubscription { action_name: action.name.clone(), inner });
                }
                Err(e) => error!(action = %action.name, "Failed to register action: {e}"),
            }
        }

        if self.subscriptions.is_empty() {
            warn!("No event handlers registered");
        } else {
            info!("Monitoring {} button action(s)", self.subscriptions.len());
        }
        self.subscriptions.len()
    }

    fn register(
        &self,
        action: &ButtonAction,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<Box<dyn Subscription>, RegistrationError> {
        let filter = EventFilter::for_action(action);
        let query = filter.query();
        let action = Arc::new(action.clone());

        let callback: EventCallback = Arc::new(move |event: HardwareEvent| {
            if !filter.matches(&event) {
                debug!(action = %action.name, event_id = event.event_id, event_data = event.event_data, "Event does not match this action");
                return;
            }
            debug!(action = %action.name, event_id = event.event_id, event_data = event.event_data, "Event arrived");
            // A panic must not unwind into the event source's delivery thread.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&action)));
            if outcome.is_err() {
                error!(action = %action.name, "Event handler panicked");
            }
        });

        self.source.subscribe(EVENT_NAMESPACE, &query, callback)
    }

    /// Stops and releases every subscription. Individual failures are logged and the
    /// rest are still stopped. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        info!("Stopping HP WMI event monitor");
        // Signal every subscription first so their shutdowns overlap instead of queueing.
        for sub in &mut self.subscriptions {
            sub.inner.request_stop();
        }
        for mut sub in self.subscriptions.drain(..) {
            if let Err(e) = sub.inner.stop() {
                error!(action = %sub.action_name, "Failed to stop watcher: {e:#}");
            }
        }
        info!("Monitoring stopped");
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl<E: EventSource> Drop for EventMonitor<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
