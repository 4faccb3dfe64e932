mod config;
mod error;
mod event;
mod executor;
mod key_combo;
mod keys;
mod monitor;
mod paths;
mod reload;
mod session;
mod shell;
mod wmi;

#[cfg(test)]
mod fakes;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::event::DaemonEvent;
use crate::executor::NativeExecutor;
use crate::monitor::{ActionHandler, EventMonitor, EventSource};
use crate::wmi::WmiEventSource;

#[derive(Parser, Debug)]
#[command(version, about = "Maps HP laptop hardware button events to configured actions")]
struct Args {
    /// Config file to use instead of the standard locations
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ask a running daemon to reload its configuration, then exit
    #[arg(long)]
    signal_reload: bool,
    /// Write the sample configuration to the config path, then exit
    #[arg(long)]
    write_sample: bool,
}

/// Where the config file lives: pinned with `--config`, or searched for on every load.
enum ConfigLocation {
    Fixed(PathBuf),
    Search(Box<dyn Fn() -> PathBuf + Send>),
}

impl ConfigLocation {
    fn resolve(&self) -> PathBuf {
        match self {
            ConfigLocation::Fixed(path) => path.clone(),
            ConfigLocation::Search(find) => find(),
        }
    }
}

/// The file watcher task and the path it reports changes for.
struct ConfigWatch {
    path: PathBuf,
    task: tokio::task::JoinHandle<()>,
}

/// Owns the monitor and re-applies the config file on every reload.
struct Daemon<E: EventSource> {
    location: ConfigLocation,
    config_path: PathBuf,
    monitor: EventMonitor<E>,
    handler: Arc<dyn ActionHandler>,
    events: Option<mpsc::Sender<DaemonEvent>>,
    watch: Option<ConfigWatch>,
}

impl<E: EventSource> Daemon<E> {
    fn new(location: ConfigLocation, source: E, handler: Arc<dyn ActionHandler>) -> Self {
        let config_path = location.resolve();
        Self {
            location,
            config_path,
            monitor: EventMonitor::new(source),
            handler,
            events: None,
            watch: None,
        }
    }

    /// Starts reporting writes to the config file as reloads on `tx`.  The watcher
    /// follows the file when a later load resolves it somewhere else.
    fn watch_config_file(&mut self, tx: mpsc::Sender<DaemonEvent>) {
        self.events = Some(tx);
        self.follow_config_path();
    }

    /// Restarts the watcher if it is not already watching `config_path`.
    fn follow_config_path(&mut self) {
        let Some(tx) = &self.events else { return };
        if self.watch.as_ref().is_some_and(|w| w.path == self.config_path) {
            return;
        }
        if let Some(old) = self.watch.take() {
            old.task.abort();
            info!(
                from = %old.path.display(),
                to = %self.config_path.display(),
                "Configuration moved; watching the new location"
            );
        }
        let task = tokio::spawn(config::watch_config(self.config_path.clone(), tx.clone()));
        self.watch = Some(ConfigWatch { path: self.config_path.clone(), task });
    }

    /// Stops monitoring, reloads the config and subscribes again.  A config that fails
    /// to load leaves the daemon idle until the next reload.
    fn apply_config(&mut self, startup: bool) -> usize {
        self.monitor.stop();
        self.config_path = self.location.resolve();
        let config = match config::load(&self.config_path) {
            Ok(c) => c,
            Err(e) => {
                error!("{e}");
                return 0;
            }
        };

        let active = self.monitor.start(&config, Arc::clone(&self.handler));
        if startup && config.show_startup_notification {
            info!(
                path = %self.config_path.display(),
                "HP Button Remap is running: monitoring {active} of {} button action(s)",
                config.button_actions.len()
            );
        }
        active
    }

    /// Processes events until `Shutdown` or until every sender is gone, then stops
    /// the monitor.  Reload requests already queued behind the one being handled are
    /// folded into it, so reloads never overlap and a burst costs one reload.
    async fn run(&mut self, rx: &mut mpsc::Receiver<DaemonEvent>) {
        while let Some(evt) = rx.recv().await {
            match evt {
                DaemonEvent::ReloadRequested(source) => {
                    let mut coalesced = 0usize;
                    let mut shutdown = false;
                    while let Ok(next) = rx.try_recv() {
                        match next {
                            DaemonEvent::ReloadRequested(_) => coalesced += 1,
                            DaemonEvent::Shutdown => {
                                shutdown = true;
                                break;
                            }
                        }
                    }
                    if shutdown {
                        info!("Shutting down");
                        break;
                    }
                    info!(?source, coalesced, "Reloading configuration");
                    self.apply_config(false);
                    self.follow_config_path();
                }
                DaemonEvent::Shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }
        self.monitor.stop();
        if let Some(watch) = self.watch.take() {
            watch.task.abort();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.signal_reload {
        reload::signal_reload()?;
        info!("Reload signal sent");
        return Ok(());
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let location = match args.config {
        Some(path) => ConfigLocation::Fixed(path),
        None => ConfigLocation::Search(Box::new(paths::config_file_path)),
    };
    let config_path = location.resolve();

    if args.write_sample {
        config::write_sample(&config_path)?;
        info!(path = %config_path.display(), "Sample configuration written");
        return Ok(());
    }

    info!("hp-button-remap v{} started", env!("CARGO_PKG_VERSION"));
    info!(path = %config_path.display(), "Using configuration");

    let handler: Arc<dyn ActionHandler> = Arc::new(NativeExecutor::native());
    let mut daemon = Daemon::new(location, WmiEventSource, handler);
    daemon.apply_config(true);

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    // Started after the first load so a freshly written sample does not trigger a reload.
    daemon.watch_config_file(event_tx.clone());

    let reload_listener = match reload::listen(event_tx.clone()) {
        Ok(l) => Some(l),
        Err(e) => {
            error!("Reload signal unavailable: {e:#}");
            None
        }
    };

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    // ── Event loop ────────────────────────────────────────────────────────────
    daemon.run(&mut event_rx).await;

    if let Some(l) = reload_listener {
        l.stop();
    }
    info!("Stopped");
    Ok(())
}
