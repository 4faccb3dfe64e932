/// Where a reload request came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSource {
    /// The configurator set the named reload event.
    Signal,
    /// The config file was created or modified on disk.
    FileChanged,
}

pub enum DaemonEvent {
    /// Tear down every subscription, reload the config, and subscribe again.
    ReloadRequested(ReloadSource),
    /// Ctrl+C received; the daemon should dispose the monitor and exit.
    Shutdown,
}
