use std::path::{Path, PathBuf};

use anyhow::Context;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::ConfigError;
use crate::event::{DaemonEvent, ReloadSource};

/// Root configuration. Deserialized from `config.json`, which the configurator
/// writes with PascalCase keys; camelCase keys are accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "ButtonActions", alias = "buttonActions", default)]
    pub button_actions: Vec<ButtonAction>,
    #[serde(
        rename = "ShowStartupNotification",
        alias = "showStartupNotification",
        default = "default_show_startup_notification"
    )]
    pub show_startup_notification: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            button_actions: Vec::new(),
            show_startup_notification: true,
        }
    }
}

/// A configured response to one hardware event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawButtonAction", into = "RawButtonAction")]
pub struct ButtonAction {
    /// Label for logs and the configurator. Not required to be unique.
    pub name: String,
    /// Vendor event class identifier.
    pub event_id: u32,
    /// Optional sub-code; 0 matches any data for `event_id`.
    pub event_data: u32,
    pub kind: ActionKind,
}

/// What to do when the event fires. Payload strings may be empty in a file;
/// the executor treats empty as "not specified".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    LaunchApp { path: String, arguments: String },
    OpenWebsite { url: String },
    SendKeys { combo: String },
    /// A `Type` this build does not know. Loaded, but never executed.
    Unknown { type_name: String },
}

impl ActionKind {
    pub fn type_name(&self) -> &str {
        match self {
            ActionKind::LaunchApp { .. } => "LaunchApp",
            ActionKind::OpenWebsite { .. } => "OpenWebsite",
            ActionKind::SendKeys { .. } => "SendKeys",
            ActionKind::Unknown { type_name } => type_name,
        }
    }
}

/// The flat on-disk shape: every payload field present, `null` for the ones
/// the action's type does not use.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawButtonAction {
    #[serde(rename = "Name", alias = "name", default)]
    name: String,
    #[serde(rename = "EventID", alias = "eventId", alias = "EventId", alias = "eventID", default)]
    event_id: u32,
    #[serde(rename = "EventData", alias = "eventData", default)]
    event_data: u32,
    #[serde(rename = "Type", alias = "type", alias = "actionType", default)]
    action_type: RawActionType,
    #[serde(rename = "LaunchPath", alias = "launchPath", default)]
    launch_path: Option<String>,
    #[serde(rename = "LaunchArguments", alias = "launchArguments", default)]
    launch_arguments: Option<String>,
    #[serde(rename = "WebsiteUrl", alias = "websiteUrl", default)]
    website_url: Option<String>,
    #[serde(rename = "KeyCombo", alias = "keyCombo", default)]
    key_combo: Option<String>,
}

/// `Type` as written: the enum member name in any letter case, or its ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum RawActionType {
    Name(String),
    Ordinal(i64),
}

impl Default for RawActionType {
    fn default() -> Self {
        RawActionType::Name(String::new())
    }
}

const ACTION_TYPE_NAMES: [&str; 3] = ["LaunchApp", "OpenWebsite", "SendKeys"];

impl RawActionType {
    /// The canonical type name, or the value as written when it names no known type.
    fn resolve(&self) -> Result<&'static str, String> {
        match self {
            RawActionType::Name(name) => ACTION_TYPE_NAMES
                .into_iter()
                .find(|known| known.eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| name.clone()),
            RawActionType::Ordinal(n) => usize::try_from(*n)
                .ok()
                .and_then(|i| ACTION_TYPE_NAMES.get(i).copied())
                .ok_or_else(|| n.to_string()),
        }
    }
}

impl From<RawButtonAction> for ButtonAction {
    fn from(raw: RawButtonAction) -> Self {
        let type_name = match raw.action_type.resolve() {
            Ok(canonical) => canonical.to_string(),
            Err(written) => written,
        };
        let kind = match type_name.as_str() {
            "LaunchApp" => ActionKind::LaunchApp {
                path: raw.launch_path.unwrap_or_default(),
                arguments: raw.launch_arguments.unwrap_or_default(),
            },
            "OpenWebsite" => ActionKind::OpenWebsite {
                url: raw.website_url.unwrap_or_default(),
            },
            "SendKeys" => ActionKind::SendKeys {
                combo: raw.key_combo.unwrap_or_default(),
            },
            _ => ActionKind::Unknown { type_name },
        };
        Self {
            name: raw.name,
            event_id: raw.event_id,
            event_data: raw.event_data,
            kind,
        }
    }
}

impl From<ButtonAction> for RawButtonAction {
    fn from(action: ButtonAction) -> Self {
        let mut raw = RawButtonAction {
            name: action.name,
            event_id: action.event_id,
            event_data: action.event_data,
            action_type: RawActionType::Name(action.kind.type_name().to_string()),
            ..Default::default()
        };
        match action.kind {
            ActionKind::LaunchApp { path, arguments } => {
                raw.launch_path = Some(path);
                raw.launch_arguments = Some(arguments);
            }
            ActionKind::OpenWebsite { url } => raw.website_url = Some(url),
            ActionKind::SendKeys { combo } => raw.key_combo = Some(combo),
            ActionKind::Unknown { .. } => {}
        }
        raw
    }
}

/// The config written when none exists: the F11 key on a typical HP laptop opens Notepad.
pub fn sample() -> Config {
    Config {
        button_actions: vec![ButtonAction {
            name: "F11 Key - Launch Notepad".to_string(),
            event_id: 29,
            event_data: 8616,
            kind: ActionKind::LaunchApp {
                path: "notepad.exe".to_string(),
                arguments: String::new(),
            },
        }],
        show_startup_notification: true,
    }
}

/// Writes the sample config to `path`, creating the parent directory.
pub fn write_sample(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&sample()).context("Failed to serialize sample config")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write sample config: {}", path.display()))
}

/// Loads the config file at `path`.
///
/// A missing file is replaced by the sample and still reported as an error:
/// the caller must not start monitoring on a config nobody wrote.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        match write_sample(path) {
            Ok(()) => info!(path = %path.display(), "Sample configuration created"),
            Err(e) => error!("Failed to create sample configuration: {e:#}"),
        }
        return Err(ConfigError::Missing { path: path.to_path_buf() });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if config.button_actions.is_empty() {
        return Err(ConfigError::Empty { path: path.to_path_buf() });
    }
    Ok(config)
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, sends a `ReloadRequested` event.  Parsing is left to
/// the reload itself so a half-written file is reported once, at reload time.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!(path = %path.display(), "Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!(dir = %watch_dir.display(), "Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        if is_config_write(&event, &path) {
            if tx.send(DaemonEvent::ReloadRequested(ReloadSource::FileChanged)).await.is_err() {
                break;
            }
        }
    }
}

fn is_config_write(event: &notify::Event, path: &Path) -> bool {
    let affects_config = event.paths.iter().any(|p| p == path);
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    );
    affects_config && is_write
}

fn default_show_startup_notification() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    // ── parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn parses_configurator_output_with_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
  "ButtonActions": [
    {
      "Name": "F11 Key - Launch Notepad",
      "EventID": 29,
      "EventData": 8616,
      "Type": "LaunchApp",
      "LaunchPath": "notepad.exe",
      "LaunchArguments": "",
      "WebsiteUrl": null,
      "KeyCombo": null
    },
    {
      "Name": "Help",
      "EventID": 29,
      "EventData": 0,
      "Type": "OpenWebsite",
      "LaunchPath": null,
      "LaunchArguments": null,
      "WebsiteUrl": "https://support.hp.com",
      "KeyCombo": null
    },
    {
      "Name": "Reopen tab",
      "EventID": 30,
      "EventData": 1,
      "Type": "SendKeys",
      "LaunchPath": null,
      "LaunchArguments": null,
      "WebsiteUrl": null,
      "KeyCombo": "Ctrl+Shift+T"
    }
  ],
  "ShowStartupNotification": false
}"#,
        );

        let config = load(&path).unwrap();
        assert!(!config.show_startup_notification);
        assert_eq!(config.button_actions.len(), 3);

        let launch = &config.button_actions[0];
        assert_eq!(launch.name, "F11 Key - Launch Notepad");
        assert_eq!((launch.event_id, launch.event_data), (29, 8616));
        assert_eq!(
            launch.kind,
            ActionKind::LaunchApp { path: "notepad.exe".into(), arguments: String::new() }
        );
        assert_eq!(
            config.button_actions[1].kind,
            ActionKind::OpenWebsite { url: "https://support.hp.com".into() }
        );
        assert_eq!(
            config.button_actions[2].kind,
            ActionKind::SendKeys { combo: "Ctrl+Shift+T".into() }
        );
    }

    #[test]
    fn parses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"buttonActions": [{"name": "Calc", "eventId": 29, "eventData": 8613,
                "type": "LaunchApp", "launchPath": "calc.exe", "launchArguments": "/x"}],
                "showStartupNotification": true}"#,
        );
        let config = load(&path).unwrap();
        assert_eq!(config.button_actions[0].event_data, 8613);
        assert_eq!(
            config.button_actions[0].kind,
            ActionKind::LaunchApp { path: "calc.exe".into(), arguments: "/x".into() }
        );
    }

    #[test]
    fn startup_notification_defaults_to_true() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"ButtonActions": [{"Name": "x", "EventID": 1, "Type": "SendKeys", "KeyCombo": "F5"}]}"#,
        );
        let config = load(&path).unwrap();
        assert!(config.show_startup_notification);
        assert_eq!(config.button_actions[0].event_data, 0);
    }

    #[test]
    fn missing_payload_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"ButtonActions": [{"Name": "x", "EventID": 1, "Type": "LaunchApp"}]}"#);
        let config = load(&path).unwrap();
        assert_eq!(
            config.button_actions[0].kind,
            ActionKind::LaunchApp { path: String::new(), arguments: String::new() }
        );
    }

    #[test]
    fn unknown_type_is_kept_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"ButtonActions": [{"Name": "x", "EventID": 1, "Type": "Reboot"}]}"#);
        let config = load(&path).unwrap();
        assert_eq!(config.button_actions[0].kind, ActionKind::Unknown { type_name: "Reboot".into() });
        assert_eq!(config.button_actions[0].kind.type_name(), "Reboot");
    }

    #[test]
    fn type_names_match_in_any_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"ButtonActions": [
                {"Name": "a", "EventID": 1, "Type": "launchApp", "LaunchPath": "calc.exe"},
                {"Name": "b", "EventID": 2, "Type": "OPENWEBSITE", "WebsiteUrl": "https://hp.com"},
                {"Name": "c", "EventID": 3, "Type": "sendkeys", "KeyCombo": "F5"}
            ]}"#,
        );
        let config = load(&path).unwrap();
        let names: Vec<_> = config.button_actions.iter().map(|a| a.kind.type_name().to_string()).collect();
        assert_eq!(names, vec!["LaunchApp", "OpenWebsite", "SendKeys"]);
        assert_eq!(
            config.button_actions[0].kind,
            ActionKind::LaunchApp { path: "calc.exe".into(), arguments: String::new() }
        );
    }

    #[test]
    fn type_ordinals_map_to_the_enum_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"ButtonActions": [
                {"Name": "a", "EventID": 1, "Type": 0, "LaunchPath": "calc.exe"},
                {"Name": "b", "EventID": 2, "Type": 1, "WebsiteUrl": "https://hp.com"},
                {"Name": "c", "EventID": 3, "Type": 2, "KeyCombo": "F5"},
                {"Name": "d", "EventID": 4, "Type": 7}
            ]}"#,
        );
        let config = load(&path).unwrap();
        assert_eq!(
            config.button_actions[0].kind,
            ActionKind::LaunchApp { path: "calc.exe".into(), arguments: String::new() }
        );
        assert_eq!(config.button_actions[1].kind, ActionKind::OpenWebsite { url: "https://hp.com".into() });
        assert_eq!(config.button_actions[2].kind, ActionKind::SendKeys { combo: "F5".into() });
        assert_eq!(config.button_actions[3].kind, ActionKind::Unknown { type_name: "7".into() });
    }

    #[test]
    fn canonical_type_name_is_written_back() {
        let action: ButtonAction =
            serde_json::from_str(r#"{"Name": "a", "EventID": 1, "Type": 2, "KeyCombo": "F5"}"#).unwrap();
        assert_eq!(serde_json::to_value(&action).unwrap()["Type"], "SendKeys");
    }

    // ── failures ──────────────────────────────────────────────────────────────

    #[test]
    fn missing_file_writes_sample_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
        assert!(path.exists(), "sample config should have been written");

        // The sample itself is a loadable config.
        let written = load(&path).unwrap();
        assert_eq!(written, sample());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "{ this is not json ]");
        assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn negative_event_id_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"ButtonActions": [{"Name": "x", "EventID": -1, "Type": "SendKeys"}]}"#);
        assert!(matches!(load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn empty_action_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"ButtonActions": [], "ShowStartupNotification": true}"#);
        assert!(matches!(load(&path), Err(ConfigError::Empty { .. })));
    }

    // ── serialization ─────────────────────────────────────────────────────────

    #[test]
    fn sample_is_written_in_configurator_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        let action = &json["ButtonActions"][0];
        assert_eq!(action["Name"], "F11 Key - Launch Notepad");
        assert_eq!(action["EventID"], 29);
        assert_eq!(action["EventData"], 8616);
        assert_eq!(action["Type"], "LaunchApp");
        assert_eq!(action["LaunchPath"], "notepad.exe");
        assert!(action["WebsiteUrl"].is_null());
        assert_eq!(json["ShowStartupNotification"], true);
    }

    // ── watcher filter ────────────────────────────────────────────────────────

    #[test]
    fn only_writes_to_the_config_file_trigger_reload() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        use notify::{Event, EventKind};

        let path = PathBuf::from("/cfg/config.json");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.clone());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        let other = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/cfg/other.json"));

        assert!(is_config_write(&modify, &path));
        assert!(is_config_write(&create, &path));
        assert!(!is_config_write(&remove, &path));
        assert!(!is_config_write(&other, &path));
    }
}
