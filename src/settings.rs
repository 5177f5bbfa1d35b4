//! Configuration
//!
//! Settings load from a YAML file, with environment-variable overrides for
//! deployment. A settings snapshot can also be mirrored through the broker
//! so every client converges on the same operational values.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::ConnectionHandle;
use crate::positions::LockDurations;
use crate::sync::{SyncedVariable, Value, ValueKind};
use crate::{lock, Result};

/// Broker connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    /// Root of the topic tree (`<root>/cameras`, `<root>/positions`, ...).
    pub root_topic: String,
    /// Default lock duration for admin callers, seconds.
    pub admin_camlock_duration: f64,
    /// Default lock duration for root callers, seconds.
    pub root_camlock_duration: f64,
    /// How long a camera may go without a screenshot update before it is
    /// marked unresponsive, seconds.
    pub unresponsive_window_secs: u64,
    /// Idle window for the startup quiescence barrier, milliseconds.
    pub startup_idle_window_ms: u64,
    /// Credentials substituted into generated camera URLs when seeding.
    pub camera_user: Option<String>,
    pub camera_pass: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            root_topic: "camsync".to_string(),
            admin_camlock_duration: 120.0,
            root_camlock_duration: 20.0,
            unresponsive_window_secs: 30,
            startup_idle_window_ms: 500,
            camera_user: None,
            camera_pass: None,
        }
    }
}

impl Settings {
    /// Load from a YAML file.
    pub fn load_from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Load from the file named by `CAMSYNC_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var("CAMSYNC_CONFIG") {
            Ok(path) => Self::load_from_yaml_file(path)?,
            Err(_) => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply environment-variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CAMSYNC_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Ok(port) = std::env::var("CAMSYNC_BROKER_PORT") {
            if let Ok(port) = port.parse() {
                self.broker.port = port;
            }
        }
        if let Ok(username) = std::env::var("CAMSYNC_BROKER_USERNAME") {
            self.broker.username = Some(username);
        }
        if let Ok(password) = std::env::var("CAMSYNC_BROKER_PASSWORD") {
            self.broker.password = Some(password);
        }
        if let Ok(root_topic) = std::env::var("CAMSYNC_ROOT_TOPIC") {
            self.root_topic = root_topic;
        }
    }

    pub fn lock_durations(&self) -> LockDurations {
        LockDurations {
            admin: self.admin_camlock_duration,
            root: self.root_camlock_duration,
        }
    }

    pub fn unresponsive_window(&self) -> Duration {
        Duration::from_secs(self.unresponsive_window_secs)
    }

    pub fn startup_idle_window(&self) -> Duration {
        Duration::from_millis(self.startup_idle_window_ms)
    }
}

/// A settings snapshot mirrored through the broker.
///
/// Local updates publish the full snapshot; remote snapshots merge into the
/// local value key-by-key. Merging does not republish, so two clients
/// converge instead of ping-ponging.
#[derive(Clone)]
pub struct SyncedSettings {
    settings: Arc<Mutex<Settings>>,
    variable: SyncedVariable,
}

impl SyncedSettings {
    pub fn new(conn: &ConnectionHandle, topic: impl Into<String>, settings: Settings) -> Self {
        let shared = Arc::new(Mutex::new(settings));
        let variable = SyncedVariable::new(conn, topic, ValueKind::Structured, Value::Null);

        let weak = Arc::downgrade(&shared);
        variable.on_change(move |value: &Value| {
            let Some(shared) = weak.upgrade() else {
                return Ok(());
            };
            let Some(remote) = value.as_json() else {
                tracing::warn!("ignoring non-structured settings payload");
                return Ok(());
            };
            let mut guard = lock(&shared);
            let mut merged = serde_json::to_value(&*guard)?;
            merge_json(&mut merged, remote);
            match serde_json::from_value::<Settings>(merged) {
                Ok(settings) => *guard = settings,
                Err(e) => tracing::warn!(error = %e, "remote settings snapshot did not merge"),
            }
            Ok(())
        });

        Self {
            settings: shared,
            variable,
        }
    }

    /// Current settings snapshot.
    pub fn snapshot(&self) -> Settings {
        lock(&self.settings).clone()
    }

    /// Publish the current snapshot to the broker.
    pub fn publish(&self) -> Result<()> {
        let snapshot = serde_json::to_value(&*lock(&self.settings))?;
        self.variable.set(Value::Structured(snapshot))
    }

    /// Mutate the local settings and publish the result.
    pub fn update(&self, mutate: impl FnOnce(&mut Settings)) -> Result<()> {
        mutate(&mut lock(&self.settings));
        self.publish()
    }
}

/// Recursive key-by-key merge; non-object values in `overlay` win.
fn merge_json(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.root_camlock_duration, 20.0);
        assert_eq!(settings.broker.port, 1883);
        assert_eq!(settings.startup_idle_window(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "root_topic: studio\nadmin_camlock_duration: 60\nbroker:\n  host: broker.lan\n  port: 8883"
        )
        .expect("write");

        let settings = Settings::load_from_yaml_file(file.path()).expect("load");
        assert_eq!(settings.root_topic, "studio");
        assert_eq!(settings.admin_camlock_duration, 60.0);
        assert_eq!(settings.broker.host, "broker.lan");
        assert_eq!(settings.broker.port, 8883);
        // Unspecified keys keep their defaults.
        assert_eq!(settings.root_camlock_duration, 20.0);
    }

    #[test]
    fn test_merge_json_overlays_nested_keys() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        merge_json(&mut base, &serde_json::json!({"a": {"y": 9}, "c": 4}));
        assert_eq!(base, serde_json::json!({"a": {"x": 1, "y": 9}, "b": 3, "c": 4}));
    }

    #[test]
    fn test_synced_settings_converge() {
        let broker = LocalBroker::new();
        let first = broker.connect(Some("first"));
        let second = broker.connect(Some("second"));

        let settings_a = SyncedSettings::new(
            &first.handle(),
            "root/settings",
            Settings::default(),
        );
        let settings_b = SyncedSettings::new(
            &second.handle(),
            "root/settings",
            Settings::default(),
        );

        settings_a
            .update(|s| s.admin_camlock_duration = 300.0)
            .expect("update");
        first.process_events(Duration::from_millis(30));
        second.process_events(Duration::from_millis(30));

        assert_eq!(settings_a.snapshot().admin_camlock_duration, 300.0);
        assert_eq!(settings_b.snapshot().admin_camlock_duration, 300.0);
    }
}
