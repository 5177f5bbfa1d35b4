//! Camera list: the synchronized set of physical and virtual cameras.
//!
//! ## Responsibilities
//!
//! - Mirror the camera set and its per-camera attributes
//! - URL-based camera lookup
//! - Fire-and-forget PTZ command publishes to per-camera command sub-topics
//! - Unresponsive tracking: a staleness timer per camera, reset on every
//!   `last_screenshot_timestamp` change
//!
//! PTZ commands do not mutate local state; the resulting state change
//! arrives later as an ordinary attribute update from the broker.

mod types;

pub use types::{camera_schema, Camera, PtzCoords, CAMERA_ATTRIBUTES};

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broker::ConnectionHandle;
use crate::sync::object_list::{notify_changed_ref, SyncedObjectList};
use crate::sync::{SyncedObject, Value};
use crate::{lock, Result};

/// The synchronized set of cameras.
#[derive(Clone)]
pub struct CameraList {
    list: SyncedObjectList,
    conn: ConnectionHandle,
    topic: String,
    unresponsive: Arc<Mutex<BTreeSet<String>>>,
}

impl CameraList {
    /// `staleness_window`: how long a camera may go without a screenshot
    /// timestamp update before it is marked unresponsive.
    pub fn new(
        conn: &ConnectionHandle,
        topic: impl Into<String>,
        staleness_window: Duration,
    ) -> Self {
        let topic = topic.into();
        let list = SyncedObjectList::new(conn, topic.clone(), "cameras", camera_schema());
        let unresponsive: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));

        // Every new camera gets a staleness watcher: each timestamp update
        // clears the unresponsive mark and reschedules the timer.
        let hook_conn = conn.clone();
        let hook_inner = list.inner_ref();
        let hook_set = Arc::clone(&unresponsive);
        list.set_child_hook(Box::new(move |object: &SyncedObject| {
            let name = object.name().to_string();
            let conn = hook_conn.clone();
            let inner = hook_inner.clone();
            let set = Arc::clone(&hook_set);
            let key = format!("camera-unresponsive/{name}");

            // Arm the initial timer; a camera that never reports at all is
            // unresponsive too.
            schedule_staleness_timer(&conn, &key, staleness_window, &inner, &set, &name);

            let result = object.on_change("last_screenshot_timestamp", move |_: &Value| {
                conn.cancel_timer(&key);
                let recovered = lock(&set).remove(&name);
                if recovered {
                    tracing::info!(camera = %name, "camera responsive again");
                    notify_changed_ref(&inner, "cameras");
                }
                schedule_staleness_timer(&conn, &key, staleness_window, &inner, &set, &name);
                Ok(())
            });
            if let Err(e) = result {
                tracing::error!(camera = %object.name(), error = %e, "failed to watch screenshots");
            }
        }));

        Self {
            list,
            conn: conn.clone(),
            topic,
            unresponsive,
        }
    }

    /// Typed wrapper for a camera, or `None`.
    pub fn camera(&self, name: &str) -> Option<Camera> {
        self.list.get_by_name(name).map(Camera::new)
    }

    pub fn add_or_get_by_name(&self, name: &str) -> Result<Camera> {
        self.list.add_or_get_by_name(name).map(Camera::new)
    }

    pub fn delete_by_name(&self, name: &str) -> Result<()> {
        self.conn
            .cancel_timer(&format!("camera-unresponsive/{name}"));
        lock(&self.unresponsive).remove(name);
        self.list.delete_by_name(name)
    }

    /// First camera whose primary (rtsp) or secondary (audio) URL matches.
    pub fn get_name_by_url(&self, url: &str) -> Option<String> {
        for camera in self.cameras() {
            if camera.rtsp_url() == url || camera.audio_url() == url {
                return Some(camera.name().to_string());
            }
        }
        None
    }

    /// Send a camera to a numbered PTZ preset. Non-retained, fire-and-forget.
    pub fn goto_ptz_by_number(&self, camera_name: &str, number: i64) -> Result<()> {
        self.conn.publish(
            &format!("{}/{}/goto_ptz_number", self.topic, camera_name),
            &number.to_string(),
            false,
        )
    }

    /// Send a camera to absolute PTZ coordinates. Non-retained.
    pub fn goto_ptz_by_coords(&self, camera_name: &str, coords: PtzCoords) -> Result<()> {
        self.conn.publish(
            &format!("{}/{}/goto_ptz_coords", self.topic, camera_name),
            &serde_json::to_string(&coords)?,
            false,
        )
    }

    /// Whether a camera has gone stale (no screenshot timestamp updates
    /// within the staleness window).
    pub fn is_unresponsive(&self, name: &str) -> bool {
        lock(&self.unresponsive).contains(name)
    }

    /// All currently unresponsive cameras.
    pub fn unresponsive_cameras(&self) -> Vec<String> {
        lock(&self.unresponsive).iter().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.list.names()
    }

    pub fn member_names(&self) -> Vec<String> {
        self.list.member_names()
    }

    pub fn cameras(&self) -> Vec<Camera> {
        self.list.objects().into_iter().map(Camera::new).collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get_name_by_attr(&self, attr: &str, value: &Value) -> Option<String> {
        self.list.get_name_by_attr(attr, value)
    }

    pub fn get_names_by_attr(&self, attr: &str, value: &Value) -> Vec<String> {
        self.list.get_names_by_attr(attr, value)
    }

    pub fn on_list_changed(&self, callback: impl FnMut() -> Result<()> + Send + 'static) {
        self.list.on_list_changed(callback);
    }

    pub fn to_record(&self) -> Result<serde_json::Value> {
        self.list.to_record()
    }

    /// Underlying generic list.
    pub fn list(&self) -> &SyncedObjectList {
        &self.list
    }
}

fn schedule_staleness_timer(
    conn: &ConnectionHandle,
    key: &str,
    window: Duration,
    inner: &crate::sync::object_list::ListInnerRef,
    set: &Arc<Mutex<BTreeSet<String>>>,
    name: &str,
) {
    let inner = inner.clone();
    let set = Arc::clone(set);
    let name = name.to_string();
    conn.schedule_timer(key, window, move || {
        tracing::warn!(camera = %name, "camera unresponsive");
        lock(&set).insert(name.clone());
        notify_changed_ref(&inner, "cameras");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::positions::{LEVEL_ADMIN, LEVEL_ROOT};

    fn setup() -> (LocalBroker, crate::broker::ConnectionManager, CameraList) {
        let broker = LocalBroker::new();
        let conn = broker.connect(None);
        let cameras = CameraList::new(&conn.handle(), "root/cameras", Duration::from_secs(30));
        (broker, conn, cameras)
    }

    #[test]
    fn test_get_name_by_url_checks_rtsp_then_audio() {
        let (_broker, _conn, cameras) = setup();
        let cam = cameras.add_or_get_by_name("gate").expect("add");
        cam.set_rtsp_url("rtsp://10.0.0.5/stream0").expect("set");
        cam.set_audio_url("rtsp://10.0.0.5/audio").expect("set");

        assert_eq!(
            cameras.get_name_by_url("rtsp://10.0.0.5/stream0"),
            Some("gate".to_string())
        );
        assert_eq!(
            cameras.get_name_by_url("rtsp://10.0.0.5/audio"),
            Some("gate".to_string())
        );
        assert_eq!(cameras.get_name_by_url("rtsp://10.0.0.9/other"), None);
    }

    #[test]
    fn test_goto_ptz_commands_are_not_retained() {
        let (broker, _conn, cameras) = setup();
        cameras.add_or_get_by_name("gate").expect("add");

        cameras.goto_ptz_by_number("gate", 3).expect("publish");
        cameras
            .goto_ptz_by_coords("gate", PtzCoords::new(0.5, -0.25, 1.0))
            .expect("publish");

        assert!(broker.retained("root/cameras/gate/goto_ptz_number").is_none());
        assert!(broker.retained("root/cameras/gate/goto_ptz_coords").is_none());
    }

    #[test]
    fn test_goto_ptz_does_not_mutate_local_state() {
        let (_broker, _conn, cameras) = setup();
        let cam = cameras.add_or_get_by_name("gate").expect("add");
        cameras.goto_ptz_by_number("gate", 3).expect("publish");
        assert!(cam.ptz_arrived().is_none());
    }

    #[test]
    fn test_ptz_lock_rules() {
        let (_broker, _conn, cameras) = setup();
        let cam = cameras.add_or_get_by_name("gate").expect("add");

        assert!(!cam.is_ptz_locked("viewer"));

        cam.lock_ptz(LEVEL_ROOT).expect("lock");
        assert_eq!(cam.ptz_locked(), LEVEL_ROOT);
        assert!(!cam.is_ptz_locked(LEVEL_ROOT));
        assert!(cam.is_ptz_locked(LEVEL_ADMIN));
        assert!(cam.is_ptz_locked("viewer"));

        cam.unlock_ptz().expect("unlock");
        cam.lock_ptz(LEVEL_ADMIN).expect("lock");
        assert!(!cam.is_ptz_locked(LEVEL_ADMIN));
        assert!(!cam.is_ptz_locked(LEVEL_ROOT));
        assert!(cam.is_ptz_locked("viewer"));
    }

    #[test]
    fn test_unprivileged_caller_cannot_lock_ptz() {
        let (_broker, _conn, cameras) = setup();
        let cam = cameras.add_or_get_by_name("gate").expect("add");
        assert!(cam.lock_ptz("viewer").is_err());
        assert_eq!(cam.ptz_locked(), "");
    }

    #[test]
    fn test_camera_marked_unresponsive_after_staleness_window() {
        let broker = LocalBroker::new();
        let conn = broker.connect(None);
        let cameras = CameraList::new(&conn.handle(), "root/cameras", Duration::from_millis(40));
        cameras.add_or_get_by_name("gate").expect("add");

        assert!(!cameras.is_unresponsive("gate"));
        conn.process_events(Duration::from_millis(80));
        assert!(cameras.is_unresponsive("gate"));
        assert_eq!(cameras.unresponsive_cameras(), vec!["gate".to_string()]);
    }

    #[test]
    fn test_screenshot_update_clears_unresponsive_mark() {
        let broker = LocalBroker::new();
        let conn = broker.connect(None);
        let cameras = CameraList::new(&conn.handle(), "root/cameras", Duration::from_millis(60));
        let cam = cameras.add_or_get_by_name("gate").expect("add");

        conn.process_events(Duration::from_millis(100));
        assert!(cameras.is_unresponsive("gate"));

        cam.object()
            .set("last_screenshot_timestamp", "1700000000")
            .expect("set");
        conn.process_events(Duration::from_millis(30));
        assert!(!cameras.is_unresponsive("gate"));
    }

    #[test]
    fn test_prior_and_known_ptz_positions_decode() {
        let broker = LocalBroker::new();
        let remote = broker.connect(Some("remote"));
        let conn = broker.connect(Some("local"));
        let cameras = CameraList::new(&conn.handle(), "root/cameras", Duration::from_secs(30));
        cameras.add_or_get_by_name("gate").expect("add");

        remote
            .handle()
            .publish(
                "root/cameras/gate/prior_ptz_positions",
                "[[0.1,0.2,1.0],[0.3,0.4,2.0]]",
                true,
            )
            .expect("publish");
        remote
            .handle()
            .publish(
                "root/cameras/gate/known_ptz_positions",
                r#"{"door":[0.5,0.5,1.0]}"#,
                true,
            )
            .expect("publish");
        conn.process_events(Duration::from_millis(30));

        let cam = cameras.camera("gate").expect("known");
        assert_eq!(
            cam.prior_ptz_positions(),
            vec![PtzCoords::new(0.1, 0.2, 1.0), PtzCoords::new(0.3, 0.4, 2.0)]
        );
        assert_eq!(
            cam.known_ptz_positions().get("door"),
            Some(&PtzCoords::new(0.5, 0.5, 1.0))
        );
    }
}
