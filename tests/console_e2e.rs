//! End-to-end tests: two console sessions over one in-process broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camsync::broker::LocalBroker;
use camsync::commands::CameraCommands;
use camsync::positions::{LockDurations, PositionList, LEVEL_ADMIN, LEVEL_ROOT};
use camsync::settings::Settings;
use camsync::sync::{Schema, SyncedObject, Value, ValueKind};
use camsync::ConsoleState;

fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn test_settings() -> Settings {
    Settings {
        root_topic: "studio".to_string(),
        admin_camlock_duration: 20.0,
        root_camlock_duration: 20.0,
        ..Settings::default()
    }
}

#[test]
fn membership_message_creates_declared_children() {
    let broker = LocalBroker::new();
    let remote = broker.connect(Some("remote"));
    let conn = broker.connect(Some("console"));
    let state = ConsoleState::new(&conn.handle(), test_settings());

    remote
        .handle()
        .publish("studio/cameras", r#"["cam1","cam2"]"#, true)
        .expect("publish");
    conn.process_events(Duration::from_millis(50));

    assert_eq!(
        state.cameras.names(),
        vec!["cam1".to_string(), "cam2".to_string()]
    );
    for name in ["cam1", "cam2"] {
        let camera = state.cameras.camera(name).expect("created");
        // Fresh children carry the declared schema at default values.
        assert_eq!(camera.rtsp_url(), "");
        assert!(!camera.is_public());
        assert_eq!(
            camera.object().get("type").expect("schema attr"),
            Value::Null
        );
    }
}

#[test]
fn late_session_warm_starts_from_retained_state() {
    let broker = LocalBroker::new();

    let seeder = broker.connect(Some("seeder"));
    let seeded = ConsoleState::new(&seeder.handle(), test_settings());
    let camera = seeded.cameras.add_or_get_by_name("gate").expect("add");
    camera.set_rtsp_url("rtsp://10.0.0.5/stream0").expect("set");
    camera.set_is_public(true).expect("set");
    let position = seeded.positions.add_or_get_by_name("P1").expect("add");
    position.set_is_audio(true).expect("set");
    seeder.process_events_for(Duration::from_millis(200), true);

    // A brand-new session sees the same world purely from retained traffic.
    let viewer = broker.connect(Some("viewer"));
    let state = ConsoleState::new(&viewer.handle(), test_settings());
    let topics = viewer.wait_for_initial_state(Duration::from_millis(100));

    assert!(topics > 0);
    assert_eq!(state.cameras.names(), vec!["gate".to_string()]);
    let mirrored = state.cameras.camera("gate").expect("mirrored");
    assert_eq!(mirrored.rtsp_url(), "rtsp://10.0.0.5/stream0");
    assert!(mirrored.is_public());
    assert_eq!(state.positions.names(), vec!["P1".to_string()]);
    assert!(state.positions.position("P1").expect("mirrored").is_audio());
}

#[test]
fn undecodable_float_payload_keeps_raw_string_and_fires_once() {
    let broker = LocalBroker::new();
    let remote = broker.connect(Some("remote"));
    let conn = broker.connect(Some("console"));

    let schema = Schema::new(&[("reading", ValueKind::Float)]);
    let object = SyncedObject::new(&conn.handle(), "studio/sensors/s1", "s1", &schema);
    let fires = Arc::new(AtomicUsize::new(0));
    let fires2 = Arc::clone(&fires);
    object
        .on_change("reading", move |_| {
            fires2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("watch");

    remote
        .handle()
        .publish("studio/sensors/s1/reading", "not_a_number", true)
        .expect("publish");
    conn.process_events(Duration::from_millis(50));

    assert_eq!(
        object.get("reading").expect("schema attr"),
        Value::Str("not_a_number".to_string())
    );
    assert_eq!(fires.load(Ordering::SeqCst), 1);
}

#[test]
fn garbage_locked_until_reads_unlocked() {
    let broker = LocalBroker::new();
    let remote = broker.connect(Some("remote"));
    let conn = broker.connect(Some("console"));
    let state = ConsoleState::new(&conn.handle(), test_settings());
    state.positions.add_or_get_by_name("P1").expect("add");

    remote
        .handle()
        .publish("studio/positions/P1/locked_until", "garbage", true)
        .expect("publish");
    conn.process_events(Duration::from_millis(50));

    assert!(!state.positions.is_locked("P1", "viewer").expect("known"));
}

#[test]
fn lock_lifecycle_across_two_sessions() {
    let broker = LocalBroker::new();
    let operator = broker.connect(Some("operator"));
    let operator_state = ConsoleState::new(&operator.handle(), test_settings());
    operator_state.positions.add_or_get_by_name("P1").expect("add");
    operator.process_events_for(Duration::from_millis(100), true);

    let viewer = broker.connect(Some("viewer"));
    let viewer_state = ConsoleState::new(&viewer.handle(), test_settings());
    viewer.wait_for_initial_state(Duration::from_millis(100));

    // Operator locks with the default admin duration (20 s).
    let before = epoch_seconds();
    operator_state
        .positions
        .lock_position("P1", LEVEL_ADMIN, None)
        .expect("lock");
    let position = operator_state.positions.position("P1").expect("known");
    let locked_until = position.locked_until();
    assert!(locked_until >= before + 19.0 && locked_until <= before + 21.0);
    assert_eq!(position.lock_level(), LEVEL_ADMIN);
    assert!(position.is_locked("viewer"));
    assert!(!position.is_locked(LEVEL_ROOT));

    // The viewer session observes the lock only via the broker echo.
    viewer.process_events(Duration::from_millis(50));
    let mirrored = viewer_state.positions.position("P1").expect("known");
    assert_eq!(mirrored.locked_until(), locked_until);
    assert!(viewer_state
        .positions
        .is_locked("P1", "viewer")
        .expect("known"));

    // Monotonic rule holds across sessions too.
    viewer_state
        .positions
        .lock_position("P1", LEVEL_ADMIN, Some(5.0))
        .expect("noop");
    assert_eq!(mirrored.locked_until(), locked_until);

    // Sentinel write 0 unlocks; everyone converges on the echo.
    mirrored.set_locked_until(0.0).expect("unlock");
    viewer.process_events(Duration::from_millis(50));
    operator.process_events(Duration::from_millis(50));
    assert!(!operator_state
        .positions
        .is_locked("P1", "viewer")
        .expect("known"));
}

#[test]
fn lock_expiry_timer_notifies_list_watchers() {
    let broker = LocalBroker::new();
    let conn = broker.connect(None);
    let positions = PositionList::new(
        &conn.handle(),
        "studio/positions",
        LockDurations {
            admin: 20.0,
            root: 20.0,
        },
    );
    positions.add_or_get_by_name("P1").expect("add");
    conn.process_events(Duration::from_millis(50));

    let fires = Arc::new(AtomicUsize::new(0));
    let fires2 = Arc::clone(&fires);
    positions.on_list_changed(move || {
        fires2.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    positions
        .lock_position("P1", LEVEL_ADMIN, Some(0.15))
        .expect("lock");
    // Pump long enough for the echo, the expiry timer, and the callback.
    conn.process_events(Duration::from_millis(400));

    assert!(fires.load(Ordering::SeqCst) >= 1);
    assert!(!positions.is_locked("P1", "viewer").expect("known"));
}

#[test]
fn indefinite_lock_never_expires() {
    let broker = LocalBroker::new();
    let conn = broker.connect(None);
    let state = ConsoleState::new(&conn.handle(), test_settings());
    let position = state.positions.add_or_get_by_name("P1").expect("add");

    position.set_locked_until(-1.0).expect("set");
    conn.process_events(Duration::from_millis(50));

    assert!(state.positions.is_locked("P1", LEVEL_ADMIN).expect("known"));
    assert!(position.is_locked_at(LEVEL_ADMIN, epoch_seconds() + 1e9));
    assert!(!state.positions.is_locked("P1", LEVEL_ROOT).expect("known"));
}

#[test]
fn membership_tracks_children_through_add_delete_sequences() {
    let broker = LocalBroker::new();
    let conn = broker.connect(None);
    let state = ConsoleState::new(&conn.handle(), test_settings());

    let script: &[(&str, bool)] = &[
        ("a", true),
        ("b", true),
        ("c", true),
        ("b", false),
        ("d", true),
        ("a", false),
    ];
    for (name, add) in script {
        if *add {
            state.cameras.add_or_get_by_name(name).expect("add");
        } else {
            state.cameras.delete_by_name(name).expect("delete");
        }
        conn.process_events_for(Duration::from_millis(50), true);

        let mut members = state.cameras.member_names();
        members.sort();
        assert_eq!(members, state.cameras.names());
    }
    assert_eq!(
        state.cameras.names(),
        vec!["c".to_string(), "d".to_string()]
    );
}

#[test]
fn camera_commands_cross_sessions() {
    let broker = LocalBroker::new();
    let service = broker.connect(Some("service"));
    let service_state = ConsoleState::new(&service.handle(), test_settings());

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = Arc::clone(&received);
    service_state
        .camera_commands
        .channel()
        .on(CameraCommands::GOTO_PTZ_POSITION, move |params| {
            received2
                .lock()
                .expect("no poison")
                .push(params["position_number"].as_i64().unwrap_or(-1));
            Ok(())
        })
        .expect("handler");

    let console = broker.connect(Some("console"));
    let console_state = ConsoleState::new(&console.handle(), test_settings());
    console_state
        .camera_commands
        .goto_ptz_position("gate", 7)
        .expect("send");
    service.process_events(Duration::from_millis(50));

    assert_eq!(*received.lock().expect("no poison"), vec![7]);
}

#[test]
fn remote_membership_removal_is_not_reconciled() {
    let broker = LocalBroker::new();
    let remote = broker.connect(Some("remote"));
    let conn = broker.connect(Some("console"));
    let state = ConsoleState::new(&conn.handle(), test_settings());

    remote
        .handle()
        .publish("studio/positions", r#"["P1","P2"]"#, true)
        .expect("publish");
    conn.process_events(Duration::from_millis(50));
    assert_eq!(state.positions.len(), 2);

    remote
        .handle()
        .publish("studio/positions", r#"["P1"]"#, true)
        .expect("publish");
    conn.process_events(Duration::from_millis(50));

    // Remote removals are deliberately ignored; local delete is the only
    // removal path.
    assert_eq!(state.positions.len(), 2);
    state.positions.delete_by_name("P2").expect("delete");
    assert_eq!(state.positions.len(), 1);
}
