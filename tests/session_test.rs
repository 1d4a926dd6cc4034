//! Capture session controller tests against scripted synthetic devices.

use scopecam::testing::{CapabilitySpec, SyntheticDeviceConfig, SyntheticProvider};
use scopecam::{
    CaptureController, CaptureError, FourCc, SessionConfig, SessionEvent, SessionState,
};
use std::time::{Duration, Instant};

fn basic_device(id: &str, name: &str) -> SyntheticDeviceConfig {
    SyntheticDeviceConfig::new(id, name)
        .with_capability(CapabilitySpec::fixed(1280, 720, FourCc::MJPG, 30.0))
        .with_capability(CapabilitySpec::fixed(640, 480, FourCc::YUY2, 30.0))
}

fn controller_for(provider: &SyntheticProvider) -> CaptureController {
    controller_with_capacity(provider, 64)
}

fn controller_with_capacity(provider: &SyntheticProvider, capacity: usize) -> CaptureController {
    let config = SessionConfig {
        frame_queue_capacity: capacity,
        ..SessionConfig::default()
    };
    CaptureController::new(Box::new(provider.clone()), config)
}

fn wait_for_state(controller: &CaptureController, target: SessionState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if controller.state() == target {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    controller.state() == target
}

#[test]
fn attach_reaches_running_and_delivers_frames() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    // State transitions are observable in order: Attaching, then Running.
    let mut states = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut sequences = Vec::new();
    while Instant::now() < deadline && sequences.len() < 3 {
        match events.recv_timeout(Duration::from_millis(50)) {
            Some(SessionEvent::StateChanged(state)) => states.push(state),
            Some(SessionEvent::Frame(frame)) => sequences.push(frame.sequence),
            _ => {}
        }
    }
    assert_eq!(states, vec![SessionState::Attaching, SessionState::Running]);
    assert!(sequences.len() >= 3, "expected frames, got {:?}", sequences);
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));

    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn attach_never_applies_a_mode() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    let ops = provider.journal().operations();
    assert!(
        !ops.iter().any(|op| op.contains("apply_capability")),
        "attach must not renegotiate the device format: {:?}",
        ops
    );
}

#[test]
fn open_failure_is_synchronous_and_leaves_no_binding() {
    let provider = SyntheticProvider::new();
    provider.add_device(
        basic_device("0", "Busy Cam")
            .with_fail_open(CaptureError::DeviceBusy("claimed elsewhere".to_string())),
    );
    let controller = controller_for(&provider);

    let descriptor = controller.list_devices().unwrap().remove(0);
    let result = controller.attach(&descriptor);
    assert!(matches!(result, Err(CaptureError::DeviceBusy(_))));
    assert_eq!(controller.state(), SessionState::Failed);
    assert_eq!(provider.journal().concurrent_open(), 0);

    // Explicit detach clears Failed.
    controller.detach();
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn detach_is_safe_from_every_state() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);

    // Idle: no-op.
    controller.detach();
    assert_eq!(controller.state(), SessionState::Idle);

    // Running: releases the device.
    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));
    controller.detach();
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(provider.journal().concurrent_open(), 0);

    // Repeated detach stays Idle.
    controller.detach();
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn attach_replaces_prior_device_without_overlap() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "First Cam"));
    provider.add_device(basic_device("1", "Second Cam"));
    let controller = controller_for(&provider);

    let devices = controller.list_devices().unwrap();
    controller.attach(&devices[0]).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));
    controller.attach(&devices[1]).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    let journal = provider.journal();
    assert_eq!(journal.peak_concurrent_open(), 1, "two devices were open at once");
    assert_eq!(controller.device_name().as_deref(), Some("Second Cam"));

    let ops = journal.operations();
    let close_first = ops.iter().position(|op| op == "0:close").unwrap();
    let open_second = ops.iter().position(|op| op == "1:open").unwrap();
    assert!(close_first < open_second, "old device must close before the new one opens");
}

#[test]
fn apply_mode_quiesces_frame_delivery() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));
    assert_eq!(controller.current_mode_index(), Some(0));

    controller.select_mode(1).unwrap();
    assert_eq!(controller.state(), SessionState::Running);
    assert_eq!(controller.current_mode_index(), Some(1));

    // Let a few post-reconfigure frames arrive, then inspect the stream.
    std::thread::sleep(Duration::from_millis(50));
    let recorded = events.drain();

    let reconfiguring = recorded
        .iter()
        .position(|e| matches!(e, SessionEvent::StateChanged(SessionState::Reconfiguring)))
        .expect("Reconfiguring transition not observed");
    let running_again = recorded[reconfiguring..]
        .iter()
        .position(|e| matches!(e, SessionEvent::StateChanged(SessionState::Running)))
        .map(|offset| reconfiguring + offset)
        .expect("Running transition not observed after reconfigure");
    assert!(
        recorded[reconfiguring..running_again]
            .iter()
            .all(|e| !e.is_frame()),
        "frame events observed during the reconfiguration window"
    );

    // The device saw: stream stopped, capability applied, stream restarted.
    let ops = provider.journal().operations();
    let apply = ops.iter().rposition(|op| op == "0:apply_capability").unwrap();
    let stop_before = ops[..apply].iter().rposition(|op| op == "0:stop_stream");
    let start_after = ops[apply..].iter().position(|op| op == "0:start_stream");
    assert!(stop_before.is_some(), "stream was not stopped before the apply: {:?}", ops);
    assert!(start_after.is_some(), "stream was not restarted after the apply: {:?}", ops);
}

#[test]
fn apply_mode_pins_frame_rate_in_band() {
    let provider = SyntheticProvider::new();
    provider.add_device(
        SyntheticDeviceConfig::new("0", "Synthetic Cam")
            .with_capability(CapabilitySpec::fixed(1280, 720, FourCc::MJPG, 30.0))
            .with_capability(CapabilitySpec::range(1280, 720, FourCc::MJPG, 1.0, 29.97))
            .with_capability(CapabilitySpec::fixed(640, 480, FourCc::MJPG, 24.0)),
    );
    let controller = controller_for(&provider);

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    // Catalog order: 1280x720@30, 1280x720@29.97 (normalized 30), 640x480@24.
    controller.select_mode(1).unwrap();
    let pins = provider
        .journal()
        .operations()
        .iter()
        .filter(|op| op.starts_with("0:pin_frame_rate"))
        .count();
    assert_eq!(pins, 1);
    assert!(provider
        .journal()
        .operations()
        .contains(&"0:pin_frame_rate 30.00".to_string()));

    // A 24 fps mode is outside the band; no additional pin.
    controller.select_mode(2).unwrap();
    let pins_after = provider
        .journal()
        .operations()
        .iter()
        .filter(|op| op.starts_with("0:pin_frame_rate"))
        .count();
    assert_eq!(pins_after, 1);
}

#[test]
fn rejected_format_keeps_prior_mode_and_running() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Stubborn Cam").with_reject_apply());
    let controller = controller_for(&provider);

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));
    assert_eq!(controller.current_mode_index(), Some(0));

    let result = controller.select_mode(1);
    assert!(matches!(result, Err(CaptureError::FormatRejected(_))));
    assert_eq!(controller.state(), SessionState::Running);
    assert_eq!(controller.current_mode_index(), Some(0));

    // Delivery resumed after the failed apply.
    let ops = provider.journal().operations();
    let apply = ops.iter().rposition(|op| op == "0:apply_capability").unwrap();
    assert!(ops[apply..].iter().any(|op| op == "0:start_stream"));
}

#[test]
fn apply_mode_requires_running_session() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);

    let result = controller.select_mode(0);
    assert!(matches!(result, Err(CaptureError::NoActiveDevice(_) | CaptureError::FormatRejected(_))));
    assert_eq!(controller.state(), SessionState::Idle);
}

#[test]
fn mode_from_stale_catalog_is_rejected() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));
    let stale = controller.list_modes().remove(0);

    // Re-attach rebuilds the catalog with fresh capability identities.
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    let result = controller.apply_mode(&stale);
    assert!(matches!(result, Err(CaptureError::FormatRejected(_))));
    assert_eq!(controller.state(), SessionState::Running);
}

#[test]
fn take_photo_while_idle_is_a_silent_noop() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);
    let events = controller.events();

    controller.take_photo();
    std::thread::sleep(Duration::from_millis(50));

    let recorded = events.drain();
    assert!(
        recorded.is_empty(),
        "idle photo request must emit nothing: {:?}",
        recorded.len()
    );
}

#[test]
fn take_photo_without_still_path_is_a_silent_noop() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Preview-Only Cam").without_still_output());
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    controller.take_photo();
    std::thread::sleep(Duration::from_millis(50));

    let recorded = events.drain();
    assert!(recorded
        .iter()
        .all(|e| !matches!(e, SessionEvent::Photo(_) | SessionEvent::Error(_))));
}

#[test]
fn take_photo_delivers_exactly_one_photo_with_resolved_dimensions() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam").with_still_dimensions(1600, 1200));
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    controller.take_photo();

    let deadline = Instant::now() + Duration::from_secs(2);
    let photo = loop {
        assert!(Instant::now() < deadline, "photo event never arrived");
        match events.recv_timeout(Duration::from_millis(100)) {
            Some(SessionEvent::Photo(photo)) => break photo,
            Some(SessionEvent::Error(e)) => panic!("unexpected error event: {}", e),
            _ => {}
        }
    };

    // Dimensions come from the still path, not the preview mode.
    assert_eq!((photo.width, photo.height), (1600, 1200));
    assert_eq!(photo.device_name, "Synthetic Cam");
    assert!(!photo.data.is_empty());

    // Exactly one terminal event per request.
    std::thread::sleep(Duration::from_millis(50));
    let extra_photos = events
        .drain()
        .iter()
        .filter(|e| matches!(e, SessionEvent::Photo(_)))
        .count();
    assert_eq!(extra_photos, 0);
}

#[test]
fn failed_still_capture_emits_one_error_and_keeps_running() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Flaky Cam").with_fail_still());
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    controller.take_photo();

    let deadline = Instant::now() + Duration::from_secs(2);
    let error = loop {
        assert!(Instant::now() < deadline, "error event never arrived");
        match events.recv_timeout(Duration::from_millis(100)) {
            Some(SessionEvent::Error(e)) => break e,
            Some(SessionEvent::Photo(_)) => panic!("photo delivered despite still failure"),
            _ => {}
        }
    };
    assert!(matches!(error, CaptureError::PhotoCaptureFailed(_)));
    assert_eq!(controller.state(), SessionState::Running);
}

#[test]
fn detach_drops_stale_photo_completion() {
    let provider = SyntheticProvider::new();
    provider.add_device(
        basic_device("0", "Slow Cam").with_still_delay(Duration::from_millis(100)),
    );
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    controller.take_photo();
    std::thread::sleep(Duration::from_millis(10));
    controller.detach();

    // The completion lands after detach; it must be dropped, not delivered.
    std::thread::sleep(Duration::from_millis(200));
    let recorded = events.drain();
    assert!(recorded
        .iter()
        .all(|e| !matches!(e, SessionEvent::Photo(_))));
    assert!(recorded
        .iter()
        .all(|e| !matches!(e, SessionEvent::Error(CaptureError::PhotoCaptureFailed(_)))));
}

#[test]
fn device_loss_moves_to_failed_and_detach_recovers() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Fragile Cam").with_fail_frames_after(3));
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Failed, Duration::from_secs(2)));

    let saw_unavailable = {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut found = false;
        while Instant::now() < deadline && !found {
            found = events
                .drain()
                .iter()
                .any(|e| matches!(e, SessionEvent::Error(CaptureError::DeviceUnavailable(_))));
            if !found {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        found
    };
    assert!(saw_unavailable, "device loss error was not reported");

    // The only exit from Failed is an explicit detach, then a fresh attach.
    controller.detach();
    assert_eq!(controller.state(), SessionState::Idle);
    controller.attach(&descriptor).unwrap();
    // The fresh device fails after three frames again, so the session is
    // either briefly Running or already Failed; it must have left Attaching.
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && controller.state() == SessionState::Attaching {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(matches!(
        controller.state(),
        SessionState::Running | SessionState::Failed
    ));
}

#[test]
fn current_mode_index_falls_back_when_active_mode_is_filtered() {
    let provider = SyntheticProvider::new();
    provider.add_device(
        SyntheticDeviceConfig::new("0", "Odd Default Cam")
            // Default capability is 60 fps and therefore not in the catalog.
            .with_capability(CapabilitySpec::fixed(1280, 720, FourCc::MJPG, 60.0))
            .with_capability(CapabilitySpec::fixed(640, 480, FourCc::MJPG, 30.0))
            .with_default_capability(0),
    );
    let controller = controller_for(&provider);

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    assert_eq!(controller.list_modes().len(), 1);
    assert_eq!(controller.current_mode_index(), Some(0));
    // The fallback never forces a mode change on the device.
    assert!(!provider
        .journal()
        .operations()
        .iter()
        .any(|op| op.contains("apply_capability")));
}

#[test]
fn dropping_the_controller_unwinds_to_idle() {
    let provider = SyntheticProvider::new();
    provider.add_device(basic_device("0", "Synthetic Cam"));
    let controller = controller_for(&provider);
    let events = controller.events();

    let descriptor = controller.list_devices().unwrap().remove(0);
    controller.attach(&descriptor).unwrap();
    assert!(wait_for_state(&controller, SessionState::Running, Duration::from_secs(2)));

    drop(controller);

    assert_eq!(provider.journal().concurrent_open(), 0);
    assert!(events.is_closed());
    let last_state = events
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .last();
    assert_eq!(last_state, Some(SessionState::Idle));
}
