use std::thread;
use std::time::Duration;

use mockall::mock;

use camview::capture::{Camera, FeatureDescriptor, FeatureSetting, RawFrame};
use camview::control::{
    AcquisitionControl, AcquisitionEvent, AcquisitionState, CameraConfig, Preconfiguration, PropertyEditor,
};
use camview::error::{AcquisitionError, CameraError};
use camview::BridgeConfig;

mock! {
    pub Cam {}
    impl Camera for Cam {
        fn open(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError>;
        fn configure(&mut self, settings: &[FeatureSetting]) -> Result<(), CameraError>;
        fn features(&self) -> Vec<FeatureDescriptor>;
        fn start_acquisition(&mut self) -> Result<(), CameraError>;
        fn stop_acquisition(&mut self) -> Result<(), CameraError>;
        fn poll_frame(&mut self, timeout: Duration) -> Result<Option<RawFrame>, CameraError>;
        fn close(&mut self);
    }
}

mock! {
    pub Editor {}
    impl PropertyEditor for Editor {
        fn edit(&mut self, camera_id: &str, features: &[FeatureDescriptor]) -> Vec<FeatureSetting>;
    }
}

/// A camera that opens, streams nothing and shuts down cleanly
fn idle_camera() -> MockCam {
    let mut cam = MockCam::new();
    cam.expect_start_acquisition().returning(|| Ok(()));
    cam.expect_stop_acquisition().returning(|| Ok(()));
    cam.expect_poll_frame().returning(|timeout| {
        thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(None)
    });
    cam.expect_close().return_const(());
    cam
}

fn exposure(us: i64) -> FeatureSetting {
    FeatureSetting::new("ExposureTime", us)
}

fn control_with(cam: MockCam, preconfig: Preconfiguration, editor: MockEditor) -> AcquisitionControl {
    AcquisitionControl::new(Box::new(cam), BridgeConfig::default(), preconfig)
        .unwrap()
        .with_editor(Box::new(editor))
}

#[test]
fn preconfigured_camera_opens_with_its_settings_and_skips_the_editor() {
    let mut cam = idle_camera();
    cam.expect_open()
        .withf(|settings| settings.to_vec() == vec![exposure(5000)])
        .times(1)
        .returning(|_| Ok(()));
    cam.expect_configure().never();

    let mut editor = MockEditor::new();
    editor.expect_edit().never();

    let preconfig = Preconfiguration::new([CameraConfig::new("cam-7", vec![exposure(5000)])]);
    let mut control = control_with(cam, preconfig, editor);

    control.start("cam-7").unwrap();
    assert_eq!(control.status(), AcquisitionState::Running);
    assert_eq!(control.camera_id(), Some("cam-7"));
    control.stop();
    assert_eq!(control.status(), AcquisitionState::Idle);
}

#[test]
fn unknown_camera_goes_through_the_editor() {
    let mut cam = idle_camera();
    cam.expect_open()
        .withf(|settings| settings.is_empty())
        .times(1)
        .returning(|_| Ok(()));
    cam.expect_features()
        .returning(|| vec![FeatureDescriptor::new("Gain", 0i64).with_range(0.0, 24.0)]);
    cam.expect_configure()
        .withf(|settings| settings.to_vec() == vec![FeatureSetting::new("Gain", 3i64)])
        .times(1)
        .returning(|_| Ok(()));

    let mut editor = MockEditor::new();
    editor
        .expect_edit()
        .withf(|camera_id, features| camera_id == "cam-9" && features.len() == 1)
        .times(1)
        .returning(|_, _| vec![FeatureSetting::new("Gain", 3i64)]);

    let mut control = control_with(cam, Preconfiguration::default(), editor);
    control.start("cam-9").unwrap();
    control.stop();
}

#[test]
fn explicit_settings_bypass_table_and_editor() {
    let mut cam = idle_camera();
    cam.expect_open()
        .withf(|settings| settings.to_vec() == vec![exposure(100)])
        .times(1)
        .returning(|_| Ok(()));

    let mut editor = MockEditor::new();
    editor.expect_edit().never();

    let preconfig = Preconfiguration::new([CameraConfig::new("cam-7", vec![exposure(5000)])]);
    let mut control = control_with(cam, preconfig, editor);
    control.start_with("cam-7", vec![exposure(100)]).unwrap();
    control.stop();
}

#[test]
fn open_failure_moves_to_failed_and_closes() {
    let mut cam = MockCam::new();
    cam.expect_open()
        .returning(|_| Err(CameraError::Unavailable("unplugged".into())));
    cam.expect_start_acquisition().never();
    cam.expect_stop_acquisition().returning(|| Ok(()));
    cam.expect_close().times(1..).return_const(());

    let mut control = control_with(cam, Preconfiguration::default(), MockEditor::new());
    let err = control.start("cam-1").unwrap_err();
    match err {
        AcquisitionError::CameraOpen { camera_id, source } => {
            assert_eq!(camera_id, "cam-1");
            assert!(matches!(source, CameraError::Unavailable(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(control.status(), AcquisitionState::Failed);
    assert!(control.last_error().unwrap().contains("unplugged"));

    // Stop does not leave Failed; reset does
    control.stop();
    assert_eq!(control.status(), AcquisitionState::Failed);
    control.reset();
    assert_eq!(control.status(), AcquisitionState::Idle);
}

#[test]
fn stop_twice_is_a_no_op() {
    let mut cam = idle_camera();
    cam.expect_open().returning(|_| Ok(()));
    // No preset for cam-2, so the editor is shown the camera's features
    cam.expect_features().returning(Vec::new);
    let mut editor = MockEditor::new();
    editor.expect_edit().returning(|_, _| Vec::new());

    let mut control = control_with(cam, Preconfiguration::default(), editor);
    control.stop();
    assert_eq!(control.status(), AcquisitionState::Idle);

    control.start("cam-2").unwrap();
    control.stop();
    control.stop();
    assert_eq!(control.status(), AcquisitionState::Idle);
}

#[test]
fn runtime_error_is_reported_as_an_event() {
    let mut cam = MockCam::new();
    cam.expect_open().returning(|_| Ok(()));
    cam.expect_start_acquisition().returning(|| Ok(()));
    cam.expect_stop_acquisition().returning(|| Ok(()));
    cam.expect_poll_frame().returning(|_| Err(CameraError::Disconnected));
    cam.expect_close().return_const(());

    let preconfig = Preconfiguration::new([CameraConfig::new("cam-3", Vec::new())]);
    let mut control = control_with(cam, preconfig, MockEditor::new());
    let events = control.subscribe();
    control.start("cam-3").unwrap();

    let failure = events
        .iter()
        .find_map(|event| match event {
            AcquisitionEvent::Failed(message) => Some(message),
            _ => None,
        })
        .unwrap();
    assert!(failure.contains("disconnected"));
    assert_eq!(control.status(), AcquisitionState::Failed);
    assert_eq!(control.statistics(), "stopped");
}

#[test]
fn state_changes_are_announced_in_order() {
    let mut cam = idle_camera();
    cam.expect_open().returning(|_| Ok(()));
    let preconfig = Preconfiguration::new([CameraConfig::new("cam-4", Vec::new())]);
    let mut control = control_with(cam, preconfig, MockEditor::new());
    let events = control.subscribe();

    control.start("cam-4").unwrap();
    control.stop();

    use AcquisitionState::*;
    let transitions: Vec<_> = events
        .try_iter()
        .filter_map(|event| match event {
            AcquisitionEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![(Idle, Starting), (Starting, Running), (Running, Stopping), (Stopping, Idle)]
    );
}

#[test]
fn start_while_running_is_rejected() {
    let mut cam = idle_camera();
    cam.expect_open().times(1).returning(|_| Ok(()));
    let preconfig = Preconfiguration::new([CameraConfig::new("cam-5", Vec::new())]);
    let mut control = control_with(cam, preconfig, MockEditor::new());

    control.start("cam-5").unwrap();
    assert!(matches!(
        control.start("cam-5"),
        Err(AcquisitionError::InvalidState(AcquisitionState::Running))
    ));
    control.stop();
}
