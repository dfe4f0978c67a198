#![cfg(unix)]

mod support;

use std::sync::mpsc;

use groundlink_hub::{params_from_inf, Hub, Parameter, PendingEdits, ResultCode};
use support::{connect, recv, test_config, DeviceState};

fn fetch(hub: &Hub) -> (ResultCode, usize) {
    let (tx, rx) = mpsc::channel();
    hub.fetch_params(move |result, count| {
        let _ = tx.send((result, count));
    })
    .expect("parameter enumeration should start");
    recv(&rx)
}

fn set(hub: &Hub, value: f64, name: &str) -> (ResultCode, Option<Parameter>) {
    let (tx, rx) = mpsc::channel();
    hub.set_param(value, name, move |result, param| {
        let _ = tx.send((result, param));
    })
    .expect("set should be sent");
    recv(&rx)
}

#[test]
fn fetch_params_enumerates_every_parameter() {
    let (session, _device) = connect(DeviceState::standard(), test_config());
    let hub = session.hub();

    assert_eq!(fetch(hub), (ResultCode::Success, 3));

    let params = hub.get_param_list();
    let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["ROLL_P", "PITCH_P", "YAW_P"]);
    assert!((params[0].value - 0.25).abs() < 1e-9);
    assert!((params[2].value - 1.5).abs() < 1e-9);
    assert_eq!(hub.registry().param_count(), Some(3));

    let (fraction, completed, total) = hub.progress();
    assert_eq!((completed, total), (3, 3));
    assert!((fraction - 1.0).abs() < f64::EPSILON);
}

#[test]
fn get_param_by_number() {
    let (session, _device) = connect(DeviceState::standard(), test_config());
    let (tx, rx) = mpsc::channel();
    session
        .hub()
        .get_param(1, move |result, param| {
            let _ = tx.send((result, param));
        })
        .expect("get should be sent");
    let (result, param) = recv(&rx);
    assert_eq!(result, ResultCode::Success);
    let param = param.expect("parameter");
    assert_eq!((param.number, param.name.as_str()), (1, "PITCH_P"));
    assert!((param.value - 0.3).abs() < 1e-9);
}

#[test]
fn set_by_name_updates_device_and_registry() {
    let (session, device) = connect(DeviceState::standard(), test_config());
    let hub = session.hub();

    let (result, param) = set(hub, 0.5, "ROLL_P");
    assert_eq!(result, ResultCode::Success);
    let param = param.expect("confirmed parameter");
    assert_eq!(param.name, "ROLL_P");
    assert!((param.value - 0.5).abs() < 1e-9);

    assert_eq!(device.state().params[0].1, 5_000);
    let stored = hub.registry().parameter("ROLL_P").cloned().expect("stored");
    assert!((stored.value - 0.5).abs() < 1e-9);
}

#[test]
fn set_unknown_name_reports_not_found() {
    let (session, device) = connect(DeviceState::standard(), test_config());
    let (result, _) = set(session.hub(), 1.0, "NOPE");
    assert_eq!(result, ResultCode::NotFound);
    assert!(device.state().param_sets.is_empty());
    assert!(session.hub().registry().parameter("NOPE").is_none());
}

#[test]
fn set_by_number_is_matched_by_number() {
    let (session, device) = connect(DeviceState::standard(), test_config());
    let (tx, rx) = mpsc::channel();
    session
        .hub()
        .set_param(2.0, 2u16, move |result, param| {
            let _ = tx.send((result, param));
        })
        .expect("set should be sent");
    let (result, param) = recv(&rx);
    assert_eq!(result, ResultCode::Success);
    assert_eq!(param.map(|p| p.name), Some("YAW_P".to_string()));
    assert_eq!(device.state().params[2].1, 20_000);
}

#[test]
fn flush_writes_only_changed_edits() {
    let (session, device) = connect(DeviceState::standard(), test_config());
    let hub = session.hub();
    assert_eq!(fetch(hub), (ResultCode::Success, 3));

    let edits = PendingEdits::from_inf("# tuning\nROLL_P=0.25\nPITCH_P=0.4\n").expect("inf");
    assert_eq!(edits.len(), 2);
    assert_eq!(edits.select_changed(&hub.get_param_list()), 1);

    let (tx, rx) = mpsc::channel();
    let issued = edits.flush(hub, move |name, result| {
        let _ = tx.send((name.to_string(), result));
    });
    assert_eq!(issued, 1);
    assert_eq!(recv(&rx), ("PITCH_P".to_string(), ResultCode::Success));

    assert!(edits.is_empty());
    assert_eq!(device.state().param_sets, ["PITCH_P"]);
    assert_eq!(device.state().params[1].1, 4_000);
}

#[test]
fn flush_reports_unsendable_edit_and_sends_the_rest() {
    let (session, device) = connect(DeviceState::standard(), test_config());
    let hub = session.hub();
    assert_eq!(fetch(hub), (ResultCode::Success, 3));
    assert_eq!(hub.progress().1, 3);

    let edits = PendingEdits::new();
    edits.insert("ROLL_P", 1e12);
    edits.insert("PITCH_P", 0.4);

    let (tx, rx) = mpsc::channel();
    let issued = edits.flush(hub, move |name, result| {
        let _ = tx.send((name.to_string(), result));
    });
    assert_eq!(issued, 2);
    assert_eq!(hub.progress().1, 0);

    let mut results = vec![recv(&rx), recv(&rx)];
    results.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        results,
        [
            ("PITCH_P".to_string(), ResultCode::Success),
            ("ROLL_P".to_string(), ResultCode::InvalidArgument),
        ]
    );
    assert_eq!(device.state().param_sets, ["PITCH_P"]);

    let left = edits.entries();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "ROLL_P");
    assert!(left[0].selected);
}

#[test]
fn saved_parameters_load_back() {
    let (session, _device) = connect(DeviceState::standard(), test_config());
    let hub = session.hub();
    assert_eq!(fetch(hub), (ResultCode::Success, 3));

    let text = hub.params_to_inf();
    let loaded = params_from_inf(&text).expect("own output should parse");
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[0].0, "ROLL_P");
    assert!((loaded[0].1 - 0.25).abs() < 1e-9);

    let edits = PendingEdits::from_inf(&text).expect("inf");
    assert_eq!(edits.select_changed(&hub.get_param_list()), 0);
    assert_eq!(edits.flush(hub, |_, _| {}), 0);
    assert!(edits.is_empty());
}

#[test]
fn clear_param_list_forgets_parameters() {
    let (session, _device) = connect(DeviceState::standard(), test_config());
    let hub = session.hub();
    assert_eq!(fetch(hub), (ResultCode::Success, 3));
    hub.clear_param_list();
    assert!(hub.get_param_list().is_empty());
}
