use std::io::Write;

use listener_monitor::monitor::{MonitorOptions, MonitorOverrides};
use listener_monitor::replay::{self, ReplayError, Trace};
use tempfile::NamedTempFile;

const LEAKY_PAGE: &str = r##"
elements:
  - { id: link, tag: a }
  - { id: save, tag: button, class: "btn btn-primary" }
operations:
  - on: { target: "#link", events: click, callback: open }
  - on: { target: "#link", events: click, callback: open }
  - trigger: { target: "#link", event: click }
  - on: { target: "#save", events: "click focus", callback: submit }
  - off: { target: "#link", events: click, callback: open }
  - off: { target: "#save", events: focus, callback: stray }
  - off: { target: body, events: keyup }
"##;

#[test]
fn replays_a_trace_and_reports_lines() {
    let trace = Trace::from_yaml(LEAKY_PAGE).expect("parse trace");
    let report = replay::run(&trace, MonitorOptions::default()).expect("replay");

    assert_eq!(
        report.lines,
        vec![
            "a#link >> click (was: 0, now: 1) BOUND",
            "a#link >> click (was: 1, now: 2) BOUND",
            "button#save.btn.btn-primary >> click (was: 0, now: 1) BOUND",
            "button#save.btn.btn-primary >> focus (was: 0, now: 1) BOUND",
            "a#link >> click (was: 2, now: 0) UNBOUND",
            "button#save.btn.btn-primary >> focus (was: 1, now: 1) UNBOUND however provided callback NOT PREVIOUSLY BOUND; no effect",
            "body >> keyup (was: 0, now: 0) UNBIND [nothing to unbind]",
        ]
    );
    assert_eq!(report.ledger.total, 2);
    assert_eq!(report.host_listeners, 2);
    assert_eq!(report.invocations["open"], 2);
    assert_eq!(report.invocations["submit"], 0);
    assert!(!report.stopped);
}

#[test]
fn stop_freezes_the_ledger() {
    let trace = Trace::from_yaml(
        r##"
elements:
  - { id: panel }
operations:
  - on: { target: "#panel", events: scroll, callback: track }
  - stop
  - on: { target: "#panel", events: scroll, callback: track }
"##,
    )
    .expect("parse trace");
    let report = replay::run(&trace, MonitorOptions::default()).expect("replay");

    assert!(report.stopped);
    assert_eq!(report.ledger.total, 1);
    assert_eq!(report.lines.len(), 1);
    assert_eq!(report.host_listeners, 2);
}

#[test]
fn gesture_library_traces_skip_touch_events() {
    let trace = Trace::from_yaml(
        r##"
gesture_library: true
operations:
  - on: { target: body, events: "tap touchstart mouseup", callback: swipe }
  - call: { entry_point: unbind, target: body, events: touchstart }
"##,
    )
    .expect("parse trace");
    let report = replay::run(&trace, MonitorOptions::default()).expect("replay");

    assert_eq!(report.lines, vec!["body >> tap (was: 0, now: 1) BOUND"]);
    assert_eq!(report.ledger.total, 1);
    // the unmonitored `unbind` entry point still removed the host listener
    assert_eq!(report.host_listeners, 2);
}

#[test]
fn unknown_target_is_an_error() {
    let trace = Trace::from_yaml(
        r##"
operations:
  - on: { target: "#missing", events: click, callback: x }
"##,
    )
    .expect("parse trace");
    let err = replay::run(&trace, MonitorOptions::default()).unwrap_err();
    assert!(matches!(err, ReplayError::UnknownElement(target) if target == "#missing"));
}

#[test]
fn config_file_overrides_entry_points_and_overlay() {
    let mut config = NamedTempFile::new().expect("create temp config");
    writeln!(
        config,
        "bind: ['on', bind]\nunbind: ['off', unbind]\nvisualizer_id: leak-overlay\nignore_events: [mousemove]"
    )
    .expect("write config");

    let overrides =
        MonitorOverrides::load(Some(config.path().to_path_buf())).expect("load overrides");
    let options = MonitorOptions::default().with_overrides(overrides);
    assert_eq!(options.visualizer.visualizer_id, "leak-overlay");

    let trace = Trace::from_yaml(
        r##"
operations:
  - call: { entry_point: bind, target: body, events: "resize mousemove", callback: layout }
  - call: { entry_point: unbind, target: body, events: resize, callback: layout }
"##,
    )
    .expect("parse trace");
    let report = replay::run(&trace, options).expect("replay");

    assert_eq!(
        report.lines,
        vec![
            "body >> resize (was: 0, now: 1) BOUND",
            "body >> resize (was: 1, now: 0) UNBOUND",
        ]
    );
    assert_eq!(report.ledger.total, 0);
    assert_eq!(report.host_listeners, 1);
}

#[test]
fn report_serialises_without_log_lines() {
    let trace = Trace::from_yaml(LEAKY_PAGE).expect("parse trace");
    let report = replay::run(&trace, MonitorOptions::default()).expect("replay");
    let json = serde_json::to_value(&report).expect("serialise report");

    assert_eq!(json["ledger"]["total"], 2);
    assert!(json.get("lines").is_none());
    assert_eq!(json["invocations"]["open"], 2);
}
