use ferm_config::{Direction, Unit, load_file, load_toml};
use rstest::rstest;
use std::io::Write;

#[test]
fn empty_file_yields_stock_tuning() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults must validate");
    assert_eq!(cfg.sensors.initial_offset_ms, 350);
    assert_eq!(cfg.main_pid.kp, 10.0);
    assert_eq!(cfg.heat_pid.kp, 60_000.0);
    assert_eq!(cfg.fridge.cool_min_on_s, 120);
    assert_eq!(cfg.program.unit, Unit::Fahrenheit);
}

#[test]
fn partial_heat_table_keeps_heat_defaults() {
    let toml = r#"
[heat_pid]
kp = 1000.0
direction = "reverse"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    assert_eq!(cfg.heat_pid.kp, 1000.0);
    assert_eq!(cfg.heat_pid.ki, 60.0);
    assert_eq!(cfg.heat_pid.direction, Direction::Reverse);
    assert!(cfg.heat_pid.output_max.is_none());
    // untouched main loop
    assert_eq!(cfg.main_pid.ki, 0.005);
}

#[test]
fn unknown_pid_key_is_a_parse_error() {
    let toml = r#"
[main_pid]
kq = 1.0
"#;
    assert!(load_toml(toml).is_err());
}

#[rstest]
#[case("[main_pid]\nkp = -1.0\n", "main_pid.kp")]
#[case("[heat_pid]\nsample_ms = 0\n", "heat_pid.sample_ms")]
#[case("[main_pid]\noutput_min = 5.0\noutput_max = 5.0\n", "output_min must be < output_max")]
#[case("[sensors]\nsample_hz = 0.0\n", "sensors.sample_hz")]
#[case("[sensors]\ninitial_offset_ms = 5000\n", "sensors.initial_offset_ms")]
#[case("[sensors]\nbeer_index = 1\n", "must differ")]
#[case("[fridge]\ncool_min_on_s = 3000\n", "cool_min_on_s must be <=")]
#[case("[fridge]\nidle_diff_c = 0.0\n", "fridge.idle_diff_c")]
#[case("[fridge]\nestimator_gain = 2.0\n", "fridge.estimator_gain")]
#[case("[program]\nsetpoint_c = 40.0\n", "within main_pid output limits")]
#[case("[relays]\nheater_pin = 17\n", "must differ")]
#[case("[relays]\ncooler_pin = 40\n", "relays pins")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "error {err} should mention {needle}"
    );
}

#[test]
fn load_file_reads_and_validates() {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        f,
        "[program]\nsetpoint_c = 12.5\nunit = \"celsius\"\n\n[persistence]\npath = \"state.bin\""
    )
    .expect("write");
    let cfg = load_file(f.path()).expect("load");
    assert_eq!(cfg.program.setpoint_c, 12.5);
    assert_eq!(cfg.program.unit, Unit::Celsius);
    assert_eq!(cfg.persistence.path, "state.bin");
}

#[test]
fn load_file_reports_missing_path() {
    let err = load_file(std::path::Path::new("/nonexistent/ferm.toml")).expect_err("missing");
    assert!(format!("{err}").contains("read config"));
}
