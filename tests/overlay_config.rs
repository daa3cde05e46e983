use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use world_overlay::{ConfigError, OverlayConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OVERLAY_CONFIG",
        "OVERLAY_DEVICE",
        "OVERLAY_SINK_HOST",
        "OVERLAY_SINK_PORT",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

const TOML: &str = r#"
device = "/dev/video1"
resolution = [3848, 2168]
position = [0.75, 0.0, 0.0]
rotation = [0.0, 180.0, -90.0]
fov = [0.99788205886, 0.65877955059]

[pipeline]
sink_host = "100.72.147.81"
"#;

#[test]
fn loads_toml_from_env_path_with_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".toml", TOML);
    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_DEVICE", "/dev/video2");
    std::env::set_var("OVERLAY_SINK_PORT", "5600");

    let cfg = OverlayConfig::load(None).expect("load config");

    assert_eq!(cfg.camera.device(), "/dev/video2");
    assert_eq!((cfg.camera.width(), cfg.camera.height()), (3848, 2168));
    assert_eq!(cfg.camera.position(), [0.75, 0.0, 0.0]);
    assert_eq!(cfg.camera.rotation(), [0.0, 180.0, -90.0]);
    assert_eq!(cfg.camera.fov(), [0.99788205886, 0.65877955059]);
    assert_eq!(cfg.pipeline.sink_host, "100.72.147.81");
    assert_eq!(cfg.pipeline.sink_port, 5600);

    clear_env();
}

#[test]
fn explicit_path_wins_over_env_and_json_is_detected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let json = config_file(
        ".json",
        r#"{
            "resolution": [1920, 1080],
            "position": [1.0, 2.0, 3.0],
            "rotation": [0.0, 0.0, 0.0],
            "fov": [2.0, 1.5],
            "pipeline": { "annotate_element": "overlay" }
        }"#,
    );
    let toml = config_file(".toml", TOML);
    std::env::set_var("OVERLAY_CONFIG", toml.path());
    std::env::set_var("OVERLAY_SINK_HOST", "10.1.1.1");

    let cfg = OverlayConfig::load(Some(json.path())).expect("load config");

    assert_eq!(cfg.camera.device(), "/dev/video0");
    assert_eq!(cfg.camera.width(), 1920);
    assert_eq!(cfg.pipeline.annotate_element, "overlay");
    assert_eq!(cfg.pipeline.sink_host, "10.1.1.1");

    clear_env();
}

#[test]
fn no_config_reports_missing_resolution() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = OverlayConfig::load(None).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { key: "resolution" }));
}

#[test]
fn unreadable_and_malformed_files() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    let err = OverlayConfig::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.toml"));

    let broken = config_file(".json", "{ \"resolution\": [1920, ");
    let err = OverlayConfig::load(Some(broken.path())).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn bad_sink_port_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".toml", TOML);
    std::env::set_var("OVERLAY_SINK_PORT", "udp");
    let err = OverlayConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::TypeMismatch {
            key: "OVERLAY_SINK_PORT",
            ..
        }
    ));

    clear_env();
}

#[test]
fn each_failure_has_a_distinct_reason() {
    let cases = [
        ("resolution = [1920]", "must have exactly 2 entries"),
        ("position = [0.0, 0.0]", "must have exactly 3 entries"),
        ("rotation = [0.0]", "must have exactly 3 entries"),
        ("fov = [1.0, 1.0, 1.0]", "must have exactly 2 entries"),
        ("resolution = [0, 1080]", "must be between 1 and"),
        ("fov = [-1.0, 1.0]", "must be greater than zero"),
        ("position = [\"a\", 0.0, 0.0]", "must be a finite number"),
    ];
    let base = [
        "resolution = [1920, 1080]",
        "position = [0.0, 0.0, 0.0]",
        "rotation = [0.0, 0.0, 0.0]",
        "fov = [2.0, 1.5]",
    ];
    for (line, reason) in cases {
        let key = line.split('=').next().unwrap().trim();
        let mut raw: Vec<&str> = base
            .iter()
            .copied()
            .filter(|l| !l.starts_with(key))
            .collect();
        raw.push(line);
        let err = OverlayConfig::from_toml_str(&raw.join("\n")).unwrap_err();
        assert_eq!(err.key(), Some(key), "{line}");
        assert!(err.to_string().contains(reason), "{line}: {err}");
    }
}
