//! Integration tests for the configuration layers

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use weft::definition::{LoopSpec, UnitSpec, ThreadSpec};
use weft::error::SetupError;
use weft::{ConfigLoader, EchoBackend, GenerationConfig, Runtime};

use super::test_utils::EnvGuard;

const ENV_VARS: &[&str] = &[
    "XDG_CONFIG_HOME",
    "WEFT_ENV",
    "WEFT__RUNTIME__GENERATION_TIMEOUT_SECS",
    "WEFT__RUNTIME__APPROVAL_KEY",
];

#[test]
fn test_global_file_is_read_from_xdg_config_home() {
    let _env = EnvGuard::new(ENV_VARS);
    let config_home = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    std::fs::create_dir_all(config_home.path().join("weft")).unwrap();
    std::fs::write(
        config_home.path().join("weft").join("config.toml"),
        "[runtime]\ndefault_max_iterations = 6\napproval_key = \"ok\"\n",
    )
    .unwrap();
    std::env::set_var("XDG_CONFIG_HOME", config_home.path());
    std::env::set_var("WEFT__RUNTIME__APPROVAL_KEY", "accepted");

    let config = ConfigLoader::load(workspace.path()).unwrap();
    assert_eq!(config.runtime.default_max_iterations, 6);
    assert_eq!(config.runtime.approval_key, "accepted");

    let spec = LoopSpec {
        name: "review".to_string(),
        target: UnitSpec {
            name: "writer".to_string(),
            thread: ThreadSpec::default(),
            generation: GenerationConfig::new("write", "Write"),
        },
        evaluator: UnitSpec {
            name: "critic".to_string(),
            thread: ThreadSpec::default(),
            generation: GenerationConfig::new("critique", "Critique"),
        },
        max_iterations: None,
        approval_key: None,
        feedback_key: None,
        iteration_key: None,
    };
    let refinement = spec.build(&config.runtime).unwrap();
    assert_eq!(refinement.max_iterations(), 6);
    assert_eq!(refinement.approval_key(), "accepted");
}

#[test]
fn test_runtime_picks_up_generation_timeout() {
    let _env = EnvGuard::new(ENV_VARS);
    let workspace = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("weft.toml"),
        "[runtime]\ngeneration_timeout_secs = 45\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from(workspace.path(), None).unwrap();
    let runtime = Runtime::from_config(&config.runtime, Arc::new(EchoBackend::new()));
    assert_eq!(runtime.generation_timeout(), Some(Duration::from_secs(45)));
    assert_eq!(runtime.backend_name(), "echo");
}

#[test]
fn test_invalid_layers_fail_validation() {
    let _env = EnvGuard::new(ENV_VARS);
    let workspace = TempDir::new().unwrap();
    std::fs::write(
        workspace.path().join("weft.toml"),
        "[runtime]\ndefault_max_iterations = 0\n\n[logging]\noutput = \"syslog\"\n",
    )
    .unwrap();
    std::env::set_var("XDG_CONFIG_HOME", workspace.path().join("no-global"));

    let err = ConfigLoader::load_validated(workspace.path()).unwrap_err();
    match err {
        SetupError::Config(message) => {
            assert!(message.contains("default_max_iterations must be positive"));
            assert!(message.contains("invalid log output 'syslog'"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
