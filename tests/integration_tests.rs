//! Integration tests for branchyard
//!
//! These drive the binary end to end for everything that does not need a
//! Docker daemon, a CI server or a remote repository.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a branchyard Command
fn branchyard() -> Command {
    cargo_bin_cmd!("branchyard")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Ledger from the two-branch scenario: main on 9000, feature-x on 9001.
fn write_ledger(dir: &TempDir, name: &str) {
    fs::write(
        dir.path().join(name),
        r#"{
  "next_port": 9002,
  "svc_feature-x": {"port_map": {"feature-x": 9001}},
  "svc_main": {"port_map": {"main": 9000}}
}"#,
    )
    .unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_branchyard_help() {
        branchyard()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("reconcile"));
    }

    #[test]
    fn test_branchyard_version() {
        branchyard()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_reconcile_requires_job_and_git_url() {
        branchyard()
            .arg("reconcile")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--job"));
    }

    #[test]
    fn test_reconcile_missing_script_is_reported() {
        let dir = create_temp_project();
        branchyard()
            .current_dir(dir.path())
            .args(["reconcile", "--job", "missing.sh", "--git-url", "git@x:y.git"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read job script"));
        assert!(!dir.path().join(".build_server_state.json").exists());
    }
}

// =============================================================================
// Ledger
// =============================================================================

mod ledger {
    use super::*;

    #[test]
    fn test_ledger_show_without_file() {
        let dir = create_temp_project();
        branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("next_port = 9000"))
            .stdout(predicate::str::contains("No ports allocated."));
    }

    #[test]
    fn test_ledger_show_lists_assignments() {
        let dir = create_temp_project();
        write_ledger(&dir, "state.json");
        branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show", "--state-file", "state.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("next_port = 9002"))
            .stdout(predicate::str::is_match(r"svc_main\s+9000\s+main").unwrap())
            .stdout(predicate::str::is_match(r"svc_feature-x\s+9001\s+feature-x").unwrap());
    }

    #[test]
    fn test_ledger_show_json_keeps_flat_shape() {
        let dir = create_temp_project();
        write_ledger(&dir, "state.json");
        let output = branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show", "--state-file", "state.json", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["next_port"], 9002);
        assert_eq!(value["svc_main"]["port_map"]["main"], 9000);
    }

    #[test]
    fn test_ledger_show_tolerates_legacy_scalars() {
        let dir = create_temp_project();
        fs::write(
            dir.path().join("state.json"),
            r#"{"next_port": 9001, "last_built": "svc_main", "svc_main": {"port_map": {"main": 9000}}}"#,
        )
        .unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show", "--state-file", "state.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("svc_main"))
            .stdout(predicate::str::contains("last_built").not());
    }

    #[test]
    fn test_ledger_show_rejects_duplicate_ports() {
        let dir = create_temp_project();
        fs::write(
            dir.path().join("state.json"),
            r#"{"next_port": 9002, "a": {"port_map": {"a": 9000}}, "b": {"port_map": {"b": 9000}}}"#,
        )
        .unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show", "--state-file", "state.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("inconsistent"));
    }

    #[test]
    fn test_ledger_path_from_config_file() {
        let dir = create_temp_project();
        write_ledger(&dir, "custom.json");
        fs::write(
            dir.path().join("branchyard.toml"),
            "[ledger]\npath = \"custom.json\"\n",
        )
        .unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.json"))
            .stdout(predicate::str::contains("next_port = 9002"));
    }
}

// =============================================================================
// Proxy
// =============================================================================

mod proxy {
    use super::*;

    #[test]
    fn test_proxy_render_with_upstream_host() {
        let dir = create_temp_project();
        write_ledger(&dir, "state.json");
        branchyard()
            .current_dir(dir.path())
            .args([
                "proxy",
                "render",
                "--state-file",
                "state.json",
                "--upstream-host",
                "172.17.0.1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("location /main/ {"))
            .stdout(predicate::str::contains(
                "proxy_pass http://172.17.0.1:9001/;",
            ))
            .stdout(predicate::str::contains("server_name _;"));
    }

    #[test]
    fn test_proxy_render_is_byte_identical() {
        let dir = create_temp_project();
        write_ledger(&dir, "state.json");
        let render = || {
            branchyard()
                .current_dir(dir.path())
                .args([
                    "proxy",
                    "render",
                    "--state-file",
                    "state.json",
                    "--upstream-host",
                    "h",
                ])
                .output()
                .unwrap()
                .stdout
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn test_proxy_render_uses_configured_upstream() {
        let dir = create_temp_project();
        write_ledger(&dir, ".build_server_state.json");
        fs::write(
            dir.path().join("branchyard.toml"),
            "[proxy]\nupstream_host = \"10.1.2.3\"\n",
        )
        .unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["proxy", "render"])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://10.1.2.3:9000/"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        branchyard()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("base_port = 9000"))
            .stdout(predicate::str::contains("prefix = \"http_service\""));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();
        branchyard()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote default configuration"));
        let content = fs::read_to_string(dir.path().join("branchyard.toml")).unwrap();
        assert!(content.contains("[ledger]"));
        assert!(content.contains("[proxy]"));
    }

    #[test]
    fn test_config_init_refuses_to_overwrite() {
        let dir = create_temp_project();
        fs::write(dir.path().join("branchyard.toml"), "# mine\n").unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
        assert_eq!(
            fs::read_to_string(dir.path().join("branchyard.toml")).unwrap(),
            "# mine\n"
        );

        branchyard()
            .current_dir(dir.path())
            .args(["config", "init", "--force"])
            .assert()
            .success();
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::write(
            dir.path().join("branchyard.toml"),
            "[ledger]\nbase_port = 80\n",
        )
        .unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("privileged"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = create_temp_project();
        fs::write(dir.path().join("branchyard.toml"), "[ledger\nbase_port = ").unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["ledger", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("branchyard.toml"));
    }

    #[test]
    fn test_explicit_config_flag() {
        let dir = create_temp_project();
        fs::write(dir.path().join("other.toml"), "[ledger]\nbase_port = 12000\n").unwrap();
        branchyard()
            .current_dir(dir.path())
            .args(["--config", "other.toml", "ledger", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("next_port = 12000"));
    }
}
