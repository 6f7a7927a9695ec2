use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const ADMIN: &str = "CORP\\admin";

fn write_config(data_dir: &Path, extra: &str) {
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(
        data_dir.join("appctl.toml"),
        format!(
            r#"
admin_logins = ["CORP\\admin"]
pool_surface = "static"
static_pools = ["CheckoutPool"]
verify_start_ms = 50
verify_stop_ms = 50
verify_recycle_ms = 50
restart_settle_ms = 50
{extra}
"#
        ),
    )
    .unwrap();
}

fn appctl(data_dir: &Path, actor: &str) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("appctl").into();
    cmd.env("APPCTL_DATA_DIR", data_dir);
    cmd.args(["--as", actor]);
    cmd.timeout(Duration::from_secs(30));
    cmd
}

fn kill_daemon(data_dir: &Path) {
    let _ = appctl(data_dir, ADMIN).arg("kill").output();
    std::thread::sleep(Duration::from_millis(300));
}

#[test]
fn test_e2e_pool_lifecycle_with_audit_trail() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_config(&data_dir, "");

    appctl(&data_dir, ADMIN)
        .args(["add-app", "checkout", "--pool", "CheckoutPool"])
        .assert()
        .success()
        .stdout(predicate::str::contains("registered 'checkout'"));

    appctl(&data_dir, ADMIN)
        .args(["stop", "checkout", "--reason", "maintenance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("verified stopped"));

    appctl(&data_dir, ADMIN)
        .args(["start", "checkout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("verified started"));

    // The trail has one record per attempt, newest first, with the reason.
    let output = appctl(&data_dir, ADMIN)
        .args(["--json", "history", "checkout"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("application-created"), "got: {stdout}");
    assert!(stdout.contains("(reason: maintenance)"), "got: {stdout}");
    assert!(stdout.contains(r#""action":"stop""#), "got: {stdout}");

    kill_daemon(&data_dir);
}

#[test]
fn test_e2e_unknown_actor_is_rejected() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_config(&data_dir, "");

    appctl(&data_dir, ADMIN)
        .args(["add-app", "checkout", "--pool", "CheckoutPool"])
        .assert()
        .success();

    // Provisioning is off, so an unseeded login cannot act at all.
    appctl(&data_dir, "CORP\\stranger")
        .args(["start", "checkout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no account for actor"));

    kill_daemon(&data_dir);
}

#[cfg(unix)]
#[test]
fn test_e2e_native_process_lifecycle() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_config(&data_dir, "");

    appctl(&data_dir, ADMIN)
        .args(["add-app", "sleeper", "--exec", "/bin/sleep", "--args", "300"])
        .assert()
        .success();

    appctl(&data_dir, ADMIN)
        .args(["start", "sleeper"])
        .assert()
        .success()
        .stdout(predicate::str::contains("started 'sleeper'"));

    let output = appctl(&data_dir, ADMIN).arg("list").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|l| l.contains("sleeper"))
        .expect("sleeper should appear in list output");
    assert!(line.contains("started"), "got: {line}");

    appctl(&data_dir, ADMIN)
        .args(["stop", "sleeper"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped 'sleeper'"));

    // Stop again: idempotent, still success.
    appctl(&data_dir, ADMIN)
        .args(["stop", "sleeper"])
        .assert()
        .success()
        .stdout(predicate::str::contains("was not running"));

    kill_daemon(&data_dir);
}

#[test]
fn test_e2e_pools_discovery_materializes_application() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_config(&data_dir, "");

    // No application registered yet; the live pool gets materialized.
    let output = appctl(&data_dir, ADMIN).arg("pools").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CheckoutPool"), "got: {stdout}");

    let output = appctl(&data_dir, ADMIN).arg("list").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CheckoutPool"), "got: {stdout}");

    kill_daemon(&data_dir);
}

#[test]
fn test_e2e_ownership_grant_and_revoke() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    // Provision unknown actors so the owner account exists after one call.
    write_config(&data_dir, "auto_provision_accounts = true");

    appctl(&data_dir, ADMIN)
        .args(["add-app", "checkout", "--pool", "CheckoutPool"])
        .assert()
        .success();

    // First contact provisions the owner account (not yet authorized).
    appctl(&data_dir, "CORP\\owner")
        .args(["stop", "checkout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not authorized"));

    appctl(&data_dir, ADMIN)
        .args(["grant", "checkout", "CORP\\owner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("granted 'checkout'"));

    appctl(&data_dir, "CORP\\owner")
        .args(["stop", "checkout"])
        .assert()
        .success();

    appctl(&data_dir, ADMIN)
        .args(["revoke", "checkout", "CORP\\owner"])
        .assert()
        .success();

    appctl(&data_dir, "CORP\\owner")
        .args(["start", "checkout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not authorized"));

    kill_daemon(&data_dir);
}

#[test]
fn test_e2e_remove_app_blocked_by_grants() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_config(&data_dir, "auto_provision_accounts = true");

    appctl(&data_dir, ADMIN)
        .args(["add-app", "checkout", "--pool", "CheckoutPool"])
        .assert()
        .success();
    // Provision the owner, then grant.
    let _ = appctl(&data_dir, "CORP\\owner").arg("list").output();
    appctl(&data_dir, ADMIN)
        .args(["grant", "checkout", "CORP\\owner"])
        .assert()
        .success();

    appctl(&data_dir, ADMIN)
        .args(["remove-app", "checkout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("still referenced"));

    appctl(&data_dir, ADMIN)
        .args(["revoke", "checkout", "CORP\\owner"])
        .assert()
        .success();
    appctl(&data_dir, ADMIN)
        .args(["remove-app", "checkout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 'checkout'"));

    kill_daemon(&data_dir);
}
