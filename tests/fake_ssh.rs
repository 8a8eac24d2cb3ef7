//! End-to-end scenarios driven against a scripted fake `ssh`/`scp`/`sftp`,
//! exercising the transport without touching a real network.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use ssh_escalate::{Connection, GlobalConfig, HostVars, PlayContext};
use tempfile::TempDir;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn base_config(dir: &TempDir, ssh_script: &str) -> GlobalConfig {
    let ssh_bin = write_script(dir.path(), "fake-ssh", ssh_script);
    let mut config = GlobalConfig::default();
    config.ansible_ssh_args = "-o ControlMaster=auto".to_owned(); // no ControlPersist: skip cp dir setup
    config.ssh_bin = ssh_bin.to_string_lossy().into_owned();
    config
}

fn base_play() -> PlayContext {
    PlayContext {
        remote_addr: "fakehost".to_owned(),
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// S1: a fake ssh that writes `hi\n` and exits 0; no `in_data` means the
/// composed argv retains `-tt` and uses `-q` at default (low) verbosity.
#[tokio::test]
async fn s1_echo_no_input() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = base_config(
        &dir,
        r#"
echo hi
exit 0
"#,
    );

    let mut conn = Connection::new(base_play(), HostVars::default(), config);
    let out = conn.exec_command("echo hi", None, false).await.unwrap();

    assert_eq!(out.status, 0);
    assert_eq!(out.stdout, b"hi\n");
    assert_eq!(out.stderr, b"");
    assert_eq!(out.reserved, "");
}

/// S2: with `in_data` set, stdin is a pipe (not a pty) and the payload is
/// delivered; the composed argv omits `-tt`.
#[tokio::test]
async fn s2_piped_input_omits_tt() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = base_config(
        &dir,
        r#"
cat > /tmp/fake_ssh_s2_received 2>/dev/null || true
cat
exit 0
"#,
    );

    let mut conn = Connection::new(base_play(), HostVars::default(), config);
    let out = conn
        .exec_command("cat", Some(b"payload"), false)
        .await
        .unwrap();

    assert_eq!(out.status, 0);
    assert_eq!(out.stdout, b"payload");
}

/// S3: escalation succeeds via a bare success marker, no password written.
#[tokio::test]
async fn s3_escalation_success_marker() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = base_config(
        &dir,
        r#"
printf 'BECOME-SUCCESS-abc123\n'
printf 'done\n'
exit 0
"#,
    );

    let mut play = base_play();
    play.become_ = true;
    play.prompt = Some("[sudo] password".to_owned());

    let mut conn = Connection::new(play, HostVars::default(), config);
    let out = conn.exec_command("whoami", None, true).await.unwrap();

    assert_eq!(out.status, 0);
    assert!(out.stdout.starts_with(b"BECOME-SUCCESS-abc123\n"));
    assert!(out.stdout.ends_with(b"done\n"));
}

/// S4: escalation prompts for a password, the transport writes it, then
/// the fake ssh emits its output and exits 0.
#[tokio::test]
async fn s4_escalation_password_prompt() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = base_config(
        &dir,
        r#"
printf '[sudo] password: '
read -r pw
printf 'ok\n'
exit 0
"#,
    );

    let mut play = base_play();
    play.become_ = true;
    play.prompt = Some("[sudo] password".to_owned());
    play.become_pass = Some("hunter2".to_owned());

    let mut conn = Connection::new(play, HostVars::default(), config);
    let out = conn.exec_command("whoami", None, true).await.unwrap();

    assert_eq!(out.status, 0);
    assert!(out.stdout.ends_with(b"ok\n"));
}

/// S5: fake ssh exits 255 three times then 0; with `ANSIBLE_SSH_RETRIES=3`
/// the attempt function is invoked 4 times in total.
#[tokio::test]
async fn s5_retries_then_succeeds() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("attempts");
    fs::write(&counter, "0").unwrap();

    let config = base_config(
        &dir,
        &format!(
            r#"
n=$(cat {counter})
n=$((n + 1))
echo "$n" > {counter}
if [ "$n" -lt 4 ]; then
  exit 255
fi
echo ok
exit 0
"#,
            counter = counter.display()
        ),
    );
    let mut config = config;
    config.ansible_ssh_retries = 3;

    let mut conn = Connection::new(base_play(), HostVars::default(), config);
    let out = conn.exec_command("echo ok", None, false).await.unwrap();

    assert_eq!(out.status, 0);
    assert_eq!(fs::read_to_string(&counter).unwrap().trim(), "4");
}

/// S6: `put_file` with a missing local source fails without spawning a
/// child (the fake ssh script, if invoked, would create a marker file that
/// must not appear).
#[tokio::test]
async fn s6_put_file_missing_source() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("spawned");
    let mut config = base_config(
        &dir,
        &format!("touch {}\nexit 0\n", marker.display()),
    );
    config.scp_bin = config.ssh_bin.clone();

    let mut conn = Connection::new(base_play(), HostVars::default(), config);
    let missing = dir.path().join("does-not-exist");
    let result = conn.put_file(&missing, "/remote/out").await;

    assert!(result.is_err());
    assert!(!marker.exists());
}
