//! Integration tests for the git credential helper binary.
//!
//! These tests run the helper with an in-memory store, or with the encrypted
//! file store under a temporary home, so nothing touches the user's keychain.
//! They check the protocol output git would see.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Helper to create an empty config file in a temporary directory.
fn empty_config() -> (PathBuf, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "").unwrap();
    (path, temp_dir)
}

fn command(config: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_git-credential-credforge"));
    command
        .arg("--config")
        .arg(config)
        .env_remove("CREDFORGE_VCS")
        .env_remove("RUST_LOG");
    command
}

fn helper(config: &Path, args: &[&str], stdin: &str) -> Output {
    let mut command = command(config);
    command.args(["--store", "memory"]).args(args);
    run(command, stdin)
}

/// Run against the encrypted file store, with every platform directory
/// rooted in `home`.
fn file_helper(home: &Path, config: &Path, args: &[&str], stdin: &str) -> Output {
    let mut command = command(config);
    command
        .args(["--store", "file"])
        .args(args)
        .env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"));
    run(command, stdin)
}

fn run(mut command: Command, stdin: &str) -> Output {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn test_key_default_namespace() {
    let (config, _temp) = empty_config();
    let output = helper(&config, &["key", "https://github.com/owner/repo/"], "");

    assert!(output.status.success());
    assert_eq!(stdout(&output), "git:https://github.com/owner/repo\n");
}

#[test]
fn test_key_uses_provider_alias() {
    let (config, _temp) = empty_config();
    let output = helper(&config, &["key", "https://gist.github.com/"], "");

    assert!(output.status.success());
    assert_eq!(stdout(&output), "git:https://github.com\n");
}

#[test]
fn test_key_mercurial_mode() {
    let (config, _temp) = empty_config();
    let output = helper(&config, &["--mercurial", "key", "https://user@host/repo/"], "");

    assert!(output.status.success());
    assert_eq!(stdout(&output), "user@@https://host/repo@Mercurial\n");
}

#[test]
fn test_key_custom_namespace() {
    let (config, _temp) = empty_config();
    let output = helper(&config, &["--namespace", "work", "key", "https://example.com/r"], "");

    assert_eq!(stdout(&output), "work:https://example.com/r\n");
}

#[test]
fn test_key_rejects_unparseable_url() {
    let (config, _temp) = empty_config();
    let output = helper(&config, &["key", "not a url"], "");

    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
}

#[test]
fn test_get_without_prompt_on_miss_prints_nothing() {
    let (config, _temp) = empty_config();
    let output = helper(
        &config,
        &["--no-prompt", "get"],
        "protocol=https\nhost=example.com\n\n",
    );

    assert!(output.status.success());
    assert!(stdout(&output).is_empty());
}

#[test]
fn test_store_and_erase_succeed() {
    let (config, _temp) = empty_config();

    let stored = helper(
        &config,
        &["store"],
        "protocol=https\nhost=example.com\nusername=bob\npassword=secret\n\n",
    );
    assert!(stored.status.success());

    let erased = helper(&config, &["erase"], "protocol=https\nhost=example.com\n\n");
    assert!(erased.status.success());
}

#[test]
fn test_store_without_password_fails() {
    let (config, _temp) = empty_config();
    let output = helper(&config, &["store"], "protocol=https\nhost=example.com\n\n");

    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn test_file_store_round_trip_across_processes() {
    let (config, temp) = empty_config();
    let home = temp.path();
    let request = "protocol=https\nhost=git.example.com\npath=team/repo.git\n\n";

    let stored = file_helper(
        home,
        &config,
        &["store"],
        "protocol=https\nhost=git.example.com\npath=team/repo.git\nusername=bob\npassword=s3cret\n\n",
    );
    assert!(stored.status.success(), "{}", String::from_utf8_lossy(&stored.stderr));

    let found = file_helper(home, &config, &["--no-prompt", "get"], request);
    assert!(found.status.success());
    assert_eq!(stdout(&found), "username=bob\npassword=s3cret\n");

    // Another repository on the same host has its own record.
    let other = file_helper(
        home,
        &config,
        &["--no-prompt", "get"],
        "protocol=https\nhost=git.example.com\npath=team/other.git\n\n",
    );
    assert!(stdout(&other).is_empty());

    let erased = file_helper(home, &config, &["erase"], request);
    assert!(erased.status.success());

    let gone = file_helper(home, &config, &["--no-prompt", "get"], request);
    assert!(gone.status.success());
    assert!(stdout(&gone).is_empty());
}
