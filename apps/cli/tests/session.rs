use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli(data_dir: &Path) -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("multipad")?;
    cmd.env_remove("MULTIPAD_DATA_DIR")
        .env("MULTIPAD_LOG", "off")
        .arg("--data-dir")
        .arg(data_dir);
    Ok(cmd)
}

/// 測試環境的可用空間不一定足夠預設的安全餘量。 / Drops the disk margin so temp volumes pass.
fn write_test_preferences(data_dir: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(data_dir)?;
    fs::write(
        data_dir.join("preferences.json"),
        r#"{ "session": { "autosave_enabled": false }, "limits": { "disk_safety_margin_bytes": 0 } }"#,
    )?;
    Ok(())
}

#[test]
fn status_without_records_reports_nothing() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    cli(dir.path())?
        .args(["session", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no previous session"));
    Ok(())
}

#[test]
fn crash_then_recover_restores_unsaved_tab() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    write_test_preferences(dir.path())?;

    cli(dir.path())?
        .args(["edit", "--new", "draft", "--crash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exiting without clean shutdown"));

    cli(dir.path())?
        .args(["session", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "previous session crashed: 1 tab(s), 1 with unsaved changes",
        ));

    cli(dir.path())?
        .arg("edit")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Recovered 1 tab(s) from a previous crash")
                .and(predicate::str::contains("*"))
                .and(predicate::str::contains("Session saved")),
        );

    cli(dir.path())?
        .args(["session", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("previous session closed cleanly (1 tab(s))"));
    Ok(())
}

#[test]
fn discarding_recovery_leaves_no_session() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    write_test_preferences(dir.path())?;

    cli(dir.path())?
        .args(["edit", "--new", "draft", "--crash"])
        .assert()
        .success();
    cli(dir.path())?
        .args(["edit", "--discard-recovery"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Discarded crash-recovery data")
                .and(predicate::str::contains("Session cleared")),
        );
    cli(dir.path())?
        .args(["session", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no previous session"));
    Ok(())
}

#[test]
fn edit_and_save_writes_file_and_clean_record() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let data_dir = dir.path().join("data");
    write_test_preferences(&data_dir)?;
    let note = dir.path().join("note.txt");
    fs::write(&note, "original")?;

    cli(&data_dir)?
        .arg("edit")
        .arg(&note)
        .args(["--append", "hi ", "--save"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved").and(predicate::str::contains("note.txt")));
    assert_eq!(fs::read_to_string(&note)?, "hi original");

    cli(&data_dir)?
        .args(["session", "show", "--json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"clean_shutdown\": true")
                .and(predicate::str::contains("note.txt"))
                .and(predicate::str::contains("autosave: none")),
        );
    Ok(())
}

#[test]
fn session_clear_removes_records() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    write_test_preferences(dir.path())?;
    cli(dir.path())?
        .args(["edit", "--new", "kept"])
        .assert()
        .success();
    assert!(dir.path().join("session.json").exists());

    cli(dir.path())?
        .args(["session", "clear"])
        .assert()
        .success();
    assert!(!dir.path().join("session.json").exists());
    assert!(!dir.path().join("autosave.json").exists());
    Ok(())
}

#[test]
fn check_reports_missing_and_present_files() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    write_test_preferences(dir.path())?;
    let present = dir.path().join("present.txt");
    fs::write(&present, "abc")?;

    cli(dir.path())?
        .arg("check")
        .arg(dir.path().join("absent.txt"))
        .assert()
        .success()
        .stdout(predicate::str::contains("access: missing (creatable: yes)"));

    cli(dir.path())?
        .arg("check")
        .arg(&present)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("access: readable: yes")
                .and(predicate::str::contains("[normal]"))
                .and(predicate::str::contains("disk: ok")),
        );
    Ok(())
}

#[test]
fn preferences_are_clamped_on_update() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    cli(dir.path())?
        .args(["preferences", "set", "--autosave-interval", "1"])
        .assert()
        .success();
    cli(dir.path())?
        .args(["preferences", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"autosave_interval_secs\": 5"));
    Ok(())
}

#[test]
fn opening_missing_file_fails_with_message() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    write_test_preferences(dir.path())?;
    cli(dir.path())?
        .arg("edit")
        .arg(dir.path().join("nope.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open"));
    Ok(())
}

#[test]
fn unsaved_edits_carry_over_to_the_next_run() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let data_dir = dir.path().join("data");
    write_test_preferences(&data_dir)?;
    let note = dir.path().join("note.txt");
    fs::write(&note, "original")?;

    cli(&data_dir)?
        .arg("edit")
        .arg(&note)
        .args(["--append", "X "])
        .assert()
        .success()
        .stdout(predicate::str::contains("note.txt *").and(predicate::str::contains("Session saved")));
    assert_eq!(fs::read_to_string(&note)?, "original");

    cli(&data_dir)?
        .args(["edit", "--save"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Restored 1 tab(s)")
                .and(predicate::str::contains("Saved"))
                .and(predicate::str::contains("note.txt")),
        );
    assert_eq!(fs::read_to_string(&note)?, "X original");
    Ok(())
}

#[test]
fn recent_lists_opened_files_until_cleared() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let data_dir = dir.path().join("data");
    write_test_preferences(&data_dir)?;
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    fs::write(&first, "1")?;
    fs::write(&second, "2")?;

    cli(&data_dir)?
        .arg("edit")
        .arg(&first)
        .arg(&second)
        .assert()
        .success();

    cli(&data_dir)?
        .arg("recent")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("1. ")
                .and(predicate::str::contains("second.txt"))
                .and(predicate::str::contains("2. "))
                .and(predicate::str::contains("first.txt")),
        );

    cli(&data_dir)?
        .args(["recent", "--clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared recent files"));
    cli(&data_dir)?
        .arg("recent")
        .assert()
        .success()
        .stdout(predicate::str::contains("no recent files"));
    Ok(())
}
