use assert_cmd::Command;
use predicates::prelude::*;

fn gsync() -> Command {
    Command::cargo_bin("gsync").unwrap()
}

fn populate(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("a.txt"), "a").unwrap();
    std::fs::write(root.join("sub").join("b.txt"), "bb").unwrap();
}

fn contents_of(path: &std::path::Path) -> String {
    format!("{}/", path.display())
}

#[test]
fn test_help_works() {
    gsync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("googledrive://"))
        .stdout(predicate::str::contains("Comparison"));
}

#[test]
fn test_version_works() {
    gsync()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gsync"));
}

#[test]
fn test_destination_is_required() {
    gsync().arg("only-one").assert().failure();
}

#[test]
fn test_archive_sync_between_local_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dest = tmp.path().join("dest");
    populate(&src);
    gsync()
        .arg("-a")
        .arg(contents_of(&src))
        .arg(&dest)
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "a");
    assert_eq!(
        std::fs::read_to_string(dest.join("sub").join("b.txt")).unwrap(),
        "bb"
    );
}

#[test]
fn test_source_without_trailing_slash_is_nested() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dest = tmp.path().join("dest");
    populate(&src);
    gsync().arg("-r").arg(&src).arg(&dest).assert().success();
    assert!(dest.join("src").join("sub").join("b.txt").exists());
}

#[test]
fn test_summary_is_printed() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    populate(&src);
    gsync()
        .args(["-a", "--summary"])
        .arg(contents_of(&src))
        .arg(tmp.path().join("dest"))
        .assert()
        .success()
        .stdout(predicate::str::contains("created: 4"))
        .stdout(predicate::str::contains("errors: 0"));
}

#[test]
fn test_dry_run_leaves_destination_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dest = tmp.path().join("dest");
    populate(&src);
    std::fs::create_dir(&dest).unwrap();
    gsync()
        .args(["-a", "-n", "--summary"])
        .arg(contents_of(&src))
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("created: 3"));
    assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
}

#[test]
fn test_delete_requires_recursion() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    populate(&src);
    gsync()
        .arg("--delete")
        .arg(contents_of(&src))
        .arg(tmp.path().join("dest"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid options"));
}

#[test]
fn test_malformed_size_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    gsync()
        .args(["-a", "--max-size", "lots"])
        .arg(tmp.path().join("src"))
        .arg(tmp.path().join("dest"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid options"));
}

#[test]
fn test_quiet_suppresses_error_output() {
    let tmp = tempfile::tempdir().unwrap();
    gsync()
        .args(["-q", "--delete"])
        .arg(tmp.path().join("src"))
        .arg(tmp.path().join("dest"))
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_missing_source_fails() {
    let tmp = tempfile::tempdir().unwrap();
    gsync()
        .arg("-a")
        .arg(tmp.path().join("missing"))
        .arg(tmp.path().join("dest"))
        .assert()
        .failure();
    assert!(!tmp.path().join("dest").exists());
}

#[test]
fn test_drive_path_without_session_fails() {
    let tmp = tempfile::tempdir().unwrap();
    gsync()
        .arg("-a")
        .arg("--session")
        .arg(tmp.path().join("absent.json"))
        .arg("googledrive://docs/")
        .arg(tmp.path().join("dest"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.json"));
}

#[test]
fn test_drive_path_with_session_reports_missing_client() {
    let tmp = tempfile::tempdir().unwrap();
    let session = tmp.path().join("config.json");
    std::fs::write(&session, r#"{"client_id": "id", "client_secret": "secret"}"#).unwrap();
    gsync()
        .arg("-a")
        .arg("--session")
        .arg(&session)
        .arg("googledrive://docs/")
        .arg(tmp.path().join("dest"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("no drive client"));
}
