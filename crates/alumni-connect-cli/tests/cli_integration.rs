use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

fn unique_temp_db(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}.sqlite3", ulid::Ulid::new()))
}

fn run_ac<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_ac"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute ac binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_ac(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "ac command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn add_user(db: &Path, email: &str, role: &str, department: &str, approved: bool) -> String {
    let mut args = vec![
        "--db",
        path_str(db),
        "user",
        "add",
        "--first-name",
        "Tara",
        "--last-name",
        "Iyer",
        "--email",
        email,
        "--role",
        role,
        "--department",
        department,
    ];
    if approved {
        args.push("--approved");
    }
    let created = run_json(args);
    as_str(&created, "user_id").to_string()
}

fn emails(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
        .iter()
        .map(|entry| as_str(entry, "email").to_string())
        .collect()
}

#[test]
fn db_commands_report_and_apply_migrations() {
    let db = unique_temp_db("alumni-connect-cli-db");

    let schema_before = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_i64(&schema_before, "current_version"), 0);
    assert_eq!(as_str(&schema_before, "contract_version"), "cli.v1");

    let dry_run = run_json(["--db", path_str(&db), "db", "migrate", "--dry-run"]);
    assert_eq!(
        dry_run.get("would_apply_versions").and_then(Value::as_array).map(Vec::len),
        Some(2)
    );

    let schema_after_dry_run = run_json(["--db", path_str(&db), "db", "schema-version"]);
    assert_eq!(as_i64(&schema_after_dry_run, "current_version"), 0);

    let migrate = run_json(["--db", path_str(&db), "db", "migrate"]);
    assert_eq!(as_i64(&migrate, "after_version"), 2);
    assert_eq!(migrate.get("up_to_date").and_then(Value::as_bool), Some(true));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn backup_restore_and_integrity_check_preserve_users() {
    let db = unique_temp_db("alumni-connect-cli-backup");
    let restored = unique_temp_db("alumni-connect-cli-restored");
    let backup = unique_temp_db("alumni-connect-cli-backup-file");

    let admin = add_user(&db, "root@example.edu", "admin", "Office", true);
    add_user(&db, "alum@example.edu", "alumni", "IT", true);

    let backup_out = run_json(["--db", path_str(&db), "db", "backup", "--out", path_str(&backup)]);
    assert_eq!(as_str(&backup_out, "status"), "ok");

    let restore = run_json(["--db", path_str(&restored), "db", "restore", "--in", path_str(&backup)]);
    assert_eq!(restore.get("up_to_date").and_then(Value::as_bool), Some(true));

    let directory = run_json(["--db", path_str(&restored), "directory", "alumni", "--as", &admin]);
    assert_eq!(emails(&directory, "alumni"), vec!["alum@example.edu"]);

    let integrity = run_json(["--db", path_str(&restored), "db", "integrity-check"]);
    assert_eq!(integrity.get("ok").and_then(Value::as_bool), Some(true));

    for path in [&db, &restored, &backup] {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn collegeadmin_directory_matches_department_case_insensitively() {
    let db = unique_temp_db("alumni-connect-cli-directory");

    let admin = add_user(&db, "ca@example.edu", "collegeadmin", "CMPICA", true);
    add_user(&db, "one@example.edu", "alumni", "CMPICA", true);
    add_user(&db, "two@example.edu", "alumni", "cmpica", true);
    add_user(&db, "three@example.edu", "alumni", "IT", true);

    let directory = run_json(["--db", path_str(&db), "directory", "alumni", "--as", &admin]);
    assert_eq!(emails(&directory, "alumni"), vec!["one@example.edu", "two@example.edu"]);
    assert_eq!(as_i64(&directory, "count"), 2);
    let first = &directory["alumni"][0];
    assert_eq!(as_str(first, "fullName"), "Tara Iyer");
    assert!(first.get("_id").is_some());

    let _ = std::fs::remove_file(&db);
}

#[test]
fn approval_moves_alumni_out_of_pending_queue() {
    let db = unique_temp_db("alumni-connect-cli-approval");

    let admin = add_user(&db, "root@example.edu", "admin", "Office", true);
    let student = add_user(&db, "s@example.edu", "student", "IT", false);
    let pending = add_user(&db, "new@example.edu", "alumni", "IT", false);

    let queue = run_json(["--db", path_str(&db), "directory", "pending", "--as", &admin]);
    assert_eq!(emails(&queue, "pending"), vec!["new@example.edu"]);

    let before = run_json(["--db", path_str(&db), "directory", "alumni", "--as", &student]);
    assert!(emails(&before, "alumni").is_empty());

    let approved = run_json([
        "--db",
        path_str(&db),
        "user",
        "approve",
        "--as",
        &admin,
        "--user-id",
        &pending,
    ]);
    assert_eq!(approved.get("approved").and_then(Value::as_bool), Some(true));

    let after = run_json(["--db", path_str(&db), "directory", "alumni", "--as", &student]);
    assert_eq!(emails(&after, "alumni"), vec!["new@example.edu"]);

    let revoked = run_json([
        "--db",
        path_str(&db),
        "user",
        "approve",
        "--as",
        &admin,
        "--user-id",
        &pending,
        "--revoke",
    ]);
    assert_eq!(revoked.get("approved").and_then(Value::as_bool), Some(false));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn student_directory_and_unknown_requesters_fail() {
    let db = unique_temp_db("alumni-connect-cli-failures");
    let student = add_user(&db, "s@example.edu", "student", "IT", false);

    let output = run_ac(["--db", path_str(&db), "directory", "students", "--as", &student]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("forbidden"));

    let stranger = ulid::Ulid::new().to_string();
    let output = run_ac(["--db", path_str(&db), "directory", "alumni", "--as", &stranger]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("authentication required"));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn event_list_is_empty_for_new_database() {
    let db = unique_temp_db("alumni-connect-cli-events");
    let professor = add_user(&db, "p@example.edu", "professor", "IT", false);

    let events = run_json(["--db", path_str(&db), "event", "list", "--as", &professor]);
    assert_eq!(events.get("events").and_then(Value::as_array).map(Vec::len), Some(0));

    let _ = std::fs::remove_file(&db);
}
