use clap::Parser;
use dupelink::cli::Cli;
use dupelink::error::ExitCode;
use dupelink::run_app;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn run(args: &[&str]) -> anyhow::Result<ExitCode> {
    let cli = Cli::try_parse_from(std::iter::once("dupelink").chain(args.iter().copied())).unwrap();
    run_app(cli)
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_scan_clean_stat_end_to_end() {
    let root = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = db_dir.path().join("dedup.db");
    fs::create_dir_all(root.path().join("a")).unwrap();
    fs::create_dir_all(root.path().join("b")).unwrap();
    fs::write(root.path().join("a/x.txt"), b"identical").unwrap();
    fs::write(root.path().join("b/y.txt"), b"identical").unwrap();

    let code = run(&["-q", "scan", "--root", arg(root.path()), "--db", arg(&db)]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let code = run(&[
        "-q",
        "clean",
        "--root",
        arg(root.path()),
        "--db",
        arg(&db),
        "--output",
        "json",
    ])
    .unwrap();
    assert_eq!(code, ExitCode::Success);

    let code = run(&["stat", "--db", arg(&db), "--output", "json"]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let code = run(&["-q", "clean", "--root", arg(root.path()), "--db", arg(&db)]).unwrap();
    assert_eq!(code, ExitCode::Success);
}

#[test]
fn test_stat_missing_store_is_error_not_panic() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("missing.db");

    let err = run(&["stat", "--db", arg(&db)]).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("missing.db"), "{message}");
    assert!(!db.exists());
}

#[test]
fn test_clean_invalid_root_is_error() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("d.db");
    run(&["-q", "scan", "--root", arg(dir.path()), "--db", arg(&db)]).unwrap();

    let missing = dir.path().join("nope");
    assert!(run(&["-q", "clean", "--root", arg(&missing), "--db", arg(&db)]).is_err());
}

#[test]
fn test_missing_config_file_is_error() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("absent.toml");
    let db = dir.path().join("d.db");

    let result = run(&["--config", arg(&config), "stat", "--db", arg(&db)]);
    assert!(result.is_err());
}

#[test]
fn test_config_file_supplies_store_path() {
    let root = tempdir().unwrap();
    let dir = tempdir().unwrap();
    let db = dir.path().join("from-config.db");
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!("db = {:?}\njobs = 2\n", db.to_str().unwrap()),
    )
    .unwrap();
    fs::write(root.path().join("f.txt"), b"f").unwrap();

    let code = run(&[
        "-q",
        "--config",
        arg(&config),
        "scan",
        "--root",
        arg(root.path()),
        "--no-progress",
    ])
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(db.exists());
}
