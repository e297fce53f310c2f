//! Command-line parsing and end-to-end command runs

use clap::{CommandFactory, Parser};
use imgvault::config::VaultConfig;
use imgvault::tooling::cli::{Cli, CliContext};
use std::fs;
use tempfile::TempDir;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[test]
fn parse_valid_command_matrix() {
    let cases: Vec<Vec<&str>> = vec![
        vec!["imgvault", "create"],
        vec!["imgvault", "--library", "/tmp/lib", "list"],
        vec!["imgvault", "list", "--format", "json", "--folder", "a/b"],
        vec!["imgvault", "add", "one.png", "two.jpg", "--folder", "trip"],
        vec!["imgvault", "add", "notes.txt", "--any"],
        vec!["imgvault", "show", "abc"],
        vec!["imgvault", "export", "a", "b", "-o", "out"],
        vec!["imgvault", "rename", "abc", "new name"],
        vec!["imgvault", "move", "abc", "--folder", "x/y"],
        vec!["imgvault", "delete", "abc"],
        vec!["imgvault", "move-folder", "a/b", "c"],
        vec!["imgvault", "rename-folder", "a/b", "z"],
        vec!["imgvault", "delete-folder", "a"],
        vec!["imgvault", "tags", "--format", "json"],
        vec!["imgvault", "config"],
        vec!["imgvault", "--verbose", "--log-level", "debug", "list"],
    ];

    for args in cases {
        let parsed = Cli::try_parse_from(args.clone());
        assert!(parsed.is_ok(), "expected valid parse for args: {args:?}");
    }
}

#[test]
fn parse_rejects_missing_arguments() {
    for args in [
        vec!["imgvault", "add"],
        vec!["imgvault", "export", "abc"],
        vec!["imgvault", "move", "abc"],
        vec!["imgvault", "rename", "abc"],
    ] {
        assert!(Cli::try_parse_from(args.clone()).is_err(), "{args:?}");
    }
}

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}

fn run(context: &CliContext, args: &[&str]) -> String {
    let mut full = vec!["imgvault"];
    full.extend_from_slice(args);
    let cli = Cli::try_parse_from(full).unwrap();
    context.execute(&cli.command).unwrap()
}

#[test]
fn commands_run_against_a_library() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("lib");
    let context = CliContext::with_config(Some(root.clone()), VaultConfig::default()).unwrap();

    assert!(run(&context, &["create"]).contains("Created library"));

    let image = temp_dir.path().join("sunset.png");
    fs::write(&image, PNG).unwrap();
    let text = temp_dir.path().join("notes.txt");
    fs::write(&text, b"plain").unwrap();
    let added = run(
        &context,
        &["add", image.to_str().unwrap(), text.to_str().unwrap()],
    );
    assert!(added.contains("Added"));
    assert!(added.contains("Skipped"));

    let listing: serde_json::Value =
        serde_json::from_str(&run(&context, &["list", "--format", "json"])).unwrap();
    assert_eq!(listing["total"], 1);
    let id = listing["files"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(listing["files"][0]["folder"][0], "*New");

    run(&context, &["rename", &id, "dusk"]);
    run(&context, &["move", &id, "--folder", "trips/2014"]);
    let shown: serde_json::Value =
        serde_json::from_str(&run(&context, &["show", &id, "--format", "json"])).unwrap();
    assert_eq!(shown["file"]["name"], "dusk");
    assert_eq!(shown["format"], "png");
    assert_eq!(shown["size"], PNG.len());

    let out = temp_dir.path().join("out");
    run(&context, &["export", &id, "-o", out.to_str().unwrap()]);
    assert_eq!(fs::read(out.join(format!("dusk-{}.png", id))).unwrap(), PNG);

    // A name holding path separators is exported inside the target directory.
    run(&context, &["rename", &id, "../escape"]);
    run(&context, &["export", &id, "-o", out.to_str().unwrap()]);
    assert!(out.join(format!("_escape-{}.png", id)).is_file());
    assert!(!temp_dir.path().join(format!("escape-{}.png", id)).exists());
    run(&context, &["rename", &id, "dusk"]);

    let tags = run(&context, &["tags"]);
    assert!(tags.lines().any(|t| t == "dusk"));

    assert!(run(&context, &["delete-folder", "trips"]).contains("Deleted 1"));
    assert!(run(&context, &["list"]).contains("No files"));
}

#[test]
fn unknown_id_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let context =
        CliContext::with_config(Some(temp_dir.path().to_path_buf()), VaultConfig::default())
            .unwrap();
    run(&context, &["create"]);

    let cli = Cli::try_parse_from([
        "imgvault",
        "delete",
        "6f9619ff-8b86-d011-b42d-00c04fc964ff",
    ])
    .unwrap();
    let err = context.execute(&cli.command).unwrap_err();
    assert!(err.to_string().contains("not found"));
}
