//! Unit tests for MCP server script lookup.

use mcp_stdio_bridge::script::locate_script;
use mcp_stdio_bridge::AppError;

fn unique_name() -> String {
    format!("locator_{}.py", uuid::Uuid::new_v4().simple())
}

#[test]
fn finds_script_in_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name();
    std::fs::write(dir.path().join(&name), "print('hi')").unwrap();

    let found = locate_script(&name, &[dir.path().to_path_buf()]).expect("script found");
    assert_eq!(found, dir.path().join(&name));
}

#[test]
fn directory_part_of_identifier_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name();
    std::fs::write(dir.path().join(&name), "").unwrap();

    let found = locate_script(&format!("/somewhere/else/{name}"), &[dir.path().to_path_buf()])
        .expect("basename lookup");
    assert_eq!(found.file_name().unwrap().to_str(), Some(name.as_str()));
}

#[test]
fn earlier_dir_wins() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let name = unique_name();
    std::fs::write(first.path().join(&name), "").unwrap();
    std::fs::write(second.path().join(&name), "").unwrap();

    let found = locate_script(
        &name,
        &[first.path().to_path_buf(), second.path().to_path_buf()],
    )
    .unwrap();
    assert!(found.starts_with(first.path()));
}

#[test]
fn directory_with_script_name_is_not_a_match() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name();
    std::fs::create_dir(dir.path().join(&name)).unwrap();

    assert!(locate_script(&name, &[dir.path().to_path_buf()]).is_err());
}

#[test]
fn missing_script_lists_every_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name();

    let err = locate_script(&name, &[dir.path().to_path_buf()]).expect_err("not found");
    match err {
        AppError::ScriptNotFound { script, tried } => {
            assert_eq!(script, name);
            // executable dir, working dir, configured dir
            assert_eq!(tried.len(), 3);
            assert_eq!(tried[2], dir.path().join(&name));
            assert!(tried.iter().all(|p| p.ends_with(&name)));
        }
        other => panic!("expected ScriptNotFound, got {other:?}"),
    }
}
