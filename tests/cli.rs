use std::process::Command;

fn cinesift(root: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_cinesift"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

#[test]
fn init_writes_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let out = cinesift(dir.path(), &["init"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let config = cinesift::config::Config::load(dir.path()).unwrap();
    assert_eq!(config.search.top_k, 5);
    assert!(dir.path().join(".cinesift/config.toml").exists());
}

#[test]
fn init_replaces_an_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join(".cinesift");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), "not = [valid").unwrap();

    let out = cinesift(dir.path(), &["init"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(cinesift::config::Config::load(dir.path()).is_ok());
}

#[test]
fn stats_without_index_prints_empty_json() {
    let dir = tempfile::tempdir().unwrap();
    let out = cinesift(dir.path(), &["--json", "stats"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stats: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(stats["index"], serde_json::json!({}));
    assert!(stats["cache"].is_null());
}
