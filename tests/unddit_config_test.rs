use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn config_json_merges_file_then_env() {
    let tmp = tempdir().expect("tempdir");
    let config = tmp.path().join("unddit.toml");
    fs::write(
        &config,
        "[archive]\npage_size = 250\n\n[comments]\nmax_comments = 42\nsort = \"new\"\n",
    )
    .expect("write config");

    let out = assert_cmd::cargo::cargo_bin_cmd!("unddit")
        .current_dir(tmp.path())
        .env("UNDDIT_HOME", tmp.path())
        .env("UNDDIT_CONFIG_PATH", &config)
        .env("UNDDIT_CONTEXT_DEPTH", "3")
        .env("UNDDIT_LOG", "off")
        .args(["config", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&out).expect("json report");
    let data = &report["data"];
    assert_eq!(data["archive"]["page_size"], 250);
    // Everything under 100 is raised to the floor.
    assert_eq!(data["comments"]["max_comments"], 100);
    assert_eq!(data["comments"]["sort"], "new");
    assert_eq!(data["comments"]["context_depth"], 3);
    assert_eq!(data["live"]["batch_size"], 100);

    let details = report["details"].as_array().expect("details");
    assert!(
        details
            .iter()
            .filter_map(|d| d.as_str())
            .any(|d| d.starts_with("env_overrides=") && d.contains("UNDDIT_CONTEXT_DEPTH"))
    );
}

#[test]
fn config_rejects_invalid_file() {
    let tmp = tempdir().expect("tempdir");
    let config = tmp.path().join("unddit.toml");
    fs::write(&config, "[live]\nbatch_size = 500\n").expect("write config");

    assert_cmd::cargo::cargo_bin_cmd!("unddit")
        .current_dir(tmp.path())
        .env("UNDDIT_HOME", tmp.path())
        .env("UNDDIT_CONFIG_PATH", &config)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid live batch size"));
}
