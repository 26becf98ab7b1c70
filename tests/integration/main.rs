//! Integration tests for streamcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn streamcache() -> Command {
        let mut cmd = cargo_bin_cmd!("streamcache");
        cmd.env_remove("STREAMCACHE_CONFIG")
            .env_remove("STREAMCACHE_DIR")
            .env("CI", "1");
        cmd
    }

    /// Command isolated to a config file and cache dir under `temp`
    fn isolated(temp: &TempDir) -> Command {
        let mut cmd = streamcache();
        cmd.arg("--config")
            .arg(temp.path().join("config.toml"))
            .arg("--cache-dir")
            .arg(temp.path().join("cache"));
        cmd
    }

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        streamcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("partially available streams"));
    }

    #[test]
    fn version_displays() {
        streamcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("streamcache"));
    }

    #[test]
    fn config_path_honors_flag() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("read_policy = \"available\""));
    }

    #[test]
    fn config_set_then_show() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "set", "cache.max_size_mb", "12"])
            .assert()
            .success();

        isolated(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_size_mb = 12"));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["config", "set", "cache.colour", "blue"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_shows_hint() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[cache\n").unwrap();

        isolated(&temp)
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("config init --force"));

        isolated(&temp)
            .args(["config", "init", "--force"])
            .assert()
            .success();
    }

    #[test]
    fn list_empty() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn fetch_file_then_list_and_cat() {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), "report.txt", b"quarterly numbers\n");

        isolated(&temp)
            .args(["fetch", "reports/q3"])
            .arg("--file")
            .arg(&source)
            .assert()
            .success()
            .stderr(predicate::str::contains("Cached reports/q3"));

        isolated(&temp)
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout("reports/q3\n");

        // Served from the cache even though the source is gone
        fs::remove_file(&source).unwrap();
        isolated(&temp)
            .args(["cat", "reports/q3"])
            .assert()
            .success()
            .stdout("quarterly numbers\n");
    }

    #[test]
    fn cat_from_offset() {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), "alphabet", b"abcdefghijklmnopqrstuvwxyz");

        isolated(&temp)
            .args(["cat", "letters", "--offset", "23"])
            .arg("--file")
            .arg(&source)
            .assert()
            .success()
            .stdout("xyz");
    }

    #[test]
    fn cat_past_end_fails() {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), "tiny", b"abc");

        isolated(&temp)
            .args(["cat", "tiny", "--offset", "10"])
            .arg("--file")
            .arg(&source)
            .assert()
            .failure()
            .stderr(predicate::str::contains("will never become readable"));
    }

    #[test]
    fn cat_uncached_without_source_fails() {
        let temp = TempDir::new().unwrap();
        isolated(&temp)
            .args(["cat", "unknown"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not cached"));

        isolated(&temp)
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout("");
    }

    #[test]
    fn fetch_requires_source() {
        streamcache()
            .args(["fetch", "doc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--url"));
    }

    #[test]
    fn gc_dry_run_keeps_fresh_entries() {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), "fresh", b"new");

        isolated(&temp)
            .args(["fetch", "fresh"])
            .arg("--file")
            .arg(&source)
            .assert()
            .success();

        isolated(&temp)
            .args(["gc", "--days", "1", "--dry-run"])
            .assert()
            .success()
            .stderr(predicate::str::contains("No entries unused"));
    }

    #[test]
    fn clear_removes_everything() {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), "doomed", b"bytes");

        isolated(&temp)
            .args(["fetch", "doomed"])
            .arg("--file")
            .arg(&source)
            .assert()
            .success();

        isolated(&temp)
            .args(["clear", "--yes"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Cleared 1 entry"));

        isolated(&temp)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn clear_aborts_without_confirmation() {
        let temp = TempDir::new().unwrap();
        let source = write_source(temp.path(), "kept", b"bytes");

        isolated(&temp)
            .args(["fetch", "kept"])
            .arg("--file")
            .arg(&source)
            .assert()
            .success();

        isolated(&temp)
            .arg("clear")
            .write_stdin("n\n")
            .assert()
            .success()
            .stderr(predicate::str::contains("Aborted"));

        isolated(&temp)
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout("kept\n");
    }

    #[test]
    fn completions_generate() {
        streamcache()
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("streamcache"));
    }
}
