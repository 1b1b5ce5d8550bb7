//! Integration tests for Stagehand

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn stagehand() -> Command {
        let mut cmd = cargo_bin_cmd!("stagehand");
        cmd.env_remove("STAGEHAND_CONFIG").env("CI", "1");
        cmd
    }

    /// Config file with a scratch workspace and an engine binary that does not exist
    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("config.toml");
        let contents = format!(
            "[workspace]\npath = \"{}\"\n\n[engine]\nbinary = \"stagehand-test-missing-engine\"\n",
            dir.join("workspace").display()
        );
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        stagehand()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("stage and run buildpack apps"));
    }

    #[test]
    fn version_displays() {
        stagehand()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stagehand"));
    }

    #[test]
    fn config_path() {
        stagehand()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_path_honors_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");

        stagehand()
            .args(["config", "path", "--config"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();

        stagehand()
            .args(["config", "show", "--config"])
            .arg(dir.path().join("absent.toml"))
            .assert()
            .success()
            .stdout(predicate::str::contains("[workspace]"))
            .stdout(predicate::str::contains("cflinuxfs3"));
    }

    #[test]
    fn config_init_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stagehand.toml");

        stagehand()
            .args(["config", "init", "--config"])
            .arg(&path)
            .assert()
            .success();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[registry]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[workspace\n").unwrap();

        stagehand()
            .args(["config", "show", "--config"])
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn deploy_missing_path() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());

        stagehand()
            .args(["deploy", "myapp"])
            .arg(dir.path().join("no-such-app"))
            .arg("--config")
            .arg(&config)
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to run setup step"))
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn deploy_rejects_malformed_env() {
        stagehand()
            .args(["deploy", "myapp", ".", "--env", "NOVALUE"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("KEY=VALUE"));
    }

    #[test]
    fn delete_without_engine_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());

        stagehand()
            .args(["delete", "myapp", "--config"])
            .arg(&config)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Command failed"))
            .stderr(predicate::str::contains("Hint:"));
    }
}
