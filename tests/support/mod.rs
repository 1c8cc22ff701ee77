#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// A scratch directory holding a task file and a config file, isolated from
/// the user's real data.
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.dir.path().join("tasks.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("duewatch.toml")
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.config_path();
        fs::write(&path, contents).expect("write config");
        path
    }

    pub fn write_tasks(&self, contents: &str) -> PathBuf {
        let path = self.tasks_path();
        fs::write(&path, contents).expect("write tasks");
        path
    }

    pub fn read_tasks(&self) -> serde_json::Value {
        let raw = fs::read_to_string(self.tasks_path()).expect("read tasks");
        serde_json::from_str(&raw).expect("tasks json")
    }

    /// `duewatch` pointed at this home's files.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("duewatch").expect("binary");
        cmd.current_dir(self.path())
            .env_remove("RUST_LOG")
            .env("DUEWATCH_FILE", self.tasks_path())
            .env("DUEWATCH_CONFIG", self.config_path());
        cmd
    }
}

pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    serde_json::from_slice(stdout).expect("valid json output")
}
