//! Boot log capturing the combined output of the hadoop-unit process.
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    process::Stdio,
};

use crate::error::FixtureError;

/// Append-only file receiving the child's stdout and stderr.
#[derive(Debug, Clone)]
pub struct BootLog {
    path: PathBuf,
}

impl BootLog {
    /// Boot log for fixture `name` inside `base_dir`.
    pub fn new(base_dir: &Path, name: &str) -> Self {
        Self {
            path: base_dir.join(format!("{name}.log")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates (or truncates) the log and returns stdout/stderr handles for a
    /// fresh run. Both handles share one file description so output interleaves
    /// in write order.
    pub fn open_for_run(&self) -> Result<(Stdio, Stdio), FixtureError> {
        let file = File::create(&self.path).map_err(|source| self.error(source))?;
        let stderr = file.try_clone().map_err(|source| self.error(source))?;
        Ok((Stdio::from(file), Stdio::from(stderr)))
    }

    /// Opens the existing log for appending, used by helper processes.
    pub fn open_for_append(&self) -> Result<(Stdio, Stdio), FixtureError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.error(source))?;
        let stderr = file.try_clone().map_err(|source| self.error(source))?;
        Ok((Stdio::from(file), Stdio::from(stderr)))
    }

    /// Returns the full contents of the log.
    pub fn read(&self) -> Result<String, FixtureError> {
        let bytes = fs::read(&self.path).map_err(|source| self.error(source))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Returns the contents, or a placeholder naming the read error. Used when
    /// building failure messages, where a missing log must not hide the
    /// original failure.
    pub fn read_for_diagnostics(&self) -> String {
        self.read()
            .unwrap_or_else(|err| format!("<boot log unavailable: {err}>"))
    }

    /// Returns `true` when any line of the log contains `marker`.
    pub fn contains(&self, marker: &str) -> bool {
        match File::open(&self.path) {
            Ok(file) => BufReader::new(file)
                .lines()
                .map_while(Result::ok)
                .any(|line| line.contains(marker)),
            Err(_) => false,
        }
    }

    /// Returns the last `lines` lines of the log.
    pub fn tail(&self, lines: usize) -> Result<Vec<String>, FixtureError> {
        let file = File::open(&self.path).map_err(|source| self.error(source))?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = all_lines.len().saturating_sub(lines);
        Ok(all_lines[start..].to_vec())
    }

    fn error(&self, source: std::io::Error) -> FixtureError {
        FixtureError::BootLog {
            path: self.path.clone(),
            source,
        }
    }
}
