// src/db/history.rs

//! Append-only per-package event logs
//!
//! One text file per package under the history directory. Each line is
//!
//! ```text
//! <rfc3339-timestamp> <action> <name> <from-evr> -> <to-evr>
//! ```
//!
//! with `-` standing in for an absent from-EVR (fresh installs). Actions
//! are SAVE (rollback bundle captured), INSTALL, UPGRADE and ROLLBACK.

use crate::error::{Error, Result};
use crate::version::Evr;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Recorded actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Save,
    Install,
    Upgrade,
    Rollback,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Save => "SAVE",
            Action::Install => "INSTALL",
            Action::Upgrade => "UPGRADE",
            Action::Rollback => "ROLLBACK",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "SAVE" => Some(Action::Save),
            "INSTALL" => Some(Action::Install),
            "UPGRADE" => Some(Action::Upgrade),
            "ROLLBACK" => Some(Action::Rollback),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed history line
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub name: String,
    pub from: Option<Evr>,
    pub to: Evr,
}

/// Event log store rooted at the history directory
#[derive(Debug, Clone)]
pub struct History {
    dir: PathBuf,
}

impl History {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.log", name))
    }

    /// Append one event to the package's log
    pub fn append(&self, name: &str, action: Action, from: Option<&Evr>, to: &Evr) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let line = format!(
            "{} {} {} {} -> {}\n",
            Utc::now().to_rfc3339(),
            action,
            name,
            from.map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
            to
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(name))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read a package's full event history, oldest first.
    ///
    /// A missing log means no recorded events, not an error.
    pub fn read(&self, name: &str) -> Result<Vec<Event>> {
        let path = self.log_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| parse_line(&path, line))
            .collect()
    }
}

fn parse_line(path: &Path, line: &str) -> Result<Event> {
    let err = |reason: String| Error::Parse {
        file: path.display().to_string(),
        reason,
    };

    let mut fields = line.split_whitespace();
    let ts = fields.next().ok_or_else(|| err("missing timestamp".into()))?;
    let action = fields.next().ok_or_else(|| err("missing action".into()))?;
    let name = fields.next().ok_or_else(|| err("missing name".into()))?;
    let from = fields.next().ok_or_else(|| err("missing from-evr".into()))?;
    let arrow = fields.next().ok_or_else(|| err("missing arrow".into()))?;
    let to = fields.next().ok_or_else(|| err("missing to-evr".into()))?;

    if arrow != "->" {
        return Err(err(format!("expected '->', got '{}'", arrow)));
    }

    Ok(Event {
        timestamp: DateTime::parse_from_rfc3339(ts)
            .map_err(|e| err(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc),
        action: Action::from_str(action).ok_or_else(|| err(format!("bad action '{}'", action)))?,
        name: name.to_string(),
        from: if from == "-" { None } else { Some(Evr::parse(from)?) },
        to: Evr::parse(to)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());
        let old = Evr::parse("1.3").unwrap();
        let new = Evr::parse("1.3.1").unwrap();

        history.append("zlib", Action::Install, None, &old).unwrap();
        history.append("zlib", Action::Save, Some(&old), &old).unwrap();
        history.append("zlib", Action::Upgrade, Some(&old), &new).unwrap();

        let events = history.read("zlib").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].action, Action::Install);
        assert_eq!(events[0].from, None);
        assert_eq!(events[2].action, Action::Upgrade);
        assert_eq!(events[2].from, Some(old));
        assert_eq!(events[2].to, new);
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());
        assert!(history.read("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_log_line_format() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());
        let old = Evr::parse("1.3").unwrap();
        let new = Evr::parse("1.3.1").unwrap();
        history.append("zlib", Action::Upgrade, Some(&old), &new).unwrap();

        let raw = fs::read_to_string(dir.path().join("zlib.log")).unwrap();
        assert!(raw.contains("UPGRADE zlib 0:1.3-1 -> 0:1.3.1-1"));
    }

    #[test]
    fn test_logs_are_per_package() {
        let dir = TempDir::new().unwrap();
        let history = History::new(dir.path());
        let v = Evr::parse("1.0").unwrap();
        history.append("a", Action::Install, None, &v).unwrap();
        history.append("b", Action::Install, None, &v).unwrap();

        assert_eq!(history.read("a").unwrap().len(), 1);
        assert_eq!(history.read("b").unwrap().len(), 1);
    }
}
