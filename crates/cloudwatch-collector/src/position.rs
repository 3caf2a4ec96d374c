// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! File-backed checkpoints for resuming log groups across restarts.
//!
//! The position file is a YAML sequence with one entry per log group:
//!
//! ```yaml
//! - latest_time: 1681389974
//!   next_token: some-token-123
//!   path: /aws/lambda/my-function
//! ```
//!
//! Every mutation rewrites the whole file. The store does no locking of its
//! own: workers sharing a store must serialize [`PositionStore::upsert`]
//! calls behind a single mutex.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::source::LogGroup;

/// Persisted cursor of a single log group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub latest_time: i64,
    #[serde(default)]
    pub next_token: String,
    pub path: String,
}

impl From<&LogGroup> for Position {
    fn from(log_group: &LogGroup) -> Self {
        Position {
            latest_time: log_group.latest_time,
            next_token: log_group.next_token.clone(),
            path: log_group.path().to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("position file error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed position file: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PositionStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every persisted position.
    ///
    /// Returns `Ok(None)` when the file does not exist, which is the normal
    /// cold-start case. A file that exists but cannot be read or parsed is an
    /// error.
    pub fn load(&self) -> Result<Option<Vec<Position>>, PositionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        let positions: Option<Vec<Position>> = serde_yaml::from_str(&content)?;
        Ok(Some(positions.unwrap_or_default()))
    }

    /// Drops positions of log groups that are no longer configured.
    ///
    /// The file is rewritten only when something was dropped. Returns whether
    /// a rewrite happened.
    pub fn reconcile(&self, log_groups: &[LogGroup]) -> Result<bool, PositionError> {
        let Some(mut positions) = self.load()? else {
            debug!("No position file at {}, nothing to reconcile", self.path.display());
            return Ok(false);
        };

        let configured: HashSet<&str> = log_groups.iter().map(LogGroup::path).collect();
        let before = positions.len();
        positions.retain(|position| configured.contains(position.path.as_str()));
        if positions.len() == before {
            return Ok(false);
        }

        info!(
            "Removing {} log group(s) that are no longer configured from the position file",
            before - positions.len()
        );
        self.write(&positions)?;
        Ok(true)
    }

    /// Stores the current cursor of `log_group`, replacing its previous entry
    /// or appending a new one.
    pub fn upsert(&self, log_group: &LogGroup) -> Result<(), PositionError> {
        let mut positions = match self.load()? {
            Some(positions) => positions,
            None => {
                info!("Creating position file at {}", self.path.display());
                Vec::new()
            }
        };

        match positions
            .iter_mut()
            .find(|position| position.path == log_group.path())
        {
            Some(existing) => {
                debug!("Updating position of {}", log_group.path());
                existing.next_token.clone_from(&log_group.next_token);
                existing.latest_time = log_group.latest_time;
            }
            None => positions.push(Position::from(log_group)),
        }

        self.write(&positions)
    }

    /// Deletes the position file so every log group starts fresh.
    ///
    /// Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool, PositionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Deleted position file {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, positions: &[Position]) -> Result<(), PositionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(positions)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Restores the persisted cursor of `log_group`, if there is one.
///
/// Returns whether a matching position was found.
pub fn apply_position(positions: &[Position], log_group: &mut LogGroup) -> bool {
    match positions
        .iter()
        .find(|position| position.path == log_group.path())
    {
        Some(position) => {
            debug!(
                "Log group {} exists in position file, resuming from {}",
                log_group.path(),
                position.latest_time
            );
            log_group.latest_time = position.latest_time;
            log_group.next_token.clone_from(&position.next_token);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn store_in(dir: &TempDir) -> PositionStore {
        PositionStore::new(dir.path().join("position.yaml"))
    }

    fn position(path: &str, token: &str) -> Position {
        Position {
            latest_time: 1681389974,
            next_token: token.to_string(),
            path: path.to_string(),
        }
    }

    fn seed(store: &PositionStore, positions: &[Position]) {
        fs::write(
            store.path(),
            serde_yaml::to_string(positions).expect("failed to serialize"),
        )
        .expect("failed to seed position file");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        assert_eq!(store.load().expect("load failed"), None);
    }

    #[test]
    fn test_load_empty_file_is_empty_list() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        fs::write(store.path(), "").expect("failed to write");
        assert_eq!(store.load().expect("load failed"), Some(vec![]));
    }

    #[test]
    fn test_load_existing_file() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        fs::write(
            store.path(),
            "- latest_time: 1681389974\n  next_token: some-token-123\n  path: /a/log/group\n\
             - latest_time: 1681389980\n  next_token: another-token-456\n  path: some-other-log-group\n",
        )
        .expect("failed to write");

        let positions = store.load().expect("load failed").expect("missing positions");
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0], position("/a/log/group", "some-token-123"));
        assert_eq!(positions[1].latest_time, 1681389980);
        assert_eq!(positions[1].next_token, "another-token-456");
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        fs::write(store.path(), "path: [unterminated").expect("failed to write");
        assert!(matches!(
            store.load(),
            Err(PositionError::Serialization(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_upsert_creates_file() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        let mut log_group = LogGroup::new("my_path", None, 1681389974, 10);
        log_group.next_token = "a-next-token".to_string();

        store.upsert(&log_group).expect("upsert failed");

        assert!(logs_contain("Creating position file"));
        let positions = store.load().expect("load failed").expect("missing positions");
        assert_eq!(positions, vec![Position::from(&log_group)]);
    }

    #[test]
    fn test_upsert_creates_parent_directory() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = PositionStore::new(dir.path().join("shared").join("position.yaml"));
        let log_group = LogGroup::new("my_path", None, 1681389974, 10);

        store.upsert(&log_group).expect("upsert failed");
        assert_eq!(store.load().expect("load failed").map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_upsert_updates_existing_and_appends_new() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        seed(
            &store,
            &[
                position("/a/log/group", "some-token-123"),
                position("some-other-log-group", "another-token-456"),
            ],
        );

        let mut updated = LogGroup::new("/a/log/group", None, 1681389974, 30);
        updated.next_token = "new_next_token".to_string();
        store.upsert(&updated).expect("upsert failed");

        let positions = store.load().expect("load failed").expect("missing positions");
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0], Position::from(&updated));
        assert_eq!(positions[1], position("some-other-log-group", "another-token-456"));

        let mut brand_new = LogGroup::new("brand-new-path", None, 1681389982, 30);
        brand_new.next_token = "this-is-new-too".to_string();
        store.upsert(&brand_new).expect("upsert failed");

        let positions = store.load().expect("load failed").expect("missing positions");
        assert_eq!(positions.len(), 3);
        assert_eq!(positions[2], Position::from(&brand_new));
    }

    #[test]
    fn test_upsert_same_log_group_twice_keeps_one_entry() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        let mut log_group = LogGroup::new("my_path", None, 1681389974, 10);
        store.upsert(&log_group).expect("upsert failed");

        log_group.latest_time = 1681390000;
        log_group.next_token = "latest".to_string();
        store.upsert(&log_group).expect("upsert failed");

        let positions = store.load().expect("load failed").expect("missing positions");
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].latest_time, 1681390000);
        assert_eq!(positions[0].next_token, "latest");
    }

    #[test]
    fn test_upsert_does_not_overwrite_malformed_file() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        fs::write(store.path(), "{not: a list").expect("failed to write");
        let log_group = LogGroup::new("my_path", None, 1681389974, 10);

        assert!(store.upsert(&log_group).is_err());
        assert_eq!(
            fs::read_to_string(store.path()).expect("failed to read"),
            "{not: a list"
        );
    }

    #[test]
    fn test_reconcile_drops_unconfigured_log_groups() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        seed(
            &store,
            &[
                position("first/log/group", "some-token-123"),
                position("second/log/group", "another-token-456"),
                position("third/log/group", "third-token-789"),
            ],
        );
        let log_groups = vec![
            LogGroup::new("first/log/group", None, 1681389974, 30),
            LogGroup::new("second/log/group", None, 1681389974, 30),
        ];

        assert!(store.reconcile(&log_groups).expect("reconcile failed"));

        let positions = store.load().expect("load failed").expect("missing positions");
        assert_eq!(
            positions,
            vec![
                position("first/log/group", "some-token-123"),
                position("second/log/group", "another-token-456"),
            ]
        );
    }

    #[test]
    fn test_reconcile_without_changes_does_not_rewrite() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        // hand-written layout that a rewrite would normalize
        let original = "- path: first/log/group\n  next_token: t1\n  latest_time: 1681389974\n";
        fs::write(store.path(), original).expect("failed to write");
        let log_groups = vec![LogGroup::new("first/log/group", None, 1681389974, 30)];

        assert!(!store.reconcile(&log_groups).expect("reconcile failed"));
        assert_eq!(
            fs::read_to_string(store.path()).expect("failed to read"),
            original
        );
    }

    #[test]
    fn test_reconcile_never_adds_entries() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        let log_groups = vec![LogGroup::new("first/log/group", None, 1681389974, 30)];

        assert!(!store.reconcile(&log_groups).expect("reconcile failed"));
        assert_eq!(store.load().expect("load failed"), None);
    }

    #[test]
    fn test_reset_removes_file() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let store = store_in(&dir);
        seed(&store, &[position("first/log/group", "t")]);

        assert!(store.reset().expect("reset failed"));
        assert!(!store.path().exists());
        assert!(!store.reset().expect("reset failed"));
    }

    #[test]
    fn test_apply_position() {
        let positions = vec![position("first/log/group", "persisted-token")];

        let mut known = LogGroup::new("first/log/group", None, 1681399974, 5);
        assert!(apply_position(&positions, &mut known));
        assert_eq!(known.latest_time, 1681389974);
        assert_eq!(known.next_token, "persisted-token");

        let mut unknown = LogGroup::new("other/log/group", None, 1681399974, 5);
        assert!(!apply_position(&positions, &mut unknown));
        assert_eq!(unknown.latest_time, 1681399674);
        assert_eq!(unknown.next_token, "");
    }
}
