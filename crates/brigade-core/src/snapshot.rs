//! Engine snapshots.
//!
//! A snapshot is the engine's in-memory state written to disk as JSON so
//! a restarted process resumes without waiting on persistence. On load it
//! is validated with [`validator`]; a snapshot that fails validation is
//! discarded and the engine performs a full reset from the
//! [`PersistenceAdapter`](crate::collaborators::PersistenceAdapter).

use std::collections::BTreeSet;
use std::path::Path;

use brigade_types::{ReviewStatus, ReviewTransition, TaskInstance};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

/// Errors loading or saving a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Reading or writing the file failed.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a snapshot.
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot parsed but is internally inconsistent.
    #[error("snapshot failed validation: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Serialized engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_consistency"))]
pub struct EngineSnapshot {
    /// When the snapshot was taken (business time).
    pub taken_at: NaiveDateTime,

    /// Active clock offset in seconds (at most one week).
    #[validate(range(min = 0, max = 604_800))]
    pub clock_offset_secs: Option<i64>,

    /// Every task instance.
    pub instances: Vec<TaskInstance>,

    /// The transition log.
    pub transitions: Vec<ReviewTransition>,
}

fn validate_consistency(snapshot: &EngineSnapshot) -> Result<(), ValidationError> {
    let mut keys = BTreeSet::new();
    for instance in &snapshot.instances {
        if !keys.insert(&instance.key) {
            return Err(ValidationError::new("duplicate_instance_key"));
        }
        match instance.review_status {
            Some(ReviewStatus::NotSubmitted) if instance.submission_count != 0 => {
                return Err(ValidationError::new("submitted_count_without_submission"));
            }
            Some(ReviewStatus::InReview | ReviewStatus::Approved | ReviewStatus::Rejected)
                if instance.submission_count == 0 =>
            {
                return Err(ValidationError::new("review_without_submission"));
            }
            Some(ReviewStatus::Rejected) if instance.rejection_reason.is_none() => {
                return Err(ValidationError::new("rejection_without_reason"));
            }
            None if instance.submission_count != 0 => {
                return Err(ValidationError::new("submission_on_unreviewed_task"));
            }
            _ => {}
        }
    }

    let mut ids = BTreeSet::new();
    if !snapshot.transitions.iter().all(|t| ids.insert(t.id)) {
        return Err(ValidationError::new("duplicate_transition_id"));
    }
    Ok(())
}

impl EngineSnapshot {
    /// Write the snapshot to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] or [`SnapshotError::Json`].
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Parse and validate a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] or [`SnapshotError::Invalid`].
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Read, parse, and validate a snapshot file.
    ///
    /// # Errors
    ///
    /// Any [`SnapshotError`].
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
