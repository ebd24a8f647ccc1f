//! Outcome of one export pass

use chrono::{DateTime, Utc};
use core_runtime::config::RecordFamily;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What a pass exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncScope {
    All,
    User { user_id: String },
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncScope::All => f.write_str("all"),
            SyncScope::User { user_id } => write!(f, "user:{}", user_id),
        }
    }
}

/// Per-family result of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FamilyOutcome {
    Synced { rows: usize },
    /// Not written because nothing changed since the last pass
    Skipped { reason: String },
    Failed { error: String },
}

impl FamilyOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, FamilyOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub run_id: Uuid,
    pub scope: SyncScope,
    pub families: BTreeMap<RecordFamily, FamilyOutcome>,
    /// True only when no attempted family failed
    pub success: bool,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    /// Fold per-family outcomes into a result.
    pub fn from_outcomes(
        run_id: Uuid,
        scope: SyncScope,
        families: BTreeMap<RecordFamily, FamilyOutcome>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let success = families.values().all(FamilyOutcome::is_success);
        let (synced, skipped, failed) = count_outcomes(&families);
        let message = if success {
            format!(
                "Synced {} families ({} skipped as unchanged)",
                synced, skipped
            )
        } else {
            let failed_names: Vec<&str> = families
                .iter()
                .filter(|(_, outcome)| !outcome.is_success())
                .map(|(family, _)| family.as_str())
                .collect();
            format!(
                "{} of {} families failed: {}",
                failed,
                families.len(),
                failed_names.join(", ")
            )
        };

        Self {
            run_id,
            scope,
            families,
            success,
            message,
            started_at,
            finished_at,
        }
    }

    /// A pass that could not run at all.
    pub fn aborted(
        run_id: Uuid,
        scope: SyncScope,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            scope,
            families: BTreeMap::new(),
            success: false,
            message: message.into(),
            started_at: at,
            finished_at: at,
        }
    }

    /// `(synced, skipped, failed)` family counts.
    pub fn counts(&self) -> (u32, u32, u32) {
        count_outcomes(&self.families)
    }

    pub fn outcome(&self, family: RecordFamily) -> Option<&FamilyOutcome> {
        self.families.get(&family)
    }
}

fn count_outcomes(families: &BTreeMap<RecordFamily, FamilyOutcome>) -> (u32, u32, u32) {
    families
        .values()
        .fold((0, 0, 0), |(synced, skipped, failed), outcome| match outcome {
            FamilyOutcome::Synced { .. } => (synced + 1, skipped, failed),
            FamilyOutcome::Skipped { .. } => (synced, skipped + 1, failed),
            FamilyOutcome::Failed { .. } => (synced, skipped, failed + 1),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_is_not_success() {
        let now = Utc::now();
        let families = BTreeMap::from([
            (RecordFamily::UserProfiles, FamilyOutcome::Synced { rows: 4 }),
            (
                RecordFamily::ChatLogs,
                FamilyOutcome::Failed {
                    error: "Sink error: HTTP 400".to_string(),
                },
            ),
            (
                RecordFamily::QuizResponses,
                FamilyOutcome::Skipped {
                    reason: "unchanged".to_string(),
                },
            ),
        ]);

        let result = SyncResult::from_outcomes(Uuid::new_v4(), SyncScope::All, families, now, now);

        assert!(!result.success);
        assert_eq!(result.counts(), (1, 1, 1));
        assert_eq!(result.message, "1 of 3 families failed: chat_logs");
    }

    #[test]
    fn test_serializes_family_keys_and_tags() {
        let now = Utc::now();
        let families = BTreeMap::from([(
            RecordFamily::CourseProgress,
            FamilyOutcome::Synced { rows: 2 },
        )]);
        let result = SyncResult::from_outcomes(
            Uuid::new_v4(),
            SyncScope::User {
                user_id: "u1".to_string(),
            },
            families,
            now,
            now,
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["families"]["course_progress"]["status"], "synced");
        assert_eq!(json["families"]["course_progress"]["rows"], 2);
        assert_eq!(json["scope"]["kind"], "user");
        assert_eq!(result.scope.to_string(), "user:u1");
    }
}
