//! # Manual Sync
//!
//! One export pass from the row source to the sheet.
//!
//! ## Overview
//!
//! A full pass reads every enabled [`RecordFamily`] and replaces its tab
//! wholesale (clear, then write header and rows). A user pass rewrites only
//! the rows that belong to one user. Families are independent: a failure in
//! one is recorded in the [`SyncResult`] and the others still run.
//!
//! Every pass through one service takes the same permit, so triggered,
//! scheduled and listener-driven exports never write concurrently.
//!
//! ## Change detection
//!
//! Non-forced passes consult the `Sync Metadata` tab, which stores when each
//! family was last exported. A family whose source has no row newer than that
//! instant is skipped. Forced passes always write.

use crate::error::{Result, SyncError};
use crate::family::{spec_for, FamilySpec, FAMILY_SPECS};
use crate::result::{FamilyOutcome, SyncResult, SyncScope};
use crate::retry::with_timeout;
use async_trait::async_trait;
use bridge_traits::row_source::{Filter, Query, RowSource};
use bridge_traits::sink::{SheetRow, SheetSink};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::{RecordFamily, SyncConfig, SyncSettings};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Tab holding per-family export watermarks.
pub const METADATA_TAB: &str = "Sync Metadata";

const METADATA_HEADER: [&str; 3] = ["family", "last_synced_at", "row_count"];

/// A full export pass.
///
/// The seam between the gates (triggered, background) and the exporter.
#[async_trait]
pub trait FullSync: Send + Sync {
    async fn sync_all(&self, force: bool) -> SyncResult;
}

#[derive(Debug, Clone, PartialEq)]
struct Watermark {
    last_synced_at: DateTime<Utc>,
    row_count: u64,
}

/// Full and per-user export of the record families into the spreadsheet.
///
/// Passes are serialized: at most one export touches the sink at a time,
/// and a failing family never stops the others.
pub struct ManualSyncService {
    source: Arc<dyn RowSource>,
    sink: Arc<dyn SheetSink>,
    settings: Arc<SyncSettings>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    gate: Arc<Semaphore>,
}

impl ManualSyncService {
    /// Create the exporter.
    ///
    /// Each pass takes a fresh snapshot of `settings`, so family toggles and
    /// timeouts changed at runtime apply to the next pass.
    pub fn new(
        source: Arc<dyn RowSource>,
        sink: Arc<dyn SheetSink>,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            sink,
            settings,
            clock,
            events: None,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Refuse further passes. In-flight passes finish normally.
    pub fn close(&self) {
        self.gate.close();
    }

    /// True while a pass holds the export permit.
    pub fn is_exporting(&self) -> bool {
        self.gate.available_permits() == 0 && !self.gate.is_closed()
    }

    /// Export every enabled family.
    #[instrument(skip(self))]
    pub async fn sync_all(&self, force: bool) -> SyncResult {
        let run_id = Uuid::new_v4();
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.abort(run_id, SyncScope::All, SyncError::Closed),
        };

        let config = self.settings.snapshot();
        let started_at = self.clock.now();
        self.emit_started(run_id, &SyncScope::All, force);

        let watermarks = if force {
            HashMap::new()
        } else {
            self.read_watermarks(&config).await
        };

        let mut families = BTreeMap::new();
        for spec in FAMILY_SPECS
            .iter()
            .filter(|spec| config.is_family_enabled(spec.family))
        {
            if let Some(watermark) = watermarks.get(&spec.family) {
                if !self.has_changes(spec, watermark, &config).await {
                    debug!(family = %spec.family, "No changes since last export");
                    families.insert(
                        spec.family,
                        FamilyOutcome::Skipped {
                            reason: format!(
                                "unchanged since {}",
                                watermark.last_synced_at.to_rfc3339()
                            ),
                        },
                    );
                    continue;
                }
            }

            let outcome = match self.export_family(spec, &config).await {
                Ok(rows) => {
                    debug!(family = %spec.family, rows, "Family exported");
                    FamilyOutcome::Synced { rows }
                }
                Err(e) => {
                    error!(family = %spec.family, error = %e, "Family export failed");
                    FamilyOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            families.insert(spec.family, outcome);
        }

        if let Err(e) = self
            .write_watermarks(&config, started_at, &watermarks, &families)
            .await
        {
            warn!(error = %e, "Failed to update sync metadata");
        }

        let result = SyncResult::from_outcomes(
            run_id,
            SyncScope::All,
            families,
            started_at,
            self.clock.now(),
        );
        self.emit_completed(&result);
        result
    }

    /// Rewrite the rows of one user in every enabled family's tab.
    #[instrument(skip(self))]
    pub async fn sync_one_user(&self, user_id: &str) -> SyncResult {
        let run_id = Uuid::new_v4();
        let scope = SyncScope::User {
            user_id: user_id.to_string(),
        };
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.abort(run_id, scope, SyncError::Closed),
        };

        let config = self.settings.snapshot();
        let started_at = self.clock.now();
        self.emit_started(run_id, &scope, true);

        let mut families = BTreeMap::new();
        for family in RecordFamily::ALL
            .into_iter()
            .filter(|family| config.is_family_enabled(*family))
        {
            let spec = spec_for(family);
            let outcome = match self.export_user_rows(spec, user_id, &config).await {
                Ok(rows) => FamilyOutcome::Synced { rows },
                Err(e) => {
                    error!(family = %family, user_id, error = %e, "User export failed");
                    FamilyOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            families.insert(family, outcome);
        }

        let result =
            SyncResult::from_outcomes(run_id, scope, families, started_at, self.clock.now());
        self.emit_completed(&result);
        result
    }

    async fn export_family(&self, spec: &FamilySpec, config: &SyncConfig) -> Result<usize> {
        let query = Query::new().order_by(spec.updated_column, false);
        let rows = with_timeout(
            config.source_timeout,
            &format!("select {}", spec.table),
            SyncError::Source,
            self.source.select(spec.table, &query),
        )
        .await?;

        let sheet_rows = spec.to_sheet_rows(&rows);
        self.replace_tab(spec.tab, &sheet_rows, config).await?;
        Ok(rows.len())
    }

    async fn export_user_rows(
        &self,
        spec: &FamilySpec,
        user_id: &str,
        config: &SyncConfig,
    ) -> Result<usize> {
        let query = Query::new()
            .filter(Filter::eq(spec.user_column, user_id))
            .order_by(spec.updated_column, false);
        let fresh = with_timeout(
            config.source_timeout,
            &format!("select {}", spec.table),
            SyncError::Source,
            self.source.select(spec.table, &query),
        )
        .await?;

        let existing = with_timeout(
            config.sink_timeout,
            &format!("read {}", spec.tab),
            SyncError::Sink,
            self.sink.read_range(spec.tab, "A:ZZ"),
        )
        .await?;

        let merged = spec.merge_user_rows(existing, user_id, &fresh);
        self.replace_tab(spec.tab, &merged, config).await?;
        Ok(fresh.len())
    }

    async fn replace_tab(&self, tab: &str, rows: &[SheetRow], config: &SyncConfig) -> Result<()> {
        with_timeout(
            config.sink_timeout,
            &format!("clear {}", tab),
            SyncError::Sink,
            self.sink.clear(tab),
        )
        .await?;
        with_timeout(
            config.sink_timeout,
            &format!("write {}", tab),
            SyncError::Sink,
            self.sink.write_range(tab, rows),
        )
        .await
    }

    /// A failed probe counts as changed so the family is exported anyway.
    async fn has_changes(
        &self,
        spec: &FamilySpec,
        watermark: &Watermark,
        config: &SyncConfig,
    ) -> bool {
        let query = Query::new()
            .filter(Filter::after(spec.updated_column, watermark.last_synced_at))
            .limit(1);
        match with_timeout(
            config.source_timeout,
            &format!("probe {}", spec.table),
            SyncError::Source,
            self.source.select(spec.table, &query),
        )
        .await
        {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                warn!(family = %spec.family, error = %e, "Change probe failed, exporting");
                true
            }
        }
    }

    async fn read_watermarks(&self, config: &SyncConfig) -> HashMap<RecordFamily, Watermark> {
        let rows = match with_timeout(
            config.sink_timeout,
            "read sync metadata",
            SyncError::Sink,
            self.sink.read_range(METADATA_TAB, "A:C"),
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Sync metadata unavailable, exporting everything");
                return HashMap::new();
            }
        };

        rows.iter().skip(1).filter_map(parse_watermark).collect()
    }

    async fn write_watermarks(
        &self,
        config: &SyncConfig,
        started_at: DateTime<Utc>,
        previous: &HashMap<RecordFamily, Watermark>,
        outcomes: &BTreeMap<RecordFamily, FamilyOutcome>,
    ) -> Result<()> {
        let mut rows: Vec<SheetRow> = vec![METADATA_HEADER
            .iter()
            .map(|h| Value::String(h.to_string()))
            .collect()];

        for family in RecordFamily::ALL {
            let watermark = match outcomes.get(&family) {
                Some(FamilyOutcome::Synced { rows }) => Some(Watermark {
                    last_synced_at: started_at,
                    row_count: *rows as u64,
                }),
                _ => previous.get(&family).cloned(),
            };
            if let Some(watermark) = watermark {
                rows.push(vec![
                    Value::String(family.as_str().to_string()),
                    Value::String(watermark.last_synced_at.to_rfc3339()),
                    Value::from(watermark.row_count),
                ]);
            }
        }

        self.replace_tab(METADATA_TAB, &rows, config).await
    }

    fn abort(&self, run_id: Uuid, scope: SyncScope, error: SyncError) -> SyncResult {
        warn!(%run_id, %scope, error = %error, "Sync pass refused");
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Sync(SyncEvent::Failed {
                run_id: run_id.to_string(),
                message: error.to_string(),
            }));
        }
        SyncResult::aborted(run_id, scope, error.to_string(), self.clock.now())
    }

    fn emit_started(&self, run_id: Uuid, scope: &SyncScope, force: bool) {
        info!(%run_id, %scope, force, "Sync pass started");
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Sync(SyncEvent::Started {
                run_id: run_id.to_string(),
                scope: scope.to_string(),
                force,
            }));
        }
    }

    fn emit_completed(&self, result: &SyncResult) {
        let (synced, skipped, failed) = result.counts();
        let duration_ms = (result.finished_at - result.started_at)
            .num_milliseconds()
            .max(0) as u64;

        if result.success {
            info!(run_id = %result.run_id, synced, skipped, duration_ms, "Sync pass completed");
        } else {
            warn!(
                run_id = %result.run_id,
                synced,
                skipped,
                failed,
                message = %result.message,
                "Sync pass completed with failures"
            );
        }

        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Sync(SyncEvent::Completed {
                run_id: result.run_id.to_string(),
                scope: result.scope.to_string(),
                families_synced: synced,
                families_skipped: skipped,
                families_failed: failed,
                duration_ms,
            }));
        }
    }
}

#[async_trait]
impl FullSync for ManualSyncService {
    async fn sync_all(&self, force: bool) -> SyncResult {
        ManualSyncService::sync_all(self, force).await
    }
}

fn parse_watermark(row: &SheetRow) -> Option<(RecordFamily, Watermark)> {
    let family = row.first()?.as_str()?.parse().ok()?;
    let last_synced_at = DateTime::parse_from_rfc3339(row.get(1)?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    let row_count = match row.get(2) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    Some((
        family,
        Watermark {
            last_synced_at,
            row_count,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_watermark_accepts_text_counts() {
        let row = vec![
            json!("chat_logs"),
            json!("2024-05-01T10:00:00+00:00"),
            json!("12"),
        ];

        let (family, watermark) = parse_watermark(&row).unwrap();

        assert_eq!(family, RecordFamily::ChatLogs);
        assert_eq!(watermark.row_count, 12);
        assert_eq!(watermark.last_synced_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_watermark_rejects_unknown_family() {
        let row = vec![json!("invoices"), json!("2024-05-01T10:00:00+00:00")];
        assert!(parse_watermark(&row).is_none());
    }
}
