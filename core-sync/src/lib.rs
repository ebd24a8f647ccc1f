//! # Sheets Sync Module
//!
//! Exports source tables to spreadsheet tabs.
//!
//! ## Overview
//!
//! Three entry points converge on one exporter:
//! - User actions call the triggered gate after state changes
//! - A background scheduler runs a full export on a fixed interval
//! - A change listener (push or poll) fires the triggered gate when rows change
//!
//! A single export permit inside [`ManualSyncService`] keeps their passes
//! from overlapping.
//!
//! ## Components
//!
//! - **Manual Sync** (`manual`): One full or per-user export pass, failures isolated per family
//! - **Triggered Sync** (`triggered`): Cooldown and in-flight admission control, fire-and-forget
//! - **Background Sync** (`background`): Periodic export with retry, pause and health statistics
//! - **Change Listener** (`listener`): Push and poll strategies behind one trait
//! - **Session Cleanup** (`cleanup`): Periodic deletion of empty, stale chat sessions
//! - **Request Priority** (`priority`): Pauses background sync while requests are in flight
//! - **Task Supervisor** (`supervisor`): Owns spawned tasks and contains their panics

pub mod background;
pub mod cleanup;
pub mod error;
pub mod family;
pub mod listener;
pub mod manual;
pub mod priority;
pub mod result;
pub mod retry;
pub mod supervisor;
pub mod triggered;

pub use background::{BackgroundSyncService, BackgroundSyncStatus, SyncHealth, SyncStatistics};
pub use cleanup::{CleanupReport, CleanupStatus, SessionCleanupService, SESSIONS_TABLE};
pub use error::{Result, SyncError};
pub use family::{spec_for, FamilySpec, FAMILY_SPECS};
pub use listener::{
    sync_callback, CallbackId, CallbackRegistry, ChangeAction, ChangeListener,
    ChangeNotification, ListenerStatus, PollChangeListener, PollTarget, PushChangeListener,
    SyncCallback,
};
pub use manual::{FullSync, ManualSyncService, METADATA_TAB};
pub use priority::{RequestGuard, RequestPriorityTracker, SyncPauseControl};
pub use result::{FamilyOutcome, SyncResult, SyncScope};
pub use retry::{retry_with_backoff, RetryOutcome, RetryPolicy};
pub use supervisor::{ScheduledLoop, TaskSupervisor};
pub use triggered::{SyncState, TriggeredSyncService, TriggeredSyncStatus};
