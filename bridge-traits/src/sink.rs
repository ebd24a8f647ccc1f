//! Spreadsheet Sink Abstraction
//!
//! Tab-scoped tabular destination. Every call is idempotent: `write_range`
//! overwrites from the top-left cell and `clear` empties the tab, so a full
//! export can always be replayed.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One spreadsheet row; cells are plain JSON scalars.
pub type SheetRow = Vec<Value>;

/// Spreadsheet destination trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::sink::SheetSink;
/// use serde_json::json;
///
/// async fn replace_tab(sink: &dyn SheetSink) -> Result<()> {
///     sink.clear("User Profiles").await?;
///     sink.write_range("User Profiles", &[vec![json!("id"), json!("email")]]).await
/// }
/// ```
#[async_trait]
pub trait SheetSink: Send + Sync {
    /// Overwrite `tab` starting at `A1` with `rows`.
    ///
    /// Cells beyond the written block are left untouched; call
    /// [`clear`](SheetSink::clear) first for a full replacement.
    async fn write_range(&self, tab: &str, rows: &[SheetRow]) -> Result<()>;

    /// Read an A1-style range (e.g. `A1:Z`, `A:C`) of `tab`.
    ///
    /// A tab that does not exist yet reads as empty.
    async fn read_range(&self, tab: &str, range: &str) -> Result<Vec<SheetRow>>;

    /// Remove every value from `tab`.
    async fn clear(&self, tab: &str) -> Result<()>;
}
