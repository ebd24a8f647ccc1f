//! Record families and their sheet layout
//!
//! Each [`RecordFamily`] maps to one source table and one sheet tab. The
//! column list fixes the sheet's column order; values missing from a row are
//! written as empty cells.

use bridge_traits::row_source::Row;
use bridge_traits::sink::SheetRow;
use core_runtime::config::RecordFamily;
use serde_json::Value;

/// Source table and sheet layout for one record family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilySpec {
    pub family: RecordFamily,
    /// Source table
    pub table: &'static str,
    /// Destination tab
    pub tab: &'static str,
    /// Exported columns, in sheet order
    pub columns: &'static [&'static str],
    /// Column identifying the owning user
    pub user_column: &'static str,
    /// Column used for ordering and change detection
    pub updated_column: &'static str,
}

pub const FAMILY_SPECS: [FamilySpec; 5] = [
    FamilySpec {
        family: RecordFamily::UserProfiles,
        table: "user_profiles",
        tab: "User Profiles",
        columns: &[
            "id",
            "email",
            "full_name",
            "age",
            "income_range",
            "financial_goals",
            "risk_tolerance",
            "created_at",
            "updated_at",
        ],
        user_column: "id",
        updated_column: "updated_at",
    },
    FamilySpec {
        family: RecordFamily::QuizResponses,
        table: "quiz_responses",
        tab: "Quiz Responses",
        columns: &[
            "id",
            "user_id",
            "quiz_id",
            "course_id",
            "selected_answer",
            "correct_answer",
            "is_correct",
            "score",
            "created_at",
        ],
        user_column: "user_id",
        updated_column: "created_at",
    },
    FamilySpec {
        family: RecordFamily::EngagementLogs,
        table: "user_engagement",
        tab: "Engagement Logs",
        columns: &[
            "id",
            "user_id",
            "event_type",
            "page",
            "duration_seconds",
            "metadata",
            "created_at",
        ],
        user_column: "user_id",
        updated_column: "created_at",
    },
    FamilySpec {
        family: RecordFamily::ChatLogs,
        table: "chat_logs",
        tab: "Chat Logs",
        columns: &["id", "user_id", "session_id", "role", "message", "created_at"],
        user_column: "user_id",
        updated_column: "created_at",
    },
    FamilySpec {
        family: RecordFamily::CourseProgress,
        table: "course_progress",
        tab: "Course Progress",
        columns: &[
            "id",
            "user_id",
            "course_id",
            "module_id",
            "completion_percentage",
            "status",
            "updated_at",
        ],
        user_column: "user_id",
        updated_column: "updated_at",
    },
];

pub fn spec_for(family: RecordFamily) -> &'static FamilySpec {
    match family {
        RecordFamily::UserProfiles => &FAMILY_SPECS[0],
        RecordFamily::QuizResponses => &FAMILY_SPECS[1],
        RecordFamily::EngagementLogs => &FAMILY_SPECS[2],
        RecordFamily::ChatLogs => &FAMILY_SPECS[3],
        RecordFamily::CourseProgress => &FAMILY_SPECS[4],
    }
}

impl FamilySpec {
    pub fn header(&self) -> SheetRow {
        self.columns
            .iter()
            .map(|c| Value::String(c.to_string()))
            .collect()
    }

    pub fn to_sheet_row(&self, row: &Row) -> SheetRow {
        self.columns
            .iter()
            .map(|column| cell_value(row.get(*column)))
            .collect()
    }

    /// Header followed by one sheet row per source row.
    pub fn to_sheet_rows(&self, rows: &[Row]) -> Vec<SheetRow> {
        std::iter::once(self.header())
            .chain(rows.iter().map(|row| self.to_sheet_row(row)))
            .collect()
    }

    /// Rebuild a tab so that it holds `fresh` as the only rows for `user_id`.
    ///
    /// Rows of other users keep their position. The existing header is kept
    /// when present, with any missing family columns appended, and fresh rows
    /// are laid out under it; hand-added columns are left blank.
    pub fn merge_user_rows(
        &self,
        existing: Vec<SheetRow>,
        user_id: &str,
        fresh: &[Row],
    ) -> Vec<SheetRow> {
        let mut existing = existing.into_iter();
        let mut header = existing
            .next()
            .filter(|header| !header.is_empty())
            .unwrap_or_else(|| self.header());
        for column in self.columns {
            if !header.iter().any(|cell| cell.as_str() == Some(*column)) {
                header.push(Value::String(column.to_string()));
            }
        }
        let user_index = header
            .iter()
            .position(|cell| cell.as_str() == Some(self.user_column));

        let rows: Vec<SheetRow> = existing
            .filter(|row| match user_index {
                Some(index) => !cell_matches(row.get(index), user_id),
                None => true,
            })
            .chain(fresh.iter().map(|row| self.to_sheet_row_under(&header, row)))
            .collect();

        std::iter::once(header).chain(rows).collect()
    }

    fn to_sheet_row_under(&self, header: &[Value], row: &Row) -> SheetRow {
        header
            .iter()
            .map(|cell| match cell.as_str() {
                Some(name) if self.columns.contains(&name) => cell_value(row.get(name)),
                _ => Value::String(String::new()),
            })
            .collect()
    }
}

/// Sheets cells hold scalars; nested values are written as JSON text.
fn cell_value(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::String(String::new()),
        Some(nested @ (Value::Array(_) | Value::Object(_))) => Value::String(nested.to_string()),
        Some(scalar) => scalar.clone(),
    }
}

fn cell_matches(cell: Option<&Value>, id: &str) -> bool {
    match cell {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}
