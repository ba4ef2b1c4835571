//! Rendering of result tables for output.
//!
//! Three formats: a UTF-8 text table for terminals, RFC 4180 CSV and JSON.

use crate::db::{ResultTable, Value};
use crate::error::{CopilotError, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};

/// Output format for a result table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Boxed text table with a row-count footer.
    #[default]
    Table,
    /// Comma-separated values with a header row.
    Csv,
    /// Pretty-printed JSON object.
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid output format: {s}. Expected: table, csv, or json"
            )),
        }
    }
}

/// Renders `table` in the requested format.
pub fn render(table: &ResultTable, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Table => Ok(render_table(table)),
        ReportFormat::Csv => Ok(render_csv(table)),
        ReportFormat::Json => render_json(table),
    }
}

fn render_table(result: &ResultTable) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(result.columns().iter().map(Cell::new));

    for row in result.rows() {
        table.add_row(row.iter().map(Value::to_display_string));
    }

    let noun = if result.row_count() == 1 { "row" } else { "rows" };
    format!(
        "{table}\n({} {noun}, {} ms)\n",
        result.row_count(),
        result.execution_time().as_millis()
    )
}

fn render_csv(table: &ResultTable) -> String {
    let mut output = String::new();

    let header: Vec<String> = table.columns().iter().map(|c| csv_field(c)).collect();
    output.push_str(&header.join(","));
    output.push_str("\r\n");

    for row in table.rows() {
        let fields: Vec<String> = row
            .iter()
            .map(|value| match value {
                Value::Null => String::new(),
                other => csv_field(&other.to_display_string()),
            })
            .collect();
        output.push_str(&fields.join(","));
        output.push_str("\r\n");
    }

    output
}

/// Quotes a field if it contains a delimiter, quote or line break.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn render_json(table: &ResultTable) -> Result<String> {
    serde_json::to_string_pretty(table)
        .map(|mut json| {
            json.push('\n');
            json
        })
        .map_err(|e| CopilotError::report(format!("Could not serialize results to JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ResultTable {
        ResultTable::new(
            vec!["district".to_string(), "note".to_string(), "cases".to_string()],
            vec![
                vec![Value::from("Guntur"), Value::from("said \"hi\", left"), Value::Int(12)],
                vec![Value::from("Krishna"), Value::Null, Value::Int(3)],
            ],
        )
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("TABLE".parse::<ReportFormat>(), Ok(ReportFormat::Table));
        assert_eq!("csv".parse::<ReportFormat>(), Ok(ReportFormat::Csv));
        assert_eq!("Json".parse::<ReportFormat>(), Ok(ReportFormat::Json));
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_csv_escaping_and_nulls() {
        let csv = render(&sample(), ReportFormat::Csv).unwrap();
        assert_eq!(
            csv,
            "district,note,cases\r\nGuntur,\"said \"\"hi\"\", left\",12\r\nKrishna,,3\r\n"
        );
    }

    #[test]
    fn test_csv_empty_table_keeps_header() {
        let table = ResultTable::new(vec!["id".to_string()], vec![]);
        assert_eq!(render(&table, ReportFormat::Csv).unwrap(), "id\r\n");
    }

    #[test]
    fn test_json_preserves_column_order() {
        let json = render(&sample(), ReportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["columns"], serde_json::json!(["district", "note", "cases"]));
        assert_eq!(parsed["row_count"], 2);
        assert_eq!(parsed["rows"][1]["note"], serde_json::Value::Null);

        let first_row = json.find("\"district\": \"Guntur\"").unwrap();
        let first_cases = json.find("\"cases\": 12").unwrap();
        assert!(first_row < first_cases);
    }

    #[test]
    fn test_text_table_contains_values_and_footer() {
        let text = render(&sample(), ReportFormat::Table).unwrap();
        assert!(text.contains("district"));
        assert!(text.contains("Guntur"));
        assert!(text.contains("NULL"));
        assert!(text.contains("(2 rows, 0 ms)"));
    }

    #[test]
    fn test_text_table_empty_result() {
        let table = ResultTable::new(vec!["id".to_string()], vec![]);
        let text = render(&table, ReportFormat::Table).unwrap();
        assert!(text.contains("id"));
        assert!(text.ends_with("(0 rows, 0 ms)\n"));
    }
}
