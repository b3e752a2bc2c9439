use crate::error::CliError;
use model::job::report::{JobItemStatusRow, TableCheckResult};
use serde::Serialize;

pub fn render_status(rows: &[JobItemStatusRow]) -> String {
    let mut out = format!(
        "{:<6} {:<16} {:<26} {:<7} {:<10} {:<13} {}\n",
        "ITEM", "DATA_SOURCE", "STATUS", "ACTIVE", "INVENTORY", "IDLE_SECONDS", "ERROR"
    );
    for row in rows {
        let idle = row
            .incremental_idle_seconds
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        out.push_str(&format!(
            "{:<6} {:<16} {:<26} {:<7} {:<10} {:<13} {}\n",
            row.item,
            row.data_source,
            row.status.to_string(),
            row.active,
            format!("{}%", row.inventory_finished_percentage),
            idle,
            row.error_message.as_deref().unwrap_or("")
        ));
    }
    out
}

pub fn render_check(results: &[TableCheckResult]) -> String {
    let mut out = format!(
        "{:<24} {:<13} {:<13} {:<14} {}\n",
        "TABLE", "SOURCE_COUNT", "TARGET_COUNT", "COUNT_MATCHED", "CONTENT_MATCHED"
    );
    for result in results {
        out.push_str(&format!(
            "{:<24} {:<13} {:<13} {:<14} {}\n",
            result.table_name,
            result.source_records_count,
            result.target_records_count,
            result.records_count_matched,
            result.records_content_matched
        ));
    }
    out
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::job::status::JobStatus;

    #[test]
    fn status_table_has_one_line_per_item() {
        let rows = vec![
            JobItemStatusRow {
                item: 0,
                data_source: "ds_0".into(),
                status: JobStatus::ExecuteIncrementalTask,
                active: true,
                inventory_finished_percentage: 100,
                incremental_idle_seconds: Some(3),
                error_message: None,
            },
            JobItemStatusRow {
                item: 1,
                data_source: "ds_1".into(),
                status: JobStatus::Error,
                active: false,
                inventory_finished_percentage: 50,
                incremental_idle_seconds: None,
                error_message: Some("boom".into()),
            },
        ];

        let table = render_status(&rows);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ITEM"));
        assert!(lines[1].contains("EXECUTE_INCREMENTAL_TASK"));
        assert!(lines[1].contains("100%"));
        assert!(lines[2].contains("ERROR"));
        assert!(lines[2].trim_end().ends_with("boom"));
        assert!(lines[2].contains(" - "));
    }

    #[test]
    fn check_table_shows_both_verdicts() {
        let table = render_check(&[TableCheckResult {
            table_name: "t_order".into(),
            source_records_count: 10,
            target_records_count: 9,
            records_count_matched: false,
            records_content_matched: false,
        }]);
        let row = table.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(fields, vec!["t_order", "10", "9", "false", "false"]);
    }
}
