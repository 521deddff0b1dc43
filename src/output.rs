use crate::chat::{ChatAnswer, Record};
use crate::error::Result;
use crate::util::truncate_chars;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

pub const MAX_ANSWER_ROWS: usize = 50;
pub const MAX_ANSWER_CHARS: usize = 5000;

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_csv_to(file, rows)
}

pub fn write_csv_to<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn markdown_table<T>(rows: &[T], max_rows: usize) -> String
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        return "(no rows)".to_string();
    }
    Table::new(slice).with(Style::markdown()).to_string()
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}\n", markdown_table(rows, max_rows));
}

fn cell(v: Option<&serde_json::Value>) -> String {
    match v {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Free-form records as a markdown table. Columns follow first appearance.
pub fn records_table(records: &[Record], max_rows: usize) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for r in records.iter().take(max_rows) {
        for k in r.keys() {
            if !columns.contains(&k.as_str()) {
                columns.push(k.as_str());
            }
        }
    }
    if columns.is_empty() {
        return "(no rows)".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.to_string()));
    for r in records.iter().take(max_rows) {
        builder.push_record(columns.iter().map(|c| cell(r.get(*c))));
    }
    builder.build().with(Style::markdown()).to_string()
}

/// How an answer is shown in the dashboard: at most 50 rows, or text cut
/// at 5000 characters.
pub fn render_answer(answer: &ChatAnswer) -> String {
    match answer {
        ChatAnswer::Records(rows) => records_table(rows, MAX_ANSWER_ROWS),
        ChatAnswer::Text(text) => truncate_chars(text, MAX_ANSWER_CHARS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForecastExportRow;
    use chrono::NaiveDate;
    use serde_json::json;

    fn record(v: serde_json::Value) -> Record {
        match v {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn forecast_export_has_date_and_predicted_value() {
        let rows = vec![ForecastExportRow {
            date: NaiveDate::from_ymd_opt(2021, 7, 1).unwrap(),
            predicted_value: 12.5,
        }];
        let mut buf = Vec::new();
        write_csv_to(&mut buf, &rows).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "date,predicted_value\n2021-07-01,12.5\n"
        );
    }

    #[test]
    fn records_render_with_union_of_columns() {
        let rows = vec![
            record(json!({"location": "Chile", "cases": 3})),
            record(json!({"location": "Peru", "deaths": null})),
        ];
        let table = records_table(&rows, 50);
        let header = table.lines().next().unwrap();
        assert!(header.contains("location") && header.contains("cases") && header.contains("deaths"));
        assert!(table.contains("Chile"));
        assert_eq!(table.lines().count(), 4);
    }

    #[test]
    fn answers_are_capped() {
        let many: Vec<Record> = (0..80).map(|i| record(json!({"i": i}))).collect();
        let rendered = render_answer(&ChatAnswer::Records(many));
        // Header, separator and fifty rows.
        assert_eq!(rendered.lines().count(), 52);

        let long = "x".repeat(6000);
        assert_eq!(render_answer(&ChatAnswer::Text(long)).len(), MAX_ANSWER_CHARS);
        assert_eq!(records_table(&[], 50), "(no rows)");
    }
}
