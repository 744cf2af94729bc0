//! CSV loading for reference and replay datasets.

use dm_common::{parse_datetime, Error, Record, Result, Value};
use dm_config::DataFormat;
use std::io::Read;
use std::path::Path;

/// Read a CSV file into records.
///
/// Without a header row, columns are named `0`, `1`, ... Errors name the
/// file and the 1-based data row.
pub fn load_csv(path: &Path, format: &DataFormat, date_column: Option<&str>) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::ReferenceLoad(format!("{}: {}", path.display(), e)))?;
    read_csv(file, format, date_column)
        .map_err(|e| Error::ReferenceLoad(format!("{}: {}", path.display(), e)))
}

/// Parse CSV from any reader.
pub fn read_csv<R: Read>(
    reader: R,
    format: &DataFormat,
    date_column: Option<&str>,
) -> Result<Vec<Record>> {
    let delimiter = format.separator_byte().ok_or_else(|| {
        Error::Config(format!("separator {:?} is not a single byte", format.separator))
    })?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(format.header)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut headers: Option<Vec<String>> = if format.header {
        Some(csv_reader.headers()?.iter().map(str::to_string).collect())
    } else {
        None
    };

    let mut rows = Vec::new();
    for (index, result) in csv_reader.records().enumerate() {
        let record = result?;
        let names = headers.get_or_insert_with(|| (0..record.len()).map(|i| i.to_string()).collect());
        if names.len() != record.len() {
            return Err(Error::ReferenceLoad(format!(
                "row {} has {} fields, expected {}",
                index + 1,
                record.len(),
                names.len()
            )));
        }

        let mut row = Record::new();
        for (name, cell) in names.iter().zip(record.iter()) {
            let value = if date_column == Some(name.as_str()) {
                parse_date_cell(cell).ok_or_else(|| {
                    Error::ReferenceLoad(format!(
                        "row {} column {}: {:?} is not a timestamp",
                        index + 1,
                        name,
                        cell
                    ))
                })?
            } else {
                parse_cell(cell)
            };
            row.insert(name.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Infer a scalar from CSV text.
pub fn parse_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return Value::Number(n);
    }
    match trimmed {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::Text(cell.to_string()),
    }
}

fn parse_date_cell(cell: &str) -> Option<Value> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Some(Value::Null);
    }
    parse_datetime(trimmed).map(Value::Datetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(separator: &str, header: bool) -> DataFormat {
        DataFormat {
            separator: separator.to_string(),
            header,
            date_column: None,
        }
    }

    #[test]
    fn reads_typed_cells() {
        let data = "date_,x,cat,flag\n2024-01-02 03:04:05,1.5,a,true\n2024-01-03,,b,false\n";
        let rows = read_csv(data.as_bytes(), &fmt(",", true), Some("date_")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("x"), Some(&Value::Number(1.5)));
        assert_eq!(rows[0].get("cat"), Some(&Value::Text("a".into())));
        assert_eq!(rows[0].get("flag"), Some(&Value::Bool(true)));
        assert!(matches!(rows[0].get("date_"), Some(Value::Datetime(_))));
        assert_eq!(rows[1].get("x"), Some(&Value::Null));
    }

    #[test]
    fn headerless_columns_are_numbered() {
        let rows = read_csv("1;2\n3;4\n".as_bytes(), &fmt(";", false), None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("1"), Some(&Value::Number(4.0)));
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = read_csv("a,b\n1,2\n3\n".as_bytes(), &fmt(",", true), None).unwrap_err();
        assert!(matches!(err, Error::Csv(_) | Error::ReferenceLoad(_)));
    }

    #[test]
    fn bad_timestamp_rejected() {
        let err = read_csv("ts,x\nyesterday,1\n".as_bytes(), &fmt(",", true), Some("ts")).unwrap_err();
        assert!(err.to_string().contains("not a timestamp"));
    }

    #[test]
    fn load_csv_names_the_file() {
        let err = load_csv(Path::new("/nonexistent/ref.csv"), &fmt(",", true), None).unwrap_err();
        assert!(matches!(err, Error::ReferenceLoad(ref m) if m.contains("/nonexistent/ref.csv")));
    }

    #[test]
    fn tab_separator() {
        let rows = read_csv("a\tb\n1\tx\n".as_bytes(), &fmt("\\t", true), None).unwrap();
        assert_eq!(rows[0].get("b"), Some(&Value::Text("x".into())));
    }
}
