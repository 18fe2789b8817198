//! Tabular data IO and conversion between frames, JSON records and matrices

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use ndarray::Array2;
use polars::prelude::*;

use crate::error::{Result, ServiceError};

/// On-disk encodings accepted for datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    /// A JSON array of records
    Json,
}

impl DatasetFormat {
    /// Format implied by a file name's extension, if it is a supported one.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(DatasetFormat::Csv),
            "json" => Some(DatasetFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "csv",
            DatasetFormat::Json => "json",
        }
    }
}

/// Read a dataset file. A file that exists but does not parse is bad input.
pub fn read_frame(path: &Path, format: DatasetFormat) -> Result<DataFrame> {
    let file = File::open(path)?;
    let parsed = match format {
        DatasetFormat::Csv => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .into_reader_with_file_handle(file)
            .finish(),
        DatasetFormat::Json => JsonReader::new(file).finish(),
    };
    parsed.map_err(|e| {
        ServiceError::invalid(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Parse an in-memory upload body.
pub fn parse_bytes(bytes: &[u8], format: DatasetFormat) -> Result<DataFrame> {
    let parsed = match format {
        DatasetFormat::Csv => CsvReadOptions::default()
            .with_infer_schema_length(Some(1000))
            .with_has_header(true)
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish(),
        DatasetFormat::Json => JsonReader::new(Cursor::new(bytes)).finish(),
    };
    let df = parsed.map_err(|e| ServiceError::invalid(format!("Unreadable data: {}", e)))?;
    if df.width() == 0 {
        return Err(ServiceError::invalid("Uploaded data has no columns"));
    }
    Ok(df)
}

/// Write a frame in the given format, replacing any existing file.
pub fn write_frame(path: &Path, df: &DataFrame, format: DatasetFormat) -> Result<()> {
    let mut file = File::create(path)?;
    let mut df = df.clone();
    match format {
        DatasetFormat::Csv => CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?,
        DatasetFormat::Json => JsonWriter::new(&mut file)
            .with_json_format(JsonFormat::Json)
            .finish(&mut df)?,
    }
    Ok(())
}

/// Build a frame from JSON records (`[{"col": value, ...}, ...]`).
///
/// Columns are the union of keys over all records; a missing key becomes a
/// null. Columns holding only numbers become `Float64`, only booleans become
/// `Boolean`, anything else is kept as text.
pub fn records_to_frame(records: &[serde_json::Value]) -> Result<DataFrame> {
    if records.is_empty() {
        return Err(ServiceError::invalid("No records supplied"));
    }

    let mut names: Vec<String> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let obj = record
            .as_object()
            .ok_or_else(|| ServiceError::invalid(format!("Record {} is not an object", i)))?;
        for key in obj.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }

    let columns: Vec<Series> = names
        .iter()
        .map(|name| {
            let values: Vec<&serde_json::Value> = records
                .iter()
                .map(|r| r.get(name).unwrap_or(&serde_json::Value::Null))
                .collect();
            json_column(name, &values)
        })
        .collect();

    DataFrame::new(columns).map_err(|e| ServiceError::invalid(e.to_string()))
}

fn json_column(name: &str, values: &[&serde_json::Value]) -> Series {
    use serde_json::Value;

    let present = || values.iter().filter(|v| !v.is_null());
    if present().all(|v| v.is_number()) {
        let data: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
        Series::new(name.into(), data)
    } else if present().all(|v| v.is_boolean()) {
        let data: Vec<Option<bool>> = values.iter().map(|v| v.as_bool()).collect();
        Series::new(name.into(), data)
    } else {
        let data: Vec<Option<String>> = values
            .iter()
            .map(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect();
        Series::new(name.into(), data)
    }
}

/// Column names of a frame, in order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|s| s.to_string()).collect()
}

fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean
    )
}

/// Convert the named columns into a row-major feature matrix.
///
/// Every column must be numeric (booleans count as 0/1) and free of nulls.
pub fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let n_cols = col_names.len();

    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            let series = df
                .column(col_name)
                .map_err(|_| ServiceError::invalid(format!("Missing feature column '{}'", col_name)))?;
            if !is_numeric_dtype(series.dtype()) {
                return Err(ServiceError::invalid(format!(
                    "Feature column '{}' must be numeric, found {}",
                    col_name,
                    series.dtype()
                )));
            }
            if series.null_count() > 0 {
                return Err(ServiceError::invalid(format!(
                    "Feature column '{}' contains {} missing values",
                    col_name,
                    series.null_count()
                )));
            }
            let series_f64 = series.cast(&DataType::Float64)?;
            let values: Vec<f64> = series_f64
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ServiceError::invalid(format!(
                    "Feature column '{}' contains non-finite values",
                    col_name
                )));
            }
            Ok(values)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| col_refs[c][r]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_name() {
        assert_eq!(DatasetFormat::from_name("iris.csv"), Some(DatasetFormat::Csv));
        assert_eq!(DatasetFormat::from_name("IRIS.JSON"), Some(DatasetFormat::Json));
        assert_eq!(DatasetFormat::from_name("iris.parquet"), None);
        assert_eq!(DatasetFormat::from_name("iris"), None);
    }

    #[test]
    fn test_parse_csv_bytes() {
        let body = b"a,b,label\n1,2.5,x\n3,4.5,y\n";
        let df = parse_bytes(body, DatasetFormat::Csv).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(column_names(&df), vec!["a", "b", "label"]);
    }

    #[test]
    fn test_parse_garbage_json_is_invalid_input() {
        let err = parse_bytes(b"{not json", DatasetFormat::Json).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_records_to_frame() {
        let records = vec![
            json!({"x": 1, "y": 0.5, "flag": true, "name": "a"}),
            json!({"x": 2.5, "flag": false, "name": "b"}),
        ];
        let df = records_to_frame(&records).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("x").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("flag").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(df.column("name").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("y").unwrap().null_count(), 1);
    }

    #[test]
    fn test_records_must_be_objects() {
        let err = records_to_frame(&[json!([1, 2, 3])]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert!(records_to_frame(&[]).is_err());
    }

    #[test]
    fn test_columns_to_array2_rejects_text_and_nulls() {
        let records = vec![json!({"a": 1, "b": "t"}), json!({"a": null, "b": "u"})];
        let df = records_to_frame(&records).unwrap();
        let text = columns_to_array2(&df, &["b".to_string()]).unwrap_err();
        assert!(matches!(text, ServiceError::InvalidInput(_)));
        let nulls = columns_to_array2(&df, &["a".to_string()]).unwrap_err();
        assert!(matches!(nulls, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_columns_to_array2_layout() {
        let df = df!(
            "a" => &[1.0, 2.0, 3.0],
            "b" => &[10i64, 20, 30]
        )
        .unwrap();
        let x = columns_to_array2(&df, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(x.shape(), &[3, 2]);
        assert_eq!(x[[1, 0]], 20.0);
        assert_eq!(x[[2, 1]], 3.0);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let df = df!("a" => &[1i64, 2], "b" => &["x", "y"]).unwrap();
        for format in [DatasetFormat::Csv, DatasetFormat::Json] {
            let path = dir.path().join(format!("data.{}", format.extension()));
            write_frame(&path, &df, format).unwrap();
            let back = read_frame(&path, format).unwrap();
            assert_eq!(back.shape(), (2, 2));
        }
    }
}
