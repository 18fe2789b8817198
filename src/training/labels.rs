//! Class labels as supplied by the caller and their dense encoding

use std::cmp::Ordering;
use std::collections::BTreeMap;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// A target value in its original type.
///
/// Variant order matters for untagged deserialization: `true` must not be
/// read as a number and `3` must stay an integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassLabel {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ClassLabel {
    fn rank(&self) -> u8 {
        match self {
            ClassLabel::Bool(_) => 0,
            ClassLabel::Int(_) => 1,
            ClassLabel::Float(_) => 2,
            ClassLabel::Text(_) => 3,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ClassLabel::Bool(b) => serde_json::Value::from(*b),
            ClassLabel::Int(i) => serde_json::Value::from(*i),
            ClassLabel::Float(f) => serde_json::Value::from(*f),
            ClassLabel::Text(s) => serde_json::Value::from(s.clone()),
        }
    }
}

impl std::fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassLabel::Bool(b) => write!(f, "{}", b),
            ClassLabel::Int(i) => write!(f, "{}", i),
            ClassLabel::Float(x) => write!(f, "{}", x),
            ClassLabel::Text(s) => f.write_str(s),
        }
    }
}

impl Ord for ClassLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ClassLabel::Bool(a), ClassLabel::Bool(b)) => a.cmp(b),
            (ClassLabel::Int(a), ClassLabel::Int(b)) => a.cmp(b),
            (ClassLabel::Float(a), ClassLabel::Float(b)) => a.total_cmp(b),
            (ClassLabel::Text(a), ClassLabel::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for ClassLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ClassLabel {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ClassLabel {}

/// Read a target column into labels. Nulls and non-finite floats are rejected.
pub fn labels_from_series(series: &Series) -> Result<Vec<ClassLabel>> {
    let name = series.name().to_string();
    if series.null_count() > 0 {
        return Err(ServiceError::invalid(format!(
            "Target column '{}' contains {} missing values",
            name,
            series.null_count()
        )));
    }

    let labels: Vec<ClassLabel> = match series.dtype() {
        DataType::Boolean => series
            .bool()?
            .into_no_null_iter()
            .map(ClassLabel::Bool)
            .collect(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => series
            .cast(&DataType::Int64)?
            .i64()?
            .into_no_null_iter()
            .map(ClassLabel::Int)
            .collect(),
        DataType::Float32 | DataType::Float64 => {
            let values: Vec<f64> = series.cast(&DataType::Float64)?.f64()?.into_no_null_iter().collect();
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ServiceError::invalid(format!(
                    "Target column '{}' contains non-finite values",
                    name
                )));
            }
            values.into_iter().map(ClassLabel::Float).collect()
        }
        DataType::String => series
            .str()?
            .into_no_null_iter()
            .map(|s| ClassLabel::Text(s.to_string()))
            .collect(),
        other => {
            return Err(ServiceError::invalid(format!(
                "Target column '{}' has unsupported type {}",
                name, other
            )))
        }
    };
    Ok(labels)
}

/// Sorted distinct classes plus the index of each label into them.
pub fn encode(labels: &[ClassLabel]) -> (Vec<ClassLabel>, Vec<usize>) {
    let mut index: BTreeMap<&ClassLabel, usize> = BTreeMap::new();
    for label in labels {
        index.entry(label).or_insert(0);
    }
    for (i, slot) in index.values_mut().enumerate() {
        *slot = i;
    }
    let encoded = labels.iter().map(|l| index[l]).collect();
    let classes = index.into_keys().cloned().collect();
    (classes, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sorted() {
        let labels = vec![
            ClassLabel::Text("virginica".into()),
            ClassLabel::Text("setosa".into()),
            ClassLabel::Text("virginica".into()),
        ];
        let (classes, y) = encode(&labels);
        assert_eq!(classes, vec![ClassLabel::Text("setosa".into()), ClassLabel::Text("virginica".into())]);
        assert_eq!(y, vec![1, 0, 1]);
    }

    #[test]
    fn test_labels_from_int_series() {
        let s = Series::new("y".into(), &[2i32, 0, 1]);
        let labels = labels_from_series(&s).unwrap();
        assert_eq!(labels, vec![ClassLabel::Int(2), ClassLabel::Int(0), ClassLabel::Int(1)]);
    }

    #[test]
    fn test_labels_reject_nulls() {
        let s = Series::new("y".into(), &[Some(1.0), None]);
        assert!(matches!(labels_from_series(&s), Err(ServiceError::InvalidInput(_))));
    }

    #[test]
    fn test_untagged_roundtrip_keeps_types() {
        let labels = vec![ClassLabel::Bool(true), ClassLabel::Int(3), ClassLabel::Float(0.5), ClassLabel::Text("a".into())];
        let json = serde_json::to_string(&labels).unwrap();
        assert_eq!(json, r#"[true,3,0.5,"a"]"#);
        let back: Vec<ClassLabel> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, labels);
    }
}
