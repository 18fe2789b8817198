//! Hyperparameter maps and typed access to them

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Result, ServiceError};

/// Scalar-valued hyperparameters keyed by name
pub type Hyperparameters = BTreeMap<String, Value>;

/// Overlay `overrides` on `defaults`. Explicit values win.
///
/// Keys the defaults do not know about and non-scalar values are rejected.
pub fn merge(defaults: &Hyperparameters, overrides: Option<&Hyperparameters>) -> Result<Hyperparameters> {
    let mut merged = defaults.clone();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            if !defaults.contains_key(key) {
                let known: Vec<&str> = defaults.keys().map(|k| k.as_str()).collect();
                return Err(ServiceError::invalid(format!(
                    "Unknown hyperparameter '{}' (expected one of: {})",
                    key,
                    known.join(", ")
                )));
            }
            if value.is_array() || value.is_object() {
                return Err(ServiceError::invalid(format!(
                    "Hyperparameter '{}' must be a scalar",
                    key
                )));
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}

/// Parse a hyperparameter map from a JSON string. Empty input means "none".
pub fn parse_json(raw: &str) -> Result<Option<Hyperparameters>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let map: Hyperparameters = serde_json::from_str(raw)
        .map_err(|e| ServiceError::invalid(format!("Invalid hyperparameters JSON: {}", e)))?;
    Ok(Some(map))
}

/// Typed reads over a merged map
pub struct Params<'a> {
    map: &'a Hyperparameters,
}

impl<'a> Params<'a> {
    pub fn new(map: &'a Hyperparameters) -> Self {
        Self { map }
    }

    fn value(&self, key: &str) -> &Value {
        self.map.get(key).unwrap_or(&Value::Null)
    }

    fn bad(key: &str, expected: &str, value: &Value) -> ServiceError {
        ServiceError::invalid(format!(
            "Hyperparameter '{}' must be {}, got {}",
            key, expected, value
        ))
    }

    /// A float value that is a whole number also counts as an integer.
    fn as_u64(value: &Value) -> Option<u64> {
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        })
    }

    pub fn usize(&self, key: &str) -> Result<usize> {
        let value = self.value(key);
        Self::as_u64(value)
            .map(|v| v as usize)
            .ok_or_else(|| Self::bad(key, "a non-negative integer", value))
    }

    /// Like [`Params::usize`], additionally requiring `value >= min`.
    pub fn usize_at_least(&self, key: &str, min: usize) -> Result<usize> {
        let v = self.usize(key)?;
        if v < min {
            return Err(ServiceError::invalid(format!(
                "Hyperparameter '{}' must be at least {}, got {}",
                key, min, v
            )));
        }
        Ok(v)
    }

    /// `null` reads as `None`.
    pub fn opt_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.value(key) {
            Value::Null => Ok(None),
            _ => self.usize_at_least(key, 1).map(Some),
        }
    }

    pub fn u64(&self, key: &str) -> Result<u64> {
        let value = self.value(key);
        Self::as_u64(value).ok_or_else(|| Self::bad(key, "a non-negative integer", value))
    }

    /// Random seeds: `null` falls back to `default`.
    pub fn seed(&self, key: &str, default: u64) -> Result<u64> {
        match self.value(key) {
            Value::Null => Ok(default),
            _ => self.u64(key),
        }
    }

    pub fn positive_f64(&self, key: &str) -> Result<f64> {
        let value = self.value(key);
        value
            .as_f64()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| Self::bad(key, "a positive number", value))
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        let value = self.value(key);
        value.as_bool().ok_or_else(|| Self::bad(key, "a boolean", value))
    }

    /// A string restricted to `allowed`, compared case-insensitively.
    pub fn choice(&self, key: &str, allowed: &[&'static str]) -> Result<&'static str> {
        let value = self.value(key);
        value
            .as_str()
            .and_then(|s| allowed.iter().find(|a| a.eq_ignore_ascii_case(s)).copied())
            .ok_or_else(|| Self::bad(key, &format!("one of {:?}", allowed), value))
    }

    pub fn raw(&self, key: &str) -> &Value {
        self.value(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> Hyperparameters {
        let mut d = Hyperparameters::new();
        d.insert("n_estimators".into(), json!(100));
        d.insert("max_depth".into(), Value::Null);
        d
    }

    #[test]
    fn test_merge_overrides_win() {
        let mut o = Hyperparameters::new();
        o.insert("n_estimators".into(), json!(10));
        let merged = merge(&defaults(), Some(&o)).unwrap();
        assert_eq!(merged["n_estimators"], json!(10));
        assert_eq!(merged["max_depth"], Value::Null);
    }

    #[test]
    fn test_merge_rejects_unknown_and_nested() {
        let mut o = Hyperparameters::new();
        o.insert("n_trees".into(), json!(10));
        assert!(matches!(merge(&defaults(), Some(&o)), Err(ServiceError::InvalidInput(_))));

        let mut o = Hyperparameters::new();
        o.insert("max_depth".into(), json!([3]));
        assert!(matches!(merge(&defaults(), Some(&o)), Err(ServiceError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_json_empty_is_none() {
        assert!(parse_json("").unwrap().is_none());
        assert!(parse_json("  ").unwrap().is_none());
        assert_eq!(parse_json(r#"{"C": 0.5}"#).unwrap().unwrap()["C"], json!(0.5));
        assert!(parse_json("[1]").is_err());
    }

    #[test]
    fn test_typed_reads() {
        let mut m = Hyperparameters::new();
        m.insert("a".into(), json!(10.0));
        m.insert("b".into(), json!(-1));
        m.insert("c".into(), json!("SQRT"));
        let p = Params::new(&m);
        assert_eq!(p.usize("a").unwrap(), 10);
        assert!(p.usize("b").is_err());
        assert_eq!(p.choice("c", &["sqrt", "log2"]).unwrap(), "sqrt");
        assert_eq!(p.opt_usize("missing").unwrap(), None);
        assert_eq!(p.seed("missing", 42).unwrap(), 42);
    }
}
