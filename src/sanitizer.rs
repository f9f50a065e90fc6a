use std::collections::HashSet;

use crate::dataset::{parse_timestamp, ColumnType, Dataset, Value};
use crate::error::{EtlError, PrimaryKeyViolation};
use crate::sql::is_primary_key;

const NUMERIC_PREFIXES: &[&str] = &["kamut_"];
const NUMERIC_SUFFIXES: &[&str] = &["_wltp"];
const NUMERIC_COLUMNS: &[&str] = &["nikud_betihut", "co2_wltp_nedc"];

pub fn is_domain_numeric(column: &str) -> bool {
    let column = column.to_lowercase();
    NUMERIC_PREFIXES.iter().any(|p| column.starts_with(p))
        || NUMERIC_SUFFIXES.iter().any(|s| column.ends_with(s))
        || NUMERIC_COLUMNS.contains(&column.as_str())
}

/// Normalizes a fetched dataset and enforces the `_id` invariant.
///
/// Order matters: sentinels are nulled before the key check so they are caught
/// as null ids, and domain columns are coerced only after the key check so a bad
/// number elsewhere never masks a key problem.
pub fn sanitize(mut dataset: Dataset) -> Result<Dataset, EtlError> {
    let types = dataset.column_types();

    normalize_by_kind(&mut dataset, &types);
    null_missing_values(&mut dataset);

    let key = dataset.columns().iter().position(|c| is_primary_key(c));
    if let Some(id_idx) = key {
        validate_primary_key(&mut dataset, id_idx)?;
    }

    let numeric: Vec<usize> = dataset
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| is_domain_numeric(name))
        .map(|(idx, _)| idx)
        .collect();
    for row in dataset.rows_mut() {
        for &idx in &numeric {
            row[idx] = coerce_numeric(&row[idx]);
        }
    }

    Ok(dataset)
}

fn normalize_by_kind(dataset: &mut Dataset, types: &[ColumnType]) {
    for row in dataset.rows_mut() {
        for (value, column_type) in row.iter_mut().zip(types) {
            match column_type {
                ColumnType::Text => {
                    if let Some(text) = value.as_text() {
                        *value = Value::Text(text.to_lowercase());
                    }
                }
                ColumnType::Timestamp => {
                    if let Value::Text(text) = value {
                        if let Some(ts) = parse_timestamp(text) {
                            *value = Value::Timestamp(ts);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn null_missing_values(dataset: &mut Dataset) {
    for value in dataset.rows_mut().iter_mut().flatten() {
        if value.is_missing() {
            *value = Value::Null;
        }
    }
}

fn validate_primary_key(dataset: &mut Dataset, id_idx: usize) -> Result<(), EtlError> {
    let mut seen = HashSet::with_capacity(dataset.len());
    let mut duplicate = false;

    for row in dataset.rows_mut() {
        match coerce_id(&row[id_idx]) {
            Some(id) => {
                duplicate |= !seen.insert(id);
                row[id_idx] = Value::Int(id);
            }
            None => {
                return Err(EtlError::PrimaryKeyInvalid {
                    reason: PrimaryKeyViolation::NullId,
                })
            }
        }
    }

    if duplicate {
        return Err(EtlError::PrimaryKeyInvalid {
            reason: PrimaryKeyViolation::DuplicateId,
        });
    }
    Ok(())
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) => integral(*f),
        Value::Bool(b) => Some(*b as i64),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        Value::Null | Value::Timestamp(_) => None,
    }
}

fn coerce_numeric(value: &Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(*i),
        Value::Float(f) if f.is_finite() => Value::Float(*f),
        Value::Bool(b) => Value::Int(*b as i64),
        Value::Text(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Value::Int(i)
            } else {
                match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::Float(f),
                    _ => Value::Null,
                }
            }
        }
        _ => Value::Null,
    }
}
