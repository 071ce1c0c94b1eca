//! Translates a metadata filter plus an optional `before` bound into a
//! parameterized SQL predicate, and provides the equivalent in-process
//! document matcher used by the in-memory saver.

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use crate::types::MetadataFilter;

/// Build the WHERE clause (including the `WHERE` keyword and a trailing
/// space) and its ordered parameter values for a `search` query. Filter
/// values are always bound, never interpolated. No predicates produces an
/// empty clause.
pub fn search_where(
    filter: &MetadataFilter,
    before: Option<&CheckpointConfig>,
) -> Result<(String, Vec<SqlValue>)> {
    let mut predicates = Vec::with_capacity(filter.len() + 1);
    let mut params = Vec::with_capacity(filter.len() + 1);

    for (key, value) in filter {
        let (operator, param) = where_value(value)?;
        predicates.push(format!(
            "json_extract(CAST(metadata_bytes AS TEXT), '$.{key}') {operator}"
        ));
        params.push(param);
    }

    if let Some(before) = before {
        predicates.push("checkpoint_id < ?".into());
        params.push(SqlValue::Text(before.before_id()?.to_owned()));
    }

    if predicates.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!("WHERE {} ", predicates.join(" AND ")), params))
    }
}

/// Operator and bound parameter for one filter value, chosen by type: null
/// gets NULL-safe equality, booleans their 0/1 integer encoding, structured
/// values their canonical compact JSON text (the form `json_extract` returns
/// for embedded objects and arrays).
fn where_value(value: &Value) -> Result<(&'static str, SqlValue)> {
    match value {
        Value::Null => Ok(("IS ?", SqlValue::Null)),
        Value::Bool(b) => Ok(("= ?", SqlValue::Integer(i64::from(*b)))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(("= ?", SqlValue::Integer(i)))
            } else {
                Ok(("= ?", SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))))
            }
        }
        Value::String(s) => Ok(("= ?", SqlValue::Text(s.clone()))),
        Value::Array(_) | Value::Object(_) => {
            let text = serde_json::to_string(value).map_err(|e| {
                CheckpointError::InvalidArgument(format!("filter value not encodable: {e}"))
            })?;
            Ok(("= ?", SqlValue::Text(text)))
        }
    }
}

/// In-process counterpart of the SQL predicate: true when `doc` matches
/// every key/value pair in `filter`. A null filter value matches both an
/// explicit null and an absent key, mirroring `json_extract` semantics.
pub fn metadata_matches(doc: &Map<String, Value>, filter: &MetadataFilter) -> bool {
    filter.iter().all(|(key, expected)| match expected {
        Value::Null => matches!(doc.get(key), None | Some(Value::Null)),
        _ => doc.get(key) == Some(expected),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> MetadataFilter {
        match value {
            Value::Object(map) => map,
            _ => panic!("filter must be an object"),
        }
    }

    #[test]
    fn empty_filter_no_before_is_empty_clause() {
        let (clause, params) = search_where(&MetadataFilter::new(), None).unwrap();
        assert_eq!(clause, "");
        assert!(params.is_empty());
    }

    #[test]
    fn string_filter_uses_equality() {
        let (clause, params) =
            search_where(&filter(json!({"source": "input"})), None).unwrap();
        assert_eq!(
            clause,
            "WHERE json_extract(CAST(metadata_bytes AS TEXT), '$.source') = ? "
        );
        assert_eq!(params, vec![SqlValue::Text("input".into())]);
    }

    #[test]
    fn null_filter_uses_is() {
        let (clause, params) = search_where(&filter(json!({"writes": null})), None).unwrap();
        assert_eq!(
            clause,
            "WHERE json_extract(CAST(metadata_bytes AS TEXT), '$.writes') IS ? "
        );
        assert_eq!(params, vec![SqlValue::Null]);
    }

    #[test]
    fn bool_filter_binds_integer_encoding() {
        let (_, params) = search_where(&filter(json!({"done": true})), None).unwrap();
        assert_eq!(params, vec![SqlValue::Integer(1)]);
        let (_, params) = search_where(&filter(json!({"done": false})), None).unwrap();
        assert_eq!(params, vec![SqlValue::Integer(0)]);
    }

    #[test]
    fn structured_filter_binds_compact_json() {
        let (_, params) =
            search_where(&filter(json!({"writes": {"key": "value"}})), None).unwrap();
        assert_eq!(params, vec![SqlValue::Text(r#"{"key":"value"}"#.into())]);
    }

    #[test]
    fn multiple_keys_are_and_joined() {
        let (clause, params) =
            search_where(&filter(json!({"source": "loop", "step": 2})), None).unwrap();
        assert_eq!(
            clause,
            "WHERE json_extract(CAST(metadata_bytes AS TEXT), '$.source') = ? \
             AND json_extract(CAST(metadata_bytes AS TEXT), '$.step') = ? "
        );
        assert_eq!(
            params,
            vec![SqlValue::Text("loop".into()), SqlValue::Integer(2)]
        );
    }

    #[test]
    fn before_appends_checkpoint_id_bound() {
        let before = CheckpointConfig::new("t").with_checkpoint_id("cp-5");
        let (clause, params) =
            search_where(&filter(json!({"source": "input"})), Some(&before)).unwrap();
        assert_eq!(
            clause,
            "WHERE json_extract(CAST(metadata_bytes AS TEXT), '$.source') = ? \
             AND checkpoint_id < ? "
        );
        assert_eq!(
            params,
            vec![SqlValue::Text("input".into()), SqlValue::Text("cp-5".into())]
        );
    }

    #[test]
    fn before_alone_produces_single_predicate() {
        let before = CheckpointConfig::new("t").with_checkpoint_id("cp-5");
        let (clause, params) = search_where(&MetadataFilter::new(), Some(&before)).unwrap();
        assert_eq!(clause, "WHERE checkpoint_id < ? ");
        assert_eq!(params, vec![SqlValue::Text("cp-5".into())]);
    }

    #[test]
    fn before_without_checkpoint_id_is_invalid() {
        let before = CheckpointConfig::new("t");
        assert!(matches!(
            search_where(&MetadataFilter::new(), Some(&before)),
            Err(CheckpointError::InvalidArgument(_))
        ));
    }

    #[test]
    fn matches_all_keys() {
        let doc = filter(json!({"source": "input", "step": 1}));
        assert!(metadata_matches(&doc, &filter(json!({"source": "input"}))));
        assert!(metadata_matches(
            &doc,
            &filter(json!({"source": "input", "step": 1}))
        ));
        assert!(!metadata_matches(
            &doc,
            &filter(json!({"source": "input", "step": 2}))
        ));
    }

    #[test]
    fn null_matches_absent_or_null() {
        let doc = filter(json!({"writes": null}));
        assert!(metadata_matches(&doc, &filter(json!({"writes": null}))));
        assert!(metadata_matches(
            &Map::new(),
            &filter(json!({"writes": null}))
        ));
        let doc = filter(json!({"writes": {"k": 1}}));
        assert!(!metadata_matches(&doc, &filter(json!({"writes": null}))));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(metadata_matches(&Map::new(), &MetadataFilter::new()));
        assert!(metadata_matches(
            &filter(json!({"anything": 1})),
            &MetadataFilter::new()
        ));
    }
}
