//! Payload decoding: CSV or JSON-array bytes into ordered row records.
//!
//! Every failure here is an `InvalidPayload`, which the pipeline treats as
//! non-retryable: the same bytes will fail the same way on every attempt.

use dataset_profiler_core::config::ProfileLimits;
use dataset_profiler_core::errors::PipelineError;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// One cell of a parsed row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CellValue {
    Null,
    Str(String),
    Number(f64),
    Bool(bool),
    /// Nested JSON values the profiler treats as opaque.
    Other(String),
}

impl CellValue {
    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() => CellValue::Number(f),
                _ => CellValue::Other(n.to_string()),
            },
            serde_json::Value::String(s) => CellValue::Str(s),
            nested => CellValue::Other(nested.to_string()),
        }
    }
}

/// An ordered field -> value record.
pub(crate) type Row = Vec<(String, CellValue)>;

pub(crate) fn parse_rows(
    bytes: &[u8],
    content_type: &str,
    limits: &ProfileLimits,
) -> Result<Vec<Row>, PipelineError> {
    if bytes.len() > limits.max_payload_bytes {
        return Err(PipelineError::InvalidPayload(format!(
            "Payload exceeds the {} byte cap",
            limits.max_payload_bytes
        )));
    }

    let text = decode_utf8(bytes)?;
    match content_type {
        "text/csv" => parse_csv(text, limits),
        "application/json" => parse_json(text, limits),
        other => Err(PipelineError::InvalidPayload(format!(
            "No parser for content type '{other}'"
        ))),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<&str, PipelineError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::InvalidPayload(format!("Payload is not valid UTF-8: {e}")))
}

fn parse_csv(text: &str, limits: &ProfileLimits) -> Result<Vec<Row>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    // The first non-empty line is the header; blank lines are skipped by
    // the reader. Empty or repeated header names fall back to positional
    // names so every record keys each cell exactly once.
    let mut seen_names = std::collections::HashSet::new();
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::InvalidPayload(format!("Malformed CSV header: {e}")))?
        .iter()
        .enumerate()
        .map(|(i, header)| {
            if header.is_empty() || !seen_names.insert(header.to_string()) {
                format!("field_{i}")
            } else {
                header.to_string()
            }
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| PipelineError::InvalidPayload(format!("Malformed CSV: {e}")))?;
        if rows.len() >= limits.max_rows {
            return Err(PipelineError::InvalidPayload(format!(
                "Row count exceeds the {} row cap",
                limits.max_rows
            )));
        }

        let mut row: Row = Vec::with_capacity(headers.len().max(record.len()));
        for (i, header) in headers.iter().enumerate() {
            // Short records are padded with empty fields.
            let value = record.get(i).unwrap_or("");
            row.push((header.clone(), CellValue::Str(value.to_string())));
        }
        // Extra columns beyond the header keep positional names.
        for i in headers.len()..record.len() {
            row.push((format!("field_{i}"), CellValue::Str(record[i].to_string())));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_json(text: &str, limits: &ProfileLimits) -> Result<Vec<Row>, PipelineError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| PipelineError::InvalidPayload(format!("Malformed JSON: {e}")))?;

    let serde_json::Value::Array(items) = value else {
        return Err(PipelineError::InvalidPayload(
            "Top-level JSON value must be an array".to_string(),
        ));
    };
    if items.len() > limits.max_rows {
        return Err(PipelineError::InvalidPayload(format!(
            "Row count exceeds the {} row cap",
            limits.max_rows
        )));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            serde_json::Value::Object(fields) => Ok(fields
                .into_iter()
                .map(|(name, value)| (name, CellValue::from_json(value)))
                .collect()),
            _ => Err(PipelineError::InvalidPayload(format!(
                "Array element {index} is not an object"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ProfileLimits {
        ProfileLimits {
            max_rows: 1000,
            max_payload_bytes: 1024 * 1024,
        }
    }

    fn cell<'a>(row: &'a Row, name: &str) -> &'a CellValue {
        &row.iter().find(|(n, _)| n == name).expect("field present").1
    }

    #[test]
    fn test_csv_happy_path() {
        let rows = parse_rows(
            b"id,region,total\n1,n,10\n2,s,20\n3,s,30\n",
            "text/csv",
            &limits(),
        )
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], ("id".to_string(), CellValue::Str("1".to_string())));
        assert_eq!(cell(&rows[2], "total"), &CellValue::Str("30".to_string()));
    }

    #[test]
    fn test_csv_strips_bom() {
        let rows = parse_rows(b"\xef\xbb\xbfid,total\n1,2\n", "text/csv", &limits()).unwrap();
        assert_eq!(rows[0][0].0, "id");
    }

    #[test]
    fn test_csv_short_rows_are_padded() {
        let rows = parse_rows(b"a,b,c\n1,2\n", "text/csv", &limits()).unwrap();
        assert_eq!(cell(&rows[0], "c"), &CellValue::Str(String::new()));
    }

    #[test]
    fn test_csv_duplicate_and_empty_headers_get_positional_names() {
        let rows = parse_rows(b"a,a,\n1,2,3\n", "text/csv", &limits()).unwrap();
        assert_eq!(cell(&rows[0], "a"), &CellValue::Str("1".to_string()));
        assert_eq!(cell(&rows[0], "field_1"), &CellValue::Str("2".to_string()));
        assert_eq!(cell(&rows[0], "field_2"), &CellValue::Str("3".to_string()));
    }

    #[test]
    fn test_csv_extra_columns_are_preserved() {
        let rows = parse_rows(b"a,b\n1,2,3,4\n", "text/csv", &limits()).unwrap();
        assert_eq!(cell(&rows[0], "field_2"), &CellValue::Str("3".to_string()));
        assert_eq!(cell(&rows[0], "field_3"), &CellValue::Str("4".to_string()));
    }

    #[test]
    fn test_csv_empty_input_yields_no_rows() {
        let rows = parse_rows(b"", "text/csv", &limits()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_json_array_of_objects() {
        let rows = parse_rows(
            br#"[{"id": 1, "name": "a", "flag": true, "note": null}]"#,
            "application/json",
            &limits(),
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(cell(&rows[0], "id"), &CellValue::Number(1.0));
        assert_eq!(cell(&rows[0], "name"), &CellValue::Str("a".to_string()));
        assert_eq!(cell(&rows[0], "flag"), &CellValue::Bool(true));
        assert_eq!(cell(&rows[0], "note"), &CellValue::Null);
    }

    #[test]
    fn test_json_nested_values_are_opaque() {
        let rows = parse_rows(
            br#"[{"id": 1, "tags": ["a", "b"]}]"#,
            "application/json",
            &limits(),
        )
        .unwrap();
        assert!(matches!(cell(&rows[0], "tags"), CellValue::Other(_)));
    }

    #[test]
    fn test_json_top_level_object_is_rejected() {
        let err = parse_rows(br#"{"id": 1, "total": 100}"#, "application/json", &limits())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
    }

    #[test]
    fn test_json_non_object_element_is_rejected() {
        let err = parse_rows(br#"[{"id": 1}, 42]"#, "application/json", &limits()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let err = parse_rows(b"id\n\xff\xfe\n", "text/csv", &limits()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
    }

    #[test]
    fn test_row_cap_is_enforced() {
        let tight = ProfileLimits {
            max_rows: 2,
            max_payload_bytes: 1024,
        };
        let err = parse_rows(b"a\n1\n2\n3\n", "text/csv", &tight).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
    }

    #[test]
    fn test_byte_cap_is_enforced() {
        let tight = ProfileLimits {
            max_rows: 1000,
            max_payload_bytes: 4,
        };
        let err = parse_rows(b"a,b\n1,2\n", "text/csv", &tight).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
    }
}
