//! Profile computation over parsed rows.
//!
//! Two passes: the stats pass folds every row once with O(fields) running
//! state (plus the numeric sample buffers, bounded by the parser's row
//! cap); the anomaly pass re-reads only those cached samples.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::parse::{CellValue, Row};

/// At most this many example outliers are reported per field.
const MAX_OUTLIER_EXAMPLES: usize = 5;
/// Quartiles are meaningless below this sample count.
const MIN_OUTLIER_SAMPLES: usize = 4;
/// Tukey fence multiplier.
const IQR_FENCE_MULTIPLIER: f64 = 1.5;

/// The persisted report document. Field maps are BTreeMaps so the
/// serialized form is deterministic.
#[derive(Debug, Serialize)]
pub(crate) struct DatasetProfile {
    pub dataset_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub row_count: u64,
    pub null_counts: BTreeMap<String, u64>,
    pub numeric: BTreeMap<String, NumericSummary>,
    pub anomalies: Anomalies,
}

#[derive(Debug, Serialize)]
pub(crate) struct NumericSummary {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct Anomalies {
    pub duplicates_count: u64,
    pub outliers: BTreeMap<String, OutlierSummary>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutlierSummary {
    pub count: u64,
    pub examples: Vec<OutlierExample>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutlierExample {
    pub row_index: u64,
    pub value: f64,
}

#[derive(Debug, Default)]
struct FieldStats {
    /// Rows in which the field appeared at all.
    seen: u64,
    /// Null sentinel or whitespace-only occurrences.
    explicit_nulls: u64,
    /// Cleared once any non-null value fails numeric coercion.
    non_numeric_seen: bool,
    min: f64,
    max: f64,
    sum: f64,
    /// (row_index, value) in first-seen order; fuels the anomaly pass.
    samples: Vec<(u64, f64)>,
}

impl FieldStats {
    fn push_sample(&mut self, row_index: u64, value: f64) {
        if self.samples.is_empty() {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.samples.push((row_index, value));
    }

    fn is_numeric(&self) -> bool {
        !self.non_numeric_seen && !self.samples.is_empty()
    }
}

/// Output of the stats pass.
pub(crate) struct ProfileStats {
    row_count: u64,
    fields: HashMap<String, FieldStats>,
    duplicates_count: u64,
}

/// Single pass over all rows: null counts, numeric accumulators, duplicate
/// counting via canonical row keys.
pub(crate) fn compute_stats(rows: &[Row]) -> ProfileStats {
    let mut fields: HashMap<String, FieldStats> = HashMap::new();
    let mut distinct_rows: HashMap<String, u64> = HashMap::new();

    for (index, row) in rows.iter().enumerate() {
        *distinct_rows.entry(canonical_key(row)).or_insert(0) += 1;

        for (name, value) in row {
            let stats = fields.entry(name.clone()).or_default();
            stats.seen += 1;
            match value {
                CellValue::Null => stats.explicit_nulls += 1,
                CellValue::Str(s) if s.trim().is_empty() => stats.explicit_nulls += 1,
                CellValue::Str(s) => match s.trim().parse::<f64>() {
                    Ok(parsed) if parsed.is_finite() => stats.push_sample(index as u64, parsed),
                    _ => stats.non_numeric_seen = true,
                },
                CellValue::Number(n) if n.is_finite() => stats.push_sample(index as u64, *n),
                CellValue::Number(_) => stats.non_numeric_seen = true,
                CellValue::Bool(_) | CellValue::Other(_) => stats.non_numeric_seen = true,
            }
        }
    }

    let duplicates_count = distinct_rows.values().map(|count| count - 1).sum();

    ProfileStats {
        row_count: rows.len() as u64,
        fields,
        duplicates_count,
    }
}

/// Second pass over the cached numeric samples: Tukey-fence outliers for
/// every field with enough samples and a strictly positive IQR.
pub(crate) fn detect_anomalies(stats: &ProfileStats) -> BTreeMap<String, OutlierSummary> {
    let mut outliers = BTreeMap::new();
    for (name, field) in &stats.fields {
        if !field.is_numeric() {
            continue;
        }
        if let Some(summary) = outliers_for_samples(&field.samples) {
            outliers.insert(name.clone(), summary);
        }
    }
    outliers
}

fn outliers_for_samples(samples: &[(u64, f64)]) -> Option<OutlierSummary> {
    if samples.len() < MIN_OUTLIER_SAMPLES {
        return None;
    }

    let mut sorted: Vec<f64> = samples.iter().map(|(_, value)| *value).collect();
    sorted.sort_by(f64::total_cmp);

    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    if iqr <= 0.0 {
        return None;
    }

    let lower = q1 - IQR_FENCE_MULTIPLIER * iqr;
    let upper = q3 + IQR_FENCE_MULTIPLIER * iqr;

    let mut count = 0u64;
    let mut examples = Vec::new();
    for (row_index, value) in samples {
        if *value < lower || *value > upper {
            count += 1;
            if examples.len() < MAX_OUTLIER_EXAMPLES {
                examples.push(OutlierExample {
                    row_index: *row_index,
                    value: *value,
                });
            }
        }
    }

    Some(OutlierSummary { count, examples })
}

/// Linear interpolation on the sorted sample, matching the quartile method
/// of the report contract.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
    }
}

pub(crate) fn build_report(
    dataset_id: Uuid,
    stats: &ProfileStats,
    outliers: BTreeMap<String, OutlierSummary>,
) -> DatasetProfile {
    let mut null_counts = BTreeMap::new();
    let mut numeric = BTreeMap::new();

    for (name, field) in &stats.fields {
        // Absent in a row counts as null there.
        let absent = stats.row_count.saturating_sub(field.seen);
        null_counts.insert(name.clone(), field.explicit_nulls + absent);

        if field.is_numeric() {
            numeric.insert(
                name.clone(),
                NumericSummary {
                    min: field.min,
                    mean: field.sum / field.samples.len() as f64,
                    max: field.max,
                },
            );
        }
    }

    DatasetProfile {
        dataset_id,
        generated_at: Utc::now(),
        row_count: stats.row_count,
        null_counts,
        numeric,
        anomalies: Anomalies {
            duplicates_count: stats.duplicates_count,
            outliers,
        },
    }
}

/// Canonical duplicate key: cells sorted by field name, values tagged by
/// type so "10" (string) and 10 (number) stay distinct rows.
fn canonical_key(row: &Row) -> String {
    let mut cells: Vec<(&str, String)> = row
        .iter()
        .map(|(name, value)| (name.as_str(), encode_cell(value)))
        .collect();
    cells.sort();

    let mut key = String::new();
    for (name, value) in cells {
        key.push_str(name);
        key.push('\u{1f}');
        key.push_str(&value);
        key.push('\u{1e}');
    }
    key
}

fn encode_cell(value: &CellValue) -> String {
    match value {
        CellValue::Null => "n".to_string(),
        CellValue::Str(s) => format!("s{s}"),
        CellValue::Number(n) => format!("d{}", n.to_bits()),
        CellValue::Bool(b) => format!("b{b}"),
        CellValue::Other(s) => format!("o{s}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_rows;
    use dataset_profiler_core::config::ProfileLimits;

    fn limits() -> ProfileLimits {
        ProfileLimits {
            max_rows: 10_000,
            max_payload_bytes: 1024 * 1024,
        }
    }

    fn profile_csv(input: &[u8]) -> DatasetProfile {
        let rows = parse_rows(input, "text/csv", &limits()).unwrap();
        let stats = compute_stats(&rows);
        let outliers = detect_anomalies(&stats);
        build_report(Uuid::nil(), &stats, outliers)
    }

    fn profile_json(input: &[u8]) -> DatasetProfile {
        let rows = parse_rows(input, "application/json", &limits()).unwrap();
        let stats = compute_stats(&rows);
        let outliers = detect_anomalies(&stats);
        build_report(Uuid::nil(), &stats, outliers)
    }

    #[test]
    fn test_happy_csv_profile() {
        // The canonical three-row sales file.
        let report = profile_csv(b"id,region,total\n1,n,10\n2,s,20\n3,s,30\n");

        assert_eq!(report.row_count, 3);
        assert_eq!(report.null_counts["id"], 0);
        assert_eq!(report.null_counts["region"], 0);
        assert_eq!(report.null_counts["total"], 0);

        let id = &report.numeric["id"];
        assert_eq!((id.min, id.mean, id.max), (1.0, 2.0, 3.0));
        let total = &report.numeric["total"];
        assert_eq!((total.min, total.mean, total.max), (10.0, 20.0, 30.0));
        assert!(!report.numeric.contains_key("region"));

        assert_eq!(report.anomalies.duplicates_count, 0);
        // Only 3 samples per field, below the outlier threshold.
        assert!(report.anomalies.outliers.is_empty());
    }

    #[test]
    fn test_null_semantics() {
        // Absent field, JSON null, and whitespace-only all count as null.
        let report = profile_json(
            br#"[{"a": 1, "b": "x"}, {"a": null}, {"a": "   ", "b": "y"}]"#,
        );
        assert_eq!(report.null_counts["a"], 2);
        assert_eq!(report.null_counts["b"], 1);
    }

    #[test]
    fn test_booleans_are_not_numeric() {
        let report = profile_json(br#"[{"flag": true}, {"flag": false}]"#);
        assert!(!report.numeric.contains_key("flag"));
    }

    #[test]
    fn test_one_non_numeric_value_disqualifies_the_field() {
        let report = profile_csv(b"v\n1\n2\nabc\n4\n");
        assert!(!report.numeric.contains_key("v"));
        assert!(!report.anomalies.outliers.contains_key("v"));
    }

    #[test]
    fn test_nulls_do_not_disqualify_numeric_fields() {
        // Empty CSV cells count as null but leave the field numeric.
        let report = profile_csv(b"v,w\n1,a\n,b\n3,c\n");
        let v = &report.numeric["v"];
        assert_eq!((v.min, v.mean, v.max), (1.0, 2.0, 3.0));
        assert_eq!(report.null_counts["v"], 1);
    }

    #[test]
    fn test_all_null_field_is_not_numeric() {
        let report = profile_csv(b"v,w\n,a\n,b\n");
        assert!(!report.numeric.contains_key("v"));
        assert_eq!(report.null_counts["v"], 2);
    }

    #[test]
    fn test_duplicates_count_extra_occurrences() {
        // One row repeated three times, one unique: 3 - 1 = 2 extras.
        let report = profile_csv(b"a,b\n1,x\n1,x\n1,x\n2,y\n");
        assert_eq!(report.anomalies.duplicates_count, 2);
    }

    #[test]
    fn test_duplicates_distinguish_value_types() {
        // "10" as a string and 10 as a number are different rows.
        let report = profile_json(br#"[{"a": "10"}, {"a": 10}]"#);
        assert_eq!(report.anomalies.duplicates_count, 0);
    }

    #[test]
    fn test_duplicates_ignore_field_order() {
        let report = profile_json(br#"[{"a": 1, "b": 2}, {"b": 2, "a": 1}]"#);
        assert_eq!(report.anomalies.duplicates_count, 1);
    }

    #[test]
    fn test_outlier_gating_below_four_samples() {
        let report = profile_csv(b"v\n1\n2\n1000\n");
        assert!(!report.anomalies.outliers.contains_key("v"));
    }

    #[test]
    fn test_outlier_gating_zero_iqr() {
        let report = profile_csv(b"v\n5\n5\n5\n5\n5\n100\n");
        // Q1 == Q3 == 5, so the field does not qualify.
        assert!(!report.anomalies.outliers.contains_key("v"));
    }

    #[test]
    fn test_outlier_detection_with_interpolated_quartiles() {
        // Sorted sample: 1 2 3 4 100. Q1 = 2, Q3 = 4, IQR = 2,
        // fences at -1 and 7: only 100 is outside.
        let report = profile_csv(b"v\n1\n2\n3\n4\n100\n");
        let summary = &report.anomalies.outliers["v"];
        assert_eq!(summary.count, 1);
        assert_eq!(summary.examples.len(), 1);
        assert_eq!(summary.examples[0].row_index, 4);
        assert_eq!(summary.examples[0].value, 100.0);
    }

    #[test]
    fn test_qualifying_field_without_outliers_reports_zero() {
        let report = profile_csv(b"v\n1\n2\n3\n4\n");
        let summary = &report.anomalies.outliers["v"];
        assert_eq!(summary.count, 0);
        assert!(summary.examples.is_empty());
    }

    #[test]
    fn test_outlier_examples_capped_at_five_in_first_seen_order() {
        // Six outliers interleaved with a tight base distribution.
        let mut input = String::from("v\n");
        for i in 0..6 {
            input.push_str("10\n11\n12\n13\n");
            input.push_str(&format!("{}\n", 1000 + i));
        }
        let report = profile_csv(input.as_bytes());
        let summary = &report.anomalies.outliers["v"];
        assert_eq!(summary.count, 6);
        assert_eq!(summary.examples.len(), 5);
        // First-seen order: every example's row index is the trailing row
        // of its block of five.
        let indexes: Vec<u64> = summary.examples.iter().map(|e| e.row_index).collect();
        assert_eq!(indexes, vec![4, 9, 14, 19, 24]);
        assert_eq!(summary.examples[0].value, 1000.0);
    }

    #[test]
    fn test_numeric_strings_with_padding_parse() {
        let report = profile_csv(b"v\n 1 \n2.5\n-3e2\n");
        let v = &report.numeric["v"];
        assert_eq!(v.min, -300.0);
        assert_eq!(v.max, 2.5);
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.25), 1.75);
        assert_eq!(quantile(&sorted, 0.5), 2.5);
        assert_eq!(quantile(&sorted, 0.75), 3.25);
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn test_report_serialization_shape() {
        let report = profile_csv(b"id,total\n1,10\n2,20\n");
        let value = serde_json::to_value(&report).unwrap();

        assert!(value["dataset_id"].is_string());
        assert!(value["generated_at"].is_string());
        assert_eq!(value["row_count"], 2);
        assert_eq!(value["null_counts"]["id"], 0);
        assert_eq!(value["numeric"]["total"]["min"], 10.0);
        assert_eq!(value["numeric"]["total"]["mean"], 15.0);
        assert_eq!(value["numeric"]["total"]["max"], 20.0);
        assert_eq!(value["anomalies"]["duplicates_count"], 0);
        assert!(value["anomalies"]["outliers"].is_object());
    }
}
