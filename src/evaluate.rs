use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::dates::parse_iso_date;
use crate::engine::DecisionRecord;
use crate::table::split_csv_line;

/// Externally sourced time series (review sentiment or stock price),
/// sorted by date.
#[derive(Debug, Clone)]
pub struct GroundTruth {
    pub value_column: String,
    pub points: Vec<(NaiveDate, f64)>,
}

/// Load a ground-truth CSV: a `Date` column plus the named value column.
/// Malformed rows are skipped and logged; a missing column is a hard error
/// since nothing useful can be computed without it.
pub fn load_ground_truth(path: &Path, value_column: &str) -> Result<GroundTruth> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading ground truth {:?}", path))?;
    let mut lines = raw.lines();

    let header = lines.next().unwrap_or_default();
    let columns = split_csv_line(header);
    let date_idx = columns
        .iter()
        .position(|c| c.trim() == "Date")
        .with_context(|| format!("no Date column in {:?}", path))?;
    let value_idx = columns
        .iter()
        .position(|c| c.trim() == value_column)
        .with_context(|| format!("no {} column in {:?}", value_column, path))?;

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        let parsed = fields.get(date_idx).and_then(|d| {
            // Tolerate timestamps like "2020-12-10 00:00:00".
            let date_part = d.trim().split_whitespace().next().unwrap_or_default();
            parse_iso_date(date_part).ok()
        });
        let value = fields
            .get(value_idx)
            .and_then(|v| v.trim().parse::<f64>().ok());
        match (parsed, value) {
            (Some(date), Some(value)) => points.push((date, value)),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!("skipped {} malformed rows in {:?}", skipped, path);
    }
    if points.is_empty() {
        bail!("ground truth {:?} has no usable rows", path);
    }

    points.sort_by_key(|(date, _)| *date);
    Ok(GroundTruth {
        value_column: value_column.to_string(),
        points,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// One scalar ratio broadcast across every ground-truth date.
    Static,
    /// Per-date ratios inner-joined against ground truth on exact dates.
    Dynamic,
}

/// Correlation as a result state: degenerate inputs are reported, never
/// raised.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationOutcome {
    Defined(f64),
    /// One of the series has zero variance; expected for static mode.
    Undefined { reason: String },
    InsufficientData { joined: usize },
}

impl fmt::Display for CorrelationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationOutcome::Defined(r) => write!(f, "{:.4}", r),
            CorrelationOutcome::Undefined { reason } => write!(f, "undefined ({})", reason),
            CorrelationOutcome::InsufficientData { joined } => {
                write!(f, "insufficient data ({} joined rows)", joined)
            }
        }
    }
}

/// One joined row of the diagnostic series.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPoint {
    pub date: NaiveDate,
    pub truth: f64,
    pub model: f64,
}

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub steam: CorrelationOutcome,
    pub stock: CorrelationOutcome,
    pub merged_steam: Vec<MergedPoint>,
    pub merged_stock: Vec<MergedPoint>,
    pub static_ratio: Option<f64>,
}

/// YES ratio per simulated date, dates ascending.
pub fn daily_yes_ratio(records: &[DecisionRecord]) -> Vec<(NaiveDate, f64)> {
    let mut counts: HashMap<NaiveDate, (usize, usize)> = HashMap::new();
    for record in records {
        let entry = counts.entry(record.date).or_default();
        entry.1 += 1;
        if record.decision.is_yes() {
            entry.0 += 1;
        }
    }
    let mut ratios: Vec<(NaiveDate, f64)> = counts
        .into_iter()
        .map(|(date, (yes, total))| (date, yes as f64 / total as f64))
        .collect();
    ratios.sort_by_key(|(date, _)| *date);
    ratios
}

pub fn overall_yes_ratio(records: &[DecisionRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let yes = records.iter().filter(|r| r.decision.is_yes()).count();
    yes as f64 / records.len() as f64
}

/// Merge simulated ratios against both ground truths and compute the
/// correlation statistics for the requested mode.
pub fn evaluate(
    records: &[DecisionRecord],
    steam: &GroundTruth,
    stock: &GroundTruth,
    mode: EvalMode,
) -> EvalReport {
    let (merged_steam, merged_stock, static_ratio) = match mode {
        EvalMode::Static => {
            let ratio = overall_yes_ratio(records);
            (
                broadcast(steam, ratio),
                broadcast(stock, ratio),
                Some(ratio),
            )
        }
        EvalMode::Dynamic => {
            let daily = daily_yes_ratio(records);
            (
                inner_join(steam, &daily),
                inner_join(stock, &daily),
                None,
            )
        }
    };

    EvalReport {
        steam: correlate(&merged_steam),
        stock: correlate(&merged_stock),
        merged_steam,
        merged_stock,
        static_ratio,
    }
}

fn broadcast(truth: &GroundTruth, ratio: f64) -> Vec<MergedPoint> {
    truth
        .points
        .iter()
        .map(|(date, value)| MergedPoint {
            date: *date,
            truth: *value,
            model: ratio,
        })
        .collect()
}

fn inner_join(truth: &GroundTruth, daily: &[(NaiveDate, f64)]) -> Vec<MergedPoint> {
    let by_date: HashMap<NaiveDate, f64> = daily.iter().copied().collect();
    truth
        .points
        .iter()
        .filter_map(|(date, value)| {
            by_date.get(date).map(|model| MergedPoint {
                date: *date,
                truth: *value,
                model: *model,
            })
        })
        .collect()
}

fn correlate(points: &[MergedPoint]) -> CorrelationOutcome {
    if points.len() < 2 {
        return CorrelationOutcome::InsufficientData {
            joined: points.len(),
        };
    }
    let model: Vec<f64> = points.iter().map(|p| p.model).collect();
    let truth: Vec<f64> = points.iter().map(|p| p.truth).collect();
    match pearson(&model, &truth) {
        Some(r) => CorrelationOutcome::Defined(r),
        None => CorrelationOutcome::Undefined {
            reason: "zero variance in one series; expected for a static ratio".to_string(),
        },
    }
}

/// Pearson correlation coefficient; `None` when either series has zero
/// variance (the statistic is undefined, not zero).
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Diagnostic output for external plotting: the joined series as CSV.
pub fn write_merged_series(points: &[MergedPoint], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {:?}", parent))?;
        }
    }
    let mut out = String::from("Date,Ground_Truth,Model_Ratio\n");
    for point in points {
        out.push_str(&format!(
            "{},{},{}\n",
            point.date.format("%Y-%m-%d"),
            point.truth,
            point.model
        ));
    }
    fs::write(path, out).with_context(|| format!("writing merged series to {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Decision;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(id: &str, d: NaiveDate, decision: Decision) -> DecisionRecord {
        DecisionRecord {
            persona_id: id.to_string(),
            date: d,
            decision,
            reasoning: String::new(),
        }
    }

    fn truth(points: Vec<(NaiveDate, f64)>) -> GroundTruth {
        GroundTruth {
            value_column: "Positive_Ratio".to_string(),
            points,
        }
    }

    #[test]
    fn pearson_matches_known_values() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let up = [2.0, 4.0, 6.0, 8.0];
        let down = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &up).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&xs, &down).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&xs, &[5.0, 5.0, 5.0, 5.0]), None);
    }

    #[test]
    fn daily_ratio_groups_by_date() {
        let d1 = date(2020, 12, 10);
        let d2 = date(2020, 12, 17);
        let records = vec![
            record("a", d1, Decision::Yes),
            record("b", d1, Decision::No),
            record("a", d2, Decision::Yes),
            record("b", d2, Decision::Yes),
        ];
        let ratios = daily_yes_ratio(&records);
        assert_eq!(ratios, vec![(d1, 0.5), (d2, 1.0)]);
    }

    #[test]
    fn static_mode_is_defined_against_varying_truth_undefined_against_flat() {
        let d1 = date(2021, 1, 1);
        let d2 = date(2021, 1, 2);
        let d3 = date(2021, 1, 3);
        let records = vec![
            record("a", d1, Decision::Yes),
            record("b", d1, Decision::No),
        ];

        let varying = truth(vec![(d1, 0.4), (d2, 0.6), (d3, 0.8)]);
        let flat = truth(vec![(d1, 1.0), (d2, 1.0), (d3, 1.0)]);

        let report = evaluate(&records, &varying, &flat, EvalMode::Static);
        assert_eq!(report.static_ratio, Some(0.5));
        // The model series is constant in static mode: undefined either way,
        // reported as a state rather than raised.
        assert!(matches!(report.steam, CorrelationOutcome::Undefined { .. }));
        assert!(matches!(report.stock, CorrelationOutcome::Undefined { .. }));
        assert_eq!(report.merged_steam.len(), 3);
    }

    #[test]
    fn dynamic_mode_joins_on_exact_dates_only() {
        let d1 = date(2021, 1, 1);
        let d2 = date(2021, 1, 8);
        let unmatched = date(2021, 1, 4);
        let records = vec![
            record("a", d1, Decision::Yes),
            record("b", d1, Decision::Yes),
            record("a", d2, Decision::No),
            record("b", d2, Decision::Yes),
        ];

        let gt = truth(vec![(d1, 0.9), (unmatched, 0.7), (d2, 0.5)]);
        let report = evaluate(&records, &gt, &gt, EvalMode::Dynamic);

        assert_eq!(report.merged_steam.len(), 2);
        assert!(matches!(report.steam, CorrelationOutcome::Defined(_)));
        let CorrelationOutcome::Defined(r) = report.steam else {
            unreachable!()
        };
        // model: 1.0 then 0.5, truth: 0.9 then 0.5 -> perfectly correlated.
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_joined_row_reports_insufficient_data() {
        let d1 = date(2021, 1, 1);
        let records = vec![record("a", d1, Decision::Yes)];
        let gt = truth(vec![(d1, 0.9)]);

        let report = evaluate(&records, &gt, &gt, EvalMode::Dynamic);
        assert_eq!(
            report.steam,
            CorrelationOutcome::InsufficientData { joined: 1 }
        );
    }

    #[test]
    fn ground_truth_loader_skips_bad_rows_and_finds_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ground_truth_steam.csv");
        std::fs::write(
            &path,
            "Date,Positive_Ratio,Smoothed_Ratio\n\
             2020-12-11,0.52,0.52\n\
             not-a-date,0.9,0.9\n\
             2020-12-10 00:00:00,0.44,0.44\n",
        )
        .unwrap();

        let gt = load_ground_truth(&path, "Positive_Ratio").unwrap();
        assert_eq!(gt.points.len(), 2);
        // Sorted by date despite file order.
        assert_eq!(gt.points[0].0, date(2020, 12, 10));
        assert!((gt.points[0].1 - 0.44).abs() < 1e-12);

        assert!(load_ground_truth(&path, "Stock_Price").is_err());
    }

    #[test]
    fn merged_series_writes_plottable_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.csv");
        let points = vec![MergedPoint {
            date: date(2021, 2, 1),
            truth: 0.5,
            model: 0.25,
        }];
        write_merged_series(&points, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("Date,Ground_Truth,Model_Ratio\n"));
        assert!(written.contains("2021-02-01,0.5,0.25"));
    }
}
