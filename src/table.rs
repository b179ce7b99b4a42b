use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::dates::parse_iso_date;
use crate::engine::{normalize_decision, DecisionRecord};

const HEADER: &str = "Agent_ID,Simulation_Date,Decision,Reasoning";

/// Write the decision table: one row per completed task. Reasoning is free
/// text, so every field is quoted.
pub fn write_decision_table(records: &[DecisionRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {:?}", parent))?;
        }
    }

    let mut out = String::with_capacity(records.len() * 64);
    out.push_str(HEADER);
    out.push('\n');
    for record in records {
        // The reader is line-based; keep reasoning on one line.
        let reasoning = record.reasoning.replace(['\r', '\n'], " ");
        out.push_str(&format!(
            "{},{},{},{}\n",
            quote(&record.persona_id),
            quote(&record.date.format("%Y-%m-%d").to_string()),
            quote(record.decision.as_str()),
            quote(&reasoning),
        ));
    }

    fs::write(path, out).with_context(|| format!("writing decision table to {:?}", path))?;
    tracing::info!("wrote {} decision records to {:?}", records.len(), path);
    Ok(())
}

/// Read a decision table back. Rows with a malformed date are skipped with a
/// warning; the decision column goes through the same normalization as live
/// model output.
pub fn read_decision_table(path: &Path) -> Result<Vec<DecisionRecord>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading decision table {:?}", path))?;
    let mut lines = raw.lines();

    let header = lines.next().unwrap_or_default();
    if !header.starts_with("Agent_ID") {
        bail!("unexpected decision table header: '{}'", header);
    }

    let mut records = Vec::new();
    for (lineno, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        if fields.len() < 4 {
            tracing::warn!("decision table line {} has {} fields, skipping", lineno + 2, fields.len());
            continue;
        }
        let date = match parse_iso_date(&fields[1]) {
            Ok(date) => date,
            Err(e) => {
                tracing::warn!("decision table line {}: {}", lineno + 2, e);
                continue;
            }
        };
        records.push(DecisionRecord {
            persona_id: fields[0].clone(),
            date,
            decision: normalize_decision(Some(&fields[2])),
            reasoning: fields[3].clone(),
        });
    }
    Ok(records)
}

/// Quote a CSV field, doubling embedded quotes.
pub fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Split one CSV line honoring quoted fields with doubled-quote escapes.
/// Newlines inside fields are not supported; reasoning text is single-line by
/// construction.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Decision;
    use chrono::NaiveDate;

    fn record(id: &str, decision: Decision, reasoning: &str) -> DecisionRecord {
        DecisionRecord {
            persona_id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2020, 12, 10).unwrap(),
            decision,
            reasoning: reasoning.to_string(),
        }
    }

    #[test]
    fn split_handles_quotes_and_embedded_commas() {
        let fields = split_csv_line(r#""a","b, with comma","c ""quoted"" d""#);
        assert_eq!(fields, vec!["a", "b, with comma", "c \"quoted\" d"]);
    }

    #[test]
    fn table_round_trips_awkward_reasoning_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.csv");

        let records = vec![
            record("ultimate_gamer_1", Decision::Yes, "Day one, no hesitation"),
            record(
                "cloud_gamer_3",
                Decision::No,
                r#"Reviews say "runs badly", so I'll wait for a sale"#,
            ),
        ];
        write_decision_table(&records, &path).unwrap();

        let reloaded = read_decision_table(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0].persona_id, "ultimate_gamer_1");
        assert_eq!(reloaded[0].decision, Decision::Yes);
        assert_eq!(reloaded[1].decision, Decision::No);
        assert_eq!(
            reloaded[1].reasoning,
            r#"Reviews say "runs badly", so I'll wait for a sale"#
        );
    }

    #[test]
    fn malformed_date_rows_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.csv");
        std::fs::write(
            &path,
            "Agent_ID,Simulation_Date,Decision,Reasoning\n\
             \"a\",\"2020-12-10\",\"YES\",\"fine\"\n\
             \"b\",\"12/11/2020\",\"NO\",\"bad date\"\n",
        )
        .unwrap();

        let records = read_decision_table(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].persona_id, "a");
    }

    #[test]
    fn unknown_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_decisions.csv");
        std::fs::write(&path, "Date,Stock_Price\n2020-12-10,50.0\n").unwrap();
        assert!(read_decision_table(&path).is_err());
    }
}
