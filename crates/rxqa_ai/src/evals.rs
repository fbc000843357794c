use std::fs;
use std::path::Path;
use std::time::Instant;

use rxqa_core::clock::now_rfc3339_utc;
use rxqa_core::domain::Section;
use rxqa_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::guardrails::{has_citation, NO_CONTEXT_ANSWER};
use crate::pipeline::{Pipeline, DEFAULT_QUERY_TOP_K};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvalCase {
    pub query: String,
    pub drug: Option<String>,
    pub expected_section: Option<Section>,
    pub expected_unit: Option<String>,
}

impl EvalCase {
    fn new(query: &str, drug: &str, section: Section, unit: Option<&str>) -> Self {
        Self {
            query: query.to_string(),
            drug: Some(drug.to_string()),
            expected_section: Some(section),
            expected_unit: unit.map(str::to_string),
        }
    }
}

/// Built-in regression set over common generics.
pub fn default_eval_cases() -> Vec<EvalCase> {
    vec![
        EvalCase::new(
            "What is the recommended starting dose of metformin?",
            "metformin",
            Section::DosageAndAdministration,
            Some("mg"),
        ),
        EvalCase::new(
            "What are the contraindications for lisinopril?",
            "lisinopril",
            Section::Contraindications,
            None,
        ),
        EvalCase::new(
            "What adverse reactions are associated with atorvastatin?",
            "atorvastatin",
            Section::AdverseReactions,
            None,
        ),
        EvalCase::new(
            "How should levothyroxine be stored?",
            "levothyroxine",
            Section::HowSuppliedStorageAndHandling,
            None,
        ),
        EvalCase::new(
            "What should patients be counseled about when taking amlodipine?",
            "amlodipine",
            Section::PatientCounselingInformation,
            None,
        ),
        EvalCase::new(
            "Is metformin safe in renal impairment?",
            "metformin",
            Section::WarningsAndPrecautions,
            None,
        ),
        EvalCase::new(
            "What is the maximum daily dose of lisinopril?",
            "lisinopril",
            Section::DosageAndAdministration,
            Some("mg"),
        ),
    ]
}

#[derive(Debug, Deserialize)]
struct EvalCaseRow {
    query: String,
    #[serde(default)]
    drug: Option<String>,
    #[serde(default)]
    expected_section: Option<String>,
    #[serde(default)]
    expected_unit: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse cases from CSV with a `query,drug,expected_section,expected_unit`
/// header. Only `query` is required.
pub fn parse_eval_cases_csv(csv_text: &str) -> Result<Vec<EvalCase>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let mut cases = Vec::new();
    for (i, result) in rdr.deserialize::<EvalCaseRow>().enumerate() {
        let row_no = i + 2;
        let row = result.map_err(|e| {
            AppError::new("EVAL_CSV_PARSE_FAILED", "Failed to parse eval CSV row")
                .with_details(format!("row={row_no}; err={e}"))
        })?;
        if row.query.trim().is_empty() {
            return Err(AppError::new("EVAL_CSV_PARSE_FAILED", "Eval case query is empty")
                .with_details(format!("row={row_no}")));
        }
        let expected_section = match non_blank(row.expected_section) {
            None => None,
            Some(name) => Some(Section::from_name(&name).ok_or_else(|| {
                AppError::new("EVAL_CSV_PARSE_FAILED", "Unknown expected section")
                    .with_details(format!("row={row_no}; section={name}"))
            })?),
        };
        cases.push(EvalCase {
            query: row.query.trim().to_string(),
            drug: non_blank(row.drug),
            expected_section,
            expected_unit: non_blank(row.expected_unit),
        });
    }
    Ok(cases)
}

pub fn load_eval_cases_csv(path: &Path) -> Result<Vec<EvalCase>, AppError> {
    let text = fs::read_to_string(path).map_err(|e| {
        AppError::new("EVAL_CSV_READ_FAILED", "Failed to read eval CSV")
            .with_details(format!("path={}; err={e}", path.display()))
    })?;
    parse_eval_cases_csv(&text)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalCaseResult {
    pub query: String,
    pub drug: Option<String>,
    pub answer: String,
    pub confidence: f32,
    pub contexts: usize,
    pub grounded: bool,
    pub has_citation: bool,
    pub section_hit: Option<bool>,
    pub unit_hit: Option<bool>,
    pub latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalReport {
    pub generated_at: String,
    pub results: Vec<EvalCaseResult>,
    pub grounding_rate: f64,
    pub citation_rate: f64,
    /// Over cases that name an expected section.
    pub section_hit_rate: f64,
    /// Over cases that name an expected unit.
    pub unit_hit_rate: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub avg_latency_ms: f64,
}

fn eval_case(pipeline: &Pipeline, case: &EvalCase) -> EvalCaseResult {
    let started = Instant::now();
    match pipeline.query(&case.query, case.drug.as_deref(), DEFAULT_QUERY_TOP_K) {
        Ok(resp) => {
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            let grounded = !resp.contexts.is_empty() && !resp.answer.contains(NO_CONTEXT_ANSWER);
            let section_hit = case
                .expected_section
                .map(|want| resp.contexts.iter().any(|c| c.section == want));
            let unit_hit = case
                .expected_unit
                .as_deref()
                .map(|unit| resp.answer.to_lowercase().contains(&unit.to_lowercase()));
            EvalCaseResult {
                query: case.query.clone(),
                drug: case.drug.clone(),
                has_citation: has_citation(&resp.answer),
                confidence: resp.confidence,
                contexts: resp.contexts.len(),
                answer: resp.answer,
                grounded,
                section_hit,
                unit_hit,
                latency_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!(query = %case.query, error = %e, "eval case failed");
            EvalCaseResult {
                query: case.query.clone(),
                drug: case.drug.clone(),
                answer: String::new(),
                confidence: 0.0,
                contexts: 0,
                grounded: false,
                has_citation: false,
                section_hit: case.expected_section.map(|_| false),
                unit_hit: case.expected_unit.as_ref().map(|_| false),
                latency_ms: 0.0,
                error: Some(e.to_string()),
            }
        }
    }
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Nearest-rank percentile over sorted latencies: index `floor(n * p)`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

pub fn summarize(results: Vec<EvalCaseResult>, generated_at: String) -> EvalReport {
    let total = results.len();
    let grounded = results.iter().filter(|r| r.grounded).count();
    let cited = results.iter().filter(|r| r.has_citation).count();
    let sections: Vec<bool> = results.iter().filter_map(|r| r.section_hit).collect();
    let units: Vec<bool> = results.iter().filter_map(|r| r.unit_hit).collect();

    let mut latencies: Vec<f64> = results.iter().map(|r| r.latency_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    let avg = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };

    EvalReport {
        generated_at,
        grounding_rate: rate(grounded, total),
        citation_rate: rate(cited, total),
        section_hit_rate: rate(sections.iter().filter(|h| **h).count(), sections.len()),
        unit_hit_rate: rate(units.iter().filter(|h| **h).count(), units.len()),
        p50_latency_ms: percentile(&latencies, 0.5),
        p95_latency_ms: percentile(&latencies, 0.95),
        avg_latency_ms: avg,
        results,
    }
}

/// Run every case through `pipeline`. A failing case is recorded in its
/// result and does not stop the run.
pub fn run_evals(pipeline: &Pipeline, cases: &[EvalCase]) -> Result<EvalReport, AppError> {
    let results: Vec<EvalCaseResult> = cases.iter().map(|c| eval_case(pipeline, c)).collect();
    let report = summarize(results, now_rfc3339_utc()?);
    info!(
        cases = report.results.len(),
        grounding_rate = report.grounding_rate,
        citation_rate = report.citation_rate,
        p95_latency_ms = report.p95_latency_ms,
        "eval run complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(latency_ms: f64, grounded: bool, section_hit: Option<bool>) -> EvalCaseResult {
        EvalCaseResult {
            query: "q".to_string(),
            drug: None,
            answer: String::new(),
            confidence: 0.9,
            contexts: 1,
            grounded,
            has_citation: grounded,
            section_hit,
            unit_hit: None,
            latency_ms,
            error: None,
        }
    }

    #[test]
    fn default_cases_cover_dosage_with_units() {
        let cases = default_eval_cases();
        assert_eq!(cases.len(), 7);
        let with_units = cases.iter().filter(|c| c.expected_unit.is_some()).count();
        assert_eq!(with_units, 2);
        assert!(cases
            .iter()
            .filter(|c| c.expected_unit.is_some())
            .all(|c| c.expected_section == Some(Section::DosageAndAdministration)));
    }

    #[test]
    fn csv_cases_parse_with_optional_columns() {
        let csv_text = "query,drug,expected_section,expected_unit\n\
                        What is the dose?,metformin,dosage_and_administration,mg\n\
                        Any boxed warning?,,,\n";
        let cases = parse_eval_cases_csv(csv_text).unwrap();
        assert_eq!(
            cases,
            vec![
                EvalCase {
                    query: "What is the dose?".to_string(),
                    drug: Some("metformin".to_string()),
                    expected_section: Some(Section::DosageAndAdministration),
                    expected_unit: Some("mg".to_string()),
                },
                EvalCase {
                    query: "Any boxed warning?".to_string(),
                    drug: None,
                    expected_section: None,
                    expected_unit: None,
                },
            ]
        );
    }

    #[test]
    fn csv_rejects_unknown_section() {
        let err = parse_eval_cases_csv("query,expected_section\nq,DRUG_INTERACTIONS\n").unwrap_err();
        assert_eq!(err.code, "EVAL_CSV_PARSE_FAILED");
        assert!(err.details.unwrap_or_default().contains("row=2"));
    }

    #[test]
    fn summary_rates_and_percentiles() {
        let report = summarize(
            vec![
                result(40.0, true, Some(true)),
                result(10.0, true, Some(false)),
                result(30.0, false, None),
                result(20.0, true, Some(true)),
            ],
            "2026-01-01T00:00:00Z".to_string(),
        );
        assert_eq!(report.grounding_rate, 0.75);
        assert_eq!(report.citation_rate, 0.75);
        assert!((report.section_hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.unit_hit_rate, 0.0);
        assert_eq!(report.p50_latency_ms, 30.0);
        assert_eq!(report.p95_latency_ms, 40.0);
        assert_eq!(report.avg_latency_ms, 25.0);
    }

    #[test]
    fn empty_run_is_all_zero() {
        let report = summarize(Vec::new(), "t".to_string());
        assert_eq!(report.grounding_rate, 0.0);
        assert_eq!(report.p95_latency_ms, 0.0);
        assert_eq!(report.avg_latency_ms, 0.0);
    }
}
