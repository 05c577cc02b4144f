//! Campaign report export
//!
//! Renders a campaign's jobs into CSV bytes with a stable column set:
//! identity columns, pass-through payload columns, scores, a pass/fail
//! verdict, per-parameter scores, and optionally token usage. Column
//! discovery walks the jobs in row order, so repeated exports of an
//! unchanged campaign are byte-identical.

use thiserror::Error;

use crate::domain::{Campaign, Job, ParameterKind};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("report buffer error: {0}")]
    Buffer(String),
}

/// Export options
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub include_tokens: bool,
    /// Percentage at or above which a non-fatal call counts as passed
    pub pass_threshold: f64,
}

/// Collect names in first-seen order while scanning jobs by row_index
fn discover_columns(jobs: &[Job]) -> (Vec<String>, Vec<String>) {
    let mut extra_columns = Vec::new();
    let mut parameter_names = Vec::new();

    for job in jobs {
        for key in job.payload.extra.keys() {
            if !extra_columns.iter().any(|c| c == key) {
                extra_columns.push(key.clone());
            }
        }
        if let Some(result) = &job.result {
            for parameter in &result.breakdown {
                if !parameter_names.iter().any(|n| n == &parameter.name) {
                    parameter_names.push(parameter.name.clone());
                }
            }
        }
    }

    (extra_columns, parameter_names)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// Render the campaign's jobs to CSV bytes. `jobs` must already be
/// ordered by row_index, the way `db::list_jobs` returns them.
pub fn generate(
    campaign: &Campaign,
    jobs: &[Job],
    options: &ReportOptions,
) -> Result<Vec<u8>, ReportError> {
    let (extra_columns, parameter_names) = discover_columns(jobs);

    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<String> = vec![
        "row".to_string(),
        "call_id".to_string(),
        "user_id".to_string(),
        "agent_name".to_string(),
        "customer_name".to_string(),
        "recording_url".to_string(),
    ];
    header.extend(extra_columns.iter().cloned());
    header.extend(
        [
            "status",
            "score",
            "max_score",
            "percentage",
            "result",
            "fatal_flags",
        ]
        .map(String::from),
    );
    header.extend(parameter_names.iter().map(|n| format!("param: {}", n)));
    header.push("error".to_string());
    if options.include_tokens {
        header.extend(["input_tokens", "output_tokens", "total_tokens"].map(String::from));
    }
    writer.write_record(&header)?;

    for job in jobs {
        let mut record: Vec<String> = vec![
            job.row_index.to_string(),
            job.payload.call_id.clone().unwrap_or_default(),
            job.payload.user_id.clone().unwrap_or_default(),
            job.payload.agent_name.clone().unwrap_or_default(),
            job.payload.customer_name.clone().unwrap_or_default(),
            job.payload.recording_url.clone().unwrap_or_default(),
        ];
        for column in &extra_columns {
            record.push(job.payload.extra.get(column).cloned().unwrap_or_default());
        }

        record.push(job.status.to_string());

        match &job.result {
            Some(result) => {
                let fatal_flags: Vec<&str> = result
                    .breakdown
                    .iter()
                    .filter(|p| p.kind == ParameterKind::Fatal && p.score == 0.0)
                    .map(|p| p.name.as_str())
                    .collect();
                let percentage = if result.max_score > 0.0 {
                    result.score / result.max_score * 100.0
                } else {
                    0.0
                };
                let passed = fatal_flags.is_empty() && percentage >= options.pass_threshold;

                record.push(format_number(result.score));
                record.push(format_number(result.max_score));
                record.push(format!("{:.1}", percentage));
                record.push(if passed { "PASS" } else { "FAIL" }.to_string());
                record.push(fatal_flags.join("; "));

                for name in &parameter_names {
                    let value = result
                        .breakdown
                        .iter()
                        .find(|p| &p.name == name)
                        .map(|p| format_number(p.score))
                        .unwrap_or_default();
                    record.push(value);
                }
            }
            None => {
                // No audit result: empty score block and parameter cells
                record.extend(std::iter::repeat(String::new()).take(5 + parameter_names.len()));
            }
        }

        record.push(job.error.clone().unwrap_or_default());

        if options.include_tokens {
            match job.result.as_ref().and_then(|r| r.token_usage) {
                Some(usage) => {
                    record.push(usage.input_tokens.to_string());
                    record.push(usage.output_tokens.to_string());
                    record.push(usage.total().to_string());
                }
                None => record.extend(std::iter::repeat(String::new()).take(3)),
            }
        }

        writer.write_record(&record)?;
    }

    tracing::debug!(
        campaign = %campaign.id,
        rows = jobs.len(),
        include_tokens = options.include_tokens,
        "report generated"
    );

    writer
        .into_inner()
        .map_err(|e| ReportError::Buffer(e.to_string()))
}
