//! Display fields resolved once per pipeline run.
//!
//! Everything the templates and the handout need comes from here, so the
//! clinician email, patient email, and document all agree on names, dates,
//! and extracted values.

use chrono::{DateTime, Utc};

use clearview_core::{
    extract, score, CallInsights, ConversationData, DerivedScalars, ExtractionHints, Patient,
    PropensityInputs, PropensityScore,
};

/// One evaluation criterion, flattened for display.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationLine {
    pub criterion: String,
    pub result: String,
    pub rationale: Option<String>,
}

/// Resolved fields for one call.
#[derive(Debug, Clone)]
pub struct DisplayFields {
    /// Known patient name, extracted name, or "Patient".
    pub patient_name: String,
    /// Extracted address, else the tagged patient's address.
    pub email: Option<String>,
    pub insights: CallInsights,
    pub propensity: PropensityScore,
    pub summary: Option<String>,
    pub evaluations: Vec<EvaluationLine>,
    pub outcome_label: &'static str,
    pub call_timestamp: Option<DateTime<Utc>>,
    pub call_duration_secs: Option<i32>,
}

impl DisplayFields {
    pub fn resolve(
        data: &ConversationData,
        scalars: &DerivedScalars,
        call_timestamp: Option<DateTime<Utc>>,
        patient: Option<&Patient>,
    ) -> Self {
        let known_name = patient.map(Patient::display_name);
        let insights = extract(
            data.data_collection(),
            &ExtractionHints::from(scalars),
            known_name.as_deref(),
        );
        let propensity = score(&PropensityInputs::from(&insights));

        let email = insights
            .email
            .clone()
            .or_else(|| patient.and_then(Patient::contact_email).map(String::from));

        let evaluations = data
            .analysis
            .evaluation_criteria_results
            .iter()
            .map(|(criterion, r)| EvaluationLine {
                criterion: humanize_key(criterion),
                result: r
                    .result
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("unknown")
                    .to_string(),
                rationale: r
                    .rationale
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            })
            .collect();

        Self {
            patient_name: insights
                .patient_name
                .clone()
                .unwrap_or_else(|| "Patient".to_string()),
            email,
            propensity,
            summary: data.summary().map(String::from),
            evaluations,
            outcome_label: data.analysis.outcome().label(),
            call_timestamp: data.started_at().or(call_timestamp),
            call_duration_secs: data.duration_secs().or(scalars.call_duration_secs),
            insights,
        }
    }

    /// e.g. "March 4, 2026"
    pub fn formatted_date(&self) -> Option<String> {
        self.call_timestamp
            .map(|ts| ts.format("%B %-d, %Y").to_string())
    }

    /// e.g. "4m 05s"
    pub fn formatted_duration(&self) -> Option<String> {
        self.call_duration_secs.map(format_duration)
    }

    /// First name for salutations.
    pub fn first_name(&self) -> &str {
        self.patient_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.patient_name)
    }
}

pub fn format_duration(secs: i32) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// `"premium_lens_interest"` → `"Premium lens interest"`.
pub fn humanize_key(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
