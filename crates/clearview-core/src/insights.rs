//! Insight extraction from voice-agent data collection results.
//!
//! Agent configurations name their data collection fields freely
//! (`vision_impact_scale`, `impact_rating`, `how_much_does_it_affect_you`),
//! so each semantic field is located by keyword. For every field the results
//! are scanned in delivery order and the first key containing any of that
//! field's keywords (case-insensitive) wins. Fields match independently; a
//! key may feed more than one field. Keys not consumed by any field are
//! reported under `other`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::DerivedScalars;
use crate::payload::{ConversationData, DataCollection, DataCollectionEntry};

/// Semantic fields, with the ordered key keywords each one matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightField {
    PatientName,
    Occupation,
    Sentiment,
    Readiness,
    PremiumLens,
    ImpactScale,
    Activities,
    Hobbies,
    GlassesPreference,
    LaserInterest,
    MedicalHistory,
    Concerns,
    Email,
}

impl InsightField {
    pub const ALL: [InsightField; 13] = [
        Self::PatientName,
        Self::Occupation,
        Self::Sentiment,
        Self::Readiness,
        Self::PremiumLens,
        Self::ImpactScale,
        Self::Activities,
        Self::Hobbies,
        Self::GlassesPreference,
        Self::LaserInterest,
        Self::MedicalHistory,
        Self::Concerns,
        Self::Email,
    ];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::PatientName => &["patient_name", "name"],
            Self::Occupation => &["occupation", "job", "profession", "career", "work"],
            Self::Sentiment => &["sentiment", "mood", "feeling", "attitude"],
            Self::Readiness => &["readiness", "ready", "decision", "timeline"],
            Self::PremiumLens => &["premium", "lens", "upgrade", "iol"],
            Self::ImpactScale => &["scale", "impact", "rating", "score"],
            Self::Activities => &["activities", "activity", "affected", "daily"],
            Self::Hobbies => &["hobbies", "hobby", "interests", "leisure"],
            Self::GlassesPreference => &["glasses", "spectacles", "independence", "preference"],
            Self::LaserInterest => &["laser", "lasik", "refractive"],
            Self::MedicalHistory => &["medical", "history", "condition", "medication", "health"],
            Self::Concerns => &["concern", "question", "worr", "fear", "hesitat"],
            Self::Email => &["email", "e-mail", "e_mail"],
        }
    }

    fn matches_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.keywords().iter().any(|kw| key.contains(kw))
    }
}

/// First entry whose key matches the field, in delivery order.
pub fn find_field<'a>(
    results: &'a DataCollection,
    field: InsightField,
) -> Option<(&'a str, &'a DataCollectionEntry)> {
    results.iter().find(|(key, _)| field.matches_key(key))
}

/// Accept an address only if it has both `@` and `.`. No further validation.
pub fn is_plausible_email(value: &str) -> bool {
    value.contains('@') && value.contains('.')
}

/// Impact scale: an integer in `1..=10`, anything else is absent.
pub fn parse_impact_scale(value: &str) -> Option<i32> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|n| (1..=10).contains(n))
}

// =============================================================================
// LABEL BUCKETS
// =============================================================================

fn patterns(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|src| Regex::new(&format!("(?i){}", src)).ok())
        .collect()
}

/// A label, the patterns that select it, and patterns that veto it.
struct Bucket<L> {
    label: L,
    matches: Vec<Regex>,
    unless: Vec<Regex>,
}

impl<L: Copy> Bucket<L> {
    fn new(label: L, sources: &[&str]) -> Self {
        Self {
            label,
            matches: patterns(sources),
            unless: Vec::new(),
        }
    }

    fn unless(mut self, sources: &[&str]) -> Self {
        self.unless = patterns(sources);
        self
    }

    fn accepts(&self, text: &str) -> bool {
        self.matches.iter().any(|re| re.is_match(text))
            && !self.unless.iter().any(|re| re.is_match(text))
    }
}

/// Ordered buckets; the first one that accepts the text wins.
struct Buckets<L: Copy + 'static> {
    buckets: Vec<Bucket<L>>,
    fallback: L,
}

impl<L: Copy + 'static> Buckets<L> {
    fn classify(&self, text: &str) -> L {
        self.buckets
            .iter()
            .find(|bucket| bucket.accepts(text))
            .map(|bucket| bucket.label)
            .unwrap_or(self.fallback)
    }
}

/// Normalized surgical readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum ReadinessLabel {
    #[serde(rename = "Ready")]
    Ready,
    #[serde(rename = "Leaning Yes")]
    LeaningYes,
    #[serde(rename = "Not Ready")]
    NotReady,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl ReadinessLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::LeaningYes => "Leaning Yes",
            Self::NotReady => "Not Ready",
            Self::Unknown => "Unknown",
        }
    }

    /// Classify free text. Buckets are tried in the order
    /// Ready, Leaning Yes, Not Ready.
    pub fn classify(text: &str) -> Self {
        READINESS_BUCKETS.classify(text)
    }
}

static READINESS_BUCKETS: Lazy<Buckets<ReadinessLabel>> = Lazy::new(|| Buckets {
    buckets: vec![
        Bucket::new(
            ReadinessLabel::Ready,
            &[
                r"\b(yes|ready|definitely|absolutely)\b",
                r"\b(eager|keen|wants?) to (proceed|schedule|book|go ahead)",
                r"\basap\b|\bas soon as possible\b|\bright away\b",
            ],
        )
        // "not ready", "isn't quite ready", "definitely not ready"
        .unless(&[r"(\bnot|n't|\bnever|\bno)\s+(\w+\s+)?(yes|ready|definitely|absolutely)\b"]),
        Bucket::new(
            ReadinessLabel::LeaningYes,
            &[r"\b(leaning|probably|likely|considering|open to|interested|soon)\b"],
        ),
        Bucket::new(
            ReadinessLabel::NotReady,
            &[r"\b(not|no|undecided|unsure|hesitant|wait|later|never)\b|n't\b"],
        ),
    ],
    fallback: ReadinessLabel::Unknown,
});

/// Normalized premium lens interest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum LensInterestLabel {
    #[serde(rename = "Not Interested")]
    NotInterested,
    #[serde(rename = "Interested")]
    Interested,
    #[serde(rename = "Considering")]
    Considering,
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl LensInterestLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInterested => "Not Interested",
            Self::Interested => "Interested",
            Self::Considering => "Considering",
            Self::Unknown => "Unknown",
        }
    }

    /// Buckets are tried in the order Not Interested, Interested, Considering.
    pub fn classify(text: &str) -> Self {
        LENS_BUCKETS.classify(text)
    }
}

static LENS_BUCKETS: Lazy<Buckets<LensInterestLabel>> = Lazy::new(|| Buckets {
    buckets: vec![
        Bucket::new(
            LensInterestLabel::NotInterested,
            &[
                r"\bnot interested\b",
                r"^\s*no\b",
                r"\b(declined?|standard lens|basic lens)\b",
            ],
        ),
        Bucket::new(
            LensInterestLabel::Interested,
            &[r"\b(yes|interested|definitely|wants?|premium|multifocal|toric)\b"],
        ),
        Bucket::new(
            LensInterestLabel::Considering,
            &[r"\b(maybe|consider\w*|unsure|not sure|cost|price|more information)\b"],
        ),
    ],
    fallback: LensInterestLabel::Unknown,
});

// =============================================================================
// EXTRACTION
// =============================================================================

/// Scalars already known for the call, used when the results lack a field.
#[derive(Debug, Clone, Default)]
pub struct ExtractionHints {
    pub vision_scale: Option<i32>,
    pub activities: Option<String>,
}

impl From<&DerivedScalars> for ExtractionHints {
    fn from(scalars: &DerivedScalars) -> Self {
        Self {
            vision_scale: scalars.vision_scale,
            activities: scalars.activities_affected.clone(),
        }
    }
}

/// A result not claimed by any semantic field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OtherResult {
    pub key: String,
    pub value: Option<String>,
    pub rationale: Option<String>,
}

/// Typed signals for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallInsights {
    pub patient_name: Option<String>,
    pub occupation: Option<String>,
    pub sentiment: Option<String>,
    pub readiness: Option<String>,
    pub readiness_label: ReadinessLabel,
    pub premium_lens_interest: Option<String>,
    pub premium_lens_label: LensInterestLabel,
    pub vision_scale: Option<i32>,
    pub activities: Option<String>,
    pub hobbies: Option<String>,
    pub glasses_preference: Option<String>,
    pub laser_interest: Option<String>,
    pub medical_history: Option<String>,
    pub concerns: Option<String>,
    pub email: Option<String>,
    pub other: Vec<OtherResult>,
}

/// Name fields the agent sometimes packs into a JSON string.
fn parse_name_json(raw: &str) -> Option<(Option<String>, Option<String>)> {
    if !raw.trim_start().starts_with('{') {
        return None;
    }
    let parsed: JsonValue = serde_json::from_str(raw).ok()?;
    let text = |key: &str| {
        parsed
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    Some((text("patient_name").or_else(|| text("name")), text("occupation")))
}

/// Extract typed insights. Pure; no I/O.
///
/// `known_patient_name` (from a tagged patient record) takes precedence over
/// any name found in the results.
pub fn extract(
    results: &DataCollection,
    hints: &ExtractionHints,
    known_patient_name: Option<&str>,
) -> CallInsights {
    let mut consumed: Vec<&str> = Vec::new();
    let mut text_of = |field: InsightField| -> (bool, Option<String>) {
        match find_field(results, field) {
            Some((key, entry)) => {
                if !consumed.contains(&key) {
                    consumed.push(key);
                }
                (true, entry.text().map(String::from))
            }
            None => (false, None),
        }
    };

    let (_, raw_name) = text_of(InsightField::PatientName);
    let (_, occupation) = text_of(InsightField::Occupation);
    let (_, sentiment) = text_of(InsightField::Sentiment);
    let (_, readiness) = text_of(InsightField::Readiness);
    let (_, premium_lens_interest) = text_of(InsightField::PremiumLens);
    let (scale_found, raw_scale) = text_of(InsightField::ImpactScale);
    let (activities_found, activities) = text_of(InsightField::Activities);
    let (_, hobbies) = text_of(InsightField::Hobbies);
    let (_, glasses_preference) = text_of(InsightField::GlassesPreference);
    let (_, laser_interest) = text_of(InsightField::LaserInterest);
    let (_, medical_history) = text_of(InsightField::MedicalHistory);
    let (_, concerns) = text_of(InsightField::Concerns);
    let (_, raw_email) = text_of(InsightField::Email);

    let (extracted_name, json_occupation) = match raw_name.as_deref().and_then(parse_name_json) {
        Some((name, occ)) => (name, occ),
        None => (raw_name, None),
    };

    let vision_scale = if scale_found {
        raw_scale.as_deref().and_then(parse_impact_scale)
    } else {
        hints.vision_scale
    };
    let activities = if activities_found {
        activities
    } else {
        hints.activities.clone()
    };

    let other = results
        .iter()
        .filter(|(key, _)| !consumed.contains(key))
        .map(|(key, entry)| OtherResult {
            key: key.to_string(),
            value: entry.value.clone(),
            rationale: entry.rationale.clone(),
        })
        .collect();

    let insights = CallInsights {
        patient_name: known_patient_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .or(extracted_name),
        occupation: occupation.or(json_occupation),
        sentiment,
        readiness_label: readiness
            .as_deref()
            .map(ReadinessLabel::classify)
            .unwrap_or_default(),
        readiness,
        premium_lens_label: premium_lens_interest
            .as_deref()
            .map(LensInterestLabel::classify)
            .unwrap_or_default(),
        premium_lens_interest,
        vision_scale,
        activities,
        hobbies,
        glasses_preference,
        laser_interest,
        medical_history,
        concerns,
        email: raw_email.filter(|e| is_plausible_email(e)),
        other,
    };

    tracing::trace!(
        fields_matched = consumed.len(),
        other = insights.other.len(),
        has_email = insights.email.is_some(),
        "Extracted call insights"
    );
    insights
}

/// Scalars cached on the call record at ingestion.
pub fn derive_scalars(data: &ConversationData) -> DerivedScalars {
    let insights = extract(data.data_collection(), &ExtractionHints::default(), None);
    DerivedScalars {
        call_outcome: data.analysis.outcome(),
        call_duration_secs: data.duration_secs(),
        vision_scale: insights.vision_scale,
        activities_affected: insights.activities,
        stated_preference: insights
            .premium_lens_interest
            .or(insights.glasses_preference),
        extracted_email: insights.email,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallOutcome;
    use serde_json::json;

    fn results(pairs: &[(&str, &str)]) -> DataCollection {
        pairs
            .iter()
            .map(|(k, v)| (*k, DataCollectionEntry::new(*v, "")))
            .collect()
    }

    fn plain(pairs: &[(&str, &str)]) -> CallInsights {
        extract(&results(pairs), &ExtractionHints::default(), None)
    }

    #[test]
    fn test_impact_scale_in_range() {
        assert_eq!(plain(&[("vision_impact_scale", "8")]).vision_scale, Some(8));
        assert_eq!(plain(&[("impact_rating", " 1 ")]).vision_scale, Some(1));
    }

    #[test]
    fn test_impact_scale_out_of_range_is_absent() {
        assert_eq!(plain(&[("vision_impact_scale", "11")]).vision_scale, None);
        assert_eq!(plain(&[("vision_impact_scale", "0")]).vision_scale, None);
        assert_eq!(plain(&[("vision_impact_scale", "seven")]).vision_scale, None);
    }

    #[test]
    fn test_invalid_scale_does_not_fall_back_to_hint() {
        let hints = ExtractionHints {
            vision_scale: Some(4),
            activities: None,
        };
        let insights = extract(&results(&[("vision_impact_scale", "11")]), &hints, None);
        assert_eq!(insights.vision_scale, None);
    }

    #[test]
    fn test_hints_fill_missing_fields() {
        let hints = ExtractionHints {
            vision_scale: Some(6),
            activities: Some("night driving".to_string()),
        };
        let insights = extract(&DataCollection::new(), &hints, None);
        assert_eq!(insights.vision_scale, Some(6));
        assert_eq!(insights.activities.as_deref(), Some("night driving"));
    }

    #[test]
    fn test_json_name_field() {
        let insights = plain(&[(
            "patient_name",
            r#"{"patient_name":"Ann Lee","occupation":"Librarian"}"#,
        )]);
        assert_eq!(insights.patient_name.as_deref(), Some("Ann Lee"));
        assert_eq!(insights.occupation.as_deref(), Some("Librarian"));
    }

    #[test]
    fn test_plain_name_field() {
        let insights = plain(&[("patient_name", "Ann Lee")]);
        assert_eq!(insights.patient_name.as_deref(), Some("Ann Lee"));
        assert_eq!(insights.occupation, None);
    }

    #[test]
    fn test_malformed_json_name_is_kept_verbatim() {
        let insights = plain(&[("name", "{not json")]);
        assert_eq!(insights.patient_name.as_deref(), Some("{not json"));
    }

    #[test]
    fn test_known_patient_name_wins() {
        let insights = extract(
            &results(&[("patient_name", "Annie")]),
            &ExtractionHints::default(),
            Some("Ann Lee"),
        );
        assert_eq!(insights.patient_name.as_deref(), Some("Ann Lee"));
    }

    #[test]
    fn test_first_match_wins_in_delivery_order() {
        let insights = plain(&[("impact_score", "3"), ("vision_scale", "9")]);
        assert_eq!(insights.vision_scale, Some(3));

        let insights = plain(&[("vision_scale", "9"), ("impact_score", "3")]);
        assert_eq!(insights.vision_scale, Some(9));
    }

    #[test]
    fn test_key_match_is_case_insensitive() {
        assert_eq!(plain(&[("Vision_IMPACT", "5")]).vision_scale, Some(5));
    }

    #[test]
    fn test_email_requires_at_and_dot() {
        assert_eq!(
            plain(&[("email_address", "ann@example.com")]).email.as_deref(),
            Some("ann@example.com")
        );
        assert_eq!(plain(&[("email_address", "ann at example")]).email, None);
        assert_eq!(plain(&[("email_address", "ann@localhost")]).email, None);
    }

    #[test]
    fn test_other_bucket_excludes_consumed_keys() {
        let insights = plain(&[
            ("vision_impact_scale", "7"),
            ("favourite_colour", "blue"),
            ("impact_rating", "2"),
        ]);
        let keys: Vec<&str> = insights.other.iter().map(|o| o.key.as_str()).collect();
        // impact_rating was not the first impact match, so it is unclaimed.
        assert_eq!(keys, vec!["favourite_colour", "impact_rating"]);
    }

    #[test]
    fn test_one_key_can_feed_two_fields() {
        // "lens_preference" matches both premium lens and glasses preference.
        let insights = plain(&[("lens_preference", "multifocal")]);
        assert_eq!(insights.premium_lens_interest.as_deref(), Some("multifocal"));
        assert_eq!(insights.glasses_preference.as_deref(), Some("multifocal"));
        assert!(insights.other.is_empty());
    }

    #[test]
    fn test_readiness_buckets_priority() {
        assert_eq!(ReadinessLabel::classify("Yes, ready to book"), ReadinessLabel::Ready);
        assert_eq!(
            ReadinessLabel::classify("Probably, after the holidays"),
            ReadinessLabel::LeaningYes
        );
        assert_eq!(ReadinessLabel::classify("Not ready yet"), ReadinessLabel::NotReady);
        assert_eq!(ReadinessLabel::classify("hmm"), ReadinessLabel::Unknown);
        // Matches both Leaning Yes ("interested") and Not Ready ("wait").
        assert_eq!(
            ReadinessLabel::classify("interested but wants to wait"),
            ReadinessLabel::LeaningYes
        );
    }

    #[test]
    fn test_readiness_word_matches_mid_sentence() {
        assert_eq!(
            ReadinessLabel::classify("I'm ready to schedule"),
            ReadinessLabel::Ready
        );
        assert_eq!(
            ReadinessLabel::classify("She said she is definitely going ahead"),
            ReadinessLabel::Ready
        );
        assert_eq!(
            ReadinessLabel::classify("He isn't quite ready"),
            ReadinessLabel::NotReady
        );
        assert_eq!(
            ReadinessLabel::classify("definitely not ready this year"),
            ReadinessLabel::NotReady
        );
    }

    #[test]
    fn test_lens_buckets() {
        assert_eq!(
            LensInterestLabel::classify("Not interested in upgrades"),
            LensInterestLabel::NotInterested
        );
        assert_eq!(
            LensInterestLabel::classify("Very interested in multifocal"),
            LensInterestLabel::Interested
        );
        assert_eq!(
            LensInterestLabel::classify("Maybe, depends on cost"),
            LensInterestLabel::Considering
        );
        assert_eq!(LensInterestLabel::classify(""), LensInterestLabel::Unknown);
    }

    #[test]
    fn test_labels_default_to_unknown_when_absent() {
        let insights = plain(&[]);
        assert_eq!(insights.readiness_label, ReadinessLabel::Unknown);
        assert_eq!(insights.premium_lens_label, LensInterestLabel::Unknown);
    }

    #[test]
    fn test_derive_scalars() {
        let data = ConversationData::from_value(&json!({
            "conversation_id": "conv_1",
            "metadata": {"call_duration_secs": 95},
            "analysis": {
                "call_successful": true,
                "data_collection_results": {
                    "vision_impact_scale": {"value": "8", "rationale": ""},
                    "activities_affected": {"value": "reading, golf"},
                    "premium_lens_interest": {"value": "yes"},
                    "patient_email": {"value": "ann@example.com"}
                }
            }
        }));
        let scalars = derive_scalars(&data);
        assert_eq!(scalars.call_outcome, CallOutcome::Succeeded);
        assert_eq!(scalars.call_duration_secs, Some(95));
        assert_eq!(scalars.vision_scale, Some(8));
        assert_eq!(scalars.activities_affected.as_deref(), Some("reading, golf"));
        assert_eq!(scalars.stated_preference.as_deref(), Some("yes"));
        assert_eq!(scalars.extracted_email.as_deref(), Some("ann@example.com"));
    }
}
