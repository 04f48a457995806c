//! Premium-lens propensity scoring.
//!
//! Five independent signals are scored 0..=100 by ordered regex rules, then
//! combined with fixed weights renormalized over the signals present. Fewer
//! than two present signals is a hard floor: tier `insufficient`, score 0.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::insights::CallInsights;

pub const WEIGHT_PREMIUM_LENS: f64 = 0.30;
pub const WEIGHT_READINESS: f64 = 0.20;
pub const WEIGHT_IMPACT_SCALE: f64 = 0.20;
pub const WEIGHT_GLASSES: f64 = 0.15;
pub const WEIGHT_LIFESTYLE: f64 = 0.15;

/// Minimum number of present signals for a real score.
pub const MIN_SIGNALS: usize = 2;

pub const HIGH_THRESHOLD: i32 = 75;
pub const MODERATE_THRESHOLD: i32 = 45;

/// Score used when text is present but no rule matches.
const DEFAULT_SUB_SCORE: f64 = 50.0;

/// Scorer inputs. Blank strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct PropensityInputs {
    pub premium_lens_value: Option<String>,
    pub readiness_value: Option<String>,
    pub impact_scale: Option<i32>,
    pub glasses_value: Option<String>,
    pub activities_value: Option<String>,
    pub hobbies_value: Option<String>,
}

impl From<&CallInsights> for PropensityInputs {
    fn from(insights: &CallInsights) -> Self {
        Self {
            premium_lens_value: insights.premium_lens_interest.clone(),
            readiness_value: insights.readiness.clone(),
            impact_scale: insights.vision_scale,
            glasses_value: insights.glasses_preference.clone(),
            activities_value: insights.activities.clone(),
            hobbies_value: insights.hobbies.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PropensityTier {
    Insufficient,
    Low,
    Moderate,
    High,
}

impl PropensityTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Insufficient => "Insufficient data",
            Self::Low => "Low propensity",
            Self::Moderate => "Moderate propensity",
            Self::High => "High propensity",
        }
    }

    fn from_score(score: i32) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MODERATE_THRESHOLD {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    PremiumLens,
    Readiness,
    ImpactScale,
    Glasses,
    Lifestyle,
}

impl Signal {
    pub fn weight(&self) -> f64 {
        match self {
            Self::PremiumLens => WEIGHT_PREMIUM_LENS,
            Self::Readiness => WEIGHT_READINESS,
            Self::ImpactScale => WEIGHT_IMPACT_SCALE,
            Self::Glasses => WEIGHT_GLASSES,
            Self::Lifestyle => WEIGHT_LIFESTYLE,
        }
    }
}

/// One present signal and its renormalized weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignalScore {
    pub signal: Signal,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PropensityScore {
    pub overall_score: i32,
    pub tier: PropensityTier,
    pub label: String,
    pub signals: Vec<SignalScore>,
}

// =============================================================================
// RULES
// =============================================================================

struct Rule {
    score: f64,
    re: Regex,
}

fn rules(table: &[(f64, &str)]) -> Vec<Rule> {
    table
        .iter()
        .filter_map(|(score, src)| {
            Regex::new(&format!("(?i){}", src))
                .ok()
                .map(|re| Rule { score: *score, re })
        })
        .collect()
}

fn first_match(rules: &[Rule], text: &str) -> f64 {
    rules
        .iter()
        .find(|r| r.re.is_match(text))
        .map(|r| r.score)
        .unwrap_or(DEFAULT_SUB_SCORE)
}

// Ordered most specific first: negations precede the positive words they contain.
static PREMIUM_LENS_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (15.0, r"\bnot interested\b|^\s*no\b|\bdecline|\bstandard\b|\bbasic\b|\bdon'?t want\b"),
        (40.0, r"\b(cost|price|expensive|afford|budget|insurance)\b"),
        (95.0, r"\b(yes|definitely|absolutely|very interested|strongly|eager|premium|multifocal|trifocal|toric)\b"),
        (80.0, r"\b(interested|open to|likely|would like|keen)\b"),
        (55.0, r"\b(maybe|possibly|unsure|not sure|curious|consider\w*|more information|learn more)\b"),
    ])
});

static READINESS_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (20.0, r"\bnot ready\b|\bno plans\b|\bnever\b|\bnot interested\b"),
        (30.0, r"\bnot yet\b|\blater\b|\bnext year\b|\bwait\w*\b|\beventually\b|\bsomeday\b"),
        (90.0, r"\b(ready|schedule|book|asap|as soon as|right away|definitely)\b"),
        (70.0, r"\b(soon|leaning|likely|probably|few months)\b"),
        (50.0, r"\b(maybe|consider\w*|thinking|unsure|not sure|undecided)\b"),
    ])
});

static GLASSES_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (90.0, r"\bno glasses\b|glasses[- ]free|\bwithout glasses\b|\bfree (of|from) glasses\b|\bindependen|\bdon'?t want (to wear )?glasses\b|\bhate\w* glasses\b"),
        (75.0, r"\b(reduce|less|fewer|minimi[sz]e|only for reading|occasional)\b"),
        (40.0, r"\b(don'?t mind|fine with|ok(ay)? with|comfortable with)\b"),
        (30.0, r"\b(prefer|like|keep|happy with) (my |wearing )?glasses\b"),
    ])
});

/// Lifestyle vocabulary. Each term counts at most once.
static LIFESTYLE_TERMS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bgolf", r"\btennis", r"\bpickleball", r"\bswim", r"\bhik(e|ing)",
        r"\brun(s|ning)?\b", r"\bjog", r"\bcycl", r"\bbik(e|ing)", r"\bski",
        r"\bfish", r"\bboat", r"\bsail", r"\bdriv", r"\bread",
        r"\btravel", r"\bgarden", r"\bphotograph", r"\bpaint", r"\bsew",
        r"\bknit", r"\bwoodwork", r"\byoga", r"\bdanc", r"\bhunt",
        r"\bbird", r"\bcook", r"\bcomputer", r"\bsport", r"\bgym",
        r"\bcamp", r"\bcraft",
    ]
    .iter()
    .filter_map(|src| Regex::new(src).ok())
    .collect()
});

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn premium_lens_score(text: &str) -> f64 {
    first_match(&PREMIUM_LENS_RULES, text)
}

pub fn readiness_score(text: &str) -> f64 {
    first_match(&READINESS_RULES, text)
}

pub fn glasses_score(text: &str) -> f64 {
    first_match(&GLASSES_RULES, text)
}

pub fn impact_score(scale: i32) -> f64 {
    f64::from(scale.saturating_mul(10).clamp(0, 100))
}

/// Tiered by number of distinct vocabulary matches.
pub fn lifestyle_score(combined: &str) -> f64 {
    let text = combined.to_lowercase();
    let matches = LIFESTYLE_TERMS.iter().filter(|re| re.is_match(&text)).count();
    match matches {
        n if n >= 5 => 95.0,
        n if n >= 3 => 80.0,
        2 => 65.0,
        1 => 45.0,
        _ => 25.0,
    }
}

/// Score the inputs.
pub fn score(inputs: &PropensityInputs) -> PropensityScore {
    let mut raw: Vec<(Signal, f64)> = Vec::with_capacity(5);

    if let Some(text) = present(&inputs.premium_lens_value) {
        raw.push((Signal::PremiumLens, premium_lens_score(text)));
    }
    if let Some(text) = present(&inputs.readiness_value) {
        raw.push((Signal::Readiness, readiness_score(text)));
    }
    if let Some(scale) = inputs.impact_scale {
        raw.push((Signal::ImpactScale, impact_score(scale)));
    }
    if let Some(text) = present(&inputs.glasses_value) {
        raw.push((Signal::Glasses, glasses_score(text)));
    }
    let lifestyle: Vec<&str> = [present(&inputs.activities_value), present(&inputs.hobbies_value)]
        .into_iter()
        .flatten()
        .collect();
    if !lifestyle.is_empty() {
        raw.push((Signal::Lifestyle, lifestyle_score(&lifestyle.join(" "))));
    }

    if raw.len() < MIN_SIGNALS {
        return PropensityScore {
            overall_score: 0,
            tier: PropensityTier::Insufficient,
            label: PropensityTier::Insufficient.label().to_string(),
            signals: Vec::new(),
        };
    }

    let total_weight: f64 = raw.iter().map(|(s, _)| s.weight()).sum();
    let signals: Vec<SignalScore> = raw
        .into_iter()
        .map(|(signal, score)| SignalScore {
            signal,
            score,
            weight: signal.weight() / total_weight,
        })
        .collect();
    let weighted: f64 = signals.iter().map(|s| s.score * s.weight).sum();
    let overall_score = weighted.round() as i32;
    let tier = PropensityTier::from_score(overall_score);

    PropensityScore {
        overall_score,
        tier,
        label: tier.label().to_string(),
        signals,
    }
}
