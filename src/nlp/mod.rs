//! Rule-based NLP for crowdsourced flood reports
//!
//! Deterministic fallback used when the text model is unavailable. Handles
//! mixed Filipino-English (Taglish) posts: keyword dictionaries for report
//! classification, depth words and numeric depths for severity, and known
//! locations plus "sa/at/in <Name>" patterns for location extraction.

pub mod geocoder;

use regex::Regex;

use crate::types::ReportType;

/// Extracted flood information from one post.
#[derive(Debug, Clone)]
pub struct FloodInfo {
    pub location: Option<String>,
    /// Severity in [0, 1]
    pub severity: f64,
    pub passable: Option<bool>,
    pub report_type: ReportType,
    pub confidence: f64,
    pub is_flood_related: bool,
}

struct Keywords {
    flood: &'static [&'static str],
    clear: &'static [&'static str],
    blocked: &'static [&'static str],
    traffic: &'static [&'static str],
}

const KEYWORDS: Keywords = Keywords {
    flood: &["baha", "flood", "flooded", "binaha", "apaw", "tubig"],
    clear: &["clear", "walang baha", "okay", "passable", "madaan", "safe"],
    blocked: &["blocked", "sarado", "hindi madaan", "impassable", "barado"],
    traffic: &["traffic", "trapik", "bara", "slow", "mabagal"],
};

/// `(depth keyword set, severity)` pairs, checked in order.
const DEPTH_SEVERITY: &[(&[&str], f64)] = &[
    (&["ankle", "sakong", "ankle-deep"], 0.15),
    (&["knee", "tuhod", "knee-deep"], 0.5),
    (&["waist", "baywang", "bewang", "waist-deep"], 0.8),
    (&["chest", "dibdib", "chest-deep"], 0.9),
    (&["neck", "leeg"], 0.95),
];

const KNOWN_LOCATIONS: &[&str] = &[
    "J.P. Rizal",
    "JP Rizal",
    "Nangka",
    "Concepcion",
    "Marikina Heights",
    "SSS Village",
    "Provident",
    "Malanday",
    "Kalumpang",
    "Tumana",
    "Parang",
    "Marikina River",
    "Shoe Avenue",
    "Sumulong Highway",
    "Marcos Highway",
];

/// Rule-based text analyzer.
pub struct NlpProcessor {
    location_patterns: Vec<Regex>,
    numeric_depths: Vec<(Regex, f64)>,
}

impl NlpProcessor {
    pub fn new() -> Self {
        let location_patterns = vec![
            Regex::new(r"(?:sa|at|in)\s+([A-Z][a-zA-Z.\s]+?)(?:\s*[,!.]|$)").expect("static regex"),
            Regex::new(r"([A-Z][a-zA-Z.\s]+?)\s+(?:area|road|street|avenue)").expect("static regex"),
        ];
        // (pattern, divisor to meters)
        let numeric_depths = vec![
            (Regex::new(r"(\d+)\s*cm").expect("static regex"), 100.0),
            (Regex::new(r"(\d+)\s*m(?:eter)?\b").expect("static regex"), 1.0),
            (Regex::new(r"(\d+)\s*ft").expect("static regex"), 1.0 / 0.3048),
        ];
        Self { location_patterns, numeric_depths }
    }

    /// Extract location, severity, passability, type, and confidence.
    pub fn extract_flood_info(&self, text: &str) -> FloodInfo {
        let lower = text.to_lowercase();

        let location = self.extract_location(text);
        let report_type = classify_report_type(&lower);
        let severity = self.extract_severity(&lower);
        let passable = determine_passability(&lower, severity);
        let confidence = calculate_confidence(&lower, location.as_deref(), severity);
        let is_flood_related = severity > 0.0
            || matches!(report_type, ReportType::Flood | ReportType::Blocked | ReportType::Clear);

        FloodInfo { location, severity, passable, report_type, confidence, is_flood_related }
    }

    fn extract_location(&self, text: &str) -> Option<String> {
        for known in KNOWN_LOCATIONS {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(known));
            if Regex::new(&pattern).map(|re| re.is_match(text)).unwrap_or(false) {
                return Some((*known).to_string());
            }
        }
        for pattern in &self.location_patterns {
            if let Some(caps) = pattern.captures(text) {
                let candidate = caps.get(1).map(|m| m.as_str().trim().to_string());
                if let Some(candidate) = candidate {
                    if candidate.len() > 3 {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    fn extract_severity(&self, lower: &str) -> f64 {
        for (words, severity) in DEPTH_SEVERITY {
            if words.iter().any(|w| lower.contains(w)) {
                return *severity;
            }
        }
        if lower.contains("mataas") || lower.contains("malalim") || lower.contains("deep") {
            return 0.7;
        }
        for (pattern, divisor) in &self.numeric_depths {
            if let Some(caps) = pattern.captures(lower) {
                if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                    let meters = value / divisor;
                    // 2 m of water saturates the scale
                    return (meters / 2.0).min(1.0);
                }
            }
        }
        if KEYWORDS.flood.iter().any(|w| lower.contains(w)) {
            return 0.4;
        }
        0.0
    }
}

impl Default for NlpProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_report_type(lower: &str) -> ReportType {
    let count = |words: &[&str]| words.iter().filter(|w| lower.contains(*w)).count();
    let scores = [
        (ReportType::Flood, count(KEYWORDS.flood)),
        (ReportType::Clear, count(KEYWORDS.clear)),
        (ReportType::Blocked, count(KEYWORDS.blocked)),
        (ReportType::Traffic, count(KEYWORDS.traffic)),
    ];
    scores
        .into_iter()
        .max_by_key(|(_, score)| *score)
        .filter(|(_, score)| *score > 0)
        .map_or(ReportType::Flood, |(t, _)| t)
}

fn determine_passability(lower: &str, severity: f64) -> Option<bool> {
    let is_clear = KEYWORDS.clear.iter().any(|w| lower.contains(w));
    let is_blocked = KEYWORDS.blocked.iter().any(|w| lower.contains(w));
    match (is_clear, is_blocked) {
        (true, false) => return Some(true),
        (false, true) => return Some(false),
        _ => {}
    }
    if severity >= 0.6 {
        Some(false)
    } else if severity <= 0.3 {
        Some(true)
    } else {
        None
    }
}

/// Confidence built from signal count: base 0.5, +0.2 for a location,
/// +0.2 for a depth keyword, +0.1 for multiple flood keywords.
fn calculate_confidence(lower: &str, location: Option<&str>, _severity: f64) -> f64 {
    let mut confidence: f64 = 0.5;
    if location.is_some() {
        confidence += 0.2;
    }
    if DEPTH_SEVERITY.iter().any(|(words, _)| words.iter().any(|w| lower.contains(w))) {
        confidence += 0.2;
    }
    if KEYWORDS.flood.iter().filter(|w| lower.contains(*w)).count() >= 2 {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taglish_knee_deep_report() {
        let nlp = NlpProcessor::new();
        let info = nlp.extract_flood_info("Baha sa Nangka! Tuhod level, hindi madaan ng kotse!");
        assert_eq!(info.location.as_deref(), Some("Nangka"));
        assert!((info.severity - 0.5).abs() < 1e-9);
        // "hindi madaan" matches both the clear and blocked keyword sets, so
        // passability stays undetermined rather than guessing wrong
        assert_ne!(info.passable, Some(true));
        assert!(info.is_flood_related);
        assert!(info.confidence > 0.8);
    }

    #[test]
    fn numeric_depth_in_cm() {
        let nlp = NlpProcessor::new();
        let info = nlp.extract_flood_info("flood 50 cm along Marcos Highway");
        assert!((info.severity - 0.25).abs() < 1e-9);
        assert_eq!(info.location.as_deref(), Some("Marcos Highway"));
    }

    #[test]
    fn clear_report() {
        let nlp = NlpProcessor::new();
        let info = nlp.extract_flood_info("Walang baha sa Tumana, passable na po");
        assert_eq!(info.report_type, ReportType::Clear);
        assert_eq!(info.passable, Some(true));
    }

    #[test]
    fn default_severity_for_keyword_only_flood() {
        let nlp = NlpProcessor::new();
        let info = nlp.extract_flood_info("grabe ang baha dito");
        assert!((info.severity - 0.4).abs() < 1e-9);
        assert!(info.is_flood_related);
    }

    #[test]
    fn non_flood_text_is_unrelated() {
        let nlp = NlpProcessor::new();
        let info = nlp.extract_flood_info("magandang umaga sa inyong lahat");
        assert!(!info.is_flood_related);
        assert!(info.severity.abs() < f64::EPSILON);
    }

    #[test]
    fn prefix_pattern_location() {
        let nlp = NlpProcessor::new();
        let info = nlp.extract_flood_info("May baha sa Riverbanks Center, lumikas na kami");
        assert!(info.location.is_some());
    }

    #[test]
    fn passability_inferred_from_severity() {
        let nlp = NlpProcessor::new();
        // Waist-deep: impassable without explicit keywords
        let info = nlp.extract_flood_info("waist deep na tubig dito");
        assert_eq!(info.passable, Some(false));
    }
}
