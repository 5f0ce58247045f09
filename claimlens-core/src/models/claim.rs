use serde::{Deserialize, Serialize};

/// Classification of a claim, tagged so resolver output is testable
/// without string inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    PastEvent,
    FutureEvent,
    Ongoing,
    Numeric,
}

/// Optional time horizon extracted from the question, ISO-8601 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Structured representation of a free-text factual question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedClaim {
    /// Normalized yes/no claim, e.g. "The Fed will cut rates by March 2026".
    pub claim: String,
    #[serde(rename = "type")]
    pub kind: ClaimKind,
    #[serde(default)]
    pub time_window: TimeWindow,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Keywords that must appear in matching markets.
    #[serde(default)]
    pub must_include: Vec<String>,
    /// Keywords that should not appear.
    #[serde(default)]
    pub must_exclude: Vec<String>,
    #[serde(default)]
    pub ambiguities: Vec<String>,
}

impl ParsedClaim {
    /// The text the resolver embeds: claim plus anchoring keywords and the
    /// window end when one exists.
    pub fn retrieval_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.claim.as_str()];
        for kw in &self.must_include {
            parts.push(kw.as_str());
        }
        let by_end;
        if let Some(end) = &self.time_window.end {
            by_end = format!("by {end}");
            parts.push(by_end.as_str());
        }
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ClaimKind::FutureEvent).unwrap(),
            "\"future_event\""
        );
        let kind: ClaimKind = serde_json::from_str("\"past_event\"").unwrap();
        assert_eq!(kind, ClaimKind::PastEvent);
    }

    #[test]
    fn retrieval_text_joins_claim_keywords_and_window_end() {
        let claim = ParsedClaim {
            claim: "The Fed will cut rates".to_string(),
            kind: ClaimKind::FutureEvent,
            time_window: TimeWindow {
                start: None,
                end: Some("2026-03-31".to_string()),
            },
            entities: vec![],
            must_include: vec!["fed".to_string(), "rates".to_string()],
            must_exclude: vec![],
            ambiguities: vec![],
        };
        assert_eq!(
            claim.retrieval_text(),
            "The Fed will cut rates fed rates by 2026-03-31"
        );
    }
}
