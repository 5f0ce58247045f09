//! Claim parsing — turns a free-text question into a `ParsedClaim`.
//!
//! The primary parser calls an OpenRouter chat model with a JSON response
//! format. Any failure (network, bad status, unparseable JSON) degrades to
//! `heuristic_parse`, so parsing never blocks resolution.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{ClaimKind, Entity, ParsedClaim, TimeWindow};

/// Default chat model for claim parsing.
pub const DEFAULT_PARSER_MODEL: &str = "openai/gpt-4o-mini";

const SYSTEM_PROMPT: &str = r#"You are a claim parser that converts questions into structured, checkable claims for prediction markets.

Output ONLY valid JSON matching this schema:
{
  "claim": string,  // normalized yes/no claim (e.g., "The Fed will cut rates by March 2026")
  "type": "past_event" | "future_event" | "ongoing" | "numeric",
  "time_window": { "start": string|null (ISO date), "end": string|null (ISO date) },
  "entities": [{ "name": string, "type": string }],
  "must_include": string[],  // keywords that must appear in matching markets
  "must_exclude": string[],  // keywords that should not appear
  "ambiguities": string[]    // list any ambiguities in the question
}

Rules:
- Convert questions to clear yes/no claims
- Extract time windows if present
- Identify key entities (people, organizations, events)
- If ambiguous, still produce best-effort claim but list ambiguities
- must_include should contain essential terms
- must_exclude should contain clearly wrong terms"#;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Question cannot be empty")]
    EmptyQuestion,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key")]
    MissingApiKey,
}

/// Turns a question into a structured claim.
#[async_trait]
pub trait ClaimParser: Send + Sync {
    async fn parse(&self, question: &str) -> Result<ParsedClaim, ParseError>;

    /// Parser name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Heuristic parser
// ============================================================================

/// Rule-based parse with no network dependency. Used as the degradation
/// path of the OpenRouter parser and directly in offline mode.
pub fn heuristic_parse(question: &str) -> ParsedClaim {
    let question = question.trim();
    let lower = question.to_lowercase();

    let has_future = Regex::new(r"will|going to|by \d{4}|in \d{4}")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false);
    let has_past = Regex::new(r"did|was|were|happened")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false);
    let has_numeric = question.chars().any(|c| c.is_ascii_digit());

    let kind = if has_future {
        ClaimKind::FutureEvent
    } else if has_past {
        ClaimKind::PastEvent
    } else if has_numeric {
        ClaimKind::Numeric
    } else {
        ClaimKind::Ongoing
    };

    let year = Regex::new(r"\b(20\d{2})\b")
        .ok()
        .and_then(|re| re.captures(question))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let entities = Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b")
        .map(|re| {
            re.find_iter(question)
                .map(|m| m.as_str().to_string())
                .filter(|e| !matches!(e.as_str(), "Will" | "The" | "This" | "That"))
                .take(5)
                .map(|name| Entity {
                    name,
                    kind: "unknown".to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let must_include: Vec<String> = lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 3)
        .filter(|w| !matches!(w.as_str(), "will" | "this" | "that" | "what" | "when" | "where"))
        .take(5)
        .collect();

    ParsedClaim {
        claim: question.to_string(),
        kind,
        time_window: TimeWindow {
            start: None,
            end: year.map(|y| format!("{y}-12-31T23:59:59Z")),
        },
        entities,
        must_include,
        must_exclude: vec![],
        ambiguities: vec!["Used fallback parser - may be less accurate".to_string()],
    }
}

/// `ClaimParser` over `heuristic_parse`, for offline deployments and tests.
pub struct HeuristicClaimParser;

#[async_trait]
impl ClaimParser for HeuristicClaimParser {
    async fn parse(&self, question: &str) -> Result<ParsedClaim, ParseError> {
        if question.trim().is_empty() {
            return Err(ParseError::EmptyQuestion);
        }
        Ok(heuristic_parse(question))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

// ============================================================================
// OpenRouter parser
// ============================================================================

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub api_key: String,
    pub model: String,
}

impl ParserConfig {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .unwrap_or_default();
        Self { api_key, model }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: serde_json::Value,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenRouter chat-completions claim parser with internal heuristic
/// degradation. `parse` only errors on an empty question.
pub struct OpenRouterClaimParser {
    client: Client,
    config: ParserConfig,
    base_url: String,
}

impl OpenRouterClaimParser {
    pub fn new(config: ParserConfig) -> Result<Self, ParseError> {
        Self::with_base_url(config, "https://openrouter.ai/api/v1".to_string())
    }

    pub fn with_base_url(config: ParserConfig, base_url: String) -> Result<Self, ParseError> {
        if config.api_key.is_empty() {
            return Err(ParseError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn parse_via_model(&self, question: &str) -> Result<ParsedClaim, ParseError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: question.to_string(),
                },
            ],
            response_format: serde_json::json!({ "type": "json_object" }),
            temperature: 0.3,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ParseError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ParseError::InvalidResponse("no choices in response".to_string()))?;

        serde_json::from_str::<ParsedClaim>(&content)
            .map_err(|e| ParseError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ClaimParser for OpenRouterClaimParser {
    async fn parse(&self, question: &str) -> Result<ParsedClaim, ParseError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ParseError::EmptyQuestion);
        }

        match self.parse_via_model(question).await {
            Ok(claim) => Ok(claim),
            Err(e) => {
                tracing::warn!(error = %e, "OpenRouter claim parsing failed, using heuristic parser");
                Ok(heuristic_parse(question))
            }
        }
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_parser(base_url: String) -> OpenRouterClaimParser {
        OpenRouterClaimParser::with_base_url(
            ParserConfig {
                api_key: "test-key".to_string(),
                model: DEFAULT_PARSER_MODEL.to_string(),
            },
            base_url,
        )
        .expect("Failed to create parser")
    }

    #[test]
    fn heuristic_classifies_future_event_and_extracts_year() {
        let parsed = heuristic_parse("Will the Fed cut rates by March 2026?");
        assert_eq!(parsed.kind, ClaimKind::FutureEvent);
        assert_eq!(
            parsed.time_window.end.as_deref(),
            Some("2026-12-31T23:59:59Z")
        );
        assert!(parsed.entities.iter().any(|e| e.name == "Fed"));
        assert!(parsed.must_include.contains(&"rates".to_string()));
        assert!(!parsed.ambiguities.is_empty());
    }

    #[test]
    fn heuristic_classifies_past_event() {
        let parsed = heuristic_parse("Did the ceasefire happen?");
        assert_eq!(parsed.kind, ClaimKind::PastEvent);
        assert_eq!(parsed.time_window.end, None);
    }

    #[test]
    fn heuristic_classifies_numeric_without_tense_markers() {
        let parsed = heuristic_parse("Bitcoin above $100,000?");
        assert_eq!(parsed.kind, ClaimKind::Numeric);
    }

    #[test]
    fn heuristic_classifies_ongoing_as_last_resort() {
        let parsed = heuristic_parse("Is the strike ongoing?");
        assert_eq!(parsed.kind, ClaimKind::Ongoing);
    }

    #[test]
    fn heuristic_skips_question_words_in_entities() {
        let parsed = heuristic_parse("Will The United States win?");
        assert!(parsed.entities.iter().all(|e| e.name != "Will"));
        assert!(parsed.entities.iter().any(|e| e.name.contains("United States")));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let parser = HeuristicClaimParser;
        match parser.parse("   ").await {
            Err(ParseError::EmptyQuestion) => {}
            other => panic!("Expected EmptyQuestion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_response_is_parsed_into_claim() {
        let mock_server = MockServer::start().await;
        let parser = test_parser(mock_server.uri());

        let claim_json = serde_json::json!({
            "claim": "The Fed will cut rates by March 2026",
            "type": "future_event",
            "time_window": { "start": null, "end": "2026-03-31" },
            "entities": [{ "name": "Fed", "type": "organization" }],
            "must_include": ["fed", "rates"],
            "must_exclude": [],
            "ambiguities": []
        });

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": claim_json.to_string() } }]
            })))
            .mount(&mock_server)
            .await;

        let parsed = parser.parse("Will the Fed cut rates?").await.unwrap();
        assert_eq!(parsed.claim, "The Fed will cut rates by March 2026");
        assert_eq!(parsed.kind, ClaimKind::FutureEvent);
        assert!(parsed.ambiguities.is_empty());
    }

    #[tokio::test]
    async fn api_failure_degrades_to_heuristic() {
        let mock_server = MockServer::start().await;
        let parser = test_parser(mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let parsed = parser.parse("Will the Fed cut rates by 2026?").await.unwrap();
        assert_eq!(parsed.kind, ClaimKind::FutureEvent);
        // heuristic output is flagged so callers can see the degradation
        assert!(!parsed.ambiguities.is_empty());
    }

    #[tokio::test]
    async fn malformed_model_json_degrades_to_heuristic() {
        let mock_server = MockServer::start().await;
        let parser = test_parser(mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "not json at all" } }]
            })))
            .mount(&mock_server)
            .await;

        let parsed = parser.parse("Did the merger close?").await.unwrap();
        assert_eq!(parsed.kind, ClaimKind::PastEvent);
    }

    #[test]
    fn missing_api_key_is_rejected_at_construction() {
        let result = OpenRouterClaimParser::new(ParserConfig {
            api_key: String::new(),
            model: DEFAULT_PARSER_MODEL.to_string(),
        });
        assert!(matches!(result, Err(ParseError::MissingApiKey)));
    }
}
