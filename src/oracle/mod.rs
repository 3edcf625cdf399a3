//! Evaluation oracle: judges a still of the user's hand against a target sign.

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lesson::SignKind;

pub use gemini::GeminiOracle;

/// Message shown for every failure that is not a judgment
pub const GENERIC_FAILURE: &str = "Analysis failed. Try again.";
/// Score above which a response without an explicit verdict counts as correct
pub const DEFAULT_PASS_SCORE: u8 = 75;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Base64 JPEG, without a data-URL prefix
    pub image: String,
    pub target_sign_id: String,
    pub target_description: String,
    pub sign_kind: SignKind,
}

/// Oracle payload before validation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVerdict {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Validated oracle verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgment {
    pub score: u8,
    pub is_correct: bool,
    pub feedback: String,
}

/// Which field decides correctness when the payload disagrees with itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// `isCorrect` wins; `score > 75` only when the flag is missing
    #[default]
    TrustFlag,
    /// Recompute from `score > n`, ignoring the flag
    ScoreThreshold(u8),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("oracle returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("no response content")]
    Empty,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("oracle did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("daily quota of {0} calls exhausted")]
    QuotaExhausted(u32),
}

impl Judgment {
    /// Boundary check on the oracle payload
    pub fn validate(raw: RawVerdict, policy: VerdictPolicy) -> Result<Self, OracleError> {
        let feedback = raw
            .feedback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| OracleError::Malformed("missing feedback".into()))?;

        let score = match raw.score {
            Some(s) if s.is_finite() && (0.0..=100.0).contains(&s) => Some(s.round() as u8),
            Some(s) => return Err(OracleError::Malformed(format!("score {} out of range", s))),
            None => None,
        };

        let is_correct = match policy {
            VerdictPolicy::TrustFlag => match (raw.is_correct, score) {
                (Some(flag), _) => flag,
                (None, Some(s)) => s > DEFAULT_PASS_SCORE,
                (None, None) => return Err(OracleError::Malformed("no verdict".into())),
            },
            VerdictPolicy::ScoreThreshold(threshold) => match score {
                Some(s) => s > threshold,
                None => return Err(OracleError::Malformed("missing score".into())),
            },
        };

        Ok(Self {
            score: score.unwrap_or(if is_correct { 100 } else { 0 }),
            is_correct,
            feedback,
        })
    }

    /// Failure stand-in shown to the user
    pub fn failure(message: &str) -> Self {
        Self {
            score: 0,
            is_correct: false,
            feedback: message.to_string(),
        }
    }
}

#[async_trait]
pub trait EvaluationOracle: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<RawVerdict, OracleError>;
}
