//! Analyzer gateway abstraction layer
//!
//! This module defines the `AnalyzerGateway` trait which abstracts the external
//! analysis backend turning free-form report text into structured card
//! proposals. The production implementation speaks the OpenAI-compatible chat
//! completions protocol; deployments without a configured endpoint get a
//! disabled gateway that rejects every request as unavailable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::AnalysisConfig;
use crate::db::models::cards::{CardPriority, CardStatus};

pub mod openai;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

/// Create an analyzer gateway from configuration
///
/// This is the single point where config turns into a gateway instance.
/// Adding a new backend requires adding a match arm here.
pub fn create_analyzer(config: &AnalysisConfig) -> Arc<dyn AnalyzerGateway> {
    match &config.endpoint {
        Some(endpoint) => Arc::new(openai::OpenAiAnalyzer::from(endpoint.clone())),
        None => Arc::new(DisabledAnalyzer),
    }
}

/// Result type for analyzer operations
pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Errors that can occur while obtaining an analysis
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// No analysis backend is configured for this deployment
    #[error("no analyzer backend configured")]
    Unavailable,

    /// The backend was reached but the exchange failed
    #[error("analyzer request failed: {message}")]
    RequestFailed { message: String },

    /// The backend answered but the reply could not be understood
    #[error("analyzer returned an unusable response: {message}")]
    InvalidResponse { message: String },
}

/// A structured unit of work suggested by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CardProposal {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CardStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<CardPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_in_days: Option<i64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<ProposalSubtask>,
}

/// A sub-item of a proposal. Kept in the proposal snapshot; not materialized
/// as its own card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProposalSubtask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CardStatus>,
}

/// The outcome of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Model name reported by the backend
    pub model: String,
    /// Backend's overall confidence in the proposal batch, 0.0 to 1.0
    pub confidence: Option<f64>,
    pub proposals: Vec<CardProposal>,
}

/// Abstract analysis backend interface
#[async_trait]
pub trait AnalyzerGateway: Send + Sync {
    /// Whether a real backend is configured. Checked before any quota or
    /// state is consumed on behalf of a request.
    fn is_available(&self) -> bool;

    /// Analyze free-form report text and return at most `max_proposals`
    /// structured proposals.
    async fn analyze(&self, prompt: &str, max_proposals: usize) -> Result<Analysis>;
}

/// Gateway used when no analyzer endpoint is configured.
pub struct DisabledAnalyzer;

#[async_trait]
impl AnalyzerGateway for DisabledAnalyzer {
    fn is_available(&self) -> bool {
        false
    }

    async fn analyze(&self, _prompt: &str, _max_proposals: usize) -> Result<Analysis> {
        Err(AnalyzerError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_analyzer_is_unavailable() {
        let gateway = DisabledAnalyzer;
        assert!(!gateway.is_available());
        let err = gateway.analyze("anything", 5).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Unavailable));
    }

    #[test]
    fn test_proposal_deserializes_with_minimal_fields() {
        let proposal: CardProposal = serde_json::from_str(r#"{"title": "Fix the door"}"#).unwrap();
        assert_eq!(proposal.title, "Fix the door");
        assert!(proposal.summary.is_none());
        assert!(proposal.labels.is_empty());
        assert!(proposal.subtasks.is_empty());
    }
}
