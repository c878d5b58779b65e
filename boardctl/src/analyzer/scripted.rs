//! Scripted analyzer for tests.
//!
//! Holds a queue of canned outcomes and pops one per `analyze` call, so tests
//! can walk a report through success and failure paths without a network
//! backend. Prompts are recorded for assertions on prompt composition.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Analysis, AnalyzerError, AnalyzerGateway, CardProposal, Result};

enum Outcome {
    Succeed(Analysis),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedAnalyzer {
    outcomes: Mutex<VecDeque<Outcome>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful analysis outcome.
    pub fn push_success(&self, analysis: Analysis) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Outcome::Succeed(analysis));
    }

    /// Queue a request failure with the given message.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Outcome::Fail(message.into()));
    }

    /// Queue a success containing a single minimal proposal.
    pub fn push_single_proposal(&self, title: &str) {
        self.push_success(Analysis {
            model: "scripted-model".to_string(),
            confidence: Some(0.9),
            proposals: vec![CardProposal {
                title: title.to_string(),
                summary: None,
                status: None,
                priority: None,
                due_in_days: None,
                labels: vec![],
                subtasks: vec![],
            }],
        });
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyzerGateway for ScriptedAnalyzer {
    fn is_available(&self) -> bool {
        true
    }

    async fn analyze(&self, prompt: &str, max_proposals: usize) -> Result<Analysis> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        match self.outcomes.lock().unwrap().pop_front() {
            Some(Outcome::Succeed(mut analysis)) => {
                analysis.proposals.truncate(max_proposals);
                Ok(analysis)
            }
            Some(Outcome::Fail(message)) => Err(AnalyzerError::RequestFailed { message }),
            None => Err(AnalyzerError::RequestFailed {
                message: "scripted analyzer has no queued outcome".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outcomes_pop_in_order() {
        let analyzer = ScriptedAnalyzer::new();
        analyzer.push_single_proposal("first");
        analyzer.push_failure("backend exploded");

        let ok = analyzer.analyze("prompt one", 5).await.unwrap();
        assert_eq!(ok.proposals[0].title, "first");

        let err = analyzer.analyze("prompt two", 5).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::RequestFailed { .. }));

        assert_eq!(analyzer.prompts(), vec!["prompt one", "prompt two"]);
    }

    #[tokio::test]
    async fn test_truncates_to_max_proposals() {
        let analyzer = ScriptedAnalyzer::new();
        analyzer.push_success(Analysis {
            model: "scripted-model".to_string(),
            confidence: None,
            proposals: (0..10)
                .map(|i| CardProposal {
                    title: format!("proposal {i}"),
                    summary: None,
                    status: None,
                    priority: None,
                    due_in_days: None,
                    labels: vec![],
                    subtasks: vec![],
                })
                .collect(),
        });

        let analysis = analyzer.analyze("prompt", 3).await.unwrap();
        assert_eq!(analysis.proposals.len(), 3);
    }
}
