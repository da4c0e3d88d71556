use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Score and feedback for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Final score (0.0 to 1.0).
    pub score: f64,
    /// Deterministic score from agent statuses, before the qualitative adjustment.
    pub base_score: f64,
    /// Adjustment applied from the qualitative review, after clamping.
    pub adjustment: f64,
    /// Failed or skipped agents on a dependency path to the terminal.
    pub blocking: Vec<String>,
    /// Feedback keyed by agent id.
    pub feedback: BTreeMap<String, String>,
    /// Overall verdict in a sentence or two.
    #[serde(default)]
    pub summary: String,
}

impl EvaluationResult {
    pub fn meets(&self, target_score: f64) -> bool {
        self.score >= target_score
    }

    /// Render feedback as plain text for a revision request.
    pub fn feedback_text(&self) -> String {
        let mut out = format!("Score {:.2}.", self.score);
        if !self.summary.is_empty() {
            out.push(' ');
            out.push_str(&self.summary);
        }
        if !self.blocking.is_empty() {
            out.push_str(&format!("\nBlocking agents: {}.", self.blocking.join(", ")));
        }
        for (agent, note) in &self.feedback {
            out.push_str(&format!("\n- {}: {}", agent, note));
        }
        out
    }
}
