use serde::{Deserialize, Serialize};

use super::SessionOutcome;

/// Flattens outcomes into display lines, keeping arrival order.
///
/// A completed device contributes its transcript verbatim, a failed device
/// a single line naming it. Nothing is sorted, merged or framed.
pub fn aggregate_lines(outcomes: &[SessionOutcome]) -> Vec<String> {
    let mut lines = Vec::new();
    for outcome in outcomes {
        match outcome {
            SessionOutcome::Completed { transcript, .. } => {
                lines.extend(transcript.lines().iter().cloned());
            }
            SessionOutcome::Failed { address, error } => {
                lines.push(SessionOutcome::failure_line(address, error));
            }
        }
    }
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Serializable view of one [`SessionOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub address: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&SessionOutcome> for OutcomeRecord {
    fn from(outcome: &SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed {
                address,
                transcript,
            } => OutcomeRecord {
                address: address.clone(),
                status: OutcomeStatus::Completed,
                lines: transcript.lines().to_vec(),
                error: None,
            },
            SessionOutcome::Failed { address, error } => OutcomeRecord {
                address: address.clone(),
                status: OutcomeStatus::Failed,
                lines: Vec::new(),
                error: Some(error.to_string()),
            },
        }
    }
}

/// Renders outcomes as a pretty-printed JSON array in arrival order.
pub fn json_report(outcomes: &[SessionOutcome]) -> Result<String, serde_json::Error> {
    let records = outcomes.iter().map(OutcomeRecord::from).collect::<Vec<_>>();
    serde_json::to_string_pretty(&records)
}

#[cfg(test)]
mod tests {
    use super::{OutcomeRecord, OutcomeStatus, aggregate_lines, json_report};
    use crate::error::GatherError;
    use crate::session::{SessionOutcome, Transcript};

    fn completed(address: &str, lines: &[&str]) -> SessionOutcome {
        let mut transcript = Transcript::default();
        for line in lines {
            transcript.push_line(*line);
        }
        SessionOutcome::Completed {
            address: address.to_string(),
            transcript,
        }
    }

    fn failed(address: &str) -> SessionOutcome {
        SessionOutcome::Failed {
            address: address.to_string(),
            error: GatherError::ConnectionRefused("auth rejected".to_string()),
        }
    }

    #[test]
    fn lines_follow_arrival_order_without_framing() {
        let outcomes = vec![
            completed("10.0.0.3", &["r3#show version", "r3#"]),
            failed("10.0.0.2"),
            completed("10.0.0.1", &["r1#show version", "r1#"]),
        ];

        let lines = aggregate_lines(&outcomes);

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "r3#show version");
        assert_eq!(lines[1], "r3#");
        assert_eq!(
            lines[2],
            "10.0.0.2 failed: connection refused: auth rejected"
        );
        assert_eq!(lines[4], "r1#");
    }

    #[test]
    fn duplicate_lines_are_kept() {
        let outcomes = vec![completed("a", &["x", "x"]), completed("b", &["x"])];
        assert_eq!(aggregate_lines(&outcomes), vec!["x", "x", "x"]);
    }

    #[test]
    fn json_report_carries_status_and_error() {
        let outcomes = vec![completed("10.0.0.1", &["r1#"]), failed("10.0.0.2")];

        let report = json_report(&outcomes).expect("serialize");
        let records: Vec<OutcomeRecord> = serde_json::from_str(&report).expect("parse");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, OutcomeStatus::Completed);
        assert_eq!(records[0].lines, vec!["r1#"]);
        assert!(records[0].error.is_none());
        assert_eq!(records[1].status, OutcomeStatus::Failed);
        assert!(records[1].lines.is_empty());
        assert!(report.contains("\"status\": \"failed\""));
    }
}
