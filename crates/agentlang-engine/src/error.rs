// ABOUTME: Error types for agent attempts and whole runs.
// ABOUTME: RunError names the failing unit, the attempt count and the innermost failure kind.

use thiserror::Error;

use agentlang_core::DefinitionError;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::result::FailureReport;

/// Why a single agent attempt failed. Both variants are recoverable by policy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("agent '{agent}' exceeded the iteration cap of {cap} provider calls")]
    IterationLimitExceeded { agent: String, cap: u32 },
}

impl AttemptError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Provider(err) => err.kind(),
            AttemptError::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
        }
    }
}

/// Errors that end a top-level run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no agent or pipeline named '{0}'")]
    UnknownTarget(String),

    #[error("agent '{unit}' failed after {attempts} attempt(s) [{}]: {source}", .source.kind())]
    UnitFailed {
        unit: String,
        attempts: u32,
        source: AttemptError,
        report: Box<FailureReport>,
    },

    #[error(
        "pipeline '{pipeline}' failed at stage '{stage}' after {attempts} attempt(s) [{}]",
        .source.innermost_kind()
    )]
    PipelineStageFailure {
        pipeline: String,
        stage: String,
        attempts: u32,
        source: Box<RunError>,
        report: Box<FailureReport>,
    },
}

impl RunError {
    /// Stable label of the deepest failure, e.g. `rate_limit` or `iteration_limit_exceeded`.
    pub fn innermost_kind(&self) -> &'static str {
        match self {
            RunError::Definition(_) => "definition",
            RunError::Config(_) => "config",
            RunError::UnknownTarget(_) => "unknown_target",
            RunError::UnitFailed { source, .. } => source.kind(),
            RunError::PipelineStageFailure { source, .. } => source.innermost_kind(),
        }
    }

    /// Usage and trace accumulated up to the failure, when the run got that far.
    pub fn report(&self) -> Option<&FailureReport> {
        match self {
            RunError::UnitFailed { report, .. } | RunError::PipelineStageFailure { report, .. } => {
                Some(report.as_ref())
            }
            _ => None,
        }
    }

    /// Attempts spent on the failing unit or stage.
    pub fn attempts(&self) -> u32 {
        match self {
            RunError::UnitFailed { attempts, .. }
            | RunError::PipelineStageFailure { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// One-line summary naming every failing stage down to the innermost unit.
    pub fn summary(&self) -> String {
        match self {
            RunError::PipelineStageFailure {
                pipeline,
                stage,
                attempts,
                source,
                ..
            } => format!(
                "pipeline '{pipeline}' stage '{stage}' ({attempts} attempt(s)) -> {}",
                source.summary()
            ),
            other => other.to_string(),
        }
    }

    pub(crate) fn with_report(mut self, new_report: FailureReport) -> Self {
        if let RunError::UnitFailed { report, .. } | RunError::PipelineStageFailure { report, .. } =
            &mut self
        {
            **report = new_report;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_failure(kind: ProviderError) -> RunError {
        RunError::UnitFailed {
            unit: "writer".to_string(),
            attempts: 3,
            source: AttemptError::Provider(kind),
            report: Box::default(),
        }
    }

    #[test]
    fn unit_failure_names_unit_attempts_and_kind() {
        let err = unit_failure(ProviderError::RateLimited("429".to_string()));
        let message = err.to_string();
        assert!(message.contains("'writer'"));
        assert!(message.contains("3 attempt(s)"));
        assert!(message.contains("[rate_limit]"));
        assert_eq!(err.innermost_kind(), "rate_limit");
        assert_eq!(err.attempts(), 3);
    }

    #[test]
    fn pipeline_failure_reports_innermost_kind() {
        let inner = RunError::UnitFailed {
            unit: "a".to_string(),
            attempts: 1,
            source: AttemptError::IterationLimitExceeded {
                agent: "a".to_string(),
                cap: 10,
            },
            report: Box::default(),
        };
        let err = RunError::PipelineStageFailure {
            pipeline: "flow".to_string(),
            stage: "a".to_string(),
            attempts: 1,
            source: Box::new(inner),
            report: Box::default(),
        };

        assert_eq!(err.innermost_kind(), "iteration_limit_exceeded");
        assert!(err.to_string().contains("stage 'a'"));
        let summary = err.summary();
        assert!(summary.starts_with("pipeline 'flow' stage 'a'"));
        assert!(summary.contains("agent 'a' failed"));
    }

    #[test]
    fn with_report_replaces_accounting() {
        let report = FailureReport {
            provider_calls: 7,
            ..FailureReport::default()
        };
        let err = unit_failure(ProviderError::Auth("401".to_string())).with_report(report);
        assert_eq!(err.report().unwrap().provider_calls, 7);
        assert!(RunError::UnknownTarget("x".to_string()).report().is_none());
    }
}
