//! Error type shared by every component of the provider.

use thiserror::Error;

use crate::upgrade::UpgradeStage;

/// Errors surfaced by translation, persistence and upgrade operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required field is missing or empty.
    #[error("invalid {profile}: {message}")]
    Validation { profile: String, message: String },

    /// The persisted api model could not be decoded.
    #[error("failed to decode api model: {0}")]
    Decode(String),

    /// Nothing matched the lookup.
    #[error("{what} not found: {detail}")]
    NotFound { what: &'static str, detail: String },

    /// More than one candidate matched where exactly one was expected.
    #[error("ambiguous {what}: {detail}")]
    Ambiguity { what: &'static str, detail: String },

    /// A secret could not be resolved.
    #[error("credential error: {0}")]
    Credential(String),

    /// Deployment, VM or cluster access failure.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// A single node step failed or exceeded its timeout.
    #[error("upgrade of node {node} in pool {pool} failed: {message}")]
    UpgradeStep {
        pool: String,
        node: String,
        message: String,
    },

    /// An upgrade stage failed.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: UpgradeStage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn validation(profile: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            profile: profile.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, detail: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            detail: detail.into(),
        }
    }

    pub(crate) fn in_stage(self, stage: UpgradeStage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The error with any stage wrappers removed.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost upgrade stage this error was raised in, if any.
    #[must_use]
    pub fn stage(&self) -> Option<UpgradeStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether the root cause is a failed lookup.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Whether the root cause is a validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_unwraps_stages() {
        let err = Error::not_found("api model", "no blob").in_stage(UpgradeStage::Load);
        assert_eq!(err.stage(), Some(UpgradeStage::Load));
        assert!(err.is_not_found());
        assert!(matches!(err.root(), Error::NotFound { .. }));
    }

    #[test]
    fn test_stage_display_names_stage_and_cause() {
        let err = Error::UpgradeStep {
            pool: "agentpool2".to_string(),
            node: "k8s-agentpool2-12345678-0".to_string(),
            message: "drain failed".to_string(),
        }
        .in_stage(UpgradeStage::ExecuteUpgrade);
        let text = err.to_string();
        assert!(text.starts_with("execute_upgrade stage failed"));
        assert!(text.contains("agentpool2"));
    }
}
