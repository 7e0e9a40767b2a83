//! Manifest artifacts and their validation lifecycle.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::TransitionError;
use super::run::Stage;

/// How far an artifact got through validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Unvalidated,
    SchemaOk,
    SchemaFailed,
    /// Schema-valid, with advisory lint warnings.
    LintWarned,
}

impl ValidationState {
    fn as_str(&self) -> &'static str {
        match self {
            ValidationState::Unvalidated => "unvalidated",
            ValidationState::SchemaOk => "schema_ok",
            ValidationState::SchemaFailed => "schema_failed",
            ValidationState::LintWarned => "lint_warned",
        }
    }
}

/// Manifest text plus where it lives and how far it has been validated.
///
/// State changes consume the artifact and only move forward. Once
/// `SchemaFailed`, an artifact is frozen: callers regenerate, never patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestArtifact {
    raw_text: String,
    source_path: Option<PathBuf>,
    validation_state: ValidationState,
    /// Hex SHA-256 of `raw_text`.
    digest: String,
}

impl ManifestArtifact {
    pub fn new(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let digest = text_digest(&raw_text);
        Self {
            raw_text,
            source_path: None,
            validation_state: ValidationState::Unvalidated,
            digest,
        }
    }

    /// An authored manifest read from `path`.
    pub fn from_file(path: impl Into<PathBuf>, raw_text: impl Into<String>) -> Self {
        Self::new(raw_text).at_path(path)
    }

    /// Record where the text was written. Only valid before validation.
    pub fn at_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.validation_state == ValidationState::Unvalidated {
            self.source_path = Some(path.into());
        }
        self
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn validation_state(&self) -> ValidationState {
        self.validation_state
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Schema-valid, with or without lint warnings.
    pub fn is_buildable(&self) -> bool {
        matches!(
            self.validation_state,
            ValidationState::SchemaOk | ValidationState::LintWarned
        )
    }

    pub fn mark_schema_ok(self) -> Result<Self, TransitionError> {
        self.transition(ValidationState::Unvalidated, ValidationState::SchemaOk)
    }

    pub fn mark_schema_failed(self) -> Result<Self, TransitionError> {
        self.transition(ValidationState::Unvalidated, ValidationState::SchemaFailed)
    }

    pub fn mark_lint_warned(self) -> Result<Self, TransitionError> {
        self.transition(ValidationState::SchemaOk, ValidationState::LintWarned)
    }

    fn transition(
        mut self,
        from: ValidationState,
        to: ValidationState,
    ) -> Result<Self, TransitionError> {
        if self.validation_state != from {
            return Err(TransitionError {
                from: self.validation_state.as_str().to_string(),
                to: to.as_str().to_string(),
                stage: Stage::ValidatingSchema,
            });
        }
        self.validation_state = to;
        Ok(self)
    }
}

/// Hex SHA-256 of `text`.
pub fn text_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lifecycle() {
        let artifact = ManifestArtifact::new("version: 1\nlayers: []");
        assert!(!artifact.is_buildable());

        let artifact = artifact.mark_schema_ok().unwrap();
        assert!(artifact.is_buildable());

        let artifact = artifact.mark_lint_warned().unwrap();
        assert_eq!(artifact.validation_state(), ValidationState::LintWarned);
        assert!(artifact.is_buildable());
    }

    #[test]
    fn test_schema_failed_is_frozen() {
        let failed = ManifestArtifact::new("version: 1")
            .mark_schema_failed()
            .unwrap();
        assert!(!failed.is_buildable());
        assert!(failed.clone().mark_schema_ok().is_err());
        assert!(failed.clone().mark_lint_warned().is_err());

        let moved = failed.clone().at_path("elsewhere.vcr");
        assert_eq!(moved.source_path(), None);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = ManifestArtifact::new("version: 1");
        let b = ManifestArtifact::from_file("x.vcr", "version: 1");
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_ne!(a.digest(), ManifestArtifact::new("version: 2").digest());
    }
}
