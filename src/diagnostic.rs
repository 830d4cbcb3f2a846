//! Rendering validation and startup failures as rich diagnostics, the way
//! errors were reported to a terminal before this project grew a service
//! mode (spec §7).

use miette::Diagnostic;
use thiserror::Error;

use crate::config_store::ConfigStoreError;
use crate::validate::ValidationErrors;

/// A fatal startup condition, rendered with `miette`'s fancy reporter
/// instead of a bare `Display` line.
#[derive(Debug, Error, Diagnostic)]
pub enum FatalError {
    #[error("document failed validation with {} error(s)", .0.0.len())]
    #[diagnostic(code(ejabberd_reconcile::validation), help("{}", render_validation(&.0)))]
    Invalid(ValidationErrors),

    #[error(transparent)]
    #[diagnostic(code(ejabberd_reconcile::store))]
    Store(ConfigStoreError),

    /// A tool/usage failure with no document content behind it (a bad CLI
    /// argument, an unparsable JID) — distinct from a rejected document, so
    /// callers can exit `2` for this the way they exit `1` for `Invalid`.
    #[error("{0}")]
    #[diagnostic(code(ejabberd_reconcile::usage))]
    Usage(String),
}

impl From<ConfigStoreError> for FatalError {
    fn from(error: ConfigStoreError) -> Self {
        match error {
            ConfigStoreError::Validation(errors) => FatalError::Invalid(errors),
            other => FatalError::Store(other),
        }
    }
}

fn render_validation(errors: &ValidationErrors) -> String {
    errors
        .0
        .iter()
        .map(|e| format!("{}: {}", e.path, e.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ValidationError;

    #[test]
    fn render_lists_every_error() {
        let errors = ValidationErrors(vec![
            ValidationError {
                path: "groups".to_string(),
                message: "missing mandatory key 'group/owner'".to_string(),
            },
            ValidationError {
                path: "rooms[0].name".to_string(),
                message: "must not be blank".to_string(),
            },
        ]);
        let rendered = render_validation(&errors);
        assert!(rendered.contains("group/owner"));
        assert!(rendered.contains("rooms[0].name"));
    }
}
