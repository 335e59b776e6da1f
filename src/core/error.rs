//! Error types shared by the vocabulary, parser and compiler.

use thiserror::Error;

/// Everything that can go wrong while building a model from action rules.
///
/// Compilation is a deterministic function of its inputs, so none of these
/// are worth retrying without changing the action text or the model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpaError {
    /// Malformed action text.
    #[error("syntax error at {position}: {message} (near '{fragment}')")]
    Syntax {
        message: String,
        /// Offending substring of the action text.
        fragment: String,
        /// Byte offset of `fragment` in the action text.
        position: usize,
    },

    /// A module port or symbol name that does not resolve.
    #[error("{}", name_resolution_message(.name, .action))]
    NameResolution { name: String, action: Option<usize> },

    /// Operands or transform shapes of incompatible dimensionality.
    #[error("dimensionality mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        context: String,
    },

    /// A structural rule was violated (`owner.attr: message`).
    #[error("{}", validation_message(.attr, .message, .owner))]
    Validation {
        attr: String,
        message: String,
        owner: Option<String>,
    },

    /// A symbol used where a unitary pointer is required was created as an
    /// ordinary pointer.
    #[error("symbol '{symbol}' in the {dimensions}-D vocabulary is not unitary")]
    NotUnitary { symbol: String, dimensions: usize },

    #[error("a module named '{name}' is already registered")]
    DuplicateName { name: String },
}

pub type Result<T> = std::result::Result<T, SpaError>;

impl SpaError {
    pub fn validation(attr: impl Into<String>, message: impl Into<String>) -> Self {
        SpaError::Validation {
            attr: attr.into(),
            message: message.into(),
            owner: None,
        }
    }

    pub fn validation_in(
        owner: impl Into<String>,
        attr: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SpaError::Validation {
            attr: attr.into(),
            message: message.into(),
            owner: Some(owner.into()),
        }
    }

    pub fn mismatch(expected: usize, actual: usize, context: impl Into<String>) -> Self {
        SpaError::DimensionMismatch {
            expected,
            actual,
            context: context.into(),
        }
    }

    /// Attach the index of the action being compiled to a name resolution
    /// error that was raised without one.
    pub fn in_action(self, index: usize) -> Self {
        match self {
            SpaError::NameResolution { name, action: None } => SpaError::NameResolution {
                name,
                action: Some(index),
            },
            other => other,
        }
    }
}

fn name_resolution_message(name: &str, action: &Option<usize>) -> String {
    match action {
        Some(i) => format!("cannot resolve '{name}' in action {i}"),
        None => format!("cannot resolve '{name}'"),
    }
}

fn validation_message(attr: &str, message: &str, owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!("{owner}.{attr}: {message}"),
        None => format!("{attr}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_includes_owner() {
        let e = SpaError::validation_in("Cortical", "actions", "must be unconditional");
        assert_eq!(e.to_string(), "Cortical.actions: must be unconditional");

        let e = SpaError::validation("name", "must start with an uppercase letter");
        assert_eq!(e.to_string(), "name: must start with an uppercase letter");
    }

    #[test]
    fn in_action_only_fills_missing_index() {
        let e = SpaError::NameResolution {
            name: "x".into(),
            action: None,
        }
        .in_action(3);
        assert_eq!(
            e,
            SpaError::NameResolution {
                name: "x".into(),
                action: Some(3)
            }
        );
        assert!(e.to_string().contains("action 3"));

        let e = e.in_action(5);
        assert!(e.to_string().contains("action 3"));
    }
}
