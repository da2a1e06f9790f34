//! Error types for netbed

use thiserror::Error;

/// Result type alias using the netbed Error
pub type Result<T> = std::result::Result<T, Error>;

/// netbed error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Attribute {attribute} of {resource} is unset")]
    AttributeUnset { resource: String, attribute: String },

    #[error("Attribute {attribute} rejected value: {reason}")]
    AttributeConstraintViolation { attribute: String, reason: String },

    #[error("Unknown attribute {attribute} on {kind}")]
    UnknownAttribute { kind: String, attribute: String },

    #[error("Invalid schema for {kind}: {reason}")]
    InvalidSchema { kind: String, reason: String },

    /// Expected outcome of a `get` probe; the lifecycle maps it to `absent`.
    #[error("Resource not found: {key}")]
    ResourceNotFound { key: String },

    #[error("Resource {key} is not registered")]
    UnknownResource { key: String },

    #[error("Resource already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Command exited with code {exit_code}: {command}")]
    CommandExecution {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Dependency {key} reached {state} while waiting for {target}")]
    DependencyTimeout {
        key: String,
        state: String,
        target: String,
    },

    #[error("Output did not match: {0}")]
    ParseMismatch(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid state transition for {key}: {from} -> {to}")]
    InvalidStateTransition {
        key: String,
        from: String,
        to: String,
    },

    #[error("Unknown method {method} on {kind}")]
    UnknownMethod { kind: String, method: String },

    #[error("Requirement {requirement} of {key} is not satisfied")]
    RequirementUnmet { key: String, requirement: String },

    #[error("Image {image} not available locally and no distribution alias to pull")]
    ImageUnresolved { image: String },

    #[error("Hypervisor error: {0}")]
    Hypervisor(String),

    /// The execution transport broke its contract (e.g. no exit code).
    #[error("Integration error: {0}")]
    Integration(String),

    #[error("Address allocation error: {0}")]
    Allocation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error is the well-defined "not found" outcome of a probe
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
    }

    /// Shorthand for a constraint violation
    pub fn constraint(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::AttributeConstraintViolation {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let e = Error::ResourceNotFound {
            key: "container(c1)".to_string(),
        };
        assert!(e.is_not_found());
        assert!(!Error::ParseMismatch("x".into()).is_not_found());
    }

    #[test]
    fn test_command_error_message() {
        let e = Error::CommandExecution {
            command: "ip link set dev eth1 down".to_string(),
            exit_code: 2,
            stderr: "no such device".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Command exited with code 2: ip link set dev eth1 down"
        );
    }
}
