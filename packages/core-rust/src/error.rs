//! Error taxonomy shared by every layer of the dispatch framework.
//!
//! Each concrete error enum (`ConfigError` here, the loader, builder,
//! bootstrap and dispatch errors in `opgroup-server`) maps onto one
//! [`ErrorKind`] so callers can branch on the class of failure without
//! matching on message text.

use std::fmt;

/// Class of a framework failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The configuration file does not exist.
    ConfigNotFound,
    /// The configuration file could not be parsed or failed shape validation.
    ConfigFormatInvalid,
    /// A group locator could not be resolved or its constructor failed.
    GroupLoadFailed,
    /// Two operations share a fully-qualified name. Non-fatal at build time.
    DuplicateOperationName,
    /// The operation name is not of the form `group.operation`.
    MalformedOperationName,
    /// No group is registered under the requested name.
    UnknownGroup,
    /// The group exists but has no operation with the requested name.
    UnknownOperation,
    /// Arguments did not satisfy the operation's input schema.
    InputValidationFailed,
    /// The handler did not finish before the deadline.
    OperationTimedOut,
    /// The handler itself returned a failure.
    HandlerFailed,
}

impl ErrorKind {
    /// Returns the canonical snake-case label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigNotFound => "config_not_found",
            Self::ConfigFormatInvalid => "config_format_invalid",
            Self::GroupLoadFailed => "group_load_failed",
            Self::DuplicateOperationName => "duplicate_operation_name",
            Self::MalformedOperationName => "malformed_operation_name",
            Self::UnknownGroup => "unknown_group",
            Self::UnknownOperation => "unknown_operation",
            Self::InputValidationFailed => "input_validation_failed",
            Self::OperationTimedOut => "operation_timed_out",
            Self::HandlerFailed => "handler_failed",
        }
    }

    /// Returns `true` for failures that surface while the service is being
    /// assembled, as opposed to failures of an individual call.
    #[must_use]
    pub fn is_startup(self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound
                | Self::ConfigFormatInvalid
                | Self::GroupLoadFailed
                | Self::DuplicateOperationName
        )
    }

    /// Process exit code a command-line front end should use for this kind.
    ///
    /// Configuration failures and group-load failures get distinct codes.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::ConfigNotFound | Self::ConfigFormatInvalid => 2,
            Self::GroupLoadFailed => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_group_failures_have_distinct_exit_codes() {
        assert_eq!(ErrorKind::ConfigNotFound.exit_code(), 2);
        assert_eq!(ErrorKind::ConfigFormatInvalid.exit_code(), 2);
        assert_eq!(ErrorKind::GroupLoadFailed.exit_code(), 3);
        assert_eq!(ErrorKind::HandlerFailed.exit_code(), 1);
    }

    #[test]
    fn startup_kinds() {
        assert!(ErrorKind::ConfigNotFound.is_startup());
        assert!(ErrorKind::DuplicateOperationName.is_startup());
        assert!(!ErrorKind::UnknownGroup.is_startup());
        assert!(!ErrorKind::OperationTimedOut.is_startup());
    }

    #[test]
    fn display_uses_snake_case_label() {
        assert_eq!(ErrorKind::InputValidationFailed.to_string(), "input_validation_failed");
    }
}
