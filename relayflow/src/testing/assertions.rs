//! Test assertions for delivery outcomes.

use crate::core::Outcome;

/// Asserts that the outcome is a success.
pub fn assert_outcome_succeeded(outcome: &Outcome) {
    assert!(
        outcome.is_success(),
        "Expected success, got error: {:?}",
        outcome.error
    );
}

/// Asserts that the outcome is a terminal failure.
pub fn assert_outcome_terminal(outcome: &Outcome) {
    assert!(
        outcome.is_terminal(),
        "Expected terminal failure, got: {outcome:?}"
    );
}

/// Asserts that the outcome is a retryable failure.
pub fn assert_outcome_retryable(outcome: &Outcome) {
    assert!(
        outcome.is_retryable(),
        "Expected retryable failure, got: {outcome:?}"
    );
}

/// Asserts the status code carried by a failed outcome.
pub fn assert_outcome_status(outcome: &Outcome, expected: u16) {
    assert_eq!(
        outcome.status_code(),
        Some(expected),
        "Expected status {expected}, got {:?}",
        outcome.status_code()
    );
}
