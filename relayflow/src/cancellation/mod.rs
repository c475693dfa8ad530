//! Cooperative cancellation of a delivery run.

mod token;

pub use token::CancellationToken;
