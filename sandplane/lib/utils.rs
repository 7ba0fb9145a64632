//! Utility functions.

use rand::{distr::Alphanumeric, Rng};
use uuid::Uuid;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a fresh record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a random alphanumeric token of `length` characters.
pub fn generate_token(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
