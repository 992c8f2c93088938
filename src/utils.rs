//! Utility functions for the lobby service

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::types::Region;

const CREDENTIAL_TOKEN_LEN: usize = 5;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a lobby credential such as `eu_k3f9a`
pub fn generate_credential(region: Region) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_TOKEN_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}_{}", region.slug(), token)
}

/// Whole minutes elapsed between two instants, never negative
pub fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_minutes().max(0)
}
