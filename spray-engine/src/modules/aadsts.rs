//! Interpretation of Azure AD `AADSTS` error codes
//!
//! Both the token endpoint and the autologon endpoint report failures as
//! `AADSTSxxxxx` codes; the mapping to raw outcomes is shared.

use crate::types::RawOutcome;
use regex::Regex;
use std::sync::OnceLock;

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"AADSTS(\d{5,7})").expect("static regex is valid"))
}

/// First `AADSTS` code found in `text`
pub fn extract_code(text: &str) -> Option<u32> {
    code_pattern()
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

/// Map an `AADSTS` code to a raw outcome
pub fn interpret(code: u32) -> RawOutcome {
    match code {
        // Invalid password
        50126 => RawOutcome::AuthFailure,
        // No password set / cloud password missing
        50056 => RawOutcome::AuthFailure,
        // Account disabled
        50057 => RawOutcome::AuthFailure,
        // User or tenant does not exist
        50034 | 50059 | 50128 | 90002 => RawOutcome::UserNotFound,
        // Smart lockout
        50053 => RawOutcome::AccountLocked,
        // Correct password, but authentication cannot complete here
        50055 => RawOutcome::Success(Some("password expired".to_string())),
        50072 | 50074 | 50076 | 50079 | 50158 => {
            RawOutcome::Success(Some("MFA required".to_string()))
        }
        53003 => RawOutcome::Success(Some("conditional access policy".to_string())),
        50131 => RawOutcome::Success(Some("device or location policy".to_string())),
        7000218 | 700016 => RawOutcome::Success(Some("client restriction".to_string())),
        // Request loop / throttling
        50196 | 90033 => RawOutcome::Throttled,
        // Pass-through authentication agent timed out
        80014 => RawOutcome::TransportError("pass-through authentication timed out".to_string()),
        other => RawOutcome::Unrecognized(format!("AADSTS{}", other)),
    }
}

/// Interpret the first `AADSTS` code in `text`, if any
pub fn interpret_text(text: &str) -> Option<RawOutcome> {
    extract_code(text).map(interpret)
}
