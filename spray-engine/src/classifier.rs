//! Maps raw module outcomes to verdicts

use crate::types::{ModuleFamily, RawOutcome, Verdict};

/// Classify an outcome for the given module family.
///
/// Validation modules never reach the scheduler; their outcomes are
/// classified with the enumeration table.
pub fn classify(family: ModuleFamily, outcome: &RawOutcome) -> Verdict {
    match family {
        ModuleFamily::Enumerate | ModuleFamily::Validate => classify_enumeration(outcome),
        ModuleFamily::Spray => classify_spray(outcome),
    }
}

pub fn classify_enumeration(outcome: &RawOutcome) -> Verdict {
    match outcome {
        RawOutcome::UserNotFound => Verdict::NotExists,
        RawOutcome::Success(_) | RawOutcome::AuthFailure | RawOutcome::AccountLocked => {
            Verdict::Exists
        }
        RawOutcome::Throttled => Verdict::Throttled,
        RawOutcome::TransportError(_) | RawOutcome::Unrecognized(_) => Verdict::Indeterminate,
    }
}

pub fn classify_spray(outcome: &RawOutcome) -> Verdict {
    match outcome {
        RawOutcome::Success(_) => Verdict::ValidCredential,
        RawOutcome::AuthFailure | RawOutcome::UserNotFound => Verdict::InvalidCredential,
        RawOutcome::AccountLocked => Verdict::LockedOut,
        RawOutcome::Throttled => Verdict::Throttled,
        RawOutcome::TransportError(_) | RawOutcome::Unrecognized(_) => Verdict::Indeterminate,
    }
}
