//! Credential rotation reports

use crate::models::EntityKind;
use crate::rotation::RotationCommit;

pub fn format_rotation_commit(commit: &RotationCommit) -> String {
    let mut output = String::new();
    output.push_str("Password changed. Every repository is now encrypted under the new key.\n");
    output.push_str(&format!("Key fingerprint: {}\n\n", commit.key_proof.short()));

    for outcome in &commit.repositories {
        let retries = if outcome.attempts > 1 {
            format!(" ({} attempts)", outcome.attempts)
        } else {
            String::new()
        };
        output.push_str(&format!(
            "  {:12} {}{}\n",
            outcome.kind.endpoint(),
            outcome.strategy,
            retries
        ));
    }

    output
}

/// Explain an aborted rotation; the old password is still the valid one
pub fn format_rotation_aborted(reason: &str, diverged: &[EntityKind]) -> String {
    let mut output = String::new();
    output.push_str("Password change did not take effect. Keep using your current password.\n");
    output.push_str(&format!("Reason: {}\n", reason));

    if !diverged.is_empty() {
        let names: Vec<&str> = diverged.iter().map(|k| k.endpoint()).collect();
        output.push_str(&format!(
            "\nWarning: {} on the server were already re-encrypted and may not open \
             with your current password.\n",
            names.join(", ")
        ));
    }

    output
}

/// Which repositories open under the key of the entered password
///
/// `None` marks a repository whose payloads are sealed under another key.
pub fn format_key_check(results: &[(EntityKind, Option<usize>)]) -> String {
    let mut output = String::new();
    for (kind, opened) in results {
        match opened {
            Some(count) => output.push_str(&format!(
                "  {:12} opens ({} records)\n",
                kind.endpoint(),
                count
            )),
            None => output.push_str(&format!(
                "  {:12} sealed under a different key\n",
                kind.endpoint()
            )),
        }
    }

    if results.iter().any(|(_, opened)| opened.is_none()) {
        output.push_str(
            "\nSome records were re-encrypted by an interrupted password change \
             and do not open with this password.\n",
        );
    }
    output
}
