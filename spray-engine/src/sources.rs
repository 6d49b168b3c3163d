//! Identity and credential sourcing
//!
//! Usernames and passwords come from inline lists or line-oriented files.
//! Credentials are either the cross product of a username set and a
//! password set, or read pre-paired as `username:password` lines.

use crate::error::{SprayError, SprayResult};
use crate::types::{Credential, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;

/// Where a list of strings comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListSource {
    Inline(Vec<String>),
    File(PathBuf),
}

impl ListSource {
    /// Load non-empty lines, with line endings stripped
    pub async fn load(&self) -> SprayResult<Vec<String>> {
        let values: Vec<String> = match self {
            ListSource::Inline(values) => values
                .iter()
                .map(|value| value.trim_end_matches(['\r', '\n']).to_string())
                .filter(|value| !value.trim().is_empty())
                .collect(),
            ListSource::File(path) => {
                let content = fs::read_to_string(path).await.map_err(|e| {
                    SprayError::configuration(
                        "input",
                        format!("failed to read {}: {}", path.display(), e),
                    )
                })?;
                content
                    .lines()
                    .map(|line| line.trim_end_matches('\r').to_string())
                    .filter(|line| !line.trim().is_empty())
                    .collect()
            }
        };

        if values.is_empty() {
            return Err(SprayError::configuration(
                "input",
                format!("{} contains no entries", self.describe()),
            ));
        }
        Ok(values)
    }

    pub fn describe(&self) -> String {
        match self {
            ListSource::Inline(values) => format!("inline list ({} entries)", values.len()),
            ListSource::File(path) => path.display().to_string(),
        }
    }
}

/// How spray credentials are sourced; the two modes are exclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialSource {
    /// Passwords crossed with the identity source
    Passwords(ListSource),
    /// `username:password` lines
    Paired(ListSource),
}

/// Load identities, qualify bare usernames and drop duplicates
pub async fn load_identities(source: &ListSource, domain: &str) -> SprayResult<Vec<Identity>> {
    let raw = source.load().await?;
    Ok(dedup_identities(
        raw.iter().map(|name| Identity::qualified(name, domain)),
    ))
}

/// Keep the first occurrence of every identity
pub fn dedup_identities(identities: impl IntoIterator<Item = Identity>) -> Vec<Identity> {
    let mut seen = HashSet::new();
    identities
        .into_iter()
        .filter(|identity| seen.insert(identity.clone()))
        .collect()
}

/// Every identity with every password, password-major.
///
/// All identities are tried with the first password before any identity
/// is tried with the second.
pub fn cross_product(identities: &[Identity], passwords: &[String]) -> Vec<Credential> {
    let mut credentials = Vec::with_capacity(identities.len() * passwords.len());
    for password in passwords {
        for identity in identities {
            credentials.push(Credential::new(identity.clone(), password.clone()));
        }
    }
    credentials
}

/// Parse `username:password` lines, skipping malformed ones
pub fn parse_pairs(lines: &[String], domain: &str) -> SprayResult<Vec<Credential>> {
    let mut seen = HashSet::new();
    let mut credentials = Vec::with_capacity(lines.len());
    let mut malformed = 0usize;

    for line in lines {
        match Credential::parse_pair(line, domain) {
            Some(credential) => {
                if seen.insert(credential.clone()) {
                    credentials.push(credential);
                }
            }
            None => malformed += 1,
        }
    }

    if malformed > 0 {
        tracing::warn!("Skipped {} malformed credential line(s)", malformed);
    }
    if credentials.is_empty() {
        return Err(SprayError::configuration(
            "paired",
            "no valid username:password pairs found",
        ));
    }
    Ok(credentials)
}

/// Build the spray work list for `identities` from `source`
pub async fn load_credentials(
    source: &CredentialSource,
    identities: &[Identity],
    domain: &str,
) -> SprayResult<Vec<Credential>> {
    match source {
        CredentialSource::Passwords(passwords) => {
            if identities.is_empty() {
                return Err(SprayError::configuration(
                    "username",
                    "password spraying requires at least one username",
                ));
            }
            let passwords = passwords.load().await?;
            Ok(cross_product(identities, &passwords))
        }
        CredentialSource::Paired(pairs) => {
            let lines = pairs.load().await?;
            parse_pairs(&lines, domain)
        }
    }
}
