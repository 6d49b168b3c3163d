//! Verdict accumulation for enumeration and spraying

use crate::types::{Credential, Identity, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a verdict is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subject {
    Identity(Identity),
    Credential(Credential),
}

impl Subject {
    /// Line-oriented key: the identity, or `username:password`
    pub fn key(&self) -> String {
        match self {
            Subject::Identity(identity) => identity.to_string(),
            Subject::Credential(credential) => credential.to_string(),
        }
    }

    pub fn identity(&self) -> &Identity {
        match self {
            Subject::Identity(identity) => identity,
            Subject::Credential(credential) => &credential.identity,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    subject: Subject,
    verdicts: Vec<Verdict>,
    detail: Option<String>,
}

#[derive(Debug, Default)]
struct SinkState {
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

/// Read-only, categorized copy of everything recorded so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub existing: Vec<String>,
    pub nonexisting: Vec<String>,
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    pub locked_out: Vec<String>,
    pub indeterminate: Vec<String>,
    pub tested: Vec<String>,
    /// Detail notes for valid credentials, keyed by credential string
    pub notes: Vec<(String, String)>,
}

impl ResultsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tested.is_empty()
    }
}

/// Thread-safe, first-seen ordered verdict store
#[derive(Debug, Clone, Default)]
pub struct ResultsSink {
    state: Arc<RwLock<SinkState>>,
}

impl ResultsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a verdict for `subject`; the latest verdict is authoritative
    pub async fn record(&self, subject: Subject, verdict: Verdict, detail: Option<String>) {
        let key = subject.key();
        let mut state = self.state.write().await;

        if !state.entries.contains_key(&key) {
            state.order.push(key.clone());
        }

        let entry = state.entries.entry(key).or_insert_with(|| Entry {
            subject,
            verdicts: Vec::new(),
            detail: None,
        });
        entry.verdicts.push(verdict);
        if detail.is_some() {
            entry.detail = detail;
        }
    }

    /// Every verdict recorded for `key`, oldest first
    pub async fn verdicts(&self, key: &str) -> Vec<Verdict> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|entry| entry.verdicts.clone())
            .unwrap_or_default()
    }

    pub async fn final_verdict(&self, key: &str) -> Option<Verdict> {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .and_then(|entry| entry.verdicts.last().copied())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> ResultsSnapshot {
        let state = self.state.read().await;
        let mut snapshot = ResultsSnapshot::default();
        let mut locked_seen = HashSet::new();

        for key in &state.order {
            let Some(entry) = state.entries.get(key) else {
                continue;
            };
            snapshot.tested.push(key.clone());

            let Some(verdict) = entry.verdicts.last() else {
                continue;
            };
            match verdict {
                Verdict::Exists => snapshot.existing.push(key.clone()),
                Verdict::NotExists => snapshot.nonexisting.push(key.clone()),
                Verdict::ValidCredential => {
                    snapshot.valid.push(key.clone());
                    if let Some(detail) = &entry.detail {
                        snapshot.notes.push((key.clone(), detail.clone()));
                    }
                }
                Verdict::InvalidCredential => snapshot.invalid.push(key.clone()),
                Verdict::LockedOut => {
                    let identity = entry.subject.identity().to_string();
                    if locked_seen.insert(identity.clone()) {
                        snapshot.locked_out.push(identity);
                    }
                }
                Verdict::Throttled | Verdict::Indeterminate => {
                    snapshot.indeterminate.push(key.clone())
                }
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Subject {
        Subject::Identity(Identity::new(name))
    }

    fn cred(user: &str, password: &str) -> Subject {
        Subject::Credential(Credential::new(Identity::new(user), password))
    }

    #[tokio::test]
    async fn test_partitions_keep_first_seen_order() {
        let sink = ResultsSink::new();
        sink.record(id("carol@corp.com"), Verdict::Exists, None).await;
        sink.record(id("alice@corp.com"), Verdict::NotExists, None).await;
        sink.record(id("bob@corp.com"), Verdict::Exists, None).await;

        let snapshot = sink.snapshot().await;
        assert_eq!(snapshot.existing, vec!["carol@corp.com", "bob@corp.com"]);
        assert_eq!(snapshot.nonexisting, vec!["alice@corp.com"]);
        assert_eq!(snapshot.tested.len(), 3);
    }

    #[tokio::test]
    async fn test_last_verdict_is_authoritative() {
        let sink = ResultsSink::new();
        let subject = cred("alice@corp.com", "Summer2023");
        sink.record(subject.clone(), Verdict::Throttled, None).await;
        sink.record(subject.clone(), Verdict::ValidCredential, Some("MFA required".into()))
            .await;

        assert_eq!(
            sink.verdicts("alice@corp.com:Summer2023").await,
            vec![Verdict::Throttled, Verdict::ValidCredential]
        );
        let snapshot = sink.snapshot().await;
        assert_eq!(snapshot.valid, vec!["alice@corp.com:Summer2023"]);
        assert_eq!(
            snapshot.notes,
            vec![("alice@corp.com:Summer2023".to_string(), "MFA required".to_string())]
        );
        assert!(snapshot.indeterminate.is_empty());
    }

    #[tokio::test]
    async fn test_locked_out_lists_identities_once() {
        let sink = ResultsSink::new();
        sink.record(cred("bob@corp.com", "a"), Verdict::LockedOut, None).await;
        sink.record(cred("bob@corp.com", "b"), Verdict::LockedOut, None).await;
        sink.record(cred("eve@corp.com", "c"), Verdict::Throttled, None).await;

        let snapshot = sink.snapshot().await;
        assert_eq!(snapshot.locked_out, vec!["bob@corp.com"]);
        assert_eq!(snapshot.indeterminate, vec!["eve@corp.com:c"]);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let sink = ResultsSink::new();
        let mut handles = Vec::new();
        for i in 0..50 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.record(id(&format!("user{}@corp.com", i)), Verdict::Exists, None)
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sink.snapshot().await.existing.len(), 50);
    }
}
