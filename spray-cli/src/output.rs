//! Line-oriented result files and the JSON run report

use anyhow::Context;
use chrono::Utc;
use spray_engine::{ModuleFamily, PhaseOutcome, RunReport};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Writes one timestamped file per non-empty result category
pub struct OutputWriter {
    root: PathBuf,
    stamp: String,
}

impl OutputWriter {
    /// Create the output directory if needed
    pub async fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            stamp: Utc::now().format("%Y%m%d%H%M%S").to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// Persist every phase of `report`; returns the files written
    pub async fn write_report(&self, report: &RunReport) -> anyhow::Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        if let Some(enumeration) = &report.enumeration {
            written.extend(self.write_phase(enumeration).await?);
        }
        if let Some(spray) = &report.spray {
            written.extend(self.write_phase(spray).await?);
        }

        let report_path = self.root.join("report.json");
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&report_path, json)
            .await
            .with_context(|| format!("failed to write {}", report_path.display()))?;
        written.push(report_path);

        Ok(written)
    }

    async fn write_phase(&self, phase: &PhaseOutcome) -> anyhow::Result<Vec<PathBuf>> {
        let snapshot = &phase.snapshot;
        let (dir, categories): (&str, Vec<(&str, &Vec<String>)>) = match phase.family {
            ModuleFamily::Spray => (
                "spray",
                vec![
                    ("spray_valid_credentials", &snapshot.valid),
                    ("spray_invalid_credentials", &snapshot.invalid),
                    ("spray_locked_accounts", &snapshot.locked_out),
                    ("spray_indeterminate_credentials", &snapshot.indeterminate),
                    ("spray_tested_credentials", &snapshot.tested),
                ],
            ),
            _ => (
                "enum",
                vec![
                    ("enum_valid_accounts", &snapshot.existing),
                    ("enum_invalid_accounts", &snapshot.nonexisting),
                    ("enum_indeterminate_accounts", &snapshot.indeterminate),
                    ("enum_tested_accounts", &snapshot.tested),
                ],
            ),
        };

        let dir = self.root.join(dir);
        fs::create_dir_all(&dir).await?;

        let mut written = Vec::new();
        for (name, lines) in categories {
            if lines.is_empty() {
                continue;
            }
            let path = dir.join(format!("{}.{}.txt", name, self.stamp));
            let mut content = lines.join("\n");
            content.push('\n');
            fs::write(&path, content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spray_engine::{
        CounterSnapshot, EnumModule, ModuleSelection, ResultsSnapshot, RunStatus, SprayModule,
        ValidateModule,
    };
    use spray_engine::runner::RunId;
    use tempfile::TempDir;

    fn report() -> RunReport {
        let enumeration = PhaseOutcome {
            family: ModuleFamily::Enumerate,
            module: "oauth2".into(),
            status: RunStatus::Exhausted,
            passes: 1,
            error: None,
            snapshot: ResultsSnapshot {
                existing: vec!["alice@corp.com".into()],
                nonexisting: vec!["bob@corp.com".into()],
                tested: vec!["alice@corp.com".into(), "bob@corp.com".into()],
                ..Default::default()
            },
        };
        let spray = PhaseOutcome {
            family: ModuleFamily::Spray,
            module: "oauth2".into(),
            status: RunStatus::Exhausted,
            passes: 1,
            error: None,
            snapshot: ResultsSnapshot {
                valid: vec!["alice@corp.com:Winter2024".into()],
                tested: vec!["alice@corp.com:Winter2024".into()],
                ..Default::default()
            },
        };

        RunReport {
            run_id: RunId::nil(),
            domain: "corp.com".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            tenant: None,
            modules: ModuleSelection {
                validate: ValidateModule::GetUserRealm,
                enumerate: EnumModule::OAuth2,
                spray: SprayModule::OAuth2,
            },
            enumeration: Some(enumeration),
            spray: Some(spray),
            counters: CounterSnapshot {
                lockouts: 0,
                requests: 3,
                breaker_tripped: false,
            },
            status: RunStatus::Exhausted,
        }
    }

    #[tokio::test]
    async fn test_writes_non_empty_categories() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path().join("out")).await.unwrap();
        let written = writer.write_report(&report()).await.unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&format!("enum_valid_accounts.{}.txt", writer.stamp())));
        assert!(names.contains(&format!("spray_valid_credentials.{}.txt", writer.stamp())));
        assert!(!names.iter().any(|name| name.starts_with("spray_invalid_credentials")));
        assert!(names.contains(&"report.json".to_string()));

        let valid = std::fs::read_to_string(
            dir.path()
                .join("out/spray")
                .join(format!("spray_valid_credentials.{}.txt", writer.stamp())),
        )
        .unwrap();
        assert_eq!(valid, "alice@corp.com:Winter2024\n");
    }

    #[tokio::test]
    async fn test_report_json_round_trips() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path()).await.unwrap();
        writer.write_report(&report()).await.unwrap();

        let json = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.domain, "corp.com");
        assert_eq!(parsed.status, RunStatus::Exhausted);
        assert_eq!(parsed.enumeration.unwrap().snapshot.existing, vec!["alice@corp.com"]);
    }
}
