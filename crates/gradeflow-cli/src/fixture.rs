//! Offline fixtures for the `evaluate` command.
//!
//! A fixture is one JSON document holding an assessment, its items and the
//! submitted answers. It is loaded into a [`MemoryStorage`] so the pipeline
//! can grade it without a real backend.

use anyhow::{bail, Context};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;

use gradeflow_core::{Assessment, GradableItem, QuestionKey, SubmittedAnswer};
use gradeflow_runtime::MemoryStorage;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub assessment: FixtureAssessment,
    pub items: Vec<GradableItem>,
    #[serde(default)]
    pub answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureAssessment {
    pub id: String,
    #[serde(flatten)]
    pub key: QuestionKey,

    /// Defaults to every item in the fixture, in order
    #[serde(default)]
    pub item_ids: Option<Vec<String>>,
}

impl Fixture {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let fixture: Fixture = serde_json::from_str(raw)?;
        if fixture.assessment.id.trim().is_empty() {
            bail!("assessment id must not be empty");
        }
        Ok(fixture)
    }

    /// Load everything into `storage` and return the assessment id.
    pub fn load_into(self, storage: &MemoryStorage) -> String {
        let item_ids = self
            .assessment
            .item_ids
            .unwrap_or_else(|| self.items.iter().map(|item| item.id.clone()).collect());
        let id = self.assessment.id;

        for item in self.items {
            storage.insert_item(item);
        }
        storage.insert_assessment(Assessment {
            id: id.clone(),
            key: self.assessment.key,
            item_ids,
            created_at: Utc::now(),
        });
        storage.insert_answers(&id, self.answers);
        id
    }
}
