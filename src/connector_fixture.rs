//! Offline fixture connector.
//!
//! Loads Gmail `format=full` message JSON from a directory tree into an
//! [`InMemorySource`]. Each `*.json` file holds either one message object
//! or an array of them. Files are read in path order, so the listing order
//! is deterministic.

use anyhow::{bail, Context, Result};
use std::path::Path;
use walkdir::WalkDir;

use billcast_core::models::RawMessage;
use billcast_core::source::memory::InMemorySource;

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    Many(Vec<RawMessage>),
    One(RawMessage),
}

pub fn load_fixture_dir(root: &Path) -> Result<InMemorySource> {
    if !root.exists() {
        bail!("Fixture directory does not exist: {}", root.display());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut messages = Vec::new();
    for path in &paths {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
        let parsed: FixtureFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid message JSON in {}", path.display()))?;
        match parsed {
            FixtureFile::Many(batch) => messages.extend(batch),
            FixtureFile::One(message) => messages.push(message),
        }
    }

    log::debug!(
        "Loaded {} fixture messages from {} files under {}",
        messages.len(),
        paths.len(),
        root.display()
    );
    Ok(InMemorySource::new(messages))
}
