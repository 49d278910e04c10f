//! Fixture loading.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FixtureLoadError;

use super::{Fixture, FixtureDocument};

/// Resolves a fixture reference into a runnable [`Fixture`].
#[async_trait]
pub trait FixtureLoader: Send + Sync {
    async fn load(&self, reference: &Path) -> Result<Fixture, FixtureLoadError>;
}

/// Loads fixtures from YAML files, or JSON files when the extension is `.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFixtureLoader;

impl FileFixtureLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FixtureLoader for FileFixtureLoader {
    async fn load(&self, reference: &Path) -> Result<Fixture, FixtureLoadError> {
        let content = match tokio::fs::read_to_string(reference).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FixtureLoadError::NotFound(reference.to_path_buf()));
            }
            Err(e) => return Err(FixtureLoadError::Io(e)),
        };

        let path = reference.display().to_string();
        let is_json = reference
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let document: FixtureDocument = if is_json {
            serde_json::from_str(&content).map_err(|e| FixtureLoadError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| FixtureLoadError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?
        };

        let default_name = reference
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("fixture");
        let fixture = document.into_fixture(default_name)?;

        debug!(path = %path, name = %fixture.name, prompts = fixture.len(), "Loaded fixture");
        Ok(fixture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "agent: {{kind: command, program: cat}}\nprompts:\n  - {{id: a, prompt: hi, criteria: {{kind: regex, pattern: hi}}}}"
        )
        .unwrap();

        let fixture = FileFixtureLoader::new().load(file.path()).await.unwrap();
        assert_eq!(fixture.len(), 1);
        // Falls back to the file stem when the document has no name.
        let stem = file.path().file_stem().unwrap().to_str().unwrap();
        assert_eq!(fixture.name, stem);
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(
            &path,
            r#"{"name": "j", "agent": {"kind": "command", "program": "cat"},
                "prompts": [{"id": "a", "prompt": "hi", "criteria": {"kind": "exact_match", "expected": "hi"}}]}"#,
        )
        .unwrap();

        let fixture = FileFixtureLoader::new().load(&path).await.unwrap();
        assert_eq!(fixture.name, "j");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileFixtureLoader::new()
            .load(&dir.path().join("missing.yaml"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileFixtureLoader::new().load(&path).await.unwrap_err();
        match err {
            FixtureLoadError::Parse { path: p, .. } => assert!(p.ends_with("broken.json")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
