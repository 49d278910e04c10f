//! Benchmark fixtures.
//!
//! A fixture is an ordered list of prompts, each with the criteria its
//! transcript is scored against, plus the agent to run them on. Criteria
//! are resolved into scoring strategies when the fixture is built, so a
//! [`Fixture`] value is always runnable.

pub mod loader;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FixtureLoadError;
use crate::runner::agents::AgentSpec;
use crate::runner::config::AgentParams;
use crate::runner::criteria::{Criteria, ScoringStrategy};

pub use loader::{FileFixtureLoader, FixtureLoader};

/// One benchmark prompt as declared in a fixture document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    /// Identifier, unique within the fixture.
    pub id: String,
    /// Prompt content sent to the agent.
    pub prompt: String,
    pub criteria: Criteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PromptSpec {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, criteria: Criteria) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            criteria,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A prompt together with the strategy that scores it.
#[derive(Debug, Clone)]
pub struct ResolvedPrompt {
    pub spec: PromptSpec,
    pub strategy: Arc<dyn ScoringStrategy>,
}

impl ResolvedPrompt {
    /// Resolves the prompt's declared criteria.
    pub fn resolve(spec: PromptSpec) -> Result<Self, FixtureLoadError> {
        let strategy = spec
            .criteria
            .resolve()
            .map_err(|e| FixtureLoadError::Invalid(format!("prompt '{}': {}", spec.id, e)))?;
        Ok(Self { spec, strategy })
    }

    /// Pairs a prompt with a custom strategy, bypassing its declared criteria.
    pub fn with_strategy(spec: PromptSpec, strategy: Arc<dyn ScoringStrategy>) -> Self {
        Self { spec, strategy }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }
}

/// Serialized form of a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub agent: AgentSpec,
    pub prompts: Vec<PromptSpec>,
}

impl FixtureDocument {
    /// Validates the document and resolves its criteria.
    pub fn into_fixture(self, default_name: &str) -> Result<Fixture, FixtureLoadError> {
        let name = self.name.unwrap_or_else(|| default_name.to_string());
        Fixture::new(name, self.agent, self.prompts)
    }
}

/// A validated, immutable set of prompts and the agent to run them on.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub name: String,
    pub agent: AgentSpec,
    pub prompts: Vec<ResolvedPrompt>,
}

impl Fixture {
    /// Builds a fixture, resolving each prompt's criteria.
    pub fn new(
        name: impl Into<String>,
        agent: AgentSpec,
        prompts: Vec<PromptSpec>,
    ) -> Result<Self, FixtureLoadError> {
        let prompts = prompts
            .into_iter()
            .map(ResolvedPrompt::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_resolved(name, agent, prompts)
    }

    /// Builds a fixture from already-resolved prompts.
    pub fn from_resolved(
        name: impl Into<String>,
        agent: AgentSpec,
        prompts: Vec<ResolvedPrompt>,
    ) -> Result<Self, FixtureLoadError> {
        if prompts.is_empty() {
            return Err(FixtureLoadError::Invalid(
                "fixture has no prompts".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for prompt in &prompts {
            if prompt.id().trim().is_empty() {
                return Err(FixtureLoadError::Invalid(
                    "prompt id must not be empty".to_string(),
                ));
            }
            if !seen.insert(prompt.id()) {
                return Err(FixtureLoadError::Invalid(format!(
                    "duplicate prompt id '{}'",
                    prompt.id()
                )));
            }
        }

        if let AgentSpec::Command(ref command) = agent {
            if command.program.trim().is_empty() {
                return Err(FixtureLoadError::Invalid(
                    "command agent has an empty program".to_string(),
                ));
            }
        }

        Ok(Self {
            name: name.into(),
            agent,
            prompts,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, FixtureLoadError> {
        let document: FixtureDocument =
            serde_yaml::from_str(content).map_err(|e| FixtureLoadError::Parse {
                path: "<inline>".to_string(),
                message: e.to_string(),
            })?;
        document.into_fixture("inline")
    }

    pub fn from_json_str(content: &str) -> Result<Self, FixtureLoadError> {
        let document: FixtureDocument =
            serde_json::from_str(content).map_err(|e| FixtureLoadError::Parse {
                path: "<inline>".to_string(),
                message: e.to_string(),
            })?;
        document.into_fixture("inline")
    }

    /// Returns a copy whose agent has the run's parameters merged in.
    pub fn with_agent_params(mut self, params: &AgentParams) -> Self {
        self.agent = self.agent.with_params(params);
        self
    }

    pub fn prompt_ids(&self) -> impl Iterator<Item = &str> {
        self.prompts.iter().map(|p| p.id())
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
name: smoke
agent:
  kind: command
  program: my-agent
  args: ["--quiet"]
prompts:
  - id: add
    prompt: "What is 2+2?"
    criteria: { kind: exact_match, expected: "4" }
  - id: greet
    prompt: "Say hello"
    description: greeting check
    criteria:
      kind: substring
      substrings: [hello]
      case_sensitive: false
"#;

    #[test]
    fn test_from_yaml_str() {
        let fixture = Fixture::from_yaml_str(FIXTURE).unwrap();
        assert_eq!(fixture.name, "smoke");
        assert_eq!(fixture.len(), 2);
        assert_eq!(fixture.prompt_ids().collect::<Vec<_>>(), vec!["add", "greet"]);
        assert_eq!(fixture.prompts[0].strategy.kind(), "exact_match");
        assert_eq!(
            fixture.prompts[1].spec.description.as_deref(),
            Some("greeting check")
        );
        assert_eq!(fixture.prompts[1].strategy.score("HELLO world").unwrap(), 1.0);
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "agent": {"kind": "http", "url": "http://localhost:9000/run"},
            "prompts": [{"id": "a", "prompt": "p", "criteria": {"kind": "regex", "pattern": "ok"}}]
        }"#;
        let fixture = Fixture::from_json_str(json).unwrap();
        assert_eq!(fixture.name, "inline");
        assert_eq!(fixture.agent.kind(), "http");
    }

    #[test]
    fn test_parse_error() {
        let err = Fixture::from_yaml_str("agent: [unclosed").unwrap_err();
        assert!(matches!(err, FixtureLoadError::Parse { .. }));

        let err = Fixture::from_yaml_str("agent:\n  kind: telepathy\nprompts: []\n").unwrap_err();
        assert!(matches!(err, FixtureLoadError::Parse { .. }));
    }

    #[test]
    fn test_invalid_fixtures() {
        let empty = "agent: {kind: command, program: a}\nprompts: []\n";
        assert!(matches!(
            Fixture::from_yaml_str(empty),
            Err(FixtureLoadError::Invalid(_))
        ));

        let duplicate = r#"
agent: {kind: command, program: a}
prompts:
  - {id: x, prompt: p, criteria: {kind: regex, pattern: a}}
  - {id: x, prompt: q, criteria: {kind: regex, pattern: b}}
"#;
        let err = Fixture::from_yaml_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate prompt id 'x'"));

        let bad_regex = r#"
agent: {kind: command, program: a}
prompts:
  - {id: x, prompt: p, criteria: {kind: regex, pattern: "(open"}}
"#;
        let err = Fixture::from_yaml_str(bad_regex).unwrap_err();
        assert!(matches!(err, FixtureLoadError::Invalid(_)));
        assert!(err.to_string().contains("prompt 'x'"));
    }

    #[test]
    fn test_with_agent_params() {
        let fixture = Fixture::from_yaml_str(FIXTURE)
            .unwrap()
            .with_agent_params(&AgentParams::default().with_arg("--fast"));
        let AgentSpec::Command(command) = fixture.agent else {
            panic!("expected command agent");
        };
        assert_eq!(command.args, vec!["--quiet", "--fast"]);
    }
}
