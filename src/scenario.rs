//! Scenario script model.
//!
//! A scenario is an ordered list of steps; each step names one action from
//! the closed registry, carries an immutable parameter struct specific to
//! that action, and optionally declares the result it expects (`pass` by
//! default). Scripts are JSON files; the scenario name is the file stem.
//! A malformed script is a tooling-level error that aborts the whole run
//! rather than being attributed to the engine under test.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Declared expectation for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    #[default]
    Pass,
    Fail,
}

impl Expectation {
    /// True when the actual action result matches this declaration.
    pub fn matches(self, actual: bool) -> bool {
        match self {
            Expectation::Pass => actual,
            Expectation::Fail => !actual,
        }
    }
}

/// One verifiable operation from the closed action registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "kebab-case")]
pub enum Action {
    GenerateRepository(GenerateRepositoryArgs),
    Install(DeployArgs),
    Configure(DeployArgs),
    Validate(ValidateArgs),
    QueryRepository(QueryRepositoryArgs),
    QueryFeature(QueryFeatureArgs),
    CheckHash(CheckHashArgs),
    CheckExistant(PathListArgs),
    CheckNotExistant(PathListArgs),
    ZeroFile(PathListArgs),
    DamageFile(DamageFileArgs),
    TruncateFile(TruncateFileArgs),
}

/// Arguments for `generate-repository`. `source` and `source-directory` are
/// resolved relative to the scenario assets directory, `target` relative to
/// the scenario working directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct GenerateRepositoryArgs {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_directory: Option<String>,
}

/// Arguments shared by `install` and `configure`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployArgs {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// Arguments for `validate`. The raw engine exit status is the action
/// result; the step's declared expectation decides what counts as success.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateArgs {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// Arguments for `query-repository`: the repository path and the exact
/// feature identifier set expected on stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRepositoryArgs {
    pub path: String,
    pub features: Vec<String>,
}

/// Arguments for `query-feature`: the repository path, the feature to query
/// and the exact subfeature identifier set expected on stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryFeatureArgs {
    pub path: String,
    pub id: String,
    pub subfeatures: Vec<String>,
}

/// Relative path -> expected SHA-256 digest (hex, case-insensitive).
pub type CheckHashArgs = BTreeMap<String, String>;

/// Relative paths for presence/absence/zeroing actions.
pub type PathListArgs = Vec<String>;

/// Arguments for `damage-file`: zero the byte range `[offset, offset+size)`.
/// `offset` defaults to 0; `size` defaults to the remainder of the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DamageFileArgs {
    pub filename: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Arguments for `truncate-file`: a non-negative `size` is the new absolute
/// length (zero-padding when growing); a negative `size` shrinks the file by
/// that many bytes relative to its current length.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TruncateFileArgs {
    pub filename: String,
    pub size: i64,
}

/// One step: an action plus its declared expectation.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub result: Expectation,
}

/// An ordered scenario script.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub actions: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read scenario script {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse scenario script {}", path.display()))
    }
}

/// Scenario name derived from the script file stem.
pub fn scenario_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions_with_defaults() {
        let script = r#"{
            "actions": [
                {"name": "generate-repository",
                 "args": {"source": "simple.xml", "target": "repo"}},
                {"name": "install",
                 "args": {"source": "repo", "target": "deploy",
                          "features": ["F1"]}},
                {"name": "validate",
                 "args": {"source": "repo", "target": "deploy"},
                 "result": "fail"}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(script).unwrap();
        assert_eq!(scenario.actions.len(), 3);

        assert_eq!(scenario.actions[0].result, Expectation::Pass);
        match &scenario.actions[0].action {
            Action::GenerateRepository(args) => {
                assert_eq!(args.source, "simple.xml");
                assert_eq!(args.source_directory, None);
            }
            other => panic!("unexpected action {other:?}"),
        }

        match &scenario.actions[1].action {
            Action::Install(args) => {
                assert_eq!(args.features, vec!["F1"]);
                assert_eq!(args.key, None);
            }
            other => panic!("unexpected action {other:?}"),
        }

        assert_eq!(scenario.actions[2].result, Expectation::Fail);
    }

    #[test]
    fn parses_fault_injection_actions() {
        let script = r#"{
            "actions": [
                {"name": "zero-file", "args": ["deploy/a.txt"]},
                {"name": "damage-file",
                 "args": {"filename": "deploy/a.txt", "offset": 4, "size": 2}},
                {"name": "truncate-file",
                 "args": {"filename": "deploy/a.txt", "size": -3}},
                {"name": "check-hash",
                 "args": {"deploy/a.txt": "AbCd"}}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(script).unwrap();
        match &scenario.actions[1].action {
            Action::DamageFile(args) => {
                assert_eq!(args.offset, 4);
                assert_eq!(args.size, Some(2));
            }
            other => panic!("unexpected action {other:?}"),
        }
        match &scenario.actions[2].action {
            Action::TruncateFile(args) => assert_eq!(args.size, -3),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn unknown_action_names_are_rejected() {
        let script = r#"{"actions": [{"name": "explode", "args": {}}]}"#;
        assert!(serde_json::from_str::<Scenario>(script).is_err());
    }

    #[test]
    fn expectation_matching() {
        assert!(Expectation::Pass.matches(true));
        assert!(!Expectation::Pass.matches(false));
        assert!(Expectation::Fail.matches(false));
        assert!(!Expectation::Fail.matches(true));
    }

    #[test]
    fn scenario_name_is_file_stem() {
        assert_eq!(
            scenario_name(Path::new("tests/install-simple.json")),
            "install-simple"
        );
    }
}
