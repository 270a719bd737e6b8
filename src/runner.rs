//! Scenario selection and execution.
//!
//! A run selects scenario scripts by name glob, parses all of them up front
//! (a malformed script aborts the run before anything executes), then runs
//! each scenario in its own ephemeral working directory, sequentially or on
//! a bounded worker pool. Verdicts are reported in submission order no
//! matter the pool size or completion order, and the failure tally is the
//! returned summary, never process-wide state.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use regex::Regex;

use crate::actions;
use crate::engine::EngineRunner;
use crate::environment::TestEnvironment;
use crate::scenario::{scenario_name, Scenario};

/// Inputs for one harness run.
#[derive(Debug)]
pub struct RunConfig {
    pub engine: EngineRunner,
    /// Directory holding scenario scripts and their assets.
    pub tests_dir: PathBuf,
    /// Glob over scenario names (`*` and `?`).
    pub pattern: String,
    /// Worker count; 0 means all available hardware contexts, 1 sequential.
    pub parallel: usize,
    /// Retain per-scenario working directories for inspection.
    pub keep: bool,
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub name: String,
    pub passed: bool,
}

/// Per-scenario verdicts in submission order.
#[derive(Debug)]
pub struct RunSummary {
    pub verdicts: Vec<Verdict>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.verdicts.iter().filter(|verdict| !verdict.passed).count()
    }
}

/// Executes all selected scenarios and prints one progress line per scenario
/// plus the elapsed time.
pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let start = Instant::now();
    let assets_dir = config
        .tests_dir
        .canonicalize()
        .with_context(|| format!("resolve tests directory {}", config.tests_dir.display()))?;

    let scripts = select_scenarios(&assets_dir, &config.pattern)?;
    let mut scenarios = Vec::with_capacity(scripts.len());
    for script in &scripts {
        scenarios.push((scenario_name(script), Scenario::load(script)?));
    }

    let workers = match config.parallel {
        0 => std::thread::available_parallelism()
            .context("query available parallelism")?
            .get(),
        count => count,
    };

    let verdicts = if workers <= 1 {
        run_sequential(config, &assets_dir, &scenarios)
    } else {
        run_pooled(config, &assets_dir, &scenarios, workers)
    };

    println!("Elapsed time: {:.3} sec", start.elapsed().as_secs_f64());
    Ok(RunSummary { verdicts })
}

fn run_sequential(
    config: &RunConfig,
    assets_dir: &Path,
    scenarios: &[(String, Scenario)],
) -> Vec<Verdict> {
    let total = scenarios.len();
    let mut verdicts = Vec::with_capacity(total);
    for (index, (name, scenario)) in scenarios.iter().enumerate() {
        let verdict = run_scenario(&config.engine, name, scenario, assets_dir, config.keep);
        report(index, total, &verdict);
        verdicts.push(verdict);
    }
    verdicts
}

fn run_pooled(
    config: &RunConfig,
    assets_dir: &Path,
    scenarios: &[(String, Scenario)],
    workers: usize,
) -> Vec<Verdict> {
    let total = scenarios.len();
    let queue: Mutex<VecDeque<(usize, &(String, Scenario))>> =
        Mutex::new(scenarios.iter().enumerate().collect());
    let (sender, receiver) = mpsc::channel::<(usize, Verdict)>();

    std::thread::scope(|scope| {
        for _ in 0..workers.min(total.max(1)) {
            let sender = sender.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                let job = queue
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .pop_front();
                let Some((index, (name, scenario))) = job else {
                    break;
                };
                let verdict =
                    run_scenario(&config.engine, name, scenario, assets_dir, config.keep);
                if sender.send((index, verdict)).is_err() {
                    break;
                }
            });
        }
        drop(sender);

        // Reorder completions back into submission order before reporting.
        let mut pending = BTreeMap::new();
        let mut verdicts = Vec::with_capacity(total);
        for (index, verdict) in receiver {
            pending.insert(index, verdict);
            while let Some(verdict) = pending.remove(&verdicts.len()) {
                report(verdicts.len(), total, &verdict);
                verdicts.push(verdict);
            }
        }
        verdicts
    })
}

fn report(index: usize, total: usize, verdict: &Verdict) {
    println!(
        "{}/{} {} {}",
        index + 1,
        total,
        verdict.name,
        if verdict.passed { "PASS" } else { "FAIL" }
    );
}

/// Runs one scenario in a fresh working directory. The state machine is
/// fail-fast: the first step whose actual result disagrees with its declared
/// expectation fails the scenario and skips everything after it.
fn run_scenario(
    engine: &EngineRunner,
    name: &str,
    scenario: &Scenario,
    assets_dir: &Path,
    keep: bool,
) -> Verdict {
    let temp = match tempfile::Builder::new().prefix("itk-").tempdir() {
        Ok(temp) => temp,
        Err(error) => {
            tracing::warn!(scenario = name, %error, "could not create working directory");
            return Verdict {
                name: name.to_string(),
                passed: false,
            };
        }
    };

    let mut env = TestEnvironment::new(
        temp.path().to_path_buf(),
        assets_dir.to_path_buf(),
        engine.clone(),
    );
    let passed = execute_steps(name, scenario, &mut env);

    if keep {
        let kept = temp.keep();
        println!("{name}: working directory kept at {}", kept.display());
    }

    Verdict {
        name: name.to_string(),
        passed,
    }
}

fn execute_steps(name: &str, scenario: &Scenario, env: &mut TestEnvironment) -> bool {
    for (index, step) in scenario.actions.iter().enumerate() {
        let actual = actions::execute(&step.action, env);
        if !step.result.matches(actual) {
            tracing::info!(
                scenario = name,
                step = index,
                expected = ?step.result,
                actual,
                "step result disagrees with declaration"
            );
            return false;
        }
    }
    true
}

/// Lists scenario scripts matching the name glob, sorted by file name so
/// submission order is stable across platforms and pool sizes.
pub fn select_scenarios(tests_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(pattern)?;
    let mut scripts = Vec::new();
    let entries = std::fs::read_dir(tests_dir)
        .with_context(|| format!("list scenario directory {}", tests_dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("list scenario directory {}", tests_dir.display()))?
            .path();
        if path.extension().map(|ext| ext == "json").unwrap_or(false)
            && matcher.is_match(&scenario_name(&path))
        {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// Compiles a file-name glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).with_context(|| format!("invalid scenario pattern \"{pattern}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine_stub() -> EngineRunner {
        EngineRunner::new(Path::new("/nonexistent/engine")).unwrap()
    }

    fn config(tests_dir: &Path, pattern: &str, parallel: usize) -> RunConfig {
        RunConfig {
            engine: engine_stub(),
            tests_dir: tests_dir.to_path_buf(),
            pattern: pattern.to_string(),
            parallel,
            keep: false,
        }
    }

    #[test]
    fn declared_fail_step_makes_a_failing_action_count_as_success() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"actions": [
                {"name": "check-existant", "args": ["missing.txt"], "result": "fail"}
            ]}"#,
        )
        .unwrap();
        let temp = tempfile::tempdir().unwrap();
        let mut env = TestEnvironment::new(
            temp.path().to_path_buf(),
            temp.path().to_path_buf(),
            engine_stub(),
        );
        assert!(execute_steps("declared-fail", &scenario, &mut env));
    }

    #[test]
    fn first_mismatch_aborts_without_running_later_steps() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), b"payload").unwrap();

        // Step 2 mismatches its declaration; step 3 would zero a.txt.
        let scenario: Scenario = serde_json::from_str(
            r#"{"actions": [
                {"name": "check-existant", "args": ["a.txt"]},
                {"name": "check-existant", "args": ["missing.txt"]},
                {"name": "zero-file", "args": ["a.txt"]}
            ]}"#,
        )
        .unwrap();
        let mut env = TestEnvironment::new(
            temp.path().to_path_buf(),
            temp.path().to_path_buf(),
            engine_stub(),
        );
        assert!(!execute_steps("fail-fast", &scenario, &mut env));
        assert_eq!(fs::read(temp.path().join("a.txt")).unwrap(), b"payload");
    }

    #[test]
    fn selection_filters_by_glob_and_sorts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["install-b.json", "install-a.json", "other.json", "notes.txt"] {
            fs::write(dir.path().join(name), "{\"actions\": []}").unwrap();
        }

        let selected = select_scenarios(dir.path(), "install-*").unwrap();
        let names: Vec<String> = selected.iter().map(|path| scenario_name(path)).collect();
        assert_eq!(names, vec!["install-a", "install-b"]);

        let all = select_scenarios(dir.path(), "*").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let matcher = glob_to_regex("a.b*").unwrap();
        assert!(matcher.is_match("a.b-test"));
        assert!(!matcher.is_match("axb-test"));
    }

    #[test]
    fn malformed_script_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let error = run(&config(dir.path(), "*", 1)).unwrap_err();
        assert!(format!("{error:#}").contains("broken.json"));
    }

    #[test]
    fn pool_sizes_produce_identical_verdicts_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        for index in 0..6 {
            let body = if index % 2 == 0 {
                // Passes: the declared-fail existence check fails as expected.
                r#"{"actions": [
                    {"name": "check-existant", "args": ["missing.txt"], "result": "fail"}
                ]}"#
            } else {
                r#"{"actions": [
                    {"name": "check-existant", "args": ["missing.txt"]}
                ]}"#
            };
            fs::write(dir.path().join(format!("scenario-{index}.json")), body).unwrap();
        }

        let sequential = run(&config(dir.path(), "*", 1)).unwrap();
        let pooled = run(&config(dir.path(), "*", 4)).unwrap();
        assert_eq!(sequential.verdicts, pooled.verdicts);
        assert_eq!(sequential.failures(), 3);
        assert_eq!(
            sequential.verdicts[0],
            Verdict {
                name: "scenario-0".to_string(),
                passed: true
            }
        );
    }
}
