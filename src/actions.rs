//! Action execution.
//!
//! Each action reduces to a boolean: engine invocations mirror the engine's
//! exit status, filesystem assertions compare observed state to declared
//! state, and fault-injection actions mutate installed files in place. Any
//! unexpected runtime fault (I/O error, spawn failure) is caught here at the
//! action boundary and treated as `false`; it never propagates out of the
//! scenario.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::environment::TestEnvironment;
use crate::scenario::{
    Action, CheckHashArgs, DamageFileArgs, DeployArgs, GenerateRepositoryArgs, QueryFeatureArgs,
    QueryRepositoryArgs, TruncateFileArgs, ValidateArgs,
};
use crate::util::sha256_hex;

/// Zeroes are written in fixed-size blocks to bound memory use.
const ZERO_BLOCK_SIZE: usize = 1 << 20;

/// Runs one action against the environment, reducing every outcome to a
/// boolean. The declared expectation is applied by the caller, not here.
pub fn execute(action: &Action, env: &mut TestEnvironment) -> bool {
    let result = match action {
        Action::GenerateRepository(args) => generate_repository(env, args),
        Action::Install(args) => deploy(env, args, false),
        Action::Configure(args) => deploy(env, args, true),
        Action::Validate(args) => validate(env, args),
        Action::QueryRepository(args) => query_repository(env, args),
        Action::QueryFeature(args) => query_feature(env, args),
        Action::CheckHash(args) => check_hash(env, args),
        Action::CheckExistant(args) => check_existence(env, args, true),
        Action::CheckNotExistant(args) => check_existence(env, args, false),
        Action::ZeroFile(args) => zero_files(env, args),
        Action::DamageFile(args) => damage_file(env, args),
        Action::TruncateFile(args) => truncate_file(env, args),
    };
    match result {
        Ok(passed) => passed,
        Err(error) => {
            env.log_error(format!("action aborted: {error:#}"));
            false
        }
    }
}

fn generate_repository(env: &mut TestEnvironment, args: &GenerateRepositoryArgs) -> Result<bool> {
    let manifest = env.asset_path(&args.source);
    let target = env.work_path(&args.target);
    let source_directory = args
        .source_directory
        .as_ref()
        .map(|directory| env.asset_path(directory));
    Ok(env
        .engine()
        .build_repository(&manifest, &target, source_directory.as_deref())
        .success())
}

fn deploy(env: &mut TestEnvironment, args: &DeployArgs, configure: bool) -> Result<bool> {
    let source = env.work_path(&args.source);
    let target = env.work_path(&args.target);
    let outcome = if configure {
        env.engine()
            .configure(&source, &target, &args.features, args.key.as_deref())
    } else {
        env.engine()
            .install(&source, &target, &args.features, args.key.as_deref())
    };
    Ok(outcome.success())
}

fn validate(env: &mut TestEnvironment, args: &ValidateArgs) -> Result<bool> {
    let source = env.work_path(&args.source);
    let target = env.work_path(&args.target);
    Ok(env
        .engine()
        .validate(&source, &target, args.key.as_deref())
        .success())
}

fn query_repository(env: &mut TestEnvironment, args: &QueryRepositoryArgs) -> Result<bool> {
    let path = env.work_path(&args.path);
    let Some(actual) = env
        .engine()
        .query("query-repository", &["features".to_string()], &path)
    else {
        return Ok(false);
    };
    Ok(compare_sets(env, "features", &args.features, &actual))
}

fn query_feature(env: &mut TestEnvironment, args: &QueryFeatureArgs) -> Result<bool> {
    let path = env.work_path(&args.path);
    let query_args = ["subfeatures".to_string(), args.id.clone()];
    let Some(actual) = env.engine().query("query-feature", &query_args, &path) else {
        return Ok(false);
    };
    Ok(compare_sets(env, "subfeatures", &args.subfeatures, &actual))
}

fn compare_sets(
    env: &mut TestEnvironment,
    what: &str,
    expected: &[String],
    actual: &BTreeSet<String>,
) -> bool {
    let expected: BTreeSet<String> = expected.iter().cloned().collect();
    if expected == *actual {
        true
    } else {
        env.log_error(format!(
            "{what} mismatch: expected {expected:?}, actual {actual:?}"
        ));
        false
    }
}

fn check_hash(env: &mut TestEnvironment, args: &CheckHashArgs) -> Result<bool> {
    for (relative, expected) in args {
        let path = env.work_path(relative);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(error) => {
                env.log_error(format!("could not hash {relative}: {error}"));
                return Ok(false);
            }
        };
        let actual = sha256_hex(&contents);
        if !actual.eq_ignore_ascii_case(expected) {
            env.log_error(format!(
                "wrong hash for {relative}: expected {expected}, actual {actual}"
            ));
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_existence(env: &mut TestEnvironment, args: &[String], want_present: bool) -> Result<bool> {
    for relative in args {
        let present = env.work_path(relative).exists();
        if present != want_present {
            env.log_error(format!(
                "{relative} is {}present, expected it {}to be",
                if present { "" } else { "not " },
                if want_present { "" } else { "not " },
            ));
            return Ok(false);
        }
    }
    Ok(true)
}

fn zero_files(env: &mut TestEnvironment, args: &[String]) -> Result<bool> {
    for relative in args {
        let path = env.work_path(relative);
        if let Err(error) = zero_one_file(&path) {
            env.log_error(format!("could not zero {relative}: {error:#}"));
            return Ok(false);
        }
    }
    Ok(true)
}

/// Replaces the file's entire content with zero bytes, preserving its size.
fn zero_one_file(path: &Path) -> Result<()> {
    let size = path
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    let mut file = File::create(path).with_context(|| format!("open {}", path.display()))?;
    write_zeros(&mut file, size)?;
    Ok(())
}

fn damage_file(env: &mut TestEnvironment, args: &DamageFileArgs) -> Result<bool> {
    let path = env.work_path(&args.filename);
    if let Err(error) = damage_one_file(&path, args.offset, args.size) {
        env.log_error(format!("could not damage {}: {error:#}", args.filename));
        return Ok(false);
    }
    Ok(true)
}

/// Zeroes `[offset, offset + size)` in place; file size is unchanged.
fn damage_one_file(path: &Path, offset: u64, size: Option<u64>) -> Result<()> {
    let file_size = path.metadata()?.len();
    let size = size.unwrap_or_else(|| file_size.saturating_sub(offset));
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    write_zeros(&mut file, size)?;
    Ok(())
}

fn truncate_file(env: &mut TestEnvironment, args: &TruncateFileArgs) -> Result<bool> {
    let path = env.work_path(&args.filename);
    if let Err(error) = truncate_one_file(&path, args.size) {
        env.log_error(format!("could not truncate {}: {error:#}", args.filename));
        return Ok(false);
    }
    Ok(true)
}

/// Resizes to an absolute size, or shrinks by a negative delta. Growing pads
/// with zero bytes.
fn truncate_one_file(path: &Path, size: i64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let new_size = if size < 0 {
        let current = file.metadata()?.len();
        let delta = size.unsigned_abs();
        current
            .checked_sub(delta)
            .ok_or_else(|| anyhow::anyhow!("shrink by {delta} exceeds file size {current}"))?
    } else {
        size as u64
    };
    file.set_len(new_size)?;
    Ok(())
}

fn write_zeros(file: &mut File, mut remaining: u64) -> Result<()> {
    let block = vec![0u8; ZERO_BLOCK_SIZE];
    while remaining > 0 {
        let next = remaining.min(ZERO_BLOCK_SIZE as u64) as usize;
        file.write_all(&block[..next])?;
        remaining -= next as u64;
    }
    Ok(())
}
