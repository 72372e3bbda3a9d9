//! Backlog store persistence: schema-checked load, atomic save, advisory lock.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::invariants::validate_invariants;
use crate::errors::PipelineError;
use crate::model::BacklogStore;

const STORE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/backlog/v1.schema.json"
));

/// Load and validate the store (schema + invariants).
///
/// A missing file is a precondition failure; only `intake` creates a store.
pub fn load_store(path: &Path) -> Result<BacklogStore> {
    debug!(path = %path.display(), "loading backlog store");
    if !path.exists() {
        return Err(PipelineError::Precondition(format!(
            "no backlog store at {} (run intake first)",
            path.display()
        ))
        .into());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read backlog store {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse backlog store {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let store: BacklogStore = serde_json::from_value(value)
        .with_context(|| format!("deserialize backlog store {}", path.display()))?;
    let errors = validate_invariants(&store);
    if !errors.is_empty() {
        return Err(anyhow!(
            "backlog invariants failed in {}: {}",
            path.display(),
            errors.join("; ")
        ));
    }
    debug!(items = store.items.len(), "backlog store loaded");
    Ok(store)
}

/// Atomically write the store (temp file + rename), pretty JSON with a
/// trailing newline.
pub fn save_store(path: &Path, store: &BacklogStore) -> Result<()> {
    debug!(path = %path.display(), items = store.items.len(), "writing backlog store");
    let mut buf = serde_json::to_string_pretty(store).context("serialize backlog store")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("store path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace store {}", path.display()))?;
    Ok(())
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STORE_SCHEMA).context("parse store schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "store schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Exclusive advisory lock on `<state>.lock`, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock or fail fast if another command holds it.
    pub fn acquire(state_path: &Path) -> Result<Self> {
        let path = lock_path(state_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| PipelineError::Locked(path.display().to_string()))?;
        debug!(path = %path.display(), "store lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release store lock");
        }
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Run `op` under the lock between a load and a save.
///
/// The store is saved even when `op` fails, so markers recorded before a
/// fatal error persist. The operation's error takes precedence over a save
/// error.
pub fn with_store<T>(
    path: &Path,
    op: impl FnOnce(&mut BacklogStore) -> Result<T>,
) -> Result<T> {
    let _lock = StoreLock::acquire(path)?;
    let mut store = load_store(path)?;
    let outcome = op(&mut store);
    let saved = save_store(path, &store);
    match (outcome, saved) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(save_err)) => {
            warn!(error = %format!("{save_err:#}"), "failed to save store after error");
            Err(err)
        }
    }
}

/// Load under the lock without saving.
pub fn read_store(path: &Path) -> Result<BacklogStore> {
    let _lock = StoreLock::acquire(path)?;
    load_store(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{issued_item, item, store_with};

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut provisioned = issued_item(2, "Fix login", 55, 42);
        provisioned.branch = Some("issue/42-fix-login".to_string());
        provisioned.worktree_path = Some(PathBuf::from("/wt/issue-42-fix-login"));
        let store = store_with(vec![item(1, "Add export", 52), provisioned]);

        save_store(&path, &store).expect("save");
        let loaded = load_store(&path).expect("load");
        assert_eq!(loaded, store);

        let first = fs::read_to_string(&path).expect("read");
        save_store(&path, &loaded).expect("save again");
        assert_eq!(fs::read_to_string(&path).expect("read"), first);
        assert!(first.ends_with("}\n"));
    }

    #[test]
    fn load_missing_file_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_store(&temp.path().join("missing.json")).expect_err("missing");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Precondition(msg)) if msg.contains("run intake first")
        ));
    }

    #[test]
    fn load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(
            &path,
            r#"{"createdAt":"x","sourceFile":"f","repo":"r","items":[{"id":1}]}"#,
        )
        .expect("write");
        let err = load_store(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn second_lock_fails_fast() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let _held = StoreLock::acquire(&path).expect("first lock");
        let err = StoreLock::acquire(&path).expect_err("second lock");
        assert!(err.to_string().contains("state.json.lock"));
    }

    #[test]
    fn with_store_saves_progress_when_op_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        save_store(&path, &store_with(vec![item(1, "a", 50)])).expect("save");

        let result: Result<()> = with_store(&path, |store| {
            store.items[0].created_issue_number = Some(7);
            Err(anyhow!("tracker exploded"))
        });
        assert!(result.is_err());
        let loaded = load_store(&path).expect("load");
        assert_eq!(loaded.items[0].created_issue_number, Some(7));
    }
}
