use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

pub const DATABASE_ENV_VAR: &str = "SUPPLYPLAN_DATABASE";
pub const DEFAULT_STATE_DIR: &str = ".supplyplan";
pub const DEFAULT_DATABASE_FILE: &str = "plan.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub database_path: PathBuf,
}

impl RuntimePaths {
    /// Directory that must exist before the database file can be created.
    #[must_use]
    pub fn database_dir(&self) -> Option<&Path> {
        self.database_path.parent()
    }
}

/// Resolves where the run store lives. `~/` overrides expand against
/// `home_dir`; relative overrides resolve against `cwd`. The override must
/// name a file, not a directory.
pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    database_override: Option<&Path>,
) -> Result<RuntimePaths> {
    for (label, path) in [("home_dir", home_dir), ("cwd", cwd)] {
        if !path.is_absolute() {
            bail!("{label} must be absolute: {}", path.display());
        }
    }

    let database_path = match database_override {
        None => home_dir.join(DEFAULT_STATE_DIR).join(DEFAULT_DATABASE_FILE),
        Some(path) => database_file_path(path, home_dir, cwd)?,
    };

    Ok(RuntimePaths {
        home_dir: collapse_dots(home_dir),
        cwd: collapse_dots(cwd),
        database_path: collapse_dots(&database_path),
    })
}

fn database_file_path(raw: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let text = raw.to_string_lossy();
    if text.trim().is_empty() {
        bail!("database path override must not be empty");
    }
    if raw.file_name().is_none()
        || raw == Path::new("~")
        || text.ends_with(std::path::MAIN_SEPARATOR)
        || text.ends_with('/')
    {
        bail!("database path must name a file, got directory `{text}`");
    }

    let base = match raw.components().next() {
        Some(Component::Normal(first)) if first == "~" => home_dir.join(raw.strip_prefix("~")?),
        Some(Component::Normal(first)) if first.to_string_lossy().starts_with('~') => {
            bail!("unsupported home expansion syntax (only `~` and `~/...` are supported): {text}")
        }
        _ => cwd.join(raw),
    };

    Ok(collapse_dots(&base))
}

/// Drops `.` segments and folds `..` into its parent without touching the
/// filesystem; the database file may not exist yet.
fn collapse_dots(path: &Path) -> PathBuf {
    path.components()
        .fold(PathBuf::new(), |mut collapsed, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir if collapsed.file_name().is_some() => {
                    collapsed.pop();
                }
                other => collapsed.push(other.as_os_str()),
            }
            collapsed
        })
}
