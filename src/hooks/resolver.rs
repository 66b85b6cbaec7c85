//! Hook script resolution
//!
//! Hooks are matched purely by file name under `hooks_path`, most specific
//! first:
//!
//! | Tier | Name | Requires |
//! |------|------|----------|
//! | 1 | `{event}-{name}-{branch}` | name and branch |
//! | 2 | `{event}-{name}` | name |
//! | 3 | `{event}` | - |
//! | 4 | `all` | - |
//!
//! Every tier also has a `-background` variant. All candidates that exist as
//! executable regular files are run; this is a fan-out, not a first-match
//! router.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::hooks::metadata::EventMetadata;

/// Suffix marking a hook that runs detached from the request.
pub const BACKGROUND_SUFFIX: &str = "-background";

/// Catch-all hook name, tried last.
pub const CATCH_ALL: &str = "all";

/// A hook file that passed the existence and permission checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHook {
    /// Candidate name relative to the hooks directory (`push-repo1`).
    pub name: String,
    /// Full path to the executable.
    pub path: PathBuf,
}

impl ResolvedHook {
    pub fn is_background(&self) -> bool {
        self.name.ends_with(BACKGROUND_SUFFIX)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Ordered candidate names for `meta`, most specific first.
pub fn candidate_names(meta: &EventMetadata) -> Vec<String> {
    let event = &meta.event;
    let name = present(&meta.name);
    let branch = present(&meta.branch);

    let mut bases = Vec::with_capacity(4);
    if let (Some(name), Some(branch)) = (name, branch) {
        bases.push(format!("{}-{}-{}", event, name, branch));
    }
    if let Some(name) = name {
        bases.push(format!("{}-{}", event, name));
    }
    bases.push(event.to_string());
    bases.push(CATCH_ALL.to_string());

    bases
        .into_iter()
        .flat_map(|base| {
            let background = format!("{}{}", base, BACKGROUND_SUFFIX);
            [base, background]
        })
        .collect()
}

/// A candidate may only name a file beneath the hooks directory.
fn is_contained(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Whether `path` is a regular file this process may execute.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if !path.is_file() {
        return false;
    }
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolve the hooks to run for `meta`, in invocation order.
pub fn resolve_hooks(hooks_path: &Path, meta: &EventMetadata) -> Vec<ResolvedHook> {
    candidate_names(meta)
        .into_iter()
        .filter_map(|name| {
            info!(target: "hooks", "Trying: {}", name);
            if !is_contained(&name) {
                warn!(target: "hooks", candidate = %name, "Ignoring hook name outside hooks directory");
                return None;
            }
            let path = hooks_path.join(&name);
            if is_executable(&path) {
                Some(ResolvedHook { name, path })
            } else {
                debug!(target: "hooks", path = %path.display(), "No executable hook");
                None
            }
        })
        .collect()
}
