//! Event metadata extraction
//!
//! Derives the repository name and branch from a decoded delivery. Where the
//! branch lives depends on the event shape:
//!
//! 1. `create` / `delete` carry `ref_type`; `ref` is the branch only when
//!    `ref_type == "branch"` (tags yield nothing)
//! 2. anything carrying `pull_request` uses the *target* branch,
//!    `pull_request.base.ref`
//! 3. `push` carries a full ref (`refs/heads/<branch>`); the branch is the
//!    third slash-delimited segment
//!
//! Missing keys never fail the request; the field is simply absent.

use serde_json::Value;

/// Event assumed when the delivery has no `X-GitHub-Event` header.
pub const PING_EVENT: &str = "ping";

/// Event whose deleted-ref deliveries are skipped.
pub const PUSH_EVENT: &str = "push";

/// Header naming the event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Sentinel passed to hooks in place of an absent name or branch.
pub const ABSENT_ARG: &str = "None";

/// Metadata describing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub event: String,
}

impl EventMetadata {
    /// Extract metadata for `event` from `payload`.
    pub fn extract(event: &str, payload: &Value) -> Self {
        EventMetadata {
            name: repository_name(payload),
            branch: resolve_branch(event, payload),
            event: event.to_string(),
        }
    }

    /// Repository name as passed on a hook's command line.
    pub fn name_arg(&self) -> &str {
        self.name.as_deref().unwrap_or(ABSENT_ARG)
    }

    /// Branch as passed on a hook's command line.
    pub fn branch_arg(&self) -> &str {
        self.branch.as_deref().unwrap_or(ABSENT_ARG)
    }
}

/// Resolve the branch a delivery refers to, if any.
///
/// A push to `refs/heads/feature/x` yields `feature`; the rest of the ref
/// is dropped, so slashed branch names share hooks with their first segment.
pub fn resolve_branch(event: &str, payload: &Value) -> Option<String> {
    if payload.get("ref_type").is_some() {
        if payload.get("ref_type").and_then(Value::as_str) == Some("branch") {
            return payload.get("ref").and_then(Value::as_str).map(str::to_string);
        }
        return None;
    }

    if let Some(pr) = payload.get("pull_request") {
        return pr
            .get("base")
            .and_then(|base| base.get("ref"))
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if event == PUSH_EVENT {
        // refs/heads/feature/x -> feature
        return payload
            .get("ref")
            .and_then(Value::as_str)
            .and_then(|full_ref| full_ref.split('/').nth(2))
            .map(str::to_string);
    }

    None
}

/// `repository.name`, when the delivery carries a repository.
pub fn repository_name(payload: &Value) -> Option<String> {
    payload
        .get("repository")
        .and_then(|repo| repo.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Whether this is a push announcing a deleted ref.
///
/// A push payload without `deleted` counts as not deleted.
pub fn is_push_delete(event: &str, payload: &Value) -> bool {
    event == PUSH_EVENT
        && payload
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
}
