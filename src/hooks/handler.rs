//! Webhook event handling
//!
//! Takes an authenticated, decoded delivery through metadata extraction,
//! hook resolution and dispatch, and decides what the response body says.

use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::hooks::dispatch::{dispatch_hooks, render_report, DispatchError, DispatchReport};
use crate::hooks::metadata::{is_push_delete, EventMetadata};
use crate::hooks::resolver::resolve_hooks;

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// `ping` event.
    Pong,
    /// Push announcing a deleted ref; nothing runs.
    Skipped,
    /// No hook matched.
    Nop,
    /// Hooks ran; results not requested.
    Done,
    /// Hooks ran; per-hook results requested.
    Report(DispatchReport),
}

/// Response body for a given outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeBody {
    Json(Value),
    /// Pre-rendered JSON text.
    Rendered(String),
}

impl WebhookOutcome {
    pub fn body(&self) -> Result<OutcomeBody, serde_json::Error> {
        let body = match self {
            WebhookOutcome::Pong => OutcomeBody::Json(json!({ "msg": "pong" })),
            WebhookOutcome::Skipped => OutcomeBody::Json(json!({ "status": "skipped" })),
            WebhookOutcome::Nop => OutcomeBody::Json(json!({ "status": "nop" })),
            WebhookOutcome::Done => OutcomeBody::Json(json!({ "status": "done" })),
            WebhookOutcome::Report(report) => OutcomeBody::Rendered(render_report(report)?),
        };
        Ok(body)
    }
}

/// Handle a non-ping event whose payload has already been decoded.
pub async fn handle_event(
    config: &Config,
    event: &str,
    payload: &Value,
) -> Result<WebhookOutcome, DispatchError> {
    let meta = EventMetadata::extract(event, payload);
    info!(
        target: "hooks",
        event = %meta.event,
        name = meta.name_arg(),
        branch = meta.branch_arg(),
        "Received event"
    );

    if is_push_delete(event, payload) {
        info!(target: "hooks", name = meta.name_arg(), branch = meta.branch_arg(), "Skipping push-delete event");
        return Ok(WebhookOutcome::Skipped);
    }

    let hooks = resolve_hooks(&config.hooks_path, &meta);
    if hooks.is_empty() {
        return Ok(WebhookOutcome::Nop);
    }

    let report = dispatch_hooks(hooks, meta, payload).await?;

    if !config.return_scripts_info {
        return Ok(WebhookOutcome::Done);
    }

    if let Ok(rendered) = render_report(&report) {
        info!(target: "hooks", "{}", rendered);
    }
    Ok(WebhookOutcome::Report(report))
}
