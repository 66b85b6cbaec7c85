//! Webhook handling module
//!
//! - `signature` - `X-Hub-Signature` verification
//! - `origin` - source address allow-listing
//! - `metadata` - repository/branch extraction
//! - `resolver` - hook script lookup
//! - `dispatch` - hook execution
//! - `handler` - per-delivery orchestration

pub mod dispatch;
pub mod handler;
pub mod metadata;
pub mod origin;
pub mod resolver;
pub mod signature;

pub use dispatch::{dispatch_hooks, render_report, DispatchError, DispatchReport, HookOutcome};
pub use handler::{handle_event, OutcomeBody, WebhookOutcome};
pub use metadata::{EventMetadata, EVENT_HEADER, PING_EVENT};
pub use origin::{
    check_origin, client_ip, AllowList, GithubMetaAllowList, IpRange, OriginError,
    StaticAllowList,
};
pub use resolver::{candidate_names, resolve_hooks, ResolvedHook};
pub use signature::{verify_signature, SignatureError, SIGNATURE_HEADER};
