//! Observability for the consultation session orchestrator.
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with allow-listed fields only:
//! consultation and participant ids. Auth tokens and chat bodies are never
//! logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `consult_sessions_started_total` | Counter | none | `start()` calls accepted |
//! | `consult_session_outcomes_total` | Counter | `outcome` | Terminal states reached |
//! | `consult_session_start_duration_seconds` | Histogram | `status` | Time from `start()` to Connected/Failed |
//! | `consult_remote_participants` | Gauge | none | Remote participants in the registry |
//! | `consult_subscribe_failures_total` | Counter | `kind` | Remote subscribes that failed |
//! | `consult_chat_sends_total` | Counter | `status` | Chat message sends |
//! | `consult_chat_polls_total` | Counter | `status` | Chat polling fetches |
//! | `consult_teardown_step_failures_total` | Counter | `step` | Best-effort teardown steps that failed |
//! | `consult_screen_share_toggles_total` | Counter | `status` | Screen-share toggle outcomes |
//!
//! The host application installs the recorder; without one every call is a no-op.

pub mod metrics;
