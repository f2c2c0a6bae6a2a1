//! Runtime side of the quote calculator.
//!
//! `clearview-core` decides what a session may do next; this crate does it:
//!
//! - **Lookup** (`lookup`) - distance and square-footage services for an address
//! - **Sessions** (`service`, `registry`) - live sessions, autosave, the
//!   final-step stalled timer, submission and its emails
//! - **Catalog** (`catalog`) - cached services and settings, refreshed when an
//!   admin edit is published
//! - **Follow-up** (`followup`) - the abandoned-draft email sweep and its schedule
//!
//! Persistence and email failures are logged and never surface to the customer.

pub mod audit;
pub mod catalog;
pub mod followup;
pub mod lookup;
pub mod registry;
pub mod service;

pub use audit::TracingAuditSink;
pub use catalog::{Catalog, CatalogCache, CatalogChange, CatalogEvents};
pub use followup::{spawn_schedule, FollowupSweep, SweepPolicy, SweepReport};
pub use lookup::{HttpPropertyLookup, LookupError, PropertyLookup, StaticPropertyLookup};
pub use registry::{SessionEntry, SessionHandle, SessionRegistry};
pub use service::{
    FunnelDeps, FunnelError, FunnelSettings, QuoteSessionService, SessionView, SubmitReceipt,
};
