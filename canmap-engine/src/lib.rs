//! canmap-engine library interface
//!
//! Canonical-mapping review engine: job lifecycle, reconciliation, the
//! in-memory store, the field editor and the backend gateway.

pub mod backend;
pub mod editor;
pub mod error;
pub mod job;
pub mod reconcile;
pub mod session;
pub mod store;

pub use crate::error::{EngineError, EngineResult};
pub use crate::job::JobController;
pub use crate::session::ReviewSession;
pub use crate::store::CanonicalStore;
