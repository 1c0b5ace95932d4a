//! # svc-names
//!
//! Validated names for everything the orchestrator addresses on a cluster.
//!
//! ## Design Principles
//!
//! - Names are caller-supplied labels; they are validated once at the edge
//! - Every name has a canonical string form with strict parsing
//! - Names are typed so a plan name can never be passed where a job name is expected
//!
//! ## Service Names
//!
//! Services may live at the root (`cassandra`) or under a folder
//! (`/test/integration/cassandra`). See [`ServiceName`] for the helpers that
//! derive DNS labels and URL paths from the foldered form.

mod error;
#[doc(hidden)]
pub mod macros;
mod service;
mod types;

pub use error::NameError;
pub use service::ServiceName;
pub use types::*;

/// Maximum length of any single name or folder segment.
pub const MAX_NAME_LEN: usize = 128;
