//! Mooring State Management
//!
//! Attachment records are persisted in a JSON state file. A lock file next
//! to it keeps two commands from modifying the same state at once.
//!
//! - **StateFile**: version, serial, lineage and the recorded resources
//! - **StateBackend**: storage trait, implemented by `LocalBackend`
//! - **LockInfo**: who holds the lock and until when
//!
//! ```ignore
//! let backend = LocalBackend::with_path("mooring.state.json".into());
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! state.record(&created, "aws");
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod local;
pub mod lock;
pub mod state;

pub use backend::{BackendError, BackendResult, StateBackend};
pub use local::LocalBackend;
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
