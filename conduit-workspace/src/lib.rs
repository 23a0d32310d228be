//! SQLite-backed implementation of the Executor's `WorkspaceProvisioner` seam: separate crate,
//! own database, so a run's workspace ledger survives independently of the run store itself.

mod store;

pub use store::{SqliteWorkspaceProvisioner, Store, StoreError};
