//! Thread-affine transactions over reader/writer locks.
//!
//! Every store, index and relation store owns a [`LockCell`]. A thread
//! accumulates locks on cells inside its [`Transaction`] and releases them
//! all at once when the last handle to the transaction is dropped.
//!
//! ## Deadlock handling
//!
//! Lock requests block for at most [`Config::deadlock_timeout`]. A request
//! that times out fails with [`StoreError::Deadlock`] and the resource is
//! remembered against the call site that began the transaction. The next
//! transaction begun from that call site acquires the remembered resources
//! up front, in ascending [`LockId`] order.
//!
//! [`Config::deadlock_timeout`]: crate::config::Config::deadlock_timeout
//! [`StoreError::Deadlock`]: crate::error::StoreError::Deadlock
//! [`LockId`]: crate::types::LockId

mod cell;
mod coordinator;
mod history;
mod transaction;

pub use cell::{LockCell, Lockable};
pub use coordinator::{HistoryStats, LockCoordinator};
pub use history::CallSite;
pub use transaction::Transaction;

pub(crate) type RawLock = parking_lot::RwLock<()>;
