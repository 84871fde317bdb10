//! Durable state for stackscore
//!
//! - [`ledger`]: the freshness ledger, mapping packages to references and
//!   references to the time they were last scored.
//! - [`instance`]: per-job working directory leases, with promotion of newly
//!   touched shared artifacts into isolated per-reference snapshots.

pub mod instance;
pub mod ledger;

pub use instance::{CloseOutcome, InstanceManager, JobDisposition, JobInstance};
pub use ledger::{Freshness, LedgerRecord, MetaLedger};
