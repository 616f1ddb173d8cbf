//! In-memory backends for the MTA catalog sync: a catalog processing engine
//! and a process-local lease.

mod catalog;
mod lease;

pub use catalog::InMemoryCatalog;
pub use lease::LocalLease;
