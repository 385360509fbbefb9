//! Ledger storage backends: an in-memory one for tests and embedding, and a
//! fjall keyspace on disk.

pub mod disk;
pub mod memory;

pub use disk::FjallLedger;
pub use memory::MemoryLedger;
