//! Hosted backend access: row models, table registry and store implementations

pub mod memory;
pub mod models;
pub mod rest;
pub mod store;
pub mod tables;

pub use memory::MemoryStore;
pub use models::*;
pub use rest::RestStore;
pub use store::*;
pub use tables::{Record, Table};
