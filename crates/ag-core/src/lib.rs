//! ag-core/src/lib.rs
//!
//! Domain models, port contracts and the error taxonomy shared by every
//! Agora crate. Nothing in here performs I/O.

pub mod error;
pub mod models;
pub mod push;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use push::PushSubscription;
pub use traits::*;
