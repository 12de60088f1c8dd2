//! Content-addressed Object Store and the Access Engine built on top of
//! it. Everything else in the workspace reaches storage through
//! [`ObjectStore`] and access decisions through [`AccessEngine`]; neither
//! type knows about transport, sync, or identity provisioning.

pub mod access_engine;
pub mod object_store;
pub mod reverse_index;

pub use access_engine::AccessEngine;
pub use object_store::{ObjectStore, VersionWrite};
