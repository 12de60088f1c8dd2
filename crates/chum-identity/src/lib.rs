//! Identity & Keychain and Credential Manager: Person provisioning,
//! signing primitives, and Verifiable Credential lifecycle.

pub mod credential_manager;
pub mod keychain;
pub mod leute_manager;

pub use credential_manager::CredentialManager;
pub use keychain::Keychain;
pub use leute_manager::LeuteManager;
