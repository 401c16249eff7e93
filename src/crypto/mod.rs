pub mod keys;
pub mod signatures;

pub use keys::AgentSigner;
pub use signatures::SignatureManager;
