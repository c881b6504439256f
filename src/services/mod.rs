// src/services/mod.rs
//
// Outbound collaborators used by the auth core: email delivery and
// federated login providers

pub mod email;
pub mod oauth;

// Re-export commonly used types for convenience
pub use email::{EmailError, EmailService};
pub use oauth::{IdentityProvider, OAuthError, ProviderRegistry};
