//! Services layer for trust-service.
//!
//! Token, credential and session engines plus the key ring and lifecycle
//! listeners they share.

pub mod credential;
pub mod error;
pub mod events;
pub mod keys;
pub mod providers;
pub mod session;
pub mod token;

pub use credential::{
    ChainLink, CredentialContext, CredentialProvider, CredentialService, LoginOutcome,
    ProviderRegistry, UnbindMode, VerifyOutcome,
};
pub use error::ServiceError;
pub use events::{LifecycleEvent, LifecycleListener, Listeners, TracingAuditListener};
pub use keys::KeyRing;
pub use providers::PasswordProvider;
pub use session::{self_scope, DerivePlan, LoginResult, SessionService};
pub use token::{
    AuthContext, ClientCredentials, IssuedToken, SignedToken, TimeoutKind, TimeoutTable,
    TokenClaims, TokenService,
};
