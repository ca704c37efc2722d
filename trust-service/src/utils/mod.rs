pub mod secret;
pub mod validation;

pub use secret::{generate_opaque_token, hash_secret, verify_secret, PlainSecret};
pub use validation::ValidatedJson;
