pub mod status_service;
pub mod status_service_impl;
pub use status_service::{ClaimStatusStore, StatusError};
pub use status_service_impl::SeaOrmStatusStore;

pub mod secret_service;
pub mod secret_service_impl;
pub use secret_service::{SecretError, SecretPayload, SecretSink};
pub use secret_service_impl::FileSecretStore;
