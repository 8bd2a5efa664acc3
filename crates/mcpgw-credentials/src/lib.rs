//! Credential and per-target env-config resolution: encrypted blob storage,
//! reserved-key handling, and the four-level scope merge (spec §4.I, §6).

mod encryption;
mod error;
mod reserved;
mod resolver;

pub use encryption::EncryptionKey;
pub use error::{CredentialError, CredentialResult};
pub use reserved::{env_header_name, parse_timeout, ReservedKey};
pub use resolver::{CredentialResolver, EncryptedEnvEntry, EnvConfigSource, ResolvedValue, Scope};
