//! Credential shape the HTTP client writes onto outbound requests (spec
//! §4.C, §4.I). The actual value comes from `mcpgw-credentials`; this crate
//! only knows how to place it on the wire.

use secrecy::SecretString;

#[derive(Clone)]
pub enum UpstreamAuth {
    None,
    Bearer(SecretString),
    NamedHeader { name: String, value: SecretString },
}

impl std::fmt::Debug for UpstreamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "UpstreamAuth::None"),
            Self::Bearer(_) => write!(f, "UpstreamAuth::Bearer(<redacted>)"),
            Self::NamedHeader { name, .. } => {
                write!(f, "UpstreamAuth::NamedHeader({name}: <redacted>)")
            }
        }
    }
}
