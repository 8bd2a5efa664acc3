//! Persistence contract consumed by the core (spec §6): typed operations
//! over users, API tokens, targets, policies, env config, sessions,
//! instances, and request logs, with distinguished `NotFound`/
//! `AlreadyExists` signals. Trait only — no backing store ships here.

mod error;
mod models;
mod repository;

pub use error::{RepositoryError, RepositoryResult};
pub use models::{
    ApiToken, AuthKind, InstanceKind, InstanceRecord, IsolationBoundary, RequestLog,
    SessionRecord, Statefulness, Target, TransportKind, User,
};
pub use repository::{
    ApiTokenRepository, EnvConfigRepository, EnvConfigRow, InstanceRepository, PolicyRepository,
    Repository, RequestLogRepository, SessionRepository, TargetRepository, UserRepository,
};
