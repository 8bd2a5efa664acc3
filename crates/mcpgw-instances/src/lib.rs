//! Subject-keyed lifecycle management for upstream processes and container
//! instances (spec §4.F, §4.G): at-most-one live instance per subject key,
//! a capacity limit, and idle-TTL/max-lifetime garbage collection shared
//! between both kinds of instance via [`manager::InstanceManager`].

pub mod container_manager;
pub mod error;
pub mod manager;
pub mod process_manager;
pub mod subject_key;

pub use container_manager::{
    get_or_create_container, new_container_manager, restart_target, ContainerDescriptor,
    ContainerManager, ContainerResourceController, ContainerSpec, ContainerStatus,
    ManagedContainer,
};
pub use error::{InstanceError, InstanceResult};
pub use manager::{InstanceManager, InstanceManagerConfig, ManagedInstance};
pub use process_manager::{get_or_create_process, new_process_manager, ManagedProcess, ProcessManager};
pub use subject_key::{derive_subject_key, IsolationBoundary};
