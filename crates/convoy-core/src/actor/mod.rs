//! Actor implementations

pub mod deployment;
pub mod target;

pub use deployment::{
    DeploymentActor, DeploymentActorArgs, ProviderFactory, RegistryProviderFactory,
};
pub use target::{TargetActor, TargetActorArgs};
