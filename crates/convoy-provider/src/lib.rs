//! convoy-provider: Target provider contract and implementations
//!
//! Defines the `TargetProvider` trait every target integration implements,
//! flat-map configuration parsing, the provider registry, and the built-in
//! providers (mock, http, proxy, script and the message-bus binding over an
//! MQTT broker or an injected bus).

pub mod agent;
pub mod apply;
pub mod broker;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod mock;
pub mod mqtt;
pub mod proxy;
pub mod registry;
pub mod script;
pub mod traits;

pub use agent::RemoteAgent;
pub use broker::{BrokerAddress, BrokerBus};
pub use bus::{BusSubscription, MemoryBus, MessageBus};
pub use context::CallContext;
pub use error::{ApplyFailure, ProviderError};
pub use http::HttpTargetProvider;
pub use mock::{MockStore, MockTargetProvider};
pub use mqtt::{MqttConfig, MqttTargetProvider};
pub use proxy::ProxyTargetProvider;
pub use registry::{BuiltinDeps, ChainedRegistry, ProviderRegistry, ProviderSource};
pub use script::{ScriptConfig, ScriptTargetProvider};
pub use traits::{LegacyComparer, TargetProvider};
