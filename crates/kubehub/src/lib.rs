//! Kestrel kubehub: cluster store facade, kube-rs adapter and pod metrics.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod facade;
pub mod memory;
pub mod podmetrics;

pub use adapter::KubeStore;
pub use facade::{ClusterStore, MetricsProvider, MetricsUnavailable};
pub use memory::{Action, MemoryStore};
pub use podmetrics::MetricsServerProvider;
