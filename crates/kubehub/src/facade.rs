//! Capability traits the core consumes: the cluster store and the pod metrics source.

use std::collections::HashMap;

use kestrel_core::{
    ControllerDescriptor, ControllerKind, DataSelect, EventDescriptor, MetricSample, ObjectIdentity, PodDescriptor,
    Selector, ServiceDescriptor, StoreResult,
};

/// Get/List/Delete access to the kinds the core works with.
///
/// Every call is a suspension point. Implementations must be safe to share
/// between concurrent requests; callers do no locking of their own.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_controller(&self, kind: ControllerKind, id: &ObjectIdentity) -> StoreResult<ControllerDescriptor>;

    /// Unfiltered list of every controller of `kind` in the namespace.
    async fn list_controllers(&self, kind: ControllerKind, namespace: &str) -> StoreResult<Vec<ControllerDescriptor>>;

    async fn delete_controller(&self, kind: ControllerKind, id: &ObjectIdentity) -> StoreResult<()>;

    async fn list_services(&self, namespace: &str) -> StoreResult<Vec<ServiceDescriptor>>;

    async fn delete_service(&self, id: &ObjectIdentity) -> StoreResult<()>;

    /// Pods matching `selector`. `Selector::Nothing` yields an empty list without any I/O.
    async fn list_pods(&self, namespace: &str, selector: &Selector, select: DataSelect) -> StoreResult<Vec<PodDescriptor>>;

    /// Events whose involved object is the given controller.
    async fn list_events(
        &self,
        kind: ControllerKind,
        involved: &ObjectIdentity,
        select: DataSelect,
    ) -> StoreResult<Vec<EventDescriptor>>;
}

#[derive(Debug, thiserror::Error)]
#[error("metrics unavailable: {0}")]
pub struct MetricsUnavailable(pub String);

/// Source of point-in-time pod resource usage.
#[async_trait::async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Usage keyed by pod. Pods without data are simply missing from the map.
    async fn fetch(&self, pods: &[ObjectIdentity]) -> Result<HashMap<ObjectIdentity, MetricSample>, MetricsUnavailable>;
}
