//! Kestrel core types: workload descriptors, label selectors and errors.

#![forbid(unsafe_code)]

pub mod errors;
pub mod model;
pub mod selector;

pub use errors::{Dependency, KestrelError, KestrelResult, StoreError, StoreResult, Verb};
pub use model::{
    AggregatePodInfo, ControllerDescriptor, ControllerKind, ControllerMeta, DataSelect, DeleteFailure,
    DeletionResult, DetailView, EventDescriptor, EventType, MetricSample, ObjectIdentity, PodDescriptor,
    PodPhase, PodUsage, ReconcileOutcome, ServiceDescriptor,
};
pub use selector::{is_superset_of, matches, Labels, Selector};

pub mod prelude {
    pub use super::{
        ControllerDescriptor, ControllerKind, KestrelError, KestrelResult, Labels, ObjectIdentity, Selector,
        ServiceDescriptor, StoreError, StoreResult,
    };
}
