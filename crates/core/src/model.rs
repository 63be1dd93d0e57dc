//! Snapshot descriptors fetched from the cluster and the records assembled from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{KestrelError, KestrelResult};
use crate::selector::{Labels, Selector};

/// `namespace/name` of an object within a kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub namespace: String,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Workload controller kinds served by detail and cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    Job,
    DaemonSet,
    ReplicaSet,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 3] = [ControllerKind::Job, ControllerKind::DaemonSet, ControllerKind::ReplicaSet];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerKind::Job => "Job",
            ControllerKind::DaemonSet => "DaemonSet",
            ControllerKind::ReplicaSet => "ReplicaSet",
        }
    }
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ControllerKind {
    type Err = KestrelError;

    /// Accepts kind names the way kubectl does: any case, plural, or short name.
    fn from_str(s: &str) -> KestrelResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "job" | "jobs" => Ok(ControllerKind::Job),
            "daemonset" | "daemonsets" | "ds" => Ok(ControllerKind::DaemonSet),
            "replicaset" | "replicasets" | "rs" => Ok(ControllerKind::ReplicaSet),
            other => Err(KestrelError::Validation(format!("unsupported controller kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDescriptor {
    pub kind: ControllerKind,
    pub identity: ObjectIdentity,
    pub labels: Labels,
    pub pod_template_labels: Labels,
    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
    /// DaemonSet desired scheduled count, ReplicaSet `spec.replicas`.
    pub declared_replicas: Option<i32>,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ControllerDescriptor {
    /// Bare descriptor with only identity and labels set.
    pub fn new(kind: ControllerKind, identity: ObjectIdentity, labels: Labels) -> Self {
        Self {
            kind,
            identity,
            labels,
            pod_template_labels: Labels::new(),
            parallelism: None,
            completions: None,
            declared_replicas: None,
            container_images: Vec::new(),
            init_container_images: Vec::new(),
            creation_timestamp: None,
        }
    }

    /// Selector for this controller's pods. An empty template selects no pods
    /// rather than every pod in the namespace.
    pub fn pod_selector(&self) -> Selector {
        if self.pod_template_labels.is_empty() {
            Selector::Nothing
        } else {
            Selector::Equals(self.pod_template_labels.clone())
        }
    }

    /// Declared pod target: replicas, then completions, then parallelism.
    pub fn desired_pods(&self) -> Option<i32> {
        self.declared_replicas.or(self.completions).or(self.parallelism)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub identity: ObjectIdentity,
    pub selector: Selector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Lenient parse of `status.phase`; anything unrecognised is `Unknown`.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDescriptor {
    pub identity: ObjectIdentity,
    pub labels: Labels,
    pub phase: PodPhase,
    pub node_name: Option<String>,
    pub restart_count: i32,
    pub container_images: Vec<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl PodDescriptor {
    pub fn new(identity: ObjectIdentity, labels: Labels, phase: PodPhase) -> Self {
        Self { identity, labels, phase, node_name: None, restart_count: 0, container_images: Vec::new(), creation_timestamp: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDescriptor {
    pub identity: ObjectIdentity,
    pub reason: String,
    pub message: String,
    pub event_type: EventType,
    pub count: i32,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub source_component: Option<String>,
}

/// Point-in-time resource usage of one pod, summed over its containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
    pub window_secs: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Caller-supplied list parameters forwarded to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSelect {
    pub limit: Option<u32>,
}

impl DataSelect {
    pub fn unbounded() -> Self { Self::default() }
    pub fn with_limit(limit: u32) -> Self { Self { limit: Some(limit) } }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatePodInfo {
    /// Pods observed in the fetch.
    pub current: i32,
    pub desired: i32,
    pub running: i32,
    pub pending: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl AggregatePodInfo {
    /// Count pods by phase. `desired` falls back to the observed pod count.
    pub fn from_pods(pods: &[PodDescriptor], desired: Option<i32>) -> Self {
        let current = pods.len() as i32;
        let mut info = AggregatePodInfo { current, desired: desired.unwrap_or(current), ..Default::default() };
        for p in pods {
            match p.phase {
                PodPhase::Running => info.running += 1,
                PodPhase::Pending => info.pending += 1,
                PodPhase::Succeeded => info.succeeded += 1,
                PodPhase::Failed => info.failed += 1,
                PodPhase::Unknown => {}
            }
        }
        info
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerMeta {
    pub kind: ControllerKind,
    pub identity: ObjectIdentity,
    pub labels: Labels,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUsage {
    pub pod: ObjectIdentity,
    #[serde(flatten)]
    pub sample: MetricSample,
}

/// Merged presentation of a controller and its related runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailView {
    pub meta: ControllerMeta,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
    pub parallelism: Option<i32>,
    pub completions: Option<i32>,
    pub pod_info: AggregatePodInfo,
    pub pods: Vec<PodDescriptor>,
    pub events: Vec<EventDescriptor>,
    /// Services whose selector targets this controller's pods.
    pub services: Vec<ServiceDescriptor>,
    /// `None` when the metrics provider was absent, failed, or had no data.
    pub metrics: Option<Vec<PodUsage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub identity: ObjectIdentity,
    pub cause: String,
}

/// Result of one orphan reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub kind: ControllerKind,
    pub target: ObjectIdentity,
    pub deleted: Vec<ObjectIdentity>,
    pub failures: Vec<DeleteFailure>,
    /// Sibling whose labels cover the target's, making every dependent survive.
    pub retained_by: Option<ObjectIdentity>,
}

impl ReconcileOutcome {
    pub fn empty(kind: ControllerKind, target: ObjectIdentity) -> Self {
        Self { kind, target, deleted: Vec::new(), failures: Vec::new(), retained_by: None }
    }

    pub fn is_complete(&self) -> bool { self.failures.is_empty() }

    /// Turn recorded delete failures into a `PartialDeleteFailure` error.
    pub fn into_strict(self) -> KestrelResult<Vec<ObjectIdentity>> {
        if self.failures.is_empty() {
            Ok(self.deleted)
        } else {
            Err(KestrelError::PartialDeleteFailure { deleted: self.deleted, failures: self.failures })
        }
    }
}

/// Result of deleting a controller after reconciling its dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionResult {
    pub controller_deleted: bool,
    /// Why the controller delete failed; its orphans may already be gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_error: Option<String>,
    pub dependents: ReconcileOutcome,
}

impl DeletionResult {
    pub fn is_fully_cleaned(&self) -> bool { self.controller_deleted && self.dependents.is_complete() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str, phase: PodPhase) -> PodDescriptor {
        PodDescriptor::new(ObjectIdentity::new("ns", name), Labels::new(), phase)
    }

    #[test]
    fn aggregate_counts_by_phase() {
        let pods = vec![
            pod("a", PodPhase::Running),
            pod("b", PodPhase::Running),
            pod("c", PodPhase::Pending),
            pod("d", PodPhase::Succeeded),
            pod("e", PodPhase::Failed),
            pod("f", PodPhase::Unknown),
        ];
        let info = AggregatePodInfo::from_pods(&pods, Some(3));
        assert_eq!(info, AggregatePodInfo { current: 6, desired: 3, running: 2, pending: 1, succeeded: 1, failed: 1 });
    }

    #[test]
    fn desired_defaults_to_observed_count() {
        let pods = vec![pod("a", PodPhase::Running), pod("b", PodPhase::Pending)];
        assert_eq!(AggregatePodInfo::from_pods(&pods, None).desired, 2);
        assert_eq!(AggregatePodInfo::from_pods(&[], None).desired, 0);
    }

    #[test]
    fn zero_is_a_declared_target() {
        let pods = vec![pod("a", PodPhase::Running)];
        assert_eq!(AggregatePodInfo::from_pods(&pods, Some(0)).desired, 0);
    }

    #[test]
    fn desired_pods_precedence() {
        let mut c = ControllerDescriptor::new(ControllerKind::Job, ObjectIdentity::new("ns", "j"), Labels::new());
        assert_eq!(c.desired_pods(), None);
        c.parallelism = Some(2);
        assert_eq!(c.desired_pods(), Some(2));
        c.completions = Some(5);
        assert_eq!(c.desired_pods(), Some(5));
        c.declared_replicas = Some(7);
        assert_eq!(c.desired_pods(), Some(7));
    }

    #[test]
    fn empty_template_selects_no_pods() {
        let mut c = ControllerDescriptor::new(ControllerKind::DaemonSet, ObjectIdentity::new("ns", "ds"), Labels::new());
        assert!(c.pod_selector().is_nothing());
        c.pod_template_labels.insert("app".into(), "x".into());
        assert_eq!(c.pod_selector(), Selector::from_pairs([("app", "x")]));
    }

    #[test]
    fn controller_kind_parses_kubectl_spellings() {
        assert_eq!("jobs".parse::<ControllerKind>().unwrap(), ControllerKind::Job);
        assert_eq!("DaemonSet".parse::<ControllerKind>().unwrap(), ControllerKind::DaemonSet);
        assert_eq!("ds".parse::<ControllerKind>().unwrap(), ControllerKind::DaemonSet);
        assert_eq!("rs".parse::<ControllerKind>().unwrap(), ControllerKind::ReplicaSet);
        assert!("deployment".parse::<ControllerKind>().is_err());
    }

    #[test]
    fn strict_outcome_surfaces_partial_failure() {
        let mut out = ReconcileOutcome::empty(ControllerKind::Job, ObjectIdentity::new("ns", "j"));
        out.deleted.push(ObjectIdentity::new("ns", "a"));
        assert_eq!(out.clone().into_strict().unwrap().len(), 1);
        out.failures.push(DeleteFailure { identity: ObjectIdentity::new("ns", "b"), cause: "boom".into() });
        match out.into_strict() {
            Err(KestrelError::PartialDeleteFailure { deleted, failures }) => {
                assert_eq!(deleted.len(), 1);
                assert_eq!(failures[0].identity.name, "b");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn pod_phase_parse_is_lenient() {
        assert_eq!(PodPhase::parse(Some("Running")), PodPhase::Running);
        assert_eq!(PodPhase::parse(Some("running")), PodPhase::Unknown);
        assert_eq!(PodPhase::parse(None), PodPhase::Unknown);
    }
}
