//! `ClusterStore` backed by a live API server through kube-rs.

use std::fmt::Debug;

use k8s_openapi::api::{
    apps::v1::{DaemonSet, ReplicaSet},
    batch::v1::Job,
    core::v1::{Event, Pod, PodSpec, PodTemplateSpec, Service},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, ListParams},
    Client,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use kestrel_core::{
    ControllerDescriptor, ControllerKind, DataSelect, EventDescriptor, EventType, Labels, ObjectIdentity, PodDescriptor,
    PodPhase, Selector, ServiceDescriptor, StoreError, StoreResult, Verb,
};

use crate::facade::ClusterStore;

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    /// Build from the ambient kubeconfig / in-cluster environment.
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn record(verb: Verb, kind: &'static str) {
    metrics::counter!("store_calls_total", 1u64, "verb" => verb.as_str(), "resource" => kind);
}

fn map_err(verb: Verb, kind: &'static str, id: &ObjectIdentity, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::not_found(kind, id.clone()),
        other => StoreError::transport(verb, kind, id.to_string(), anyhow::Error::new(other)),
    }
}

fn map_list_err(kind: &'static str, namespace: &str, e: kube::Error) -> StoreError {
    StoreError::transport(Verb::List, kind, namespace.to_string(), anyhow::Error::new(e))
}

async fn get_obj<K>(api: &Api<K>, kind: &'static str, id: &ObjectIdentity) -> StoreResult<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    record(Verb::Get, kind);
    api.get(&id.name).await.map_err(|e| map_err(Verb::Get, kind, id, e))
}

async fn list_objs<K>(api: &Api<K>, kind: &'static str, namespace: &str, lp: &ListParams) -> StoreResult<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    record(Verb::List, kind);
    let list = api.list(lp).await.map_err(|e| map_list_err(kind, namespace, e))?;
    debug!(kind, ns = %namespace, count = list.items.len(), "kubehub: list ok");
    Ok(list.items)
}

async fn delete_obj<K>(api: &Api<K>, kind: &'static str, id: &ObjectIdentity, dp: &DeleteParams) -> StoreResult<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    record(Verb::Delete, kind);
    api.delete(&id.name, dp).await.map(|_| ()).map_err(|e| map_err(Verb::Delete, kind, id, e))
}

fn list_params(selector: Option<&str>, select: DataSelect) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(q) = selector.filter(|q| !q.is_empty()) {
        lp = lp.labels(q);
    }
    if let Some(limit) = select.limit {
        lp = lp.limit(limit);
    }
    lp
}

#[async_trait::async_trait]
impl ClusterStore for KubeStore {
    async fn get_controller(&self, kind: ControllerKind, id: &ObjectIdentity) -> StoreResult<ControllerDescriptor> {
        let ns = id.namespace.as_str();
        match kind {
            ControllerKind::Job => get_obj(&self.api::<Job>(ns), kind.as_str(), id).await.map(|o| controller_from_job(&o, ns)),
            ControllerKind::DaemonSet => {
                get_obj(&self.api::<DaemonSet>(ns), kind.as_str(), id).await.map(|o| controller_from_daemon_set(&o, ns))
            }
            ControllerKind::ReplicaSet => {
                get_obj(&self.api::<ReplicaSet>(ns), kind.as_str(), id).await.map(|o| controller_from_replica_set(&o, ns))
            }
        }
    }

    async fn list_controllers(&self, kind: ControllerKind, namespace: &str) -> StoreResult<Vec<ControllerDescriptor>> {
        let lp = ListParams::default();
        let out = match kind {
            ControllerKind::Job => list_objs(&self.api::<Job>(namespace), kind.as_str(), namespace, &lp)
                .await?
                .iter()
                .map(|o| controller_from_job(o, namespace))
                .collect(),
            ControllerKind::DaemonSet => list_objs(&self.api::<DaemonSet>(namespace), kind.as_str(), namespace, &lp)
                .await?
                .iter()
                .map(|o| controller_from_daemon_set(o, namespace))
                .collect(),
            ControllerKind::ReplicaSet => list_objs(&self.api::<ReplicaSet>(namespace), kind.as_str(), namespace, &lp)
                .await?
                .iter()
                .map(|o| controller_from_replica_set(o, namespace))
                .collect(),
        };
        Ok(out)
    }

    async fn delete_controller(&self, kind: ControllerKind, id: &ObjectIdentity) -> StoreResult<()> {
        let ns = id.namespace.as_str();
        // Background propagation lets the garbage collector remove the pods.
        let dp = DeleteParams::background();
        match kind {
            ControllerKind::Job => delete_obj(&self.api::<Job>(ns), kind.as_str(), id, &dp).await,
            ControllerKind::DaemonSet => delete_obj(&self.api::<DaemonSet>(ns), kind.as_str(), id, &dp).await,
            ControllerKind::ReplicaSet => delete_obj(&self.api::<ReplicaSet>(ns), kind.as_str(), id, &dp).await,
        }
    }

    async fn list_services(&self, namespace: &str) -> StoreResult<Vec<ServiceDescriptor>> {
        let items = list_objs(&self.api::<Service>(namespace), "Service", namespace, &ListParams::default()).await?;
        Ok(items.iter().map(|s| service_from(s, namespace)).collect())
    }

    async fn delete_service(&self, id: &ObjectIdentity) -> StoreResult<()> {
        delete_obj(&self.api::<Service>(&id.namespace), "Service", id, &DeleteParams::default()).await
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector, select: DataSelect) -> StoreResult<Vec<PodDescriptor>> {
        let Some(query) = selector.to_query() else {
            debug!(ns = %namespace, "kubehub: absent pod selector, skipping list");
            return Ok(Vec::new());
        };
        let lp = list_params(Some(&query), select);
        let items = list_objs(&self.api::<Pod>(namespace), "Pod", namespace, &lp).await?;
        Ok(items.iter().map(|p| pod_from(p, namespace)).collect())
    }

    async fn list_events(
        &self,
        kind: ControllerKind,
        involved: &ObjectIdentity,
        select: DataSelect,
    ) -> StoreResult<Vec<EventDescriptor>> {
        let ns = involved.namespace.as_str();
        let lp = list_params(None, select).fields(&involved_object_fields(kind, involved));
        let items = list_objs(&self.api::<Event>(ns), "Event", ns, &lp).await?;
        Ok(items.iter().map(|e| event_from(e, ns)).collect())
    }
}

/// Field selector for events about one object.
pub fn involved_object_fields(kind: ControllerKind, id: &ObjectIdentity) -> String {
    format!(
        "involvedObject.kind={},involvedObject.name={},involvedObject.namespace={}",
        kind.as_str(),
        id.name,
        id.namespace
    )
}

// ---------------- conversions ----------------

fn identity_of(meta: &ObjectMeta, fallback_ns: &str) -> ObjectIdentity {
    ObjectIdentity::new(
        meta.namespace.clone().unwrap_or_else(|| fallback_ns.to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

fn labels_of(meta: Option<&ObjectMeta>) -> Labels {
    meta.and_then(|m| m.labels.clone()).unwrap_or_default()
}

fn container_images(spec: Option<&PodSpec>) -> (Vec<String>, Vec<String>) {
    let Some(spec) = spec else { return (Vec::new(), Vec::new()) };
    let main = spec.containers.iter().filter_map(|c| c.image.clone()).collect();
    let init = spec
        .init_containers
        .as_ref()
        .map(|cs| cs.iter().filter_map(|c| c.image.clone()).collect())
        .unwrap_or_default();
    (main, init)
}

fn from_template(
    kind: ControllerKind,
    meta: &ObjectMeta,
    template: Option<&PodTemplateSpec>,
    fallback_ns: &str,
) -> ControllerDescriptor {
    let mut c = ControllerDescriptor::new(kind, identity_of(meta, fallback_ns), labels_of(Some(meta)));
    c.pod_template_labels = labels_of(template.and_then(|t| t.metadata.as_ref()));
    let (main, init) = container_images(template.and_then(|t| t.spec.as_ref()));
    c.container_images = main;
    c.init_container_images = init;
    c.creation_timestamp = meta.creation_timestamp.as_ref().map(|t| t.0);
    c
}

pub fn controller_from_job(job: &Job, fallback_ns: &str) -> ControllerDescriptor {
    let spec = job.spec.as_ref();
    let mut c = from_template(ControllerKind::Job, &job.metadata, spec.map(|s| &s.template), fallback_ns);
    c.parallelism = spec.and_then(|s| s.parallelism);
    c.completions = spec.and_then(|s| s.completions);
    c
}

pub fn controller_from_daemon_set(ds: &DaemonSet, fallback_ns: &str) -> ControllerDescriptor {
    let mut c = from_template(ControllerKind::DaemonSet, &ds.metadata, ds.spec.as_ref().map(|s| &s.template), fallback_ns);
    c.declared_replicas = ds.status.as_ref().map(|s| s.desired_number_scheduled);
    c
}

pub fn controller_from_replica_set(rs: &ReplicaSet, fallback_ns: &str) -> ControllerDescriptor {
    let spec = rs.spec.as_ref();
    let mut c = from_template(ControllerKind::ReplicaSet, &rs.metadata, spec.and_then(|s| s.template.as_ref()), fallback_ns);
    c.declared_replicas = spec.and_then(|s| s.replicas);
    c
}

/// A service without a selector (absent or empty) targets no pods.
pub fn service_from(svc: &Service, fallback_ns: &str) -> ServiceDescriptor {
    let selector = match svc.spec.as_ref().and_then(|s| s.selector.as_ref()) {
        Some(sel) if !sel.is_empty() => Selector::Equals(sel.clone()),
        _ => Selector::Nothing,
    };
    ServiceDescriptor { identity: identity_of(&svc.metadata, fallback_ns), selector }
}

pub fn pod_from(pod: &Pod, fallback_ns: &str) -> PodDescriptor {
    let status = pod.status.as_ref();
    let mut p = PodDescriptor::new(
        identity_of(&pod.metadata, fallback_ns),
        labels_of(Some(&pod.metadata)),
        PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
    );
    p.node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());
    p.restart_count = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0);
    p.container_images = container_images(pod.spec.as_ref()).0;
    p.creation_timestamp = pod.metadata.creation_timestamp.as_ref().map(|t| t.0);
    p
}

pub fn event_from(ev: &Event, fallback_ns: &str) -> EventDescriptor {
    let event_type = match ev.type_.as_deref() {
        Some("Warning") => EventType::Warning,
        _ => EventType::Normal,
    };
    let first_seen = ev.first_timestamp.as_ref().map(|t| t.0);
    // Newer reporters only fill eventTime.
    let last_seen = ev
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| ev.event_time.as_ref().map(|t| t.0))
        .or(first_seen);
    EventDescriptor {
        identity: identity_of(&ev.metadata, fallback_ns),
        reason: ev.reason.clone().unwrap_or_default(),
        message: ev.message.clone().unwrap_or_default(),
        event_type,
        count: ev.count.unwrap_or(1),
        first_seen,
        last_seen,
        source_component: ev.source.as_ref().and_then(|s| s.component.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DaemonSetSpec, DaemonSetStatus, ReplicaSetSpec};
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::{Container, ContainerStatus, EventSource, PodStatus, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;

    fn meta(name: &str, ns: Option<&str>, labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: ns.map(|s| s.to_string()),
            labels: if labels.is_empty() {
                None
            } else {
                Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
            },
            ..Default::default()
        }
    }

    fn template(labels: &[(&str, &str)], images: &[&str]) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(meta("", None, labels)),
            spec: Some(PodSpec {
                containers: images
                    .iter()
                    .map(|i| Container { name: "c".into(), image: Some(i.to_string()), ..Default::default() })
                    .collect(),
                init_containers: Some(vec![Container {
                    name: "init".into(),
                    image: Some("busybox:1".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn job_keeps_optional_parallelism_and_completions() {
        let job = Job {
            metadata: meta("pi", Some("batch"), &[("app", "pi")]),
            spec: Some(JobSpec {
                parallelism: Some(0),
                completions: None,
                template: template(&[("job-name", "pi")], &["perl:5", "sidecar:1"]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let c = controller_from_job(&job, "default");
        assert_eq!(c.identity, ObjectIdentity::new("batch", "pi"));
        assert_eq!(c.parallelism, Some(0));
        assert_eq!(c.completions, None);
        assert_eq!(c.container_images, vec!["perl:5", "sidecar:1"]);
        assert_eq!(c.init_container_images, vec!["busybox:1"]);
        assert_eq!(c.pod_template_labels.get("job-name").map(String::as_str), Some("pi"));
        assert_eq!(c.labels.get("app").map(String::as_str), Some("pi"));
    }

    #[test]
    fn daemon_set_desired_comes_from_status() {
        let ds = DaemonSet {
            metadata: meta("agent", None, &[("app", "agent")]),
            spec: Some(DaemonSetSpec { template: template(&[("app", "agent")], &["agent:2"]), ..Default::default() }),
            status: Some(DaemonSetStatus { desired_number_scheduled: 4, ..Default::default() }),
        };
        let c = controller_from_daemon_set(&ds, "kube-system");
        assert_eq!(c.identity.namespace, "kube-system");
        assert_eq!(c.declared_replicas, Some(4));
        assert_eq!(c.desired_pods(), Some(4));
    }

    #[test]
    fn replica_set_without_template_has_no_pod_labels() {
        let rs = ReplicaSet {
            metadata: meta("web-abc", Some("ns"), &[]),
            spec: Some(ReplicaSetSpec { replicas: Some(3), template: None, ..Default::default() }),
            ..Default::default()
        };
        let c = controller_from_replica_set(&rs, "ns");
        assert_eq!(c.declared_replicas, Some(3));
        assert!(c.pod_selector().is_nothing());
        assert!(c.container_images.is_empty());
    }

    #[test]
    fn service_without_selector_selects_nothing() {
        let none = Service { metadata: meta("a", Some("ns"), &[]), spec: Some(ServiceSpec::default()), ..Default::default() };
        let empty = Service {
            metadata: meta("b", Some("ns"), &[]),
            spec: Some(ServiceSpec { selector: Some(BTreeMap::new()), ..Default::default() }),
            ..Default::default()
        };
        let some = Service {
            metadata: meta("c", Some("ns"), &[]),
            spec: Some(ServiceSpec {
                selector: Some([("app".to_string(), "x".to_string())].into_iter().collect()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(service_from(&none, "ns").selector, Selector::Nothing);
        assert_eq!(service_from(&empty, "ns").selector, Selector::Nothing);
        assert_eq!(service_from(&some, "ns").selector, Selector::from_pairs([("app", "x")]));
    }

    #[test]
    fn pod_phase_restarts_and_node() {
        let pod = Pod {
            metadata: meta("p", Some("ns"), &[("app", "x")]),
            spec: Some(PodSpec { node_name: Some("node-1".into()), ..Default::default() }),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                container_statuses: Some(vec![
                    ContainerStatus { restart_count: 2, ..Default::default() },
                    ContainerStatus { restart_count: 1, ..Default::default() },
                ]),
                ..Default::default()
            }),
        };
        let p = pod_from(&pod, "ns");
        assert_eq!(p.phase, PodPhase::Running);
        assert_eq!(p.restart_count, 3);
        assert_eq!(p.node_name.as_deref(), Some("node-1"));
    }

    #[test]
    fn event_falls_back_to_first_timestamp() {
        let ts = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap().with_timezone(&chrono::Utc);
        let ev = Event {
            metadata: meta("pi.1", Some("ns"), &[]),
            reason: Some("BackoffLimitExceeded".into()),
            message: Some("Job has reached the specified backoff limit".into()),
            type_: Some("Warning".into()),
            first_timestamp: Some(Time(ts)),
            source: Some(EventSource { component: Some("job-controller".into()), ..Default::default() }),
            ..Default::default()
        };
        let e = event_from(&ev, "ns");
        assert_eq!(e.event_type, EventType::Warning);
        assert_eq!(e.count, 1);
        assert_eq!(e.last_seen, Some(ts));
        assert_eq!(e.source_component.as_deref(), Some("job-controller"));
    }

    #[test]
    fn involved_object_field_selector() {
        let q = involved_object_fields(ControllerKind::Job, &ObjectIdentity::new("ns", "pi"));
        assert_eq!(q, "involvedObject.kind=Job,involvedObject.name=pi,involvedObject.namespace=ns");
    }

    #[test]
    fn list_params_skip_empty_selector() {
        let lp = list_params(Some(""), DataSelect::with_limit(5));
        assert_eq!(lp.label_selector, None);
        assert_eq!(lp.limit, Some(5));
        let lp = list_params(Some("app=x"), DataSelect::unbounded());
        assert_eq!(lp.label_selector.as_deref(), Some("app=x"));
        assert_eq!(lp.limit, None);
    }
}
