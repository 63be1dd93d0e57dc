//! In-memory `ClusterStore` for tests and demos.
//!
//! Records every call that would reach the API server as an [`Action`], so
//! tests can assert the exact operation trace, and supports injected failures
//! and per-call latency.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kestrel_core::{
    ControllerDescriptor, ControllerKind, DataSelect, EventDescriptor, ObjectIdentity, PodDescriptor, Selector,
    ServiceDescriptor, StoreError, StoreResult, Verb,
};

use crate::facade::ClusterStore;

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub resource: String,
    /// `namespace/name` for get/delete, the namespace for list.
    pub target: String,
}

#[derive(Debug, Clone)]
struct Fault {
    verb: Verb,
    resource: String,
    target: Option<String>,
}

#[derive(Default)]
struct State {
    controllers: Vec<ControllerDescriptor>,
    services: Vec<ServiceDescriptor>,
    pods: Vec<PodDescriptor>,
    events: Vec<(ControllerKind, ObjectIdentity, EventDescriptor)>,
    actions: Vec<Action>,
    faults: Vec<Fault>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Option<Duration>,
    slow: HashMap<String, Duration>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_controller(self, c: ControllerDescriptor) -> Self {
        self.lock().controllers.push(c);
        self
    }

    pub fn with_service(self, s: ServiceDescriptor) -> Self {
        self.lock().services.push(s);
        self
    }

    pub fn with_pod(self, p: PodDescriptor) -> Self {
        self.lock().pods.push(p);
        self
    }

    pub fn with_event(self, kind: ControllerKind, involved: ObjectIdentity, e: EventDescriptor) -> Self {
        self.lock().events.push((kind, involved, e));
        self
    }

    /// Fail every `verb` on `resource` with a transport error.
    pub fn failing(self, verb: Verb, resource: &str) -> Self {
        self.lock().faults.push(Fault { verb, resource: resource.to_string(), target: None });
        self
    }

    /// Fail `verb` on one object (`namespace/name`) of `resource`.
    pub fn failing_on(self, verb: Verb, resource: &str, target: &str) -> Self {
        self.lock().faults.push(Fault { verb, resource: resource.to_string(), target: Some(target.to_string()) });
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sleep this long before answering calls on `resource` only.
    pub fn with_latency_on(mut self, resource: &str, latency: Duration) -> Self {
        self.slow.insert(resource.to_string(), latency);
        self
    }

    pub fn actions(&self) -> Vec<Action> { self.lock().actions.clone() }

    /// Verbs of the recorded actions, in call order.
    pub fn verbs(&self) -> Vec<&'static str> { self.lock().actions.iter().map(|a| a.verb.as_str()).collect() }

    pub fn services(&self) -> Vec<ServiceDescriptor> { self.lock().services.clone() }

    pub fn controllers(&self) -> Vec<ControllerDescriptor> { self.lock().controllers.clone() }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn call(&self, verb: Verb, resource: &str, target: String) -> StoreResult<()> {
        if let Some(d) = self.slow.get(resource).copied().or(self.latency) {
            tokio::time::sleep(d).await;
        }
        let mut st = self.lock();
        st.actions.push(Action { verb, resource: resource.to_string(), target: target.clone() });
        let hit = st
            .faults
            .iter()
            .any(|f| f.verb == verb && f.resource == resource && f.target.as_deref().map(|t| t == target).unwrap_or(true));
        if hit {
            return Err(StoreError::transport(verb, resource, target, anyhow::anyhow!("injected failure")));
        }
        Ok(())
    }
}

/// A zero limit means no limit, as on the API server.
fn limited<T>(mut items: Vec<T>, select: DataSelect) -> Vec<T> {
    if let Some(limit) = select.limit.filter(|l| *l > 0) {
        items.truncate(limit as usize);
    }
    items
}

#[async_trait::async_trait]
impl ClusterStore for MemoryStore {
    async fn get_controller(&self, kind: ControllerKind, id: &ObjectIdentity) -> StoreResult<ControllerDescriptor> {
        self.call(Verb::Get, kind.as_str(), id.to_string()).await?;
        self.lock()
            .controllers
            .iter()
            .find(|c| c.kind == kind && &c.identity == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind.as_str(), id.clone()))
    }

    async fn list_controllers(&self, kind: ControllerKind, namespace: &str) -> StoreResult<Vec<ControllerDescriptor>> {
        self.call(Verb::List, kind.as_str(), namespace.to_string()).await?;
        let mut out: Vec<_> = self
            .lock()
            .controllers
            .iter()
            .filter(|c| c.kind == kind && c.identity.namespace == namespace)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(out)
    }

    async fn delete_controller(&self, kind: ControllerKind, id: &ObjectIdentity) -> StoreResult<()> {
        self.call(Verb::Delete, kind.as_str(), id.to_string()).await?;
        let mut st = self.lock();
        let before = st.controllers.len();
        st.controllers.retain(|c| !(c.kind == kind && &c.identity == id));
        if st.controllers.len() == before {
            return Err(StoreError::not_found(kind.as_str(), id.clone()));
        }
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> StoreResult<Vec<ServiceDescriptor>> {
        self.call(Verb::List, "Service", namespace.to_string()).await?;
        let mut out: Vec<_> = self.lock().services.iter().filter(|s| s.identity.namespace == namespace).cloned().collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(out)
    }

    async fn delete_service(&self, id: &ObjectIdentity) -> StoreResult<()> {
        self.call(Verb::Delete, "Service", id.to_string()).await?;
        let mut st = self.lock();
        let before = st.services.len();
        st.services.retain(|s| &s.identity != id);
        if st.services.len() == before {
            return Err(StoreError::not_found("Service", id.clone()));
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector, select: DataSelect) -> StoreResult<Vec<PodDescriptor>> {
        if selector.is_nothing() {
            return Ok(Vec::new());
        }
        self.call(Verb::List, "Pod", namespace.to_string()).await?;
        let mut out: Vec<_> = self
            .lock()
            .pods
            .iter()
            .filter(|p| p.identity.namespace == namespace && selector.matches(&p.labels))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(limited(out, select))
    }

    async fn list_events(
        &self,
        kind: ControllerKind,
        involved: &ObjectIdentity,
        select: DataSelect,
    ) -> StoreResult<Vec<EventDescriptor>> {
        self.call(Verb::List, "Event", involved.namespace.clone()).await?;
        let out: Vec<_> = self
            .lock()
            .events
            .iter()
            .filter(|(k, id, _)| *k == kind && id == involved)
            .map(|(_, _, e)| e.clone())
            .collect();
        Ok(limited(out, select))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{Labels, PodPhase};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn records_trace_and_reports_not_found() {
        let store = MemoryStore::new();
        let err = store.get_controller(ControllerKind::Job, &ObjectIdentity::new("ns", "missing")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.verbs(), vec!["get"]);
        assert_eq!(store.actions()[0].resource, "Job");
    }

    #[tokio::test]
    async fn absent_pod_selector_does_not_reach_the_store() {
        let store = MemoryStore::new().with_pod(PodDescriptor::new(
            ObjectIdentity::new("ns", "p"),
            labels(&[("app", "x")]),
            PodPhase::Running,
        ));
        let pods = store.list_pods("ns", &Selector::Nothing, DataSelect::default()).await.unwrap();
        assert!(pods.is_empty());
        assert!(store.actions().is_empty());
        let pods = store.list_pods("ns", &Selector::everything(), DataSelect::default()).await.unwrap();
        assert_eq!(pods.len(), 1);
    }

    #[tokio::test]
    async fn targeted_fault_only_hits_one_object() {
        let store = MemoryStore::new()
            .with_service(ServiceDescriptor { identity: ObjectIdentity::new("ns", "a"), selector: Selector::Nothing })
            .with_service(ServiceDescriptor { identity: ObjectIdentity::new("ns", "b"), selector: Selector::Nothing })
            .failing_on(Verb::Delete, "Service", "ns/a");
        assert!(store.delete_service(&ObjectIdentity::new("ns", "a")).await.is_err());
        assert!(store.delete_service(&ObjectIdentity::new("ns", "b")).await.is_ok());
        let left: Vec<_> = store.services().into_iter().map(|s| s.identity.name).collect();
        assert_eq!(left, vec!["a"]);
    }

    #[tokio::test]
    async fn pod_limit_applies_after_filter() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store = store.with_pod(PodDescriptor::new(
                ObjectIdentity::new("ns", format!("p{}", i)),
                labels(&[("app", "x")]),
                PodPhase::Running,
            ));
        }
        let pods = store.list_pods("ns", &Selector::from_pairs([("app", "x")]), DataSelect::with_limit(2)).await.unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].identity.name, "p0");
        let pods = store.list_pods("ns", &Selector::from_pairs([("app", "x")]), DataSelect::with_limit(0)).await.unwrap();
        assert_eq!(pods.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_can_target_one_resource() {
        let store = MemoryStore::new().with_latency_on("Pod", Duration::from_secs(10));
        let t0 = tokio::time::Instant::now();
        store.list_services("ns").await.unwrap();
        assert!(t0.elapsed() < Duration::from_secs(1));
        store.list_pods("ns", &Selector::everything(), DataSelect::default()).await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(10));
    }
}
