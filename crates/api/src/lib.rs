//! Kestrel public API façade (in-process).
//!
//! Frontends depend on [`KestrelApi`]; [`InProcApi`] wires the detail assembler
//! and the orphan reconciler to a cluster store, [`MockApi`] serves canned
//! answers for tests.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use kestrel_core::{
    ControllerKind, DataSelect, DeletionResult, DetailView, KestrelError, KestrelResult, ObjectIdentity,
};
use kestrel_kubehub::{ClusterStore, KubeStore, MetricsProvider, MetricsServerProvider};
pub use kestrel_ops::{OrphanPlan, OrphanReconciler};

pub mod config;
pub mod detail;
pub mod scope;

pub use config::ApiConfig;
pub use detail::DetailAssembler;
pub use scope::RequestScope;

/// Controller-centric API surface.
#[async_trait::async_trait]
pub trait KestrelApi: Send + Sync {
    /// Detail view of one controller. `select` bounds the pod and event lists.
    async fn get_detail(
        &self,
        scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        select: DataSelect,
    ) -> KestrelResult<DetailView>;

    /// Delete the services orphaned by the controller, then the controller.
    async fn delete_with_reconciliation(
        &self,
        scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> KestrelResult<DeletionResult>;

    /// Services that deleting the controller would orphan. Deletes nothing.
    async fn plan_orphans(
        &self,
        scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> KestrelResult<OrphanPlan>;
}

fn identity(namespace: &str, name: &str) -> KestrelResult<ObjectIdentity> {
    if namespace.trim().is_empty() {
        return Err(KestrelError::Validation("namespace must not be empty".into()));
    }
    if name.trim().is_empty() {
        return Err(KestrelError::Validation("name must not be empty".into()));
    }
    Ok(ObjectIdentity::new(namespace, name))
}

// ----------------- In-process implementation -----------------

pub struct InProcApi {
    config: ApiConfig,
    assembler: DetailAssembler,
    reconciler: OrphanReconciler,
}

impl InProcApi {
    pub fn new(store: Arc<dyn ClusterStore>, metrics: Option<Arc<dyn MetricsProvider>>, config: ApiConfig) -> Self {
        let mut assembler = DetailAssembler::new(store.clone());
        if let Some(provider) = metrics.filter(|_| config.metrics_enabled) {
            assembler = assembler.with_metrics(provider, config.metrics_timeout);
        }
        Self { assembler, reconciler: OrphanReconciler::new(store), config }
    }

    /// Connect to the cluster from kubeconfig or in-cluster env.
    pub async fn connect(config: ApiConfig) -> anyhow::Result<Self> {
        let client = kube::Client::try_default().await?;
        let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(client.clone()));
        let metrics: Option<Arc<dyn MetricsProvider>> =
            if config.metrics_enabled { Some(Arc::new(MetricsServerProvider::new(client))) } else { None };
        Ok(Self::new(store, metrics, config))
    }

    pub fn config(&self) -> &ApiConfig { &self.config }

    /// Fresh scope carrying the configured request deadline.
    pub fn scope(&self) -> RequestScope { RequestScope::new().with_deadline(self.config.request_timeout) }

    fn request_span(op: &'static str, kind: ControllerKind, namespace: &str, name: &str) -> tracing::Span {
        info_span!("request", request_id = %Uuid::new_v4(), op, kind = %kind, ns = %namespace, name = %name)
    }
}

#[async_trait::async_trait]
impl KestrelApi for InProcApi {
    async fn get_detail(
        &self,
        scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        select: DataSelect,
    ) -> KestrelResult<DetailView> {
        let id = identity(namespace, name)?;
        let events_select = DataSelect { limit: select.limit.or(self.config.event_limit) };
        async {
            let t0 = Instant::now();
            info!(limit = ?select.limit, "api: detail start");
            let view = scope.run(self.assembler.assemble(kind, &id, select, events_select)).await;
            match &view {
                Ok(v) => info!(pods = v.pods.len(), took_ms = %t0.elapsed().as_millis(), "api: detail ok"),
                Err(e) => info!(error = %e, took_ms = %t0.elapsed().as_millis(), "api: detail failed"),
            }
            view
        }
        .instrument(Self::request_span("detail", kind, namespace, name))
        .await
    }

    async fn delete_with_reconciliation(
        &self,
        scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> KestrelResult<DeletionResult> {
        let id = identity(namespace, name)?;
        async {
            let t0 = Instant::now();
            info!("api: delete start");
            let res = scope.run(self.reconciler.delete_with_reconciliation(kind, &id)).await;
            match &res {
                Ok(r) => info!(
                    deleted = r.dependents.deleted.len(),
                    failed = r.dependents.failures.len(),
                    took_ms = %t0.elapsed().as_millis(),
                    "api: delete ok"
                ),
                Err(e) => info!(error = %e, took_ms = %t0.elapsed().as_millis(), "api: delete failed"),
            }
            res
        }
        .instrument(Self::request_span("delete", kind, namespace, name))
        .await
    }

    async fn plan_orphans(
        &self,
        scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> KestrelResult<OrphanPlan> {
        let id = identity(namespace, name)?;
        async {
            let t0 = Instant::now();
            info!("api: orphans start");
            let res = scope.run(self.reconciler.plan(kind, &id)).await;
            match &res {
                Ok(p) => info!(orphans = p.orphans.len(), took_ms = %t0.elapsed().as_millis(), "api: orphans ok"),
                Err(e) => info!(error = %e, took_ms = %t0.elapsed().as_millis(), "api: orphans failed"),
            }
            res
        }
        .instrument(Self::request_span("orphans", kind, namespace, name))
        .await
    }
}

// ----------------- Mock implementation -----------------

/// Canned answers for frontend tests. A missing answer reads as not found.
#[derive(Default)]
pub struct MockApi {
    pub detail: Option<DetailView>,
    pub deletion: Option<DeletionResult>,
    pub plan: Option<OrphanPlan>,
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    fn missing(kind: ControllerKind, namespace: &str, name: &str) -> KestrelError {
        KestrelError::NotFound { kind: kind.to_string(), identity: ObjectIdentity::new(namespace, name) }
    }
}

#[async_trait::async_trait]
impl KestrelApi for MockApi {
    async fn get_detail(
        &self,
        _scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
        _select: DataSelect,
    ) -> KestrelResult<DetailView> {
        self.detail.clone().ok_or_else(|| Self::missing(kind, namespace, name))
    }

    async fn delete_with_reconciliation(
        &self,
        _scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> KestrelResult<DeletionResult> {
        self.deletion.clone().ok_or_else(|| Self::missing(kind, namespace, name))
    }

    async fn plan_orphans(
        &self,
        _scope: &RequestScope,
        kind: ControllerKind,
        namespace: &str,
        name: &str,
    ) -> KestrelResult<OrphanPlan> {
        self.plan.clone().ok_or_else(|| Self::missing(kind, namespace, name))
    }
}
