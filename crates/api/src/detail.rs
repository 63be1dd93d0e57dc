//! Detail view assembly: one controller plus its pods, events, services and usage.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use kestrel_core::{
    AggregatePodInfo, ControllerKind, ControllerMeta, DataSelect, Dependency, DetailView, KestrelError, KestrelResult,
    ObjectIdentity, PodDescriptor, PodUsage,
};
use kestrel_kubehub::{ClusterStore, MetricsProvider};

pub struct DetailAssembler {
    store: Arc<dyn ClusterStore>,
    metrics: Option<Arc<dyn MetricsProvider>>,
    metrics_timeout: Duration,
}

impl DetailAssembler {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store, metrics: None, metrics_timeout: Duration::from_secs(2) }
    }

    pub fn with_metrics(mut self, provider: Arc<dyn MetricsProvider>, timeout: Duration) -> Self {
        self.metrics = Some(provider);
        self.metrics_timeout = timeout;
        self
    }

    /// Build the detail view for one controller.
    ///
    /// Pods (followed by their usage), events and services are fetched
    /// concurrently once the controller is known. The first pod, event or
    /// service failure drops the other fetches and fails the request; a
    /// metrics failure only leaves `metrics` empty.
    pub async fn assemble(
        &self,
        kind: ControllerKind,
        id: &ObjectIdentity,
        pods_select: DataSelect,
        events_select: DataSelect,
    ) -> KestrelResult<DetailView> {
        let t0 = Instant::now();
        let controller = self.store.get_controller(kind, id).await?;
        let selector = controller.pod_selector();
        debug!(kind = %kind, target = %id, selector = %selector, "detail: controller fetched");

        let pods_branch = async {
            let pods = self
                .store
                .list_pods(&controller.identity.namespace, &selector, pods_select)
                .await
                .map_err(KestrelError::dependency(Dependency::Pods))?;
            let usage = self.fetch_usage(&pods).await;
            Ok::<_, KestrelError>((pods, usage))
        };
        let events_branch = async {
            self.store
                .list_events(kind, &controller.identity, events_select)
                .await
                .map_err(KestrelError::dependency(Dependency::Events))
        };
        let services_branch = async {
            self.store
                .list_services(&controller.identity.namespace)
                .await
                .map_err(KestrelError::dependency(Dependency::Services))
        };
        let ((pods, usage), mut events, services) = tokio::try_join!(pods_branch, events_branch, services_branch)?;

        events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        let services = services.into_iter().filter(|s| s.selector.matches(&controller.pod_template_labels)).collect();
        let pod_info = AggregatePodInfo::from_pods(&pods, controller.desired_pods());

        let view = DetailView {
            meta: ControllerMeta {
                kind,
                identity: controller.identity,
                labels: controller.labels,
                creation_timestamp: controller.creation_timestamp,
            },
            container_images: controller.container_images,
            init_container_images: controller.init_container_images,
            parallelism: controller.parallelism,
            completions: controller.completions,
            pod_info,
            pods,
            events,
            services,
            metrics: usage,
        };
        metrics::histogram!("detail_assemble_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            kind = %kind,
            target = %id,
            pods = view.pods.len(),
            events = view.events.len(),
            services = view.services.len(),
            metrics = view.metrics.is_some(),
            took_ms = %t0.elapsed().as_millis(),
            "detail: assembled"
        );
        Ok(view)
    }

    /// Usage for the fetched pods, or `None` when unavailable for any reason.
    async fn fetch_usage(&self, pods: &[PodDescriptor]) -> Option<Vec<PodUsage>> {
        let provider = self.metrics.as_ref()?;
        if pods.is_empty() {
            return None;
        }
        let ids: Vec<ObjectIdentity> = pods.iter().map(|p| p.identity.clone()).collect();
        let map = match tokio::time::timeout(self.metrics_timeout, provider.fetch(&ids)).await {
            Ok(Ok(map)) => map,
            Ok(Err(e)) => {
                warn!(error = %e, "detail: metrics unavailable, continuing without");
                metrics::counter!("detail_metrics_degraded_total", 1u64);
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = %self.metrics_timeout.as_millis(), "detail: metrics timed out, continuing without");
                metrics::counter!("detail_metrics_degraded_total", 1u64);
                return None;
            }
        };
        let wanted: HashSet<&ObjectIdentity> = ids.iter().collect();
        let mut usage: Vec<PodUsage> = map
            .into_iter()
            .filter(|(pod, _)| wanted.contains(pod))
            .map(|(pod, sample)| PodUsage { pod, sample })
            .collect();
        if usage.is_empty() {
            debug!("detail: metrics provider returned no data");
            return None;
        }
        usage.sort_by(|a, b| a.pod.cmp(&b.pod));
        Some(usage)
    }
}
