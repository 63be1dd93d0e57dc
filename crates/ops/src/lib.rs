//! Kestrel Ops: controller deletion with orphan-service cleanup.
//!
//! A service is owned by every controller whose labels its selector matches.
//! Deleting a controller orphans exactly the services whose only owner it is;
//! those are deleted, everything else is left alone. Ownership is recomputed
//! from fresh lists on every call rather than tracked.
//!
//! The controller list and the service list are two separate snapshots. A
//! service created between the two reads is not seen by this call.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kestrel_core::{
    is_superset_of, ControllerDescriptor, ControllerKind, DeleteFailure, DeletionResult, KestrelResult, ObjectIdentity,
    ReconcileOutcome, ServiceDescriptor,
};
use kestrel_kubehub::ClusterStore;

/// Progress of one reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Start,
    FetchedTarget,
    ListedControllers,
    ListedDependents,
    Deleting,
    Done,
    Failed,
}

/// Orphans computed for a controller, before anything is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanPlan {
    pub kind: ControllerKind,
    pub target: ObjectIdentity,
    pub orphans: Vec<ServiceDescriptor>,
    pub retained_by: Option<ObjectIdentity>,
}

/// Controllers whose labels the service's selector matches.
pub fn owners<'a>(service: &ServiceDescriptor, controllers: &'a [ControllerDescriptor]) -> Vec<&'a ControllerDescriptor> {
    controllers.iter().filter(|c| service.selector.matches(&c.labels)).collect()
}

/// Services whose single owner is `target`.
pub fn orphaned_by(
    target: &ObjectIdentity,
    controllers: &[ControllerDescriptor],
    services: &[ServiceDescriptor],
) -> Vec<ServiceDescriptor> {
    services
        .iter()
        .filter(|s| matches!(owners(s, controllers).as_slice(), [only] if &only.identity == target))
        .cloned()
        .collect()
}

/// A sibling carrying every label of the target. Any selector matching the
/// target matches this sibling too, so nothing can be orphaned.
pub fn covering_sibling<'a>(
    target: &ControllerDescriptor,
    controllers: &'a [ControllerDescriptor],
) -> Option<&'a ControllerDescriptor> {
    controllers
        .iter()
        .find(|c| c.identity != target.identity && is_superset_of(&c.labels, &target.labels))
}

pub struct OrphanReconciler {
    store: Arc<dyn ClusterStore>,
}

impl OrphanReconciler {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self { Self { store } }

    /// Fetch target, controllers and services and compute the orphan set.
    pub async fn plan(&self, kind: ControllerKind, id: &ObjectIdentity) -> KestrelResult<OrphanPlan> {
        let mut phase = ReconcilePhase::Start;
        let res = self.plan_inner(kind, id, &mut phase).await;
        if let Err(e) = &res {
            warn!(kind = %kind, target = %id, phase = ?phase, error = %e, "ops: orphan plan failed");
            debug!(phase = ?ReconcilePhase::Failed, "ops: reconcile phase");
        }
        res
    }

    async fn plan_inner(
        &self,
        kind: ControllerKind,
        id: &ObjectIdentity,
        phase: &mut ReconcilePhase,
    ) -> KestrelResult<OrphanPlan> {
        let target = self.store.get_controller(kind, id).await?;
        advance(phase, ReconcilePhase::FetchedTarget);

        let controllers = self.store.list_controllers(kind, &id.namespace).await?;
        advance(phase, ReconcilePhase::ListedControllers);

        if let Some(sibling) = covering_sibling(&target, &controllers) {
            info!(kind = %kind, target = %id, sibling = %sibling.identity, "ops: dependents still owned by sibling, nothing to clean up");
            return Ok(OrphanPlan { kind, target: id.clone(), orphans: Vec::new(), retained_by: Some(sibling.identity.clone()) });
        }

        let services = self.store.list_services(&id.namespace).await?;
        advance(phase, ReconcilePhase::ListedDependents);

        // The target may already be missing from the list; ownership is judged
        // as if it were present.
        let mut universe = controllers;
        if !universe.iter().any(|c| c.identity == target.identity) {
            universe.push(target);
        }
        let orphans = orphaned_by(id, &universe, &services);
        debug!(kind = %kind, target = %id, controllers = universe.len(), services = services.len(), orphans = orphans.len(), "ops: orphan set computed");
        Ok(OrphanPlan { kind, target: id.clone(), orphans, retained_by: None })
    }

    /// Delete the services orphaned by removing the controller. The controller
    /// itself is not touched. Individual delete failures are collected.
    pub async fn reconcile(&self, kind: ControllerKind, id: &ObjectIdentity) -> KestrelResult<ReconcileOutcome> {
        let t0 = Instant::now();
        info!(kind = %kind, target = %id, "ops: reconcile start");
        let plan = self.plan(kind, id).await?;
        let mut outcome = ReconcileOutcome::empty(kind, id.clone());
        outcome.retained_by = plan.retained_by;

        debug!(phase = ?ReconcilePhase::Deleting, orphans = plan.orphans.len(), "ops: reconcile phase");
        for svc in plan.orphans {
            match self.store.delete_service(&svc.identity).await {
                Ok(()) => {
                    info!(service = %svc.identity, "ops: orphaned service deleted");
                    metrics::counter!("reconcile_deleted_total", 1u64);
                    outcome.deleted.push(svc.identity);
                }
                Err(e) => {
                    warn!(service = %svc.identity, error = %e, "ops: orphaned service delete failed");
                    metrics::counter!("reconcile_delete_failed_total", 1u64);
                    outcome.failures.push(DeleteFailure { identity: svc.identity, cause: e.to_string() });
                }
            }
        }
        debug!(phase = ?ReconcilePhase::Done, "ops: reconcile phase");
        metrics::histogram!("reconcile_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(deleted = outcome.deleted.len(), failed = outcome.failures.len(), took_ms = %t0.elapsed().as_millis(), "ops: reconcile done");
        Ok(outcome)
    }

    /// Reconcile dependents, then delete the controller. Reconciliation goes
    /// first so the controller's labels are still visible to the orphan check.
    ///
    /// Once dependents have been touched the call returns `Ok`: a failed
    /// controller delete is reported through `controller_deleted` and
    /// `controller_error` alongside what was already removed.
    pub async fn delete_with_reconciliation(&self, kind: ControllerKind, id: &ObjectIdentity) -> KestrelResult<DeletionResult> {
        let dependents = self.reconcile(kind, id).await?;
        match self.store.delete_controller(kind, id).await {
            Ok(()) => {
                info!(kind = %kind, target = %id, dependents_failed = dependents.failures.len(), "ops: controller deleted");
                Ok(DeletionResult { controller_deleted: true, controller_error: None, dependents })
            }
            Err(e) => {
                warn!(kind = %kind, target = %id, deleted = dependents.deleted.len(), error = %e, "ops: controller delete failed after reconcile");
                Ok(DeletionResult { controller_deleted: false, controller_error: Some(e.to_string()), dependents })
            }
        }
    }
}

fn advance(phase: &mut ReconcilePhase, next: ReconcilePhase) {
    *phase = next;
    debug!(phase = ?next, "ops: reconcile phase");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{Labels, Selector};

    fn ctrl(name: &str, labels: &[(&str, &str)]) -> ControllerDescriptor {
        ControllerDescriptor::new(
            ControllerKind::DaemonSet,
            ObjectIdentity::new("ns", name),
            labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<Labels>(),
        )
    }

    fn svc(name: &str, selector: Selector) -> ServiceDescriptor {
        ServiceDescriptor { identity: ObjectIdentity::new("ns", name), selector }
    }

    #[test]
    fn sole_owner_orphans_service() {
        let cs = vec![ctrl("ds-1", &[("app", "x")])];
        let ss = vec![svc("svc-1", Selector::from_pairs([("app", "x")]))];
        let out = orphaned_by(&ObjectIdentity::new("ns", "ds-1"), &cs, &ss);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn shared_and_unowned_services_survive() {
        let cs = vec![ctrl("ds-1", &[("app", "x"), ("tier", "a")]), ctrl("ds-2", &[("app", "x"), ("tier", "b")])];
        let ss = vec![
            svc("shared", Selector::from_pairs([("app", "x")])),
            svc("mine", Selector::from_pairs([("tier", "a")])),
            svc("theirs", Selector::from_pairs([("tier", "b")])),
            svc("nobody", Selector::from_pairs([("app", "y")])),
            svc("absent", Selector::Nothing),
        ];
        let names: Vec<_> =
            orphaned_by(&ObjectIdentity::new("ns", "ds-1"), &cs, &ss).into_iter().map(|s| s.identity.name).collect();
        assert_eq!(names, vec!["mine"]);
    }

    #[test]
    fn covering_sibling_needs_superset_labels() {
        let target = ctrl("ds-1", &[("app", "x")]);
        let narrower = vec![target.clone(), ctrl("ds-2", &[("tier", "a")])];
        assert!(covering_sibling(&target, &narrower).is_none());
        let wider = vec![target.clone(), ctrl("ds-2", &[("app", "x"), ("tier", "a")])];
        assert_eq!(covering_sibling(&target, &wider).map(|c| c.identity.name.as_str()), Some("ds-2"));
    }
}
