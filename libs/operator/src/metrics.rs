use crate::controller::ControllerId;

use std::collections::HashMap;
use std::sync::Arc;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::time::Instant;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ControllerLabels {
    pub controller: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TriggeredLabels {
    pub controller: String,
    pub action: String,
    pub triggered_by: String,
}

#[derive(Clone)]
struct Families {
    reconcile_operations: Family<ControllerLabels, Counter>,
    reconcile_failures: Family<ControllerLabels, Counter>,
    reconcile_duration: Family<ControllerLabels, Histogram>,
    status_update_errors: Family<ControllerLabels, Counter>,
    triggered: Family<TriggeredLabels, Counter>,
    watch_operations_failed: Family<ControllerLabels, Counter>,
    ready: Family<ControllerLabels, Gauge>,
}

impl Families {
    fn register(registry: &mut Registry) -> Self {
        let reconcile_operations = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "reconcile_operations",
            "Total number of reconcile operations",
            reconcile_operations.clone(),
        );

        let reconcile_failures = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "reconcile_failures",
            "Number of errors that occurred during reconcile operations",
            reconcile_failures.clone(),
        );

        let reconcile_duration = Family::<ControllerLabels, Histogram>::new_with_constructor(
            || Histogram::new(exponential_buckets(0.005, 2.0, 12)),
        );
        registry.register(
            "reconcile_duration_seconds",
            "Histogram of reconcile operations",
            reconcile_duration.clone(),
        );

        let status_update_errors = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "status_update_errors",
            "Number of errors that occurred during update operations to status subresources",
            status_update_errors.clone(),
        );

        let triggered = Family::<TriggeredLabels, Counter>::default();
        registry.register(
            "triggered",
            "Number of times an applied or deleted Kubernetes object triggered a reconcile",
            triggered.clone(),
        );

        let watch_operations_failed = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "watch_operations_failed",
            "Total number of watch operations that failed",
            watch_operations_failed.clone(),
        );

        let ready = Family::<ControllerLabels, Gauge>::default();
        registry.register(
            "ready",
            "1 when the controller is ready to reconcile resources, 0 otherwise",
            ready.clone(),
        );

        Self {
            reconcile_operations,
            reconcile_failures,
            reconcile_duration,
            status_update_errors,
            triggered,
            watch_operations_failed,
            ready,
        }
    }
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(mut registry: Registry, controller_names: &[ControllerId]) -> Self {
        let families = Families::register(&mut registry);
        let controllers = controller_names
            .iter()
            .map(|&id| (id, Arc::new(ControllerMetrics::new(id, families.clone()))))
            .collect::<HashMap<ControllerId, Arc<ControllerMetrics>>>();

        Self {
            registry: Arc::new(registry),
            controllers,
        }
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    labels: ControllerLabels,
    families: Families,
}

impl ControllerMetrics {
    fn new(controller: &str, families: Families) -> Self {
        Self {
            labels: ControllerLabels {
                controller: controller.to_string(),
            },
            families,
        }
    }

    pub fn reconcile_count_and_measure(&self) -> ReconcileMeasurer {
        self.families
            .reconcile_operations
            .get_or_create(&self.labels)
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self
                .families
                .reconcile_duration
                .get_or_create(&self.labels)
                .clone(),
        }
    }

    pub fn reconcile_failure_inc(&self) {
        self.families
            .reconcile_failures
            .get_or_create(&self.labels)
            .inc();
    }

    pub fn status_update_errors_inc(&self) {
        self.families
            .status_update_errors
            .get_or_create(&self.labels)
            .inc();
    }

    pub fn triggered_inc(&self, action: Action, triggered_by: &str) {
        self.families
            .triggered
            .get_or_create(&TriggeredLabels {
                controller: self.labels.controller.clone(),
                action: action.as_str().to_string(),
                triggered_by: triggered_by.to_string(),
            })
            .inc();
    }

    pub fn watch_operations_failed_inc(&self) {
        self.families
            .watch_operations_failed
            .get_or_create(&self.labels)
            .inc();
    }

    pub fn ready_set(&self, status: i64) {
        self.families.ready.get_or_create(&self.labels).set(status);
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.observe(duration);
    }
}

#[derive(Clone, Debug)]
pub enum Action {
    Apply,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Delete => "delete",
        }
    }
}
