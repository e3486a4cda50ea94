use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<ReconcileLabels, Counter>,
    durations: Family<ControllerLabels, Histogram>,
    status_patches: Family<PatchLabels, Counter>,
}

/// Times a single reconcile and records its outcome when finished.
pub struct ReconcileObserver {
    start: time::Instant,
    controller: &'static str,
    metrics: ControllerMetrics,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ControllerLabels {
    controller: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ReconcileLabels {
    controller: &'static str,
    result: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct PatchLabels {
    kind: &'static str,
    result: &'static str,
}

// === ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ReconcileLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciles by controller and result",
            reconciles.clone(),
        );

        let durations = Family::<ControllerLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])
        });
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of reconcile durations by controller",
            Unit::Seconds,
            durations.clone(),
        );

        let status_patches = Family::<PatchLabels, Counter>::default();
        reg.register(
            "status_patches",
            "Total number of status patches by resource kind and result",
            status_patches.clone(),
        );

        Self {
            reconciles,
            durations,
            status_patches,
        }
    }

    pub fn observe(&self, controller: &'static str) -> ReconcileObserver {
        ReconcileObserver {
            start: time::Instant::now(),
            controller,
            metrics: self.clone(),
        }
    }

    pub fn status_patch<T, E>(&self, kind: &'static str, result: &Result<T, E>) {
        let result = if result.is_ok() { "ok" } else { "error" };
        self.status_patches
            .get_or_create(&PatchLabels { kind, result })
            .inc();
    }
}

// === ReconcileObserver ===

impl ReconcileObserver {
    pub fn finish<T, E>(self, result: &Result<T, E>) {
        let Self {
            start,
            controller,
            metrics,
        } = self;
        let result = if result.is_ok() { "ok" } else { "error" };
        metrics
            .reconciles
            .get_or_create(&ReconcileLabels { controller, result })
            .inc();
        metrics
            .durations
            .get_or_create(&ControllerLabels { controller })
            .observe(start.elapsed().as_secs_f64());
    }
}
