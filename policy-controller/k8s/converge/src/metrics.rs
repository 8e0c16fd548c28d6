use crate::{Error, Report};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    passes: Family<PassLabels, Counter>,
    writes: Family<WriteLabels, Counter>,
    retries: Counter,
    stale: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PassLabels {
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct WriteLabels {
    kind: String,
    outcome: String,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let passes = Family::default();
        prom.register(
            "passes",
            "Count of convergence passes by result",
            passes.clone(),
        );

        let writes = Family::default();
        prom.register(
            "writes",
            "Count of objects reconciled by kind and outcome",
            writes.clone(),
        );

        let retries = Counter::default();
        prom.register("retries", "Count of passes scheduled for retry", retries.clone());

        let stale = Counter::default();
        prom.register(
            "stale_passes",
            "Count of passes dropped because a newer pass exists",
            stale.clone(),
        );

        Self {
            passes,
            writes,
            retries,
            stale,
        }
    }

    pub(crate) fn succeeded(&self, report: &Report) {
        self.passes
            .get_or_create(&PassLabels {
                result: "ok".to_string(),
            })
            .inc();
        for write in &report.writes {
            self.writes
                .get_or_create(&WriteLabels {
                    kind: write.kind.to_string(),
                    outcome: write.outcome.to_string(),
                })
                .inc();
        }
    }

    pub(crate) fn failed(&self, error: &Error) {
        let result = match error {
            Error::NamespaceResolution(_) => "unresolved",
            Error::Cluster(_) | Error::GrantRace(_) => "error",
            Error::Timeout(_) => "timeout",
        };
        self.passes
            .get_or_create(&PassLabels {
                result: result.to_string(),
            })
            .inc();
    }

    pub(crate) fn retried(&self) {
        self.retries.inc();
    }

    pub(crate) fn dropped_stale(&self) {
        self.stale.inc();
    }
}
