use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct RegistrarMetrics {
    updates: Family<UpdateLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UpdateLabels {
    op: String,
    result: String,
}

impl RegistrarMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let updates = Family::default();
        prom.register(
            "mesh_updates",
            "Count of authorizer registration changes by operation and result",
            updates.clone(),
        );
        Self { updates }
    }

    pub(crate) fn succeeded(&self, op: &str) {
        self.inc(op, "ok");
    }

    pub(crate) fn failed(&self, op: &str) {
        self.inc(op, "error");
    }

    fn inc(&self, op: &str, result: &str) {
        self.updates
            .get_or_create(&UpdateLabels {
                op: op.to_string(),
                result: result.to_string(),
            })
            .inc();
    }
}
