use crate::{
    converge, index,
    k8s::{self, gateway, policy, watcher, Client, SecurityPolicy, Store},
    mesh,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

// Passes that do not fit in the queue are requeued by the index on its next
// reconciliation.
const PASS_QUEUE_SIZE: usize = 1_000;
const RECONCILIATION_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[clap(name = "authpolicy", about = "Enforces AuthPolicy resources at Envoy gateways")]
pub struct Args {
    #[clap(
        long,
        default_value = "authpolicy_controller=info,warn",
        env = "AUTHPOLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The name of the IstioOperator (or OpenShift ServiceMeshControlPlane)
    /// holding the mesh configuration.
    #[clap(long, env = "ISTIOOPERATOR_NAME", default_value = "istiocontrolplane")]
    istio_operator_name: String,

    #[clap(long, env = "ISTIOCONFIGMAP_NAME", default_value = "istio")]
    istio_config_map_name: String,

    #[clap(long, env = "ISTIOOPERATOR_NAMESPACE", default_value = "istio-system")]
    istio_namespace: String,

    /// Bounds the time spent converging a single policy.
    #[clap(long, default_value = "5000")]
    converge_timeout_ms: u64,

    #[clap(long, default_value = "1000")]
    retry_backoff_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            istio_operator_name,
            istio_config_map_name,
            istio_namespace,
            converge_timeout_ms,
            retry_backoff_ms,
        } = self;

        let converge_timeout = Duration::from_millis(converge_timeout_ms);
        let retry_backoff = Duration::from_millis(retry_backoff_ms);

        let mut prom = <Registry>::default();

        let (passes_tx, passes_rx) = mpsc::channel(PASS_QUEUE_SIZE);
        let pass_index = index::Index::shared(
            passes_tx.clone(),
            index::PassMetrics::register(prom.sub_registry_with_prefix("classifier")),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let kuadrant_index = index::KuadrantIndex::shared(events_tx);

        let controller_metrics =
            converge::ControllerMetrics::register(prom.sub_registry_with_prefix("controller"));
        let registrar_metrics =
            mesh::RegistrarMetrics::register(prom.sub_registry_with_prefix("mesh_registrar"));
        let policy_index = index::IndexMetrics::register(
            pass_index.clone(),
            prom.sub_registry_with_prefix("policy_index"),
        )
        .shared();
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;
        let client = runtime.client();

        // Spawn resource watches.

        let policies = runtime.watch_all::<policy::AuthPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(policy_index.clone(), policies)
                .instrument(info_span!("authpolicies")),
        );

        let gateways = runtime.watch_all::<gateway::Gateway>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(policy_index.clone(), gateways)
                .instrument(info_span!("gateways")),
        );

        if installed::<gateway::HTTPRoute>(&client).await? {
            let routes = runtime.watch_all::<gateway::HTTPRoute>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(policy_index.clone(), routes)
                    .instrument(info_span!("httproutes")),
            );
        }

        if installed::<SecurityPolicy>(&client).await? {
            let artifacts = runtime.watch_all::<SecurityPolicy>(
                watcher::Config::default().labels(k8s::labels::AUTH_POLICY),
            );
            tokio::spawn(
                kubert::index::namespaced(policy_index.clone(), artifacts)
                    .instrument(info_span!("securitypolicies")),
            );
        }

        if installed::<policy::Kuadrant>(&client).await? {
            let kuadrants = runtime.watch_all::<policy::Kuadrant>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(kuadrant_index, kuadrants)
                    .instrument(info_span!("kuadrants")),
            );
        }

        // Requeue passes that did not fit in the queue.
        tokio::spawn(
            index::Index::run(pass_index, RECONCILIATION_PERIOD)
                .instrument(info_span!("policy_index")),
        );

        let controller = converge::Controller::new(
            client.clone(),
            &passes_tx,
            passes_rx,
            converge_timeout,
            retry_backoff,
            controller_metrics,
        );
        drop(passes_tx);
        tokio::spawn(controller.run().instrument(info_span!("controller")));

        let registrar = mesh::Registrar::new(
            client,
            mesh::MeshSettings {
                operator_name: istio_operator_name,
                config_map_name: istio_config_map_name,
                namespace: istio_namespace,
            },
            registrar_metrics,
        );
        tokio::spawn(
            registrar
                .run(events_rx, retry_backoff)
                .instrument(info_span!("mesh_registrar")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Checks whether the API server serves a resource kind, so that watches on
/// optional kinds are only started when they can succeed.
async fn installed<K: k8s::Object>(client: &Client) -> Result<bool> {
    let installed = client.kind_installed::<K>().await?;
    if !installed {
        tracing::warn!(kind = %K::kind(&()), "Resource kind not found, skipping watches");
    }
    Ok(installed)
}
