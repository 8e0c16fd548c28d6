use crate::{Error, RegistrarMetrics, Representation};
use ahash::AHashMap as HashMap;
use authpolicy_controller_core::authorizer::{kuadrant_authorizer, MeshConfig};
use authpolicy_controller_k8s_api::{
    istio::{Istio, IstioOperator},
    maistra::{
        ControlPlaneRef, ServiceMeshControlPlane, ServiceMeshMember, ServiceMeshMemberSpec,
        MEMBER_NAME,
    },
    ConfigMap, Object, ObjectMeta, OwnerReference, Store,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// The Sail operator only reconciles an `Istio` resource with this name.
const SAIL_ISTIO_NAME: &str = "default";

/// Locates the mesh's control plane configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshSettings {
    /// The name of the `IstioOperator`, which is also the name of the
    /// `ServiceMeshControlPlane` on OpenShift Service Mesh.
    pub operator_name: String,
    pub config_map_name: String,
    pub namespace: String,
}

/// A change in where the authorizer is installed.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Register {
        namespace: String,
        owner: Option<OwnerReference>,
    },
    Unregister {
        namespace: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mesh {
    Istio,
    ServiceMesh,
}

/// The result of a registration change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// The mesh that was configured.
    pub mesh: Mesh,

    /// The number of representations that were written.
    pub updated: usize,
}

/// Adds and removes the authorizer's extension provider in the mesh
/// configuration.
///
/// Mesh configuration is shared with other writers, so it is read fresh before
/// every change and written back with its resource version.
#[derive(Clone, Debug)]
pub struct Registrar<S> {
    store: S,
    settings: MeshSettings,
    metrics: RegistrarMetrics,
}

// === impl Registrar ===

impl<S: Store> Registrar<S> {
    pub fn new(store: S, settings: MeshSettings, metrics: RegistrarMetrics) -> Self {
        Self {
            store,
            settings,
            metrics,
        }
    }

    /// Registers the authorizer running in `namespace`.
    ///
    /// Istio is configured if any of its representations exist. Otherwise the
    /// namespace is enrolled into the OpenShift Service Mesh control plane,
    /// which is then configured.
    pub async fn register(
        &self,
        namespace: &str,
        owner: Option<OwnerReference>,
    ) -> Result<Registration, Error> {
        let provider = kuadrant_authorizer(namespace);

        let istio = self.istio().await?;
        if !istio.is_empty() {
            let mut updated = 0;
            for rep in istio {
                if self.apply(rep, |c| c.add_provider(provider.clone())).await? {
                    updated += 1;
                }
            }
            return Ok(Registration {
                mesh: Mesh::Istio,
                updated,
            });
        }

        self.ensure_member(namespace, owner).await?;
        let Some(smcp) = self.control_plane().await? else {
            return Err(self.control_plane_not_found());
        };
        let updated = self.apply(smcp, |c| c.add_provider(provider)).await?;
        Ok(Registration {
            mesh: Mesh::ServiceMesh,
            updated: updated.into(),
        })
    }

    /// Removes the authorizer running in `namespace` from every mesh
    /// configuration that lists it.
    ///
    /// The namespace's `ServiceMeshMember` is left in place. Fails with
    /// [`Error::ControlPlaneNotFound`] when neither Istio nor a
    /// `ServiceMeshControlPlane` is installed.
    pub async fn unregister(&self, namespace: &str) -> Result<Registration, Error> {
        let provider = kuadrant_authorizer(namespace);

        let mut reps = self.istio().await?;
        let mesh = if !reps.is_empty() {
            Mesh::Istio
        } else if let Some(smcp) = self.control_plane().await? {
            reps.push(smcp);
            Mesh::ServiceMesh
        } else {
            return Err(self.control_plane_not_found());
        };

        let mut updated = 0;
        for rep in reps {
            if self.apply(rep, |c| c.remove_provider(&provider)).await? {
                updated += 1;
            }
        }
        Ok(Registration {
            mesh,
            updated,
        })
    }

    /// Handles registration events until the channel closes.
    ///
    /// A failed event is retried after `backoff` unless a newer event for the
    /// same namespace has been received.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<Event>, backoff: Duration) {
        let (retry_tx, mut retries) = mpsc::unbounded_channel::<(u64, Event)>();
        let mut latest = HashMap::<String, u64>::new();
        let mut seq = 0u64;

        loop {
            let (id, event) = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        seq += 1;
                        latest.insert(event.namespace().to_string(), seq);
                        (seq, event)
                    }
                    None => break,
                },
                Some((id, event)) = retries.recv() => {
                    if latest.get(event.namespace()) != Some(&id) {
                        tracing::debug!(namespace = %event.namespace(), "Dropping superseded retry");
                        continue;
                    }
                    (id, event)
                }
            };

            let result = match &event {
                Event::Register { namespace, owner } => {
                    self.register(namespace, owner.clone()).await
                }
                Event::Unregister { namespace } => self.unregister(namespace).await,
            };
            match result {
                Ok(registration) => {
                    tracing::info!(
                        namespace = %event.namespace(),
                        op = event.op(),
                        mesh = ?registration.mesh,
                        updated = registration.updated,
                        "Updated mesh configuration"
                    );
                    self.metrics.succeeded(event.op());
                }
                Err(error) => {
                    self.metrics.failed(event.op());
                    if !error.is_retryable() {
                        tracing::error!(namespace = %event.namespace(), %error, "Failed to update mesh configuration");
                        continue;
                    }
                    tracing::warn!(namespace = %event.namespace(), %error, ?backoff, "Failed to update mesh configuration; retrying");
                    let tx = retry_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        let _ = tx.send((id, event));
                    });
                }
            }
        }
        tracing::debug!("Registrar event channel closed");
    }

    /// Collects the Istio representations: the `IstioOperator`, or failing
    /// that the Sail `Istio` resource, plus the `istio` ConfigMap.
    async fn istio(&self) -> Result<Vec<Representation>, Error> {
        let MeshSettings {
            operator_name,
            config_map_name,
            namespace,
        } = &self.settings;
        let mut reps = Vec::with_capacity(2);

        if let Some(iop) = self
            .lookup::<IstioOperator>(Some(namespace.as_str()), operator_name)
            .await?
        {
            reps.push(Representation::Operator(iop));
        } else if let Some(istio) = self.lookup::<Istio>(None, SAIL_ISTIO_NAME).await? {
            reps.push(Representation::Sail(istio));
        }

        if let Some(cm) = self
            .lookup::<ConfigMap>(Some(namespace.as_str()), config_map_name)
            .await?
        {
            reps.push(Representation::from_config_map(cm)?);
        }

        Ok(reps)
    }

    async fn control_plane(&self) -> Result<Option<Representation>, Error> {
        let smcp = self
            .lookup::<ServiceMeshControlPlane>(
                Some(self.settings.namespace.as_str()),
                &self.settings.operator_name,
            )
            .await?;
        Ok(smcp.map(Representation::ControlPlane))
    }

    /// Fetches a representation, returning `None` if its kind is not served
    /// or the object does not exist.
    async fn lookup<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, Error> {
        let kind = K::kind(&());
        if !self.store.kind_installed::<K>().await? {
            tracing::debug!(%kind, "Mesh configuration kind not installed");
            return Ok(None);
        }
        let obj = self.store.get::<K>(namespace, name).await?;
        if obj.is_none() {
            tracing::debug!(%kind, ?namespace, %name, "Mesh configuration not found");
        }
        Ok(obj)
    }

    /// Enrolls `namespace` into the configured control plane.
    async fn ensure_member(
        &self,
        namespace: &str,
        owner: Option<OwnerReference>,
    ) -> Result<(), Error> {
        if !self.store.kind_installed::<ServiceMeshMember>().await? {
            return Err(self.control_plane_not_found());
        }
        let member = ServiceMeshMember {
            metadata: ObjectMeta {
                name: Some(MEMBER_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: owner.map(|o| vec![o]),
                ..Default::default()
            },
            spec: ServiceMeshMemberSpec {
                control_plane_ref: ControlPlaneRef {
                    name: self.settings.operator_name.clone(),
                    namespace: self.settings.namespace.clone(),
                },
            },
        };
        if self.store.create(&member).await?.is_some() {
            tracing::info!(%namespace, "Created ServiceMeshMember");
        }
        Ok(())
    }

    /// Applies `update` to a representation and persists it if it changed.
    async fn apply(
        &self,
        mut rep: Representation,
        update: impl FnOnce(&mut Representation) -> bool,
    ) -> Result<bool, Error> {
        if !update(&mut rep) {
            tracing::debug!(kind = rep.kind(), name = %rep.name(), "Mesh configuration unchanged");
            return Ok(false);
        }
        tracing::info!(kind = rep.kind(), name = %rep.name(), "Updating mesh configuration");
        rep.persist(&self.store).await?;
        Ok(true)
    }

    fn control_plane_not_found(&self) -> Error {
        Error::ControlPlaneNotFound {
            namespace: self.settings.namespace.clone(),
            name: self.settings.operator_name.clone(),
        }
    }
}

// === impl Event ===

impl Event {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Register { namespace, .. } | Self::Unregister { namespace } => namespace,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
        }
    }
}
