#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cluster request failed: {0}")]
    Cluster(#[from] authpolicy_controller_k8s_api::Error),

    #[error("ServiceMeshControlPlane {namespace}/{name} not found")]
    ControlPlaneNotFound { namespace: String, name: String },

    #[error("invalid mesh configuration in ConfigMap {namespace}/{name}: {source}")]
    MeshConfig {
        namespace: String,
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    /// Cluster errors are transient. A missing control plane or an invalid
    /// mesh document needs an operator to intervene; the registration is
    /// attempted again when the `Kuadrant` resource is next applied.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }
}
