use authpolicy_controller_core::{NamespaceResolutionError, ResourceId};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    NamespaceResolution(#[from] NamespaceResolutionError),

    #[error("cluster request failed: {0}")]
    Cluster(#[from] authpolicy_controller_k8s_api::Error),

    /// The grant already existed when it was created, but was gone again when
    /// it was reread.
    #[error("ReferenceGrant {0} changed concurrently")]
    GrantRace(ResourceId),

    #[error("pass did not complete within {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Indicates whether retrying the same pass may succeed.
    ///
    /// A namespace resolution failure only clears when the policy or gateway
    /// changes, which produces a new pass.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NamespaceResolution(_))
    }
}
