//! The mesh-wide external authorizer entry and the capability through which
//! mesh configuration representations expose their provider lists.

use crate::{AUTHORIZER_PORT, AUTHORIZER_PROVIDER, AUTHORIZER_SERVICE};
use authpolicy_controller_k8s_api::istio::{self, EnvoyExtAuthzGrpc, ExtensionProvider};

/// Returns the extension provider that routes external authorization checks
/// to the authorizer running in `namespace`.
pub fn kuadrant_authorizer(namespace: &str) -> ExtensionProvider {
    ExtensionProvider {
        name: AUTHORIZER_PROVIDER.to_string(),
        envoy_ext_authz_grpc: Some(EnvoyExtAuthzGrpc {
            service: format!("{AUTHORIZER_SERVICE}.{namespace}.svc.cluster.local"),
            port: AUTHORIZER_PORT.into(),
            other: Default::default(),
        }),
        other: Default::default(),
    }
}

/// A mesh configuration holding a list of extension providers.
pub trait MeshConfig {
    fn extension_providers(&self) -> &[ExtensionProvider];

    fn extension_providers_mut(&mut self) -> &mut Vec<ExtensionProvider>;

    /// Checks whether an equivalent provider is configured.
    ///
    /// Providers are compared by name and gRPC target. Settings that are not
    /// modeled, like timeouts, are ignored.
    fn has_provider(&self, provider: &ExtensionProvider) -> bool {
        self.extension_providers()
            .iter()
            .any(|p| equivalent(p, provider))
    }

    /// Adds the provider unless an equivalent one exists. Returns true if the
    /// configuration changed.
    fn add_provider(&mut self, provider: ExtensionProvider) -> bool {
        if self.has_provider(&provider) {
            return false;
        }
        self.extension_providers_mut().push(provider);
        true
    }

    /// Removes every provider equivalent to `provider`. Returns true if the
    /// configuration changed.
    fn remove_provider(&mut self, provider: &ExtensionProvider) -> bool {
        if !self.has_provider(provider) {
            return false;
        }
        self.extension_providers_mut()
            .retain(|p| !equivalent(p, provider));
        true
    }
}

fn equivalent(a: &ExtensionProvider, b: &ExtensionProvider) -> bool {
    if a.name != b.name {
        return false;
    }
    match (&a.envoy_ext_authz_grpc, &b.envoy_ext_authz_grpc) {
        (Some(a), Some(b)) => a.service == b.service && a.port == b.port,
        (None, None) => a.other == b.other,
        _ => false,
    }
}

impl MeshConfig for istio::MeshConfig {
    fn extension_providers(&self) -> &[ExtensionProvider] {
        istio::MeshConfig::extension_providers(self)
    }

    fn extension_providers_mut(&mut self) -> &mut Vec<ExtensionProvider> {
        self.extension_providers.get_or_insert_with(Vec::new)
    }
}
