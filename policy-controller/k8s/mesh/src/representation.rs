use crate::Error;
use authpolicy_controller_core::authorizer::MeshConfig;
use authpolicy_controller_k8s_api::{
    istio::{self, ExtensionProvider, IstioOperator, MESH_CONFIG_KEY},
    maistra::ServiceMeshControlPlane,
    ConfigMap, ResourceExt, Store,
};

/// One of the objects through which a mesh's configuration can be edited.
#[derive(Clone, Debug)]
pub enum Representation {
    Operator(IstioOperator),
    Sail(istio::Istio),
    ConfigMap {
        config_map: ConfigMap,
        mesh: istio::MeshConfig,
    },
    ControlPlane(ServiceMeshControlPlane),
}

impl Representation {
    /// Decodes the mesh document held by the `istio` ConfigMap. A missing key
    /// is treated as an empty document.
    pub fn from_config_map(config_map: ConfigMap) -> Result<Self, Error> {
        let yaml = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(MESH_CONFIG_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        let mesh = istio::MeshConfig::from_yaml(yaml).map_err(|source| Error::MeshConfig {
            namespace: config_map.namespace().unwrap_or_default(),
            name: config_map.name_any(),
            source,
        })?;
        Ok(Self::ConfigMap { config_map, mesh })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Operator(_) => "IstioOperator",
            Self::Sail(_) => "Istio",
            Self::ConfigMap { .. } => "ConfigMap",
            Self::ControlPlane(_) => "ServiceMeshControlPlane",
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Operator(o) => o.name_any(),
            Self::Sail(o) => o.name_any(),
            Self::ConfigMap { config_map, .. } => config_map.name_any(),
            Self::ControlPlane(o) => o.name_any(),
        }
    }

    fn mesh_config(&self) -> Option<&istio::MeshConfig> {
        match self {
            Self::Operator(o) => o.spec.mesh_config.as_ref(),
            Self::Sail(o) => o.spec.values.as_ref()?.mesh_config.as_ref(),
            Self::ConfigMap { mesh, .. } => Some(mesh),
            Self::ControlPlane(o) => o.spec.tech_preview.as_ref()?.mesh_config.as_ref(),
        }
    }

    fn mesh_config_mut(&mut self) -> &mut istio::MeshConfig {
        match self {
            Self::Operator(o) => o.spec.mesh_config.get_or_insert_with(Default::default),
            Self::Sail(o) => o
                .spec
                .values
                .get_or_insert_with(Default::default)
                .mesh_config
                .get_or_insert_with(Default::default),
            Self::ConfigMap { mesh, .. } => mesh,
            Self::ControlPlane(o) => o
                .spec
                .tech_preview
                .get_or_insert_with(Default::default)
                .mesh_config
                .get_or_insert_with(Default::default),
        }
    }

    /// Writes the representation back to the cluster with the resource
    /// version it was read at.
    pub async fn persist<S: Store>(self, store: &S) -> Result<(), Error> {
        match self {
            Self::Operator(o) => {
                store.replace(&o).await?;
            }
            Self::Sail(o) => {
                store.replace(&o).await?;
            }
            Self::ConfigMap {
                mut config_map,
                mesh,
            } => {
                let yaml = mesh.to_yaml().map_err(|source| Error::MeshConfig {
                    namespace: config_map.namespace().unwrap_or_default(),
                    name: config_map.name_any(),
                    source,
                })?;
                config_map
                    .data
                    .get_or_insert_with(Default::default)
                    .insert(MESH_CONFIG_KEY.to_string(), yaml);
                store.replace(&config_map).await?;
            }
            Self::ControlPlane(o) => {
                store.replace(&o).await?;
            }
        }
        Ok(())
    }
}

impl MeshConfig for Representation {
    fn extension_providers(&self) -> &[ExtensionProvider] {
        self.mesh_config()
            .map(istio::MeshConfig::extension_providers)
            .unwrap_or_default()
    }

    fn extension_providers_mut(&mut self) -> &mut Vec<ExtensionProvider> {
        self.mesh_config_mut().extension_providers_mut()
    }
}
