//! An in-memory [`Store`] for tests.
//!
//! Objects are held as JSON so that any resource type can be stored. The
//! store assigns resource versions, enforces optimistic concurrency on replace
//! and conditional delete, and records every operation it serves so tests can
//! assert on ordering.

use crate::{labels::Selector, store::Object, Store};
use kube::core::ErrorResponse;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

#[derive(Clone, Debug, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Replace,
    Delete,
}

/// A recorded store operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Op {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, serde_json::Value>,
    resource_version: u64,
    missing_kinds: HashSet<String>,
    failures: HashMap<(Verb, String), u16>,
    ops: Vec<Op>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    kind: String,
    namespace: Option<String>,
    name: String,
}

fn kind_of<K: Object>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

fn decode<K: Object>(value: &serde_json::Value) -> Result<K, kube::Error> {
    serde_json::from_value(value.clone()).map_err(kube::Error::SerdeError)
}

// === impl FakeStore ===

impl FakeStore {
    /// Stores an object as-is, assigning it a new resource version.
    pub fn insert<K: Object>(&self, obj: K) -> K {
        let mut state = self.state.lock();
        let key = Key::of(&obj);
        let mut value = serde_json::to_value(&obj).expect("object must serialize");
        state.stamp(&mut value);
        state.objects.insert(key, value.clone());
        serde_json::from_value(value).expect("object must deserialize")
    }

    /// Reads an object without recording an operation.
    pub fn get_object<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let state = self.state.lock();
        let key = Key {
            kind: kind_of::<K>(),
            namespace: namespace.map(Into::into),
            name: name.to_string(),
        };
        state
            .objects
            .get(&key)
            .map(|v| decode(v).expect("object must deserialize"))
    }

    /// Returns all stored objects of a type.
    pub fn objects<K: Object>(&self) -> Vec<K> {
        let kind = kind_of::<K>();
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, v)| decode(v).expect("object must deserialize"))
            .collect()
    }

    /// Makes the API server behave as though the resource type were not
    /// installed.
    pub fn uninstall<K: Object>(&self) {
        self.state.lock().missing_kinds.insert(kind_of::<K>());
    }

    /// Fails every subsequent `verb` on the resource type with `code`.
    pub fn fail<K: Object>(&self, verb: Verb, code: u16) {
        self.state.lock().failures.insert((verb, kind_of::<K>()), code);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Returns the operations that modified the cluster.
    pub fn writes(&self) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|op| matches!(op.verb, Verb::Create | Verb::Replace | Verb::Delete))
            .collect()
    }
}

#[async_trait::async_trait]
impl Store for FakeStore {
    async fn get<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        let mut state = self.state.lock();
        state.record::<K>(Verb::Get, namespace, Some(name))?;
        if state.missing_kinds.contains(&kind_of::<K>()) {
            return Ok(None);
        }
        let key = Key {
            kind: kind_of::<K>(),
            namespace: namespace.map(Into::into),
            name: name.to_string(),
        };
        state.objects.get(&key).map(decode).transpose()
    }

    async fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<K>, kube::Error> {
        let mut state = self.state.lock();
        state.record::<K>(Verb::List, namespace, None)?;
        state.ensure_installed::<K>()?;
        let kind = kind_of::<K>();
        let mut items = Vec::new();
        for (key, value) in state.objects.iter() {
            if key.kind != kind {
                continue;
            }
            if namespace.is_some() && key.namespace.as_deref() != namespace {
                continue;
            }
            let obj = decode::<K>(value)?;
            if selector.matches(obj.meta().labels.as_ref()) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<Option<K>, kube::Error> {
        let mut state = self.state.lock();
        let key = Key::of(obj);
        state.record::<K>(Verb::Create, key.namespace.as_deref(), Some(key.name.as_str()))?;
        state.ensure_installed::<K>()?;
        if state.objects.contains_key(&key) {
            return Ok(None);
        }
        let mut value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        state.stamp(&mut value);
        let created = decode(&value)?;
        state.objects.insert(key, value);
        Ok(Some(created))
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, kube::Error> {
        let mut state = self.state.lock();
        let key = Key::of(obj);
        state.record::<K>(Verb::Replace, key.namespace.as_deref(), Some(key.name.as_str()))?;
        state.ensure_installed::<K>()?;
        let live_rv = match state.objects.get(&key) {
            Some(live) => resource_version(live),
            None => return Err(api_error(404, "NotFound", format!("{} not found", key.name))),
        };
        if let Some(rv) = obj.meta().resource_version.as_deref() {
            if live_rv.as_deref() != Some(rv) {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!("the object {} has been modified", key.name),
                ));
            }
        }
        let mut value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        state.stamp(&mut value);
        let replaced = decode(&value)?;
        state.objects.insert(key, value);
        Ok(replaced)
    }

    async fn delete<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<bool, kube::Error> {
        let mut state = self.state.lock();
        state.record::<K>(Verb::Delete, namespace, Some(name))?;
        let key = Key {
            kind: kind_of::<K>(),
            namespace: namespace.map(Into::into),
            name: name.to_string(),
        };
        let live_rv = match state.objects.get(&key) {
            Some(live) => self::resource_version(live),
            None => return Ok(false),
        };
        if let Some(rv) = resource_version {
            if live_rv.as_deref() != Some(rv) {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!("precondition failed for {name}"),
                ));
            }
        }
        state.objects.remove(&key);
        Ok(true)
    }

    async fn kind_installed<K: Object>(&self) -> Result<bool, kube::Error> {
        Ok(!self.state.lock().missing_kinds.contains(&kind_of::<K>()))
    }
}

fn resource_version(value: &serde_json::Value) -> Option<String> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(|v| v.as_str())
        .map(Into::into)
}

// === impl State ===

impl State {
    fn record<K: Object>(
        &mut self,
        verb: Verb,
        namespace: Option<&str>,
        name: Option<&str>,
    ) -> Result<(), kube::Error> {
        let kind = kind_of::<K>();
        self.ops.push(Op {
            verb,
            kind: K::kind(&()).to_string(),
            namespace: namespace.map(Into::into),
            name: name.map(Into::into),
        });
        match self.failures.get(&(verb, kind)) {
            Some(&code) => Err(api_error(code, "InjectedFailure", format!("{verb:?} failed"))),
            None => Ok(()),
        }
    }

    fn ensure_installed<K: Object>(&self) -> Result<(), kube::Error> {
        if self.missing_kinds.contains(&kind_of::<K>()) {
            return Err(api_error(
                404,
                "NotFound",
                format!("the server could not find the requested resource {}", K::kind(&())),
            ));
        }
        Ok(())
    }

    fn stamp(&mut self, value: &mut serde_json::Value) {
        self.resource_version += 1;
        if let Some(meta) = value
            .get_mut("metadata")
            .and_then(serde_json::Value::as_object_mut)
        {
            meta.insert(
                "resourceVersion".to_string(),
                serde_json::Value::String(self.resource_version.to_string()),
            );
        }
    }
}

// === impl Key ===

impl Key {
    fn of<K: Object>(obj: &K) -> Self {
        Self {
            kind: kind_of::<K>(),
            namespace: obj.meta().namespace.clone(),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigMap, ObjectMeta};

    fn config_map(ns: &str, name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn replace_requires_current_version() {
        let store = FakeStore::default();
        let stored = store.insert(config_map("ns", "cm", &[]));
        let rv = stored.metadata.resource_version.clone();
        assert!(rv.is_some());

        let updated = store.replace(&stored).await.expect("replace must succeed");
        assert_ne!(updated.metadata.resource_version, rv);

        let error = store.replace(&stored).await.expect_err("stale replace must fail");
        assert!(crate::store::is_conflict(&error));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn conditional_delete() {
        let store = FakeStore::default();
        let stored = store.insert(config_map("ns", "cm", &[]));
        let error = store
            .delete::<ConfigMap>(Some("ns"), "cm", Some("stale"))
            .await
            .expect_err("precondition must fail");
        assert!(crate::store::is_conflict(&error));

        let rv = stored.metadata.resource_version.as_deref();
        assert!(store.delete::<ConfigMap>(Some("ns"), "cm", rv).await.unwrap());
        assert!(!store.delete::<ConfigMap>(Some("ns"), "cm", None).await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn list_filters_by_namespace_and_labels() {
        let store = FakeStore::default();
        store.insert(config_map("a", "one", &[("app", "x")]));
        store.insert(config_map("b", "two", &[("app", "x")]));
        store.insert(config_map("b", "three", &[("app", "y")]));

        let selector = Selector::from_iter(Some(("app", "x")));
        let all = store.list::<ConfigMap>(None, &selector).await.unwrap();
        assert_eq!(all.len(), 2);
        let b = store.list::<ConfigMap>(Some("b"), &selector).await.unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].metadata.name.as_deref(), Some("two"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_kinds_and_failures() {
        let store = FakeStore::default();
        store.uninstall::<ConfigMap>();
        assert!(!store.kind_installed::<ConfigMap>().await.unwrap());
        assert!(store.get::<ConfigMap>(Some("ns"), "cm").await.unwrap().is_none());
        let error = store
            .create(&config_map("ns", "cm", &[]))
            .await
            .expect_err("create must fail");
        assert!(crate::store::is_status(&error, 404));

        let store = FakeStore::default();
        store.fail::<ConfigMap>(Verb::Get, 500);
        let error = store
            .get::<ConfigMap>(Some("ns"), "cm")
            .await
            .expect_err("get must fail");
        assert!(crate::store::is_status(&error, 500));
        assert_eq!(store.ops().len(), 1);
        assert!(store.writes().is_empty());
    }
}
