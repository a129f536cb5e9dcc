//! Shared fixtures: an in-memory managed runtime with observable
//! lifecycle transitions, and a context that wires it to a freshly
//! spawned engine with fast test timings.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anneal_core::{Installer, InstallerConfig, RuntimeAdapter};
use anneal_schema::{
    Digest, EntityId, EntityKey, InstallableResource, InstallationEvent, ResourceState, Version,
};
use anyhow::{Result, bail};
use tokio::sync::broadcast;

/// How factory-style configurations are named in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// `config:{factory}.{name}`
    Dotted,
    /// `config:{factory}~{name}`
    Tilde,
}

/// One lifecycle step the runtime went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Installed { entity: String, instance: u64 },
    Started { entity: String, instance: u64 },
    Stopped { entity: String, instance: u64 },
    Uninstalled { entity: String, instance: u64 },
}

#[derive(Debug, Clone)]
struct Instance {
    id: u64,
    digest: Digest,
    factory: Option<(String, String)>,
}

#[derive(Debug)]
struct State {
    instances: HashMap<EntityKey, Instance>,
    transitions: Vec<Transition>,
    failures: HashMap<String, u32>,
    next_id: u64,
    naming: Naming,
}

/// In-memory managed runtime. Instances keep a stable id across content
/// updates; every lifecycle step is recorded for assertions.
#[derive(Debug)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Self::with_naming(Naming::Dotted)
    }

    pub fn with_naming(naming: Naming) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                instances: HashMap::new(),
                transitions: Vec::new(),
                failures: HashMap::new(),
                next_id: 1,
                naming,
            }),
        })
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("runtime state poisoned")
    }

    /// Switch factory-config naming and rename existing instances the way
    /// the runtime itself would after such a change.
    pub fn set_naming(&self, naming: Naming) {
        let mut state = self.locked();
        state.naming = naming;
        let instances = std::mem::take(&mut state.instances);
        state.instances = instances
            .into_iter()
            .map(|(key, instance)| {
                let key = match &instance.factory {
                    Some((factory, name)) => EntityKey {
                        entity: EntityId::new(config_entity(naming, factory, name)),
                        version: key.version,
                    },
                    None => key,
                };
                (key, instance)
            })
            .collect();
    }

    /// Make the next `count` operations against `entity` fail.
    pub fn fail_next(&self, entity: &str, count: u32) {
        self.locked().failures.insert(entity.to_string(), count);
    }

    /// Overwrite instance content behind the engine's back.
    pub fn manual_update(&self, key: &EntityKey, content: &str) {
        let mut state = self.locked();
        let instance = state
            .instances
            .get_mut(key)
            .expect("no instance to modify");
        instance.digest = Digest::of_bytes(content.as_bytes());
    }

    /// Remove an instance behind the engine's back.
    pub fn manual_delete(&self, key: &EntityKey) {
        self.locked().instances.remove(key);
    }

    pub fn digest_of(&self, key: &EntityKey) -> Option<Digest> {
        self.locked().instances.get(key).map(|i| i.digest.clone())
    }

    pub fn instance_id(&self, key: &EntityKey) -> Option<u64> {
        self.locked().instances.get(key).map(|i| i.id)
    }

    pub fn instance_count(&self) -> usize {
        self.locked().instances.len()
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.locked().transitions.clone()
    }

    pub fn clear_transitions(&self) {
        self.locked().transitions.clear();
    }

    fn upsert(&self, key: &EntityKey, resource: &InstallableResource) -> Result<()> {
        let digest = resource.effective_digest();
        let factory = factory_of(resource);
        let mut guard = self.locked();
        let state = &mut *guard;
        if take_failure(state, &key.entity) {
            bail!("injected failure applying {key}");
        }
        match state.instances.get_mut(key) {
            Some(instance) => {
                if instance.digest == digest {
                    return Ok(());
                }
                instance.digest = digest;
                let id = instance.id;
                state.transitions.push(Transition::Stopped {
                    entity: key.entity.to_string(),
                    instance: id,
                });
                state.transitions.push(Transition::Started {
                    entity: key.entity.to_string(),
                    instance: id,
                });
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.instances.insert(
                    key.clone(),
                    Instance {
                        id,
                        digest,
                        factory,
                    },
                );
                state.transitions.push(Transition::Installed {
                    entity: key.entity.to_string(),
                    instance: id,
                });
                state.transitions.push(Transition::Started {
                    entity: key.entity.to_string(),
                    instance: id,
                });
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RuntimeAdapter for MockRuntime {
    fn entity_of(&self, resource: &InstallableResource) -> Result<EntityId> {
        let attrs = &resource.attributes;
        if let Some(symbolic) = attrs
            .get("symbolic-name")
            .and_then(serde_json::Value::as_str)
        {
            return Ok(EntityId::new(format!("bundle:{symbolic}")));
        }
        let factory = attrs.get("factory").and_then(serde_json::Value::as_str);
        let name = attrs.get("name").and_then(serde_json::Value::as_str);
        if let (Some(factory), Some(name)) = (factory, name) {
            let naming = self.locked().naming;
            return Ok(EntityId::new(config_entity(naming, factory, name)));
        }
        if let Some(pid) = attrs.get("pid").and_then(serde_json::Value::as_str) {
            return Ok(EntityId::new(format!("config:{pid}")));
        }
        bail!("resource {} carries no identity attribute", resource.url)
    }

    async fn observe(&self, key: &EntityKey) -> Result<Option<Digest>> {
        Ok(self.digest_of(key))
    }

    async fn install(&self, key: &EntityKey, resource: &InstallableResource) -> Result<()> {
        self.upsert(key, resource)
    }

    async fn update(&self, key: &EntityKey, resource: &InstallableResource) -> Result<()> {
        self.upsert(key, resource)
    }

    async fn uninstall(&self, key: &EntityKey) -> Result<()> {
        let mut state = self.locked();
        if take_failure(&mut state, &key.entity) {
            bail!("injected failure removing {key}");
        }
        if let Some(instance) = state.instances.remove(key) {
            state.transitions.push(Transition::Stopped {
                entity: key.entity.to_string(),
                instance: instance.id,
            });
            state.transitions.push(Transition::Uninstalled {
                entity: key.entity.to_string(),
                instance: instance.id,
            });
        }
        Ok(())
    }
}

fn take_failure(state: &mut State, entity: &EntityId) -> bool {
    match state.failures.get_mut(entity.as_str()) {
        Some(0) | None => false,
        Some(remaining) => {
            *remaining -= 1;
            true
        }
    }
}

fn factory_of(resource: &InstallableResource) -> Option<(String, String)> {
    let factory = resource.attributes.get("factory")?.as_str()?;
    let name = resource.attributes.get("name")?.as_str()?;
    Some((factory.to_string(), name.to_string()))
}

pub fn config_entity(naming: Naming, factory: &str, name: &str) -> String {
    match naming {
        Naming::Dotted => format!("config:{factory}.{name}"),
        Naming::Tilde => format!("config:{factory}~{name}"),
    }
}

/// Engine configuration with timings suited to tests.
pub fn test_config() -> InstallerConfig {
    InstallerConfig::default()
        .with_drift_poll(Duration::from_millis(25))
        .with_retry_backoff(Duration::from_millis(30), Duration::from_millis(200))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

/// Test harness: a mock runtime plus an engine spawned over it.
pub struct TestContext {
    pub runtime: Arc<MockRuntime>,
    pub installer: Installer,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: InstallerConfig) -> Self {
        init_tracing();
        let runtime = MockRuntime::new();
        let installer = Installer::spawn(runtime.clone(), config);
        Self { runtime, installer }
    }

    pub fn with_naming(naming: Naming) -> Self {
        init_tracing();
        let runtime = MockRuntime::with_naming(naming);
        let installer = Installer::spawn(runtime.clone(), test_config());
        Self { runtime, installer }
    }

    /// Replace the engine with a fresh one over the same runtime, as
    /// after a host restart.
    pub fn restart(&mut self) {
        self.restart_with(test_config());
    }

    pub fn restart_with(&mut self, config: InstallerConfig) {
        self.installer.shutdown();
        self.installer = Installer::spawn(self.runtime.clone(), config);
    }

    /// Wait for every submitted registration to be fully processed.
    pub async fn settle(&self) {
        self.installer
            .wait_until_idle(Duration::from_secs(5))
            .await
            .expect("engine did not settle");
    }

    pub fn resource_state(&self, scheme: &str, url: &str) -> Option<ResourceState> {
        self.installer
            .installation_state()
            .find_resource(scheme, url)
            .map(|info| info.state)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll until `condition` holds. Drift detection has no completion signal
/// to await, so tests watch for its effects.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collect `Processed` events until the engine reports `Suspended`.
pub async fn events_until_suspended(
    rx: &mut broadcast::Receiver<InstallationEvent>,
) -> Vec<InstallationEvent> {
    let mut seen = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(InstallationEvent::Suspended)) => return seen,
            Ok(Ok(event)) => seen.push(event),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                panic!("event subscriber lagged by {skipped}")
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("event channel closed"),
            Err(_) => panic!("engine never suspended"),
        }
    }
}

/// A plain configuration declaration identified by `pid`.
pub fn config(url: &str, version: &str, pid: &str, content: &str) -> InstallableResource {
    InstallableResource::new(url, version)
        .with_attribute("pid", pid)
        .with_attribute("content", content)
}

/// A factory configuration declaration identified by `factory` + `name`.
pub fn factory_config(
    url: &str,
    version: &str,
    factory: &str,
    name: &str,
    content: &str,
) -> InstallableResource {
    InstallableResource::new(url, version)
        .with_attribute("factory", factory)
        .with_attribute("name", name)
        .with_attribute("content", content)
}

/// A bundle-style declaration identified by its symbolic name.
pub fn bundle(url: &str, version: &str, symbolic_name: &str, content: &str) -> InstallableResource {
    InstallableResource::new(url, version)
        .with_attribute("symbolic-name", symbolic_name)
        .with_attribute("content", content)
}

pub fn bundle_key(symbolic_name: &str) -> EntityKey {
    EntityKey::single(EntityId::new(format!("bundle:{symbolic_name}")))
}

pub fn versioned_bundle_key(symbolic_name: &str, version: &str) -> EntityKey {
    EntityKey::versioned(
        EntityId::new(format!("bundle:{symbolic_name}")),
        Version::new(version),
    )
}

pub fn config_key(pid: &str) -> EntityKey {
    EntityKey::single(EntityId::new(format!("config:{pid}")))
}
