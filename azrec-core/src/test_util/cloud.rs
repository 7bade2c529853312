use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{CloudError, Error, Result};
use crate::future::{Future, FutureType};
use crate::models::{
    Resource, VirtualMachineScaleSet, VirtualMachineScaleSetUpdate, VirtualMachineScaleSetVm,
    VirtualMachineScaleSetVmProfile,
};
use crate::reconciler::{AsyncOutcome, Creator, Deleter, FutureHandler, Getter, OperationHandle};
use crate::resource_id;
use crate::scalesets::ScaleSetClient;
use crate::spec::ResourceSpec;

/// Subscription every fake resource ID is minted in.
const SUBSCRIPTION_ID: &str = "123";

/// A write the fake received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    CreateOrUpdate { name: String, parameters: Resource },
    Update {
        name: String,
        parameters: VirtualMachineScaleSetUpdate,
    },
    Delete { name: String },
    UpdateInstances {
        name: String,
        instance_ids: Vec<String>,
    },
}

/// Observable and tunable state of the fake.
#[derive(Debug)]
pub struct CloudState {
    /// Stored resources by name.
    pub resources: BTreeMap<String, Resource>,
    /// Scale set instances by scale set name.
    pub instances: BTreeMap<String, Vec<VirtualMachineScaleSetVm>>,
    /// New writes are accepted as long-running operations.
    pub pending: bool,
    /// Answer of `is_done` for persisted operations.
    pub is_done: bool,
    /// How long `is_done` takes to answer.
    pub poll_delay: Option<Duration>,
    /// Error returned by `result` for finished operations.
    pub result_error: Option<CloudError>,
    /// Error returned by every write.
    pub write_error: Option<CloudError>,
    pub writes: Vec<Write>,
    pub gets: usize,
    /// Results of accepted operations, committed by `result`.
    in_flight: HashMap<(String, FutureType), Option<Resource>>,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            instances: BTreeMap::new(),
            pending: false,
            is_done: true,
            poll_delay: None,
            result_error: None,
            write_error: None,
            writes: Vec::new(),
            gets: 0,
            in_flight: HashMap::new(),
        }
    }
}

impl CloudState {
    fn check_write(&self) -> Result<()> {
        match &self.write_error {
            Some(err) => Err(Error::Cloud(err.clone())),
            None => Ok(()),
        }
    }

    /// Apply now, or stash until the operation is polled to completion.
    fn submit(&mut self, name: &str, kind: FutureType, result: Option<Resource>) -> AsyncOutcome {
        if self.pending {
            self.in_flight.insert((name.to_string(), kind), result);
            let method = match kind {
                FutureType::Put => "PUT",
                FutureType::Patch => "PATCH",
                FutureType::Delete => "DELETE",
            };
            return AsyncOutcome::Pending(OperationHandle::new(
                json!({ "method": method, "name": name }),
            ));
        }
        AsyncOutcome::Completed(self.commit(name, kind, result))
    }

    fn commit(&mut self, name: &str, kind: FutureType, result: Option<Resource>) -> Option<Resource> {
        match kind {
            FutureType::Delete => {
                self.resources.remove(name);
                self.instances.remove(name);
                None
            }
            FutureType::Put | FutureType::Patch => {
                if let Some(resource) = result {
                    self.resources.insert(name.to_string(), resource);
                }
                self.resources.get(name).cloned()
            }
        }
    }
}

/// In-memory ARM.
///
/// Resources are keyed by name only. Writes are recorded before they are
/// applied, so a failed write still shows up in [`FakeCloud::writes`].
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `resource` as already existing.
    pub fn insert(&self, name: &str, resource: impl Into<Resource>) {
        self.state()
            .resources
            .insert(name.to_string(), resource.into());
    }

    pub fn set_instances(&self, scale_set: &str, instances: Vec<VirtualMachineScaleSetVm>) {
        self.state()
            .instances
            .insert(scale_set.to_string(), instances);
    }

    pub fn get_resource(&self, name: &str) -> Option<Resource> {
        self.state().resources.get(name).cloned()
    }

    /// Make every following write fail with `err`.
    pub fn fail_writes(&self, err: CloudError) {
        self.state().write_error = Some(err);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state().writes.clone()
    }

    pub fn gets(&self) -> usize {
        self.state().gets
    }
}

fn mint_id(spec: &dyn ResourceSpec, resource: &Resource) -> String {
    match resource {
        Resource::ScaleSet(_) => resource_id::vmss_id(
            SUBSCRIPTION_ID,
            spec.resource_group_name(),
            spec.resource_name(),
        ),
        _ => format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Fake/resources/{}",
            SUBSCRIPTION_ID,
            spec.resource_group_name(),
            spec.resource_name()
        ),
    }
}

/// Merge a PATCH into the stored scale set. The network profile is kept
/// when the patch does not carry one.
fn apply_update(vmss: &mut VirtualMachineScaleSet, update: &VirtualMachineScaleSetUpdate) {
    if let Some(sku) = &update.sku {
        vmss.sku = Some(sku.clone());
    }
    if !update.tags.is_empty() {
        vmss.tags = update.tags.clone();
    }
    if update.identity.is_some() {
        vmss.identity = update.identity.clone();
    }
    let Some(profile) = update
        .properties
        .as_ref()
        .and_then(|p| p.virtual_machine_profile.clone())
    else {
        return;
    };
    let properties = vmss.properties.get_or_insert_with(Default::default);
    let network_profile = properties
        .virtual_machine_profile
        .as_ref()
        .and_then(|p| p.network_profile.clone());
    properties.virtual_machine_profile = Some(VirtualMachineScaleSetVmProfile {
        network_profile: profile.network_profile.clone().or(network_profile),
        ..profile
    });
}

#[async_trait]
impl Getter for FakeCloud {
    async fn get(&self, spec: &dyn ResourceSpec) -> Result<Resource> {
        let mut state = self.state();
        state.gets += 1;
        state
            .resources
            .get(spec.resource_name())
            .cloned()
            .ok_or_else(|| {
                Error::Cloud(CloudError::not_found(format!(
                    "resource {}/{} not found",
                    spec.resource_group_name(),
                    spec.resource_name()
                )))
            })
    }
}

#[async_trait]
impl FutureHandler for FakeCloud {
    async fn is_done(&self, _future: &Future) -> Result<bool> {
        let delay = self.state().poll_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().is_done)
    }

    async fn result(&self, future: &Future, kind: FutureType) -> Result<Option<Resource>> {
        let mut state = self.state();
        if let Some(err) = state.result_error.clone() {
            return Err(Error::Cloud(err));
        }
        let result = state
            .in_flight
            .remove(&(future.name.clone(), kind))
            .flatten();
        Ok(state.commit(&future.name, kind, result))
    }
}

#[async_trait]
impl Creator for FakeCloud {
    async fn create_or_update_async(
        &self,
        spec: &dyn ResourceSpec,
        parameters: Resource,
    ) -> Result<AsyncOutcome> {
        let mut state = self.state();
        let name = spec.resource_name().to_string();
        state.writes.push(Write::CreateOrUpdate {
            name: name.clone(),
            parameters: parameters.clone(),
        });
        state.check_write()?;

        let mut resource = parameters;
        if resource.id().is_none() {
            let id = state
                .resources
                .get(&name)
                .and_then(|r| r.id().map(str::to_string))
                .unwrap_or_else(|| mint_id(spec, &resource));
            resource.set_id(id);
        }
        Ok(state.submit(&name, FutureType::Put, Some(resource)))
    }
}

#[async_trait]
impl Deleter for FakeCloud {
    async fn delete_async(&self, spec: &dyn ResourceSpec) -> Result<AsyncOutcome> {
        let mut state = self.state();
        let name = spec.resource_name().to_string();
        state.writes.push(Write::Delete { name: name.clone() });
        state.check_write()?;
        if !state.resources.contains_key(&name) {
            return Err(Error::Cloud(CloudError::not_found(format!(
                "resource {} not found",
                name
            ))));
        }
        Ok(state.submit(&name, FutureType::Delete, None))
    }
}

#[async_trait]
impl ScaleSetClient for FakeCloud {
    async fn list(&self, _resource_group: &str) -> Result<Vec<VirtualMachineScaleSet>> {
        Ok(self
            .state()
            .resources
            .values()
            .filter_map(|r| VirtualMachineScaleSet::try_from(r.clone()).ok())
            .collect())
    }

    async fn list_instances(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Vec<VirtualMachineScaleSetVm>> {
        Ok(self.state().instances.get(name).cloned().unwrap_or_default())
    }

    async fn update_async(
        &self,
        spec: &dyn ResourceSpec,
        parameters: VirtualMachineScaleSetUpdate,
    ) -> Result<AsyncOutcome> {
        let mut state = self.state();
        let name = spec.resource_name().to_string();
        state.writes.push(Write::Update {
            name: name.clone(),
            parameters: parameters.clone(),
        });
        state.check_write()?;

        let Some(Resource::ScaleSet(mut vmss)) = state.resources.get(&name).cloned() else {
            return Err(Error::Cloud(CloudError::not_found(format!(
                "scale set {} not found",
                name
            ))));
        };
        apply_update(&mut vmss, &parameters);
        Ok(state.submit(&name, FutureType::Patch, Some(vmss.into())))
    }

    async fn update_instances(
        &self,
        _resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state();
        state.writes.push(Write::UpdateInstances {
            name: name.to_string(),
            instance_ids: instance_ids.to_vec(),
        });
        state.check_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sku, Subnet};

    struct Named(&'static str);

    impl ResourceSpec for Named {
        fn resource_name(&self) -> &str {
            self.0
        }

        fn resource_group_name(&self) -> &str {
            "my-rg"
        }

        fn parameters(&self, _existing: Option<&Resource>) -> Result<Option<Resource>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_pending_write_commits_on_result() {
        let cloud = FakeCloud::new();
        cloud.state().pending = true;
        let outcome = cloud
            .create_or_update_async(&Named("node-subnet"), Subnet::default().into())
            .await
            .unwrap();
        let AsyncOutcome::Pending(handle) = outcome else {
            panic!("expected a pending operation");
        };
        assert!(cloud.get(&Named("node-subnet")).await.unwrap_err().is_not_found());

        let future = Future::new(FutureType::Put, "subnets", "node-subnet", "my-rg", &handle.state)
            .unwrap();
        let resource = cloud.result(&future, FutureType::Put).await.unwrap().unwrap();
        assert!(resource.id().unwrap().ends_with("/node-subnet"));
        assert!(cloud.get(&Named("node-subnet")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_keeps_network_profile() {
        let cloud = FakeCloud::new();
        let mut vmss = VirtualMachineScaleSet {
            sku: Some(Sku {
                name: Some("VM_SIZE".to_string()),
                tier: None,
                capacity: Some(1),
            }),
            ..Default::default()
        };
        vmss.properties = Some(Default::default());
        cloud.insert("my-vmss", vmss);

        let update = VirtualMachineScaleSetUpdate {
            sku: Some(Sku {
                name: Some("VM_SIZE".to_string()),
                tier: None,
                capacity: Some(3),
            }),
            ..Default::default()
        };
        cloud.update_async(&Named("my-vmss"), update).await.unwrap();

        let Some(Resource::ScaleSet(stored)) = cloud.get_resource("my-vmss") else {
            panic!("scale set missing");
        };
        assert_eq!(stored.capacity(), Some(3));
    }
}
