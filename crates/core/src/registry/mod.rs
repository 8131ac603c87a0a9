//! Live module instances keyed by their caller-assigned id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::ModuleCatalog;
use crate::graph::Connections;
use crate::mapping::InputBinding;
use crate::module::{coerce_for, Module, ModuleDescriptor, Value};
use crate::{Result, VrackError};

/// Member name of the built-in activity flag.
pub const ACTIVE_MEMBER: &str = "Active";

/// Identity of an instance as it appears in addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub module_type: String,
    pub id: i32,
}

impl InstanceKey {
    pub fn new(module_type: impl Into<String>, id: i32) -> Self {
        Self {
            module_type: module_type.into(),
            id,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.module_type, self.id)
    }
}

/// A readable member sampled periodically and sent to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub name: String,
}

pub struct ModuleInstance {
    key: InstanceKey,
    address: String,
    active: bool,
    descriptor: Arc<ModuleDescriptor>,
    module: Box<dyn Module>,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    connections: Connections,
    since_output: Duration,
}

impl ModuleInstance {
    fn new(id: i32, descriptor: Arc<ModuleDescriptor>, module: Box<dyn Module>) -> Self {
        let key = InstanceKey::new(descriptor.type_name.clone(), id);
        let inputs = descriptor
            .inputs
            .iter()
            .map(|spec| InputBinding::new(spec.name.clone(), spec.kind, spec.range))
            .collect();
        let outputs = descriptor
            .outputs
            .iter()
            .map(|name| OutputBinding { name: name.clone() })
            .collect();

        Self {
            address: key.to_string(),
            key,
            active: true,
            descriptor,
            module,
            inputs,
            outputs,
            connections: Connections::new(),
            since_output: Duration::ZERO,
        }
    }

    pub fn id(&self) -> i32 {
        self.key.id
    }

    pub fn module_type(&self) -> &str {
        &self.key.module_type
    }

    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// `/{module_type}/{id}`
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            tracing::debug!(instance = %self.address, active, "instance activity changed");
        }
        self.active = active;
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&InputBinding> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut Connections {
        &mut self.connections
    }

    pub(crate) fn module_mut(&mut self) -> &mut dyn Module {
        self.module.as_mut()
    }

    /// Reads a member straight from the module.
    pub fn get(&self, member: &str) -> Option<Value> {
        if member == ACTIVE_MEMBER {
            return Some(Value::Bool(self.active));
        }
        self.module.get(member)
    }

    /// Writes a member the way wire messages and patch cables do: inputs only
    /// take a new target (applied on the next tick), plain properties are
    /// set immediately.
    pub fn write(&mut self, member: &str, value: &Value) -> Result<()> {
        if let Some(input) = self.inputs.iter_mut().find(|input| input.name == member) {
            let voltage = value.as_voltage().ok_or_else(|| VrackError::TypeMismatch {
                target: member.to_string(),
                expected: "voltage",
                found: value.label(),
            })?;
            input.set_target(voltage);
            return Ok(());
        }

        if let Some(property) = self.descriptor.property(member) {
            if property.access.writable() {
                let value = coerce_for(member, value, property.kind)?;
                if !self.module.set(member, value) {
                    tracing::warn!(instance = %self.address, member, "module refused declared property");
                }
                return Ok(());
            }
        }

        if member == ACTIVE_MEMBER {
            let voltage = value.as_voltage().ok_or_else(|| VrackError::TypeMismatch {
                target: member.to_string(),
                expected: "bool",
                found: value.label(),
            })?;
            self.set_active(voltage > 0.0);
            return Ok(());
        }

        Err(VrackError::UnknownAddress(format!("{}/{member}", self.address)))
    }

    /// Smooths and maps every input, then pushes the results into the module.
    pub fn condition_inputs(&mut self) {
        for input in &mut self.inputs {
            let mapped = input.condition();
            match Value::Float(mapped).coerce(input.kind) {
                Some(value) => {
                    self.module.set(&input.name, value);
                }
                None => tracing::warn!(
                    instance = %self.address,
                    input = %input.name,
                    "input kind cannot carry a voltage"
                ),
            }
        }
    }

    /// Accumulates `delta` and, once `interval` has elapsed, returns the
    /// current value of every output.
    pub fn sample_outputs(&mut self, delta: Duration, interval: Duration) -> Vec<(String, Value)> {
        self.since_output += delta;
        if self.since_output < interval || self.outputs.is_empty() {
            return Vec::new();
        }
        self.since_output = Duration::ZERO;

        self.outputs
            .iter()
            .filter_map(|output| {
                let value = self.module.get(&output.name);
                if value.is_none() {
                    tracing::warn!(instance = %self.address, output = %output.name, "output has no value");
                }
                value.map(|value| (output.name.clone(), value))
            })
            .collect()
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("address", &self.address)
            .field("active", &self.active)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("connections", &self.connections)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The same type was already live under that id; nothing was built.
    Existing,
}

/// Owns every live instance and the catalog they are built from.
#[derive(Debug)]
pub struct ModuleRegistry {
    catalog: ModuleCatalog,
    instances: BTreeMap<i32, ModuleInstance>,
}

impl ModuleRegistry {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            catalog,
            instances: BTreeMap::new(),
        }
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Creates `module_type` under `id`. Creating the same type+id twice is a
    /// no-op; an id held by a different type must be removed first.
    pub fn create(&mut self, module_type: &str, id: i32) -> Result<CreateOutcome> {
        if let Some(existing) = self.instances.get(&id) {
            if existing.module_type() == module_type {
                return Ok(CreateOutcome::Existing);
            }
            return Err(VrackError::msg(format!(
                "id {id} is held by {}",
                existing.address()
            )));
        }

        let (descriptor, module) = self.catalog.instantiate(module_type)?;
        let instance = ModuleInstance::new(id, descriptor, module);
        tracing::info!(instance = %instance.address(), "created module instance");
        self.instances.insert(id, instance);
        Ok(CreateOutcome::Created)
    }

    /// Destroys the instance under `id`, if any.
    pub fn remove(&mut self, id: i32) -> Option<ModuleInstance> {
        let removed = self.instances.remove(&id);
        if let Some(instance) = &removed {
            tracing::info!(instance = %instance.address(), "removed module instance");
        }
        removed
    }

    pub fn get(&self, id: i32) -> Option<&ModuleInstance> {
        self.instances.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut ModuleInstance> {
        self.instances.get_mut(&id)
    }

    /// Looks an instance up by its full key, so a reused id under another
    /// type never matches.
    pub fn get_keyed_mut(&mut self, key: &InstanceKey) -> Option<&mut ModuleInstance> {
        self.instances
            .get_mut(&key.id)
            .filter(|instance| instance.module_type() == key.module_type)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.instances.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleInstance> {
        self.instances.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ModuleInstance> {
        self.instances.values_mut()
    }
}
