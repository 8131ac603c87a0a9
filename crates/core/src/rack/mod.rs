//! The rack: every live instance, the address cache and the outbound queue,
//! driven one message and one tick at a time by a single owner.

use std::collections::VecDeque;
use std::time::Duration;

use crate::address::{self, Address, AddressBinding, AddressCache, MemberBinding};
use crate::catalog::ModuleCatalog;
use crate::graph::ConnectionTarget;
use crate::module::{coerce_for, ParameterValue, PropertyKind, Value};
use crate::osc::{Argument, Message};
use crate::registry::{
    CreateOutcome, InstanceKey, ModuleInstance, ModuleRegistry, ACTIVE_MEMBER,
};
use crate::{Result, VrackError};

/// Default time between two output samples of an instance.
pub const DEFAULT_OUTPUT_INTERVAL: Duration = Duration::from_millis(10);

/// Something the rack wants sent to every peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Periodic output value, addressed `/Instance/{type}/{id}/{output}`.
    Output { address: String, value: Value },
    /// Answer to a query method, addressed like the query itself.
    QueryResponse { address: String, values: Vec<String> },
    /// Asks the controller to resend the cables of a freshly created instance.
    QueryConnections { instance: String },
}

#[derive(Debug)]
pub struct Rack {
    registry: ModuleRegistry,
    bindings: AddressCache,
    outbox: VecDeque<Outbound>,
    output_interval: Duration,
}

impl Rack {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            registry: ModuleRegistry::new(catalog),
            bindings: AddressCache::new(),
            outbox: VecDeque::new(),
            output_interval: DEFAULT_OUTPUT_INTERVAL,
        }
    }

    pub fn with_output_interval(mut self, interval: Duration) -> Self {
        self.output_interval = interval;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn bindings(&self) -> &AddressCache {
        &self.bindings
    }

    pub fn instance(&self, id: i32) -> Option<&ModuleInstance> {
        self.registry.get(id)
    }

    /// Routes one decoded message. Errors concern that message only.
    pub fn handle(&mut self, message: &Message) -> Result<()> {
        match address::parse(&message.path)? {
            Address::Add => {
                let (module_type, id) = directive_args(message)?;
                self.create(&module_type, id).map(|_| ())
            }
            Address::Remove => {
                let id = int_arg(message, 1)?;
                self.remove(id);
                Ok(())
            }
            Address::Reset => {
                let (module_type, id) = directive_args(message)?;
                self.reset(&module_type, id).map(|_| ())
            }
            Address::Instance {
                module_type,
                id,
                member,
            } => self.handle_instance(message, InstanceKey::new(module_type, id), member),
        }
    }

    /// Creates an instance and asks the controller for its existing cables.
    /// An id held by another type is freed first.
    pub fn create(&mut self, module_type: &str, id: i32) -> Result<CreateOutcome> {
        if !self.registry.catalog().contains(module_type) {
            return Err(VrackError::UnknownModuleType(module_type.to_string()));
        }
        if self
            .registry
            .get(id)
            .is_some_and(|existing| existing.module_type() != module_type)
        {
            self.remove(id);
        }

        let outcome = self.registry.create(module_type, id)?;
        if outcome == CreateOutcome::Created {
            self.outbox.push_back(Outbound::QueryConnections {
                instance: InstanceKey::new(module_type, id).to_string(),
            });
        }
        Ok(outcome)
    }

    /// Destroys an instance along with every cached address and every cable
    /// that refers to it. Returns `false` if nothing was live under `id`.
    pub fn remove(&mut self, id: i32) -> bool {
        let Some(instance) = self.registry.remove(id) else {
            tracing::debug!(id, "remove for missing instance ignored");
            return false;
        };

        let stale = self.bindings.invalidate(instance.key());
        let mut cables = 0;
        for other in self.registry.iter_mut() {
            cables += other
                .connections_mut()
                .retain_targets(|target| target.instance != id);
        }
        tracing::debug!(instance = %instance.address(), stale, cables, "purged references");
        true
    }

    pub fn reset(&mut self, module_type: &str, id: i32) -> Result<CreateOutcome> {
        self.remove(id);
        self.create(module_type, id)
    }

    /// Patches `source` on `source_id` into `target` on `target_id`.
    /// Returns `false` if the cable already existed.
    pub fn connect(&mut self, source_id: i32, source: &str, target_id: i32, target: &str) -> Result<bool> {
        let target_instance = self
            .registry
            .get(target_id)
            .ok_or_else(|| VrackError::msg(format!("connection target {target_id} is not live")))?;
        if !target_instance.descriptor().is_writable(target) {
            return Err(VrackError::msg(format!(
                "`{target}` on {} cannot take a cable",
                target_instance.address()
            )));
        }

        let source_instance = self
            .registry
            .get_mut(source_id)
            .ok_or_else(|| VrackError::msg(format!("connection source {source_id} is not live")))?;
        if !source_instance.descriptor().is_readable(source) {
            return Err(VrackError::msg(format!(
                "`{source}` on {} cannot feed a cable",
                source_instance.address()
            )));
        }

        let added = source_instance
            .connections_mut()
            .connect(source, ConnectionTarget::new(target_id, target));
        if added {
            tracing::info!(
                instance = %source_instance.address(),
                source,
                target_id,
                target,
                "connected"
            );
        }
        Ok(added)
    }

    /// Removes a cable. Returns `false` if there was no such cable.
    pub fn disconnect(&mut self, source_id: i32, source: &str, target_id: i32, target: &str) -> bool {
        let Some(source_instance) = self.registry.get_mut(source_id) else {
            return false;
        };
        let removed = source_instance
            .connections_mut()
            .disconnect(source, &ConnectionTarget::new(target_id, target));
        if removed {
            tracing::info!(
                instance = %source_instance.address(),
                source,
                target_id,
                target,
                "disconnected"
            );
        }
        removed
    }

    /// Advances the rack by one frame: condition every input, propagate every
    /// cable, then sample outputs. Outputs therefore always reflect a fully
    /// updated tick.
    pub fn tick(&mut self, delta: Duration) {
        for instance in self.registry.iter_mut().filter(|i| i.is_active()) {
            instance.condition_inputs();
        }

        self.propagate();

        for instance in self.registry.iter_mut().filter(|i| i.is_active()) {
            for (name, value) in instance.sample_outputs(delta, self.output_interval) {
                self.outbox.push_back(Outbound::Output {
                    address: address::instance_path(instance.key(), &name),
                    value,
                });
            }
        }
    }

    /// Every source is read before any target is written.
    fn propagate(&mut self) {
        let mut writes: Vec<(ConnectionTarget, Value)> = Vec::new();
        for instance in self.registry.iter().filter(|i| i.is_active()) {
            for (source, targets) in instance.connections().iter() {
                let Some(value) = instance.get(source) else {
                    continue;
                };
                writes.extend(targets.iter().map(|target| (target.clone(), value.clone())));
            }
        }

        for (target, value) in writes {
            let Some(instance) = self.registry.get_mut(target.instance) else {
                continue;
            };
            if !instance.is_active() {
                continue;
            }
            if let Err(err) = instance.write(&target.member, &value) {
                tracing::debug!(%err, "cable write skipped");
            }
        }
    }

    /// Takes every queued outbound message.
    pub fn drain_outbox(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.outbox.drain(..)
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    fn handle_instance(&mut self, message: &Message, key: InstanceKey, member: &str) -> Result<()> {
        self.ensure_instance(&key, &message.path)?;

        if member == address::CONNECT_MEMBER || member == address::DISCONNECT_MEMBER {
            let source = str_arg(message, 0)?;
            let target_id = int_arg(message, 1)?;
            let target = str_arg(message, 2)?;
            if member == address::CONNECT_MEMBER {
                self.connect(key.id, source, target_id, target)?;
            } else {
                self.disconnect(key.id, source, target_id, target);
            }
            return Ok(());
        }

        // Spellings such as `05` or `+5` share one entry.
        let path = address::instance_path(&key, member);
        if !self.bindings.contains(&path) {
            let instance = self
                .registry
                .get_keyed_mut(&key)
                .ok_or_else(|| VrackError::UnknownAddress(message.path.clone()))?;
            let member = address::resolve(instance, member)
                .ok_or_else(|| VrackError::UnknownAddress(message.path.clone()))?;
            self.bindings
                .insert(path.clone(), AddressBinding { owner: key, member });
        }

        let binding = self
            .bindings
            .get(&path)
            .ok_or_else(|| VrackError::UnknownAddress(message.path.clone()))?;
        invoke(&mut self.registry, &mut self.outbox, binding, message)
    }

    /// Looks up or implicitly creates the instance an address refers to.
    fn ensure_instance(&mut self, key: &InstanceKey, path: &str) -> Result<()> {
        match self.registry.get(key.id) {
            Some(instance) if instance.module_type() == key.module_type => Ok(()),
            Some(_) => Err(VrackError::UnknownAddress(path.to_string())),
            None => self.create(&key.module_type, key.id).map(|_| ()),
        }
    }
}

fn invoke(
    registry: &mut ModuleRegistry,
    outbox: &mut VecDeque<Outbound>,
    binding: &AddressBinding,
    message: &Message,
) -> Result<()> {
    // Bindings are purged together with their owner, so this lookup failing
    // would mean the cache and registry disagree.
    let instance = registry
        .get_keyed_mut(&binding.owner)
        .ok_or_else(|| VrackError::UnknownAddress(message.path.clone()))?;

    match &binding.member {
        MemberBinding::Input(name) | MemberBinding::Property(name) => {
            instance.write(name, &value_arg(message)?)
        }
        MemberBinding::Active => instance.write(ACTIVE_MEMBER, &value_arg(message)?),
        MemberBinding::Parameter(name) => set_parameter(instance, name, &value_arg(message)?),
        MemberBinding::VectorComponent { parameter, index } => {
            set_vector_component(instance, parameter, *index, &value_arg(message)?)
        }
        MemberBinding::Query(name) => {
            let Some(values) = instance.module_mut().query(name) else {
                tracing::warn!(instance = %instance.address(), query = %name, "module left declared query unanswered");
                return Ok(());
            };
            outbox.push_back(Outbound::QueryResponse {
                address: address::instance_path(instance.key(), name),
                values,
            });
            Ok(())
        }
        MemberBinding::Action(name) => {
            if !instance.module_mut().act(name, message.args.last()) {
                tracing::warn!(instance = %instance.address(), action = %name, "module ignored declared action");
            }
            Ok(())
        }
    }
}

fn set_parameter(instance: &mut ModuleInstance, name: &str, value: &Value) -> Result<()> {
    let surface = instance
        .module_mut()
        .parameters()
        .ok_or_else(|| VrackError::msg("module has no parameter surface"))?;

    let kind = match surface.parameter(name) {
        Some(ParameterValue::Float(_)) => PropertyKind::Float,
        Some(ParameterValue::Int(_)) => PropertyKind::Int,
        Some(ParameterValue::Bool(_)) => PropertyKind::Bool,
        _ => return Err(VrackError::UnknownAddress(name.to_string())),
    };
    let next = match coerce_for(name, value, kind)? {
        Value::Float(v) => ParameterValue::Float(v),
        Value::Int(v) => ParameterValue::Int(v),
        Value::Bool(v) => ParameterValue::Bool(v),
        Value::Str(_) => {
            return Err(VrackError::TypeMismatch {
                target: name.to_string(),
                expected: kind.name(),
                found: "string",
            })
        }
    };
    surface.set_parameter(name, next);
    Ok(())
}

fn set_vector_component(
    instance: &mut ModuleInstance,
    parameter: &str,
    index: usize,
    value: &Value,
) -> Result<()> {
    let surface = instance
        .module_mut()
        .parameters()
        .ok_or_else(|| VrackError::msg("module has no parameter surface"))?;
    let Some(ParameterValue::Vector3(mut vector)) = surface.parameter(parameter) else {
        return Err(VrackError::UnknownAddress(parameter.to_string()));
    };
    let component = value.as_voltage().ok_or_else(|| VrackError::TypeMismatch {
        target: parameter.to_string(),
        expected: "float",
        found: value.label(),
    })?;
    vector[index] = component;
    surface.set_parameter(parameter, ParameterValue::Vector3(vector));
    Ok(())
}

fn value_arg(message: &Message) -> Result<Value> {
    let arg = message
        .arg(0)
        .ok_or_else(|| VrackError::malformed(format!("`{}` carries no value", message.path)))?;
    Value::from_argument(arg).ok_or_else(|| VrackError::TypeMismatch {
        target: message.path.clone(),
        expected: "value",
        found: arg.kind_name(),
    })
}

fn int_arg(message: &Message, index: usize) -> Result<i32> {
    message
        .arg(index)
        .and_then(Argument::as_i32)
        .ok_or_else(|| {
            VrackError::malformed(format!("`{}` needs an int at argument {index}", message.path))
        })
}

fn str_arg(message: &Message, index: usize) -> Result<&str> {
    message
        .arg(index)
        .and_then(Argument::as_str)
        .ok_or_else(|| {
            VrackError::malformed(format!("`{}` needs a string at argument {index}", message.path))
        })
}

fn directive_args(message: &Message) -> Result<(String, i32)> {
    Ok((str_arg(message, 0)?.to_string(), int_arg(message, 1)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Access, Module, ModuleDescriptor};
    use crate::modules::builtin_catalog;

    fn rack() -> Rack {
        Rack::new(builtin_catalog())
    }

    fn msg(path: &str, args: Vec<Argument>) -> Message {
        Message::new(path, args)
    }

    fn s(text: &str) -> Argument {
        Argument::Str(text.to_string())
    }

    fn add(rack: &mut Rack, module_type: &str, id: i32) {
        rack.handle(&msg("/Add", vec![s(module_type), Argument::Int(id)]))
            .unwrap();
    }

    fn cable(rack: &mut Rack, verb: &str, from: (&str, i32, &str), to: (i32, &str)) -> Result<()> {
        rack.handle(&msg(
            &format!("/Instance/{}/{}/{verb}", from.0, from.1),
            vec![s(from.2), Argument::Int(to.0), s(to.1)],
        ))
    }

    fn level(rack: &Rack, id: i32) -> f32 {
        match rack.instance(id).and_then(|i| i.get("Level")) {
            Some(Value::Float(v)) => v,
            other => panic!("no level on {id}: {other:?}"),
        }
    }

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn end_to_end_add_set_remove() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 5);
        assert_eq!(rack.registry().ids(), [5]);
        assert_eq!(rack.instance(5).unwrap().module_type(), "Lamp");

        rack.handle(&msg("/Instance/Lamp/5/Brightness", vec![Argument::Float(7.5)]))
            .unwrap();
        assert_eq!(rack.instance(5).unwrap().get("Brightness"), Some(Value::Float(0.0)));
        assert!(rack.bindings().contains("/Instance/Lamp/5/Brightness"));

        rack.tick(FRAME);
        // default smoothing of 3 over the identity range
        assert_eq!(rack.instance(5).unwrap().get("Brightness"), Some(Value::Float(2.5)));

        rack.handle(&msg("/Remove", vec![s("Lamp"), Argument::Int(5)]))
            .unwrap();
        assert!(rack.registry().is_empty());
        assert!(rack.bindings().is_empty());
    }

    #[test]
    fn duplicate_add_builds_one_instance() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 5);
        add(&mut rack, "Lamp", 5);
        assert_eq!(rack.registry().len(), 1);

        let queries: Vec<_> = rack.drain_outbox().collect();
        assert_eq!(
            queries,
            vec![Outbound::QueryConnections {
                instance: "/Lamp/5".into()
            }]
        );
    }

    #[test]
    fn add_of_unknown_type_is_reported_and_ignored() {
        let mut rack = rack();
        let err = rack
            .handle(&msg("/Add", vec![s("Ghost"), Argument::Int(1)]))
            .unwrap_err();
        assert!(matches!(err, VrackError::UnknownModuleType(_)));
        assert!(rack.registry().is_empty());
        assert_eq!(rack.outbox_len(), 0);
    }

    #[test]
    fn add_with_other_type_replaces_instance() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        rack.handle(&msg("/Instance/Lamp/1/Mode", vec![Argument::Int(1)]))
            .unwrap();
        add(&mut rack, "Drone", 1);

        assert_eq!(rack.instance(1).unwrap().module_type(), "Drone");
        assert!(rack.bindings().is_empty());
    }

    #[test]
    fn remove_of_missing_instance_is_a_no_op() {
        let mut rack = rack();
        rack.handle(&msg("/Remove", vec![s("Lamp"), Argument::Int(9)]))
            .unwrap();
        add(&mut rack, "Lamp", 9);
        rack.handle(&msg("/Remove", vec![s("Lamp"), Argument::Int(9)]))
            .unwrap();
        rack.handle(&msg("/Remove", vec![s("Lamp"), Argument::Int(9)]))
            .unwrap();
        assert!(rack.registry().is_empty());
    }

    #[test]
    fn instance_address_creates_implicitly_once() {
        let mut rack = rack();
        rack.handle(&msg("/Instance/Lamp/3/Brightness", vec![Argument::Float(1.0)]))
            .unwrap();
        add(&mut rack, "Lamp", 3);

        assert_eq!(rack.registry().len(), 1);
        assert_eq!(rack.instance(3).unwrap().input("Brightness").unwrap().target(), 1.0);
        assert_eq!(rack.drain_outbox().count(), 1);
    }

    #[test]
    fn instance_address_with_wrong_type_is_dropped() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 3);
        let err = rack
            .handle(&msg("/Instance/Drone/3/X", vec![Argument::Float(1.0)]))
            .unwrap_err();
        assert!(matches!(err, VrackError::UnknownAddress(_)));
    }

    #[test]
    fn removal_invalidates_cached_bindings() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 2);
        add(&mut rack, "Lamp", 23);
        for id in [2, 23] {
            rack.handle(&msg(
                &format!("/Instance/Lamp/{id}/Mode"),
                vec![Argument::Int(1)],
            ))
            .unwrap();
        }

        rack.remove(2);
        assert!(!rack.bindings().contains("/Instance/Lamp/2/Mode"));
        assert!(rack.bindings().contains("/Instance/Lamp/23/Mode"));

        // the next use resolves afresh against a new instance
        rack.handle(&msg("/Instance/Lamp/2/Mode", vec![Argument::Int(2)]))
            .unwrap();
        assert_eq!(rack.instance(2).unwrap().get("Mode"), Some(Value::Int(2)));
    }

    #[test]
    fn reset_rebuilds_instance_from_scratch() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 4);
        rack.handle(&msg("/Instance/Lamp/4/Mode", vec![Argument::Int(2)]))
            .unwrap();
        rack.drain_outbox().for_each(drop);

        rack.handle(&msg("/Reset", vec![s("Lamp"), Argument::Int(4)]))
            .unwrap();
        assert_eq!(rack.instance(4).unwrap().get("Mode"), Some(Value::Int(0)));
        assert!(rack.bindings().is_empty());
        assert_eq!(rack.drain_outbox().count(), 1);
    }

    #[test]
    fn unknown_member_is_dropped_without_caching() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        let err = rack
            .handle(&msg("/Instance/Lamp/1/Wattage", vec![Argument::Float(1.0)]))
            .unwrap_err();
        assert!(matches!(err, VrackError::UnknownAddress(_)));
        assert!(rack.bindings().is_empty());
    }

    #[test]
    fn mismatched_value_leaves_property_untouched() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        rack.handle(&msg("/Instance/Lamp/1/Mode", vec![Argument::Int(1)]))
            .unwrap();
        assert!(rack
            .handle(&msg("/Instance/Lamp/1/Mode", vec![s("Pulse")]))
            .is_err());
        assert!(rack
            .handle(&msg("/Instance/Lamp/1/Brightness", vec![Argument::Blob(vec![1])]))
            .is_err());
        assert_eq!(rack.instance(1).unwrap().get("Mode"), Some(Value::Int(1)));
        assert_eq!(rack.instance(1).unwrap().input("Brightness").unwrap().target(), 0.0);
    }

    #[test]
    fn fan_out_reaches_every_target_after_one_tick() {
        let mut rack = rack();
        for id in 1..=4 {
            add(&mut rack, "Lamp", id);
        }
        for id in 2..=4 {
            cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (id, "Brightness")).unwrap();
        }
        assert_eq!(rack.instance(1).unwrap().connections().edge_count(), 3);

        rack.handle(&msg("/Instance/Lamp/1/Brightness", vec![Argument::Float(6.0)]))
            .unwrap();
        for id in 2..=4 {
            assert_eq!(rack.instance(id).unwrap().input("Brightness").unwrap().target(), 0.0);
        }

        rack.tick(FRAME);
        let source = level(&rack, 1);
        assert!(source > 0.0);
        for id in 2..=4 {
            assert_eq!(rack.instance(id).unwrap().input("Brightness").unwrap().target(), source);
        }
    }

    #[test]
    fn connect_is_idempotent_and_disconnect_cleans_up() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        add(&mut rack, "Lamp", 2);

        cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (2, "Hue")).unwrap();
        cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (2, "Hue")).unwrap();
        assert_eq!(rack.instance(1).unwrap().connections().edge_count(), 1);

        cable(&mut rack, "Disconnect", ("Lamp", 1, "Level"), (2, "Hue")).unwrap();
        assert!(rack.instance(1).unwrap().connections().is_empty());
        assert!(rack.bindings().is_empty());
    }

    #[test]
    fn connect_validates_both_ends() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        add(&mut rack, "Lamp", 2);

        assert!(cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (9, "Hue")).is_err());
        assert!(cable(&mut rack, "Connect", ("Lamp", 1, "Nope"), (2, "Hue")).is_err());
        assert!(cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (2, "Level")).is_err());
        assert!(rack.instance(1).unwrap().connections().is_empty());
    }

    #[test]
    fn removing_a_target_drops_cables_into_it() {
        let mut rack = rack();
        for id in 1..=3 {
            add(&mut rack, "Lamp", id);
        }
        cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (2, "Hue")).unwrap();
        cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (3, "Hue")).unwrap();

        rack.remove(2);
        let targets = rack.instance(1).unwrap().connections().targets("Level").to_vec();
        assert_eq!(targets, vec![ConnectionTarget::new(3, "Hue")]);
    }

    #[test]
    fn inactive_instances_freeze() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        add(&mut rack, "Lamp", 2);
        cable(&mut rack, "Connect", ("Lamp", 1, "Level"), (2, "Brightness")).unwrap();

        rack.handle(&msg("/Instance/Lamp/2/Active", vec![Argument::Float(0.0)]))
            .unwrap();
        rack.handle(&msg("/Instance/Lamp/1/Brightness", vec![Argument::Float(9.0)]))
            .unwrap();
        rack.tick(FRAME);
        assert_eq!(rack.instance(2).unwrap().input("Brightness").unwrap().target(), 0.0);

        rack.handle(&msg("/Instance/Lamp/1/Active", vec![Argument::Float(0.0)]))
            .unwrap();
        let before = level(&rack, 1);
        rack.tick(FRAME);
        assert_eq!(level(&rack, 1), before);
    }

    #[test]
    fn outputs_are_pushed_on_interval_for_active_instances() {
        let mut rack = rack().with_output_interval(Duration::from_millis(20));
        add(&mut rack, "Lamp", 7);
        rack.drain_outbox().for_each(drop);

        rack.tick(Duration::from_millis(10));
        assert_eq!(rack.outbox_len(), 0);
        rack.tick(Duration::from_millis(10));
        let sent: Vec<_> = rack.drain_outbox().collect();
        assert_eq!(
            sent,
            vec![Outbound::Output {
                address: "/Instance/Lamp/7/Level".into(),
                value: Value::Float(0.0)
            }]
        );

        rack.handle(&msg("/Instance/Lamp/7/Active", vec![Argument::Int(0)]))
            .unwrap();
        rack.tick(Duration::from_millis(50));
        assert_eq!(rack.outbox_len(), 0);
    }

    #[test]
    fn query_answers_on_its_own_address() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        rack.drain_outbox().for_each(drop);

        rack.handle(&msg("/Instance/Lamp/1/Modes", vec![])).unwrap();
        let sent: Vec<_> = rack.drain_outbox().collect();
        assert_eq!(
            sent,
            vec![Outbound::QueryResponse {
                address: "/Instance/Lamp/1/Modes".into(),
                values: vec!["Steady".into(), "Strobe".into(), "Pulse".into()],
            }]
        );
        assert!(rack.bindings().get("/Instance/Lamp/1/Modes").unwrap().is_query());
    }

    #[test]
    fn action_runs_without_response() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        rack.drain_outbox().for_each(drop);

        rack.handle(&msg("/Instance/Lamp/1/Flash", vec![Argument::Int(1)]))
            .unwrap();
        rack.handle(&msg("/Instance/Lamp/1/Flash", vec![])).unwrap();
        assert_eq!(rack.instance(1).unwrap().get("Flashes"), Some(Value::Int(2)));
        assert_eq!(rack.outbox_len(), 0);
    }

    #[test]
    fn parameter_surface_accepts_scalars_and_vector_components() {
        let mut rack = rack();
        add(&mut rack, "Particles", 1);

        rack.handle(&msg("/Instance/Particles/1/Count", vec![Argument::Float(12.6)]))
            .unwrap();
        rack.handle(&msg("/Instance/Particles/1/Emit", vec![Argument::Float(0.0)]))
            .unwrap();
        rack.handle(&msg("/Instance/Particles/1/OriginZ", vec![Argument::Float(-2.0)]))
            .unwrap();

        let mut registry = rack.registry;
        let surface = registry.get_mut(1).unwrap().module_mut().parameters().unwrap();
        assert_eq!(surface.parameter("Count"), Some(ParameterValue::Int(13)));
        assert_eq!(surface.parameter("Emit"), Some(ParameterValue::Bool(false)));
        assert_eq!(
            surface.parameter("Origin"),
            Some(ParameterValue::Vector3([0.0, 0.0, -2.0]))
        );
    }

    #[test]
    fn non_finite_values_leave_inputs_recoverable() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 1);
        let brightness = |value: f32| msg("/Instance/Lamp/1/Brightness", vec![Argument::Float(value)]);

        assert!(rack.handle(&brightness(f32::NAN)).is_err());
        assert!(rack.handle(&brightness(f32::INFINITY)).is_err());
        rack.tick(FRAME);
        let input = rack.instance(1).unwrap().input("Brightness").unwrap();
        assert_eq!(input.target(), 0.0);
        assert_eq!(input.current(), 0.0);

        rack.handle(&brightness(5.0)).unwrap();
        for _ in 0..100 {
            rack.tick(FRAME);
        }
        match rack.instance(1).unwrap().get("Brightness") {
            Some(Value::Float(v)) => assert!((v - 5.0).abs() < 1e-4, "brightness {v}"),
            other => panic!("unexpected brightness {other:?}"),
        }

        add(&mut rack, "Particles", 2);
        assert!(rack
            .handle(&msg("/Instance/Particles/2/Size", vec![Argument::Float(f32::NAN)]))
            .is_err());
        assert!(rack
            .handle(&msg("/Instance/Particles/2/OriginX", vec![Argument::Float(f32::NEG_INFINITY)]))
            .is_err());
        let mut registry = rack.registry;
        let surface = registry.get_mut(2).unwrap().module_mut().parameters().unwrap();
        assert_eq!(surface.parameter("Size"), Some(ParameterValue::Float(1.0)));
        assert_eq!(surface.parameter("Origin"), Some(ParameterValue::Vector3([0.0; 3])));
    }

    /// Remembers the argument of its last `Act`.
    #[derive(Default)]
    struct Recorder {
        last: Option<Value>,
    }

    impl Module for Recorder {
        fn set(&mut self, _member: &str, _value: Value) -> bool {
            false
        }

        fn get(&self, member: &str) -> Option<Value> {
            match member {
                "Last" => self.last.clone(),
                _ => None,
            }
        }

        fn act(&mut self, method: &str, argument: Option<&Argument>) -> bool {
            if method != "Act" {
                return false;
            }
            self.last = argument.and_then(Value::from_argument);
            true
        }
    }

    fn recorder_rack() -> Rack {
        let mut catalog = builtin_catalog();
        let descriptor = ModuleDescriptor::builder("Recorder")
            .property("Last", PropertyKind::Str, Access::Read)
            .query("Nothing")
            .action("Act")
            .build()
            .unwrap();
        catalog
            .register(descriptor, || Box::new(Recorder::default()))
            .unwrap();
        Rack::new(catalog)
    }

    #[test]
    fn action_receives_trailing_argument() {
        let mut rack = recorder_rack();
        add(&mut rack, "Recorder", 1);

        rack.handle(&msg("/Instance/Recorder/1/Act", vec![Argument::Int(1), s("x")]))
            .unwrap();
        assert_eq!(rack.instance(1).unwrap().get("Last"), Some(Value::Str("x".into())));

        rack.handle(&msg("/Instance/Recorder/1/Act", vec![])).unwrap();
        assert_eq!(rack.instance(1).unwrap().get("Last"), None);
    }

    #[test]
    fn unanswered_query_sends_nothing() {
        let mut rack = recorder_rack();
        add(&mut rack, "Recorder", 1);
        rack.drain_outbox().for_each(drop);

        rack.handle(&msg("/Instance/Recorder/1/Nothing", vec![])).unwrap();
        assert_eq!(rack.outbox_len(), 0);
        assert!(rack.bindings().get("/Instance/Recorder/1/Nothing").unwrap().is_query());
    }

    #[test]
    fn id_spellings_share_one_binding() {
        let mut rack = rack();
        add(&mut rack, "Lamp", 5);

        for path in [
            "/Instance/Lamp/5/Mode",
            "/Instance/Lamp/05/Mode",
            "/Instance/Lamp/+5/Mode",
            "Instance/Lamp/5/Mode",
        ] {
            rack.handle(&msg(path, vec![Argument::Int(1)])).unwrap();
        }
        assert_eq!(rack.bindings().len(), 1);
        assert!(rack.bindings().contains("/Instance/Lamp/5/Mode"));

        rack.handle(&msg("/Remove", vec![s("Lamp"), Argument::Int(5)]))
            .unwrap();
        assert!(rack.bindings().is_empty());
    }
}
