//! The behaviour side of a rack module.
//!
//! A module type is described once by a [`ModuleDescriptor`] (its inputs,
//! plain properties, outputs and methods) and implemented by a [`Module`]
//! that the registry drives purely by member name.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mapping::RangeSpec;
use crate::osc::Argument;
use crate::{Result, VrackError};

/// Member names every instance handles itself.
pub const RESERVED_MEMBERS: [&str; 3] = ["Active", "Connect", "Disconnect"];

/// Voltage written for a `true` boolean, following the ±10 V rack convention.
pub const BOOL_HIGH: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Float,
    Int,
    Bool,
    Str,
}

impl PropertyKind {
    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::Float => "float",
            PropertyKind::Int => "int",
            PropertyKind::Bool => "bool",
            PropertyKind::Str => "string",
        }
    }
}

/// A typed property value as seen by a module.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f32),
    Int(i32),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Value::Float(_) => PropertyKind::Float,
            Value::Int(_) => PropertyKind::Int,
            Value::Bool(_) => PropertyKind::Bool,
            Value::Str(_) => PropertyKind::Str,
        }
    }

    /// Names the value in mismatch errors.
    pub fn label(&self) -> &'static str {
        match self {
            Value::Float(value) if !value.is_finite() => "non-finite float",
            other => other.kind().name(),
        }
    }

    /// Reads the value as a control voltage. NaN and infinities are not
    /// voltages.
    pub fn as_voltage(&self) -> Option<f32> {
        match self {
            Value::Float(value) => value.is_finite().then_some(*value),
            Value::Int(value) => Some(*value as f32),
            Value::Bool(value) => Some(if *value { BOOL_HIGH } else { 0.0 }),
            Value::Str(_) => None,
        }
    }

    /// Converts into `kind`: floats round to the nearest int, numbers are
    /// truthy above zero, booleans widen to 10/0. Strings only become strings.
    pub fn coerce(&self, kind: PropertyKind) -> Option<Value> {
        let value = match (self, kind) {
            (Value::Str(text), PropertyKind::Str) => Value::Str(text.clone()),
            (Value::Str(_), _) | (_, PropertyKind::Str) => return None,
            (_, PropertyKind::Float) => Value::Float(self.as_voltage()?),
            (Value::Int(value), PropertyKind::Int) => Value::Int(*value),
            (_, PropertyKind::Int) => Value::Int(round_to_i32(self.as_voltage()?)?),
            (_, PropertyKind::Bool) => Value::Bool(self.as_voltage()? > 0.0),
        };
        Some(value)
    }

    /// Builds a value from a wire argument. Blobs have no property form.
    pub fn from_argument(arg: &Argument) -> Option<Value> {
        match arg {
            Argument::Float(value) => Some(Value::Float(*value)),
            Argument::Int(value) => Some(Value::Int(*value)),
            Argument::Str(value) => Some(Value::Str(value.clone())),
            Argument::Blob(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
        }
    }
}

fn round_to_i32(value: f32) -> Option<i32> {
    let rounded = value.round();
    if rounded.is_finite() && rounded >= i32::MIN as f32 && rounded <= i32::MAX as f32 {
        Some(rounded as i32)
    } else {
        None
    }
}

/// Coerces `value` for the member `target`, reporting a mismatch as an error.
pub fn coerce_for(target: &str, value: &Value, kind: PropertyKind) -> Result<Value> {
    value.coerce(kind).ok_or_else(|| VrackError::TypeMismatch {
        target: target.to_string(),
        expected: kind.name(),
        found: value.label(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// A conditioned input: values arrive as voltages and are smoothed and
/// mapped before reaching the module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub kind: PropertyKind,
    pub range: RangeSpec,
}

/// A property written straight through to the module, without conditioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
    pub access: Access,
}

/// Static description of a module type, built once at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub type_name: String,
    pub inputs: Vec<InputSpec>,
    pub properties: Vec<PropertySpec>,
    pub outputs: Vec<String>,
    pub queries: Vec<String>,
    pub actions: Vec<String>,
}

impl ModuleDescriptor {
    pub fn builder(type_name: impl Into<String>) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder {
            descriptor: ModuleDescriptor {
                type_name: type_name.into(),
                inputs: Vec::new(),
                properties: Vec::new(),
                outputs: Vec::new(),
                queries: Vec::new(),
                actions: Vec::new(),
            },
        }
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|output| output == name)
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.queries.iter().any(|query| query == name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.iter().any(|action| action == name)
    }

    /// Whether `name` may act as the source end of a connection.
    pub fn is_readable(&self, name: &str) -> bool {
        self.has_output(name)
            || self.input(name).is_some()
            || self.property(name).is_some_and(|p| p.access.readable())
    }

    /// Whether `name` may act as the target end of a connection.
    pub fn is_writable(&self, name: &str) -> bool {
        self.input(name).is_some() || self.property(name).is_some_and(|p| p.access.writable())
    }

    fn validate(&self) -> Result<()> {
        if self.type_name.is_empty() || self.type_name.contains('/') {
            return Err(VrackError::InvalidDescriptor(format!(
                "bad type name `{}`",
                self.type_name
            )));
        }

        // Outputs may share a name with an input or property: that member is
        // then both settable and sampled.
        let mut members = HashSet::new();
        let settable = self
            .inputs
            .iter()
            .map(|input| input.name.as_str())
            .chain(self.properties.iter().map(|p| p.name.as_str()));
        let methods = self.queries.iter().chain(&self.actions).map(String::as_str);

        for name in settable.chain(methods) {
            if name.is_empty() || name.contains('/') {
                return Err(VrackError::InvalidDescriptor(format!(
                    "bad member name `{name}` on `{}`",
                    self.type_name
                )));
            }
            if RESERVED_MEMBERS.contains(&name) {
                return Err(VrackError::InvalidDescriptor(format!(
                    "`{name}` is reserved on `{}`",
                    self.type_name
                )));
            }
            if !members.insert(name) {
                return Err(VrackError::InvalidDescriptor(format!(
                    "duplicate member `{name}` on `{}`",
                    self.type_name
                )));
            }
        }

        let mut outputs = HashSet::new();
        for output in &self.outputs {
            if !outputs.insert(output.as_str()) {
                return Err(VrackError::InvalidDescriptor(format!(
                    "duplicate output `{output}` on `{}`",
                    self.type_name
                )));
            }
        }
        Ok(())
    }
}

pub struct ModuleDescriptorBuilder {
    descriptor: ModuleDescriptor,
}

impl ModuleDescriptorBuilder {
    /// Adds a float input.
    pub fn input(self, name: impl Into<String>, range: RangeSpec) -> Self {
        self.typed_input(name, PropertyKind::Float, range)
    }

    pub fn typed_input(mut self, name: impl Into<String>, kind: PropertyKind, range: RangeSpec) -> Self {
        self.descriptor.inputs.push(InputSpec {
            name: name.into(),
            kind,
            range,
        });
        self
    }

    pub fn property(mut self, name: impl Into<String>, kind: PropertyKind, access: Access) -> Self {
        self.descriptor.properties.push(PropertySpec {
            name: name.into(),
            kind,
            access,
        });
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.descriptor.outputs.push(name.into());
        self
    }

    /// Adds a zero-argument method whose string list result is sent back.
    pub fn query(mut self, name: impl Into<String>) -> Self {
        self.descriptor.queries.push(name.into());
        self
    }

    /// Adds a fire-and-forget method taking the message's trailing argument.
    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.descriptor.actions.push(name.into());
        self
    }

    pub fn build(self) -> Result<ModuleDescriptor> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }
}

/// Behaviour of one live module, addressed by member name.
///
/// Values handed to `set` are already coerced to the declared kind of the
/// member. Returning `false` from `set` or `act` means the name is unknown.
pub trait Module: Send {
    fn set(&mut self, member: &str, value: Value) -> bool;

    fn get(&self, member: &str) -> Option<Value>;

    fn query(&mut self, _method: &str) -> Option<Vec<String>> {
        None
    }

    fn act(&mut self, _method: &str, _argument: Option<&Argument>) -> bool {
        false
    }

    /// Free-form parameters resolved by name at runtime, for modules that
    /// wrap an effect graph with its own parameter table.
    fn parameters(&mut self) -> Option<&mut dyn ParameterSurface> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vector3([f32; 3]),
}

/// A dynamically named parameter table.
pub trait ParameterSurface {
    fn parameter(&self, name: &str) -> Option<ParameterValue>;

    /// Overwrites an existing parameter. Returns `false` if it is absent.
    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> bool;
}

/// Plain map-backed [`ParameterSurface`].
#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    values: BTreeMap<String, ParameterValue>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl ParameterSurface for Blackboard {
    fn parameter(&self, name: &str) -> Option<ParameterValue> {
        self.values.get(name).copied()
    }

    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> bool {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_follows_widening_rules() {
        assert_eq!(Value::Float(2.5).coerce(PropertyKind::Int), Some(Value::Int(3)));
        assert_eq!(Value::Float(-2.4).coerce(PropertyKind::Int), Some(Value::Int(-2)));
        assert_eq!(Value::Float(0.1).coerce(PropertyKind::Bool), Some(Value::Bool(true)));
        assert_eq!(Value::Float(0.0).coerce(PropertyKind::Bool), Some(Value::Bool(false)));
        assert_eq!(Value::Int(4).coerce(PropertyKind::Float), Some(Value::Float(4.0)));
        assert_eq!(Value::Bool(true).coerce(PropertyKind::Float), Some(Value::Float(10.0)));
        assert_eq!(
            Value::Str("x".into()).coerce(PropertyKind::Str),
            Some(Value::Str("x".into()))
        );
    }

    #[test]
    fn non_finite_floats_are_not_voltages() {
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert_eq!(Value::Float(value).as_voltage(), None);
            assert_eq!(Value::Float(value).coerce(PropertyKind::Float), None);
            assert_eq!(Value::Float(value).coerce(PropertyKind::Bool), None);
            assert!(coerce_for("Size", &Value::Float(value), PropertyKind::Float).is_err());
        }
    }

    #[test]
    fn unconvertible_combinations_are_rejected() {
        assert_eq!(Value::Str("1".into()).coerce(PropertyKind::Float), None);
        assert_eq!(Value::Float(1.0).coerce(PropertyKind::Str), None);
        assert_eq!(Value::Float(f32::NAN).coerce(PropertyKind::Int), None);

        let err = coerce_for("Mode", &Value::Str("a".into()), PropertyKind::Int).unwrap_err();
        assert!(format!("{err}").contains("Mode"));
    }

    #[test]
    fn builder_collects_members() {
        let descriptor = ModuleDescriptor::builder("Lamp")
            .input("Brightness", RangeSpec::default())
            .property("Mode", PropertyKind::Int, Access::ReadWrite)
            .property("Secret", PropertyKind::Int, Access::Write)
            .output("Level")
            .query("Modes")
            .action("Flash")
            .build()
            .unwrap();

        assert!(descriptor.input("Brightness").is_some());
        assert!(descriptor.is_readable("Level"));
        assert!(descriptor.is_readable("Mode"));
        assert!(!descriptor.is_readable("Secret"));
        assert!(descriptor.is_writable("Secret"));
        assert!(!descriptor.is_writable("Level"));
        assert!(descriptor.has_query("Modes"));
        assert!(descriptor.has_action("Flash"));
    }

    #[test]
    fn builder_rejects_duplicates_and_reserved_names() {
        let duplicate = ModuleDescriptor::builder("A")
            .input("X", RangeSpec::default())
            .action("X")
            .build();
        assert!(matches!(duplicate, Err(VrackError::InvalidDescriptor(_))));

        let reserved = ModuleDescriptor::builder("A")
            .property("Active", PropertyKind::Bool, Access::ReadWrite)
            .build();
        assert!(reserved.is_err());

        assert!(ModuleDescriptor::builder("A/B").build().is_err());
    }

    #[test]
    fn output_may_shadow_an_input() {
        let descriptor = ModuleDescriptor::builder("Drone")
            .input("Distance", RangeSpec::default())
            .output("Distance")
            .build();
        assert!(descriptor.is_ok());
    }

    #[test]
    fn blackboard_only_overwrites_existing_parameters() {
        let mut board = Blackboard::new().with("Size", ParameterValue::Float(1.0));
        assert!(board.set_parameter("Size", ParameterValue::Float(2.0)));
        assert!(!board.set_parameter("Missing", ParameterValue::Float(2.0)));
        assert_eq!(board.parameter("Size"), Some(ParameterValue::Float(2.0)));
    }
}
