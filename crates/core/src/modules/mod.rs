//! Built-in, engine-independent module types.
//!
//! These keep only the control state a renderer would read; drawing is left
//! to whatever host embeds the rack.

use crate::catalog::ModuleCatalog;
use crate::mapping::RangeSpec;
use crate::module::{
    Access, Blackboard, Module, ModuleDescriptor, ParameterSurface, ParameterValue, PropertyKind,
    Value,
};
use crate::osc::Argument;
use crate::Result;

/// Catalog holding every built-in module type.
pub fn builtin_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    // The descriptors below are static and known to be valid.
    if let Err(err) = register_builtins(&mut catalog) {
        tracing::error!(%err, "failed to register built-in modules");
    }
    catalog
}

/// Registers the built-in module types into `catalog`.
pub fn register_builtins(catalog: &mut ModuleCatalog) -> Result<()> {
    catalog.register(Lamp::descriptor()?, || Box::new(Lamp::default()))?;
    catalog.register(Drone::descriptor()?, || Box::new(Drone::default()))?;
    catalog.register(Particles::descriptor()?, || Box::new(Particles::default()))?;
    Ok(())
}

const LAMP_MODES: [&str; 3] = ["Steady", "Strobe", "Pulse"];

/// A single light with brightness, hue and a lighting mode.
#[derive(Debug, Default)]
pub struct Lamp {
    brightness: f32,
    hue: f32,
    mode: i32,
    flashes: i32,
}

impl Lamp {
    pub fn descriptor() -> Result<ModuleDescriptor> {
        ModuleDescriptor::builder("Lamp")
            .input("Brightness", RangeSpec::default())
            .input("Hue", RangeSpec::new(0.0, 10.0, 0.0, 360.0).clamped())
            .property("Mode", PropertyKind::Int, Access::ReadWrite)
            .property("Flashes", PropertyKind::Int, Access::Read)
            .output("Level")
            .query("Modes")
            .action("Flash")
            .build()
    }
}

impl Module for Lamp {
    fn set(&mut self, member: &str, value: Value) -> bool {
        match (member, value) {
            ("Brightness", Value::Float(v)) => self.brightness = v,
            ("Hue", Value::Float(v)) => self.hue = v,
            ("Mode", Value::Int(v)) => self.mode = v.clamp(0, LAMP_MODES.len() as i32 - 1),
            _ => return false,
        }
        true
    }

    fn get(&self, member: &str) -> Option<Value> {
        let value = match member {
            "Brightness" | "Level" => Value::Float(self.brightness),
            "Hue" => Value::Float(self.hue),
            "Mode" => Value::Int(self.mode),
            "Flashes" => Value::Int(self.flashes),
            _ => return None,
        };
        Some(value)
    }

    fn query(&mut self, method: &str) -> Option<Vec<String>> {
        match method {
            "Modes" => Some(LAMP_MODES.iter().map(|mode| mode.to_string()).collect()),
            _ => None,
        }
    }

    /// `Flash` takes an optional flash count, one when absent.
    fn act(&mut self, method: &str, argument: Option<&Argument>) -> bool {
        match method {
            "Flash" => {
                let count = argument.and_then(Argument::as_i32).unwrap_or(1).max(0);
                self.flashes = self.flashes.saturating_add(count);
                true
            }
            _ => false,
        }
    }
}

/// Orbiting camera rig: an origin position plus orbit angles and distance.
#[derive(Debug)]
pub struct Drone {
    origin: [f32; 3],
    orbit: f32,
    elevation: f32,
    distance: f32,
    show_target: bool,
}

impl Default for Drone {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            orbit: 0.0,
            elevation: 0.0,
            distance: MIN_DISTANCE,
            show_target: false,
        }
    }
}

const MIN_DISTANCE: f32 = 0.1;

impl Drone {
    pub fn descriptor() -> Result<ModuleDescriptor> {
        let axis = RangeSpec::new(-5.0, 5.0, -10.0, 10.0);
        ModuleDescriptor::builder("Drone")
            .input("X", axis)
            .input("Y", axis)
            .input("Z", axis)
            .input("Orbit", RangeSpec::new(-5.0, 5.0, -180.0, 180.0).with_smoothing(1.0))
            .input("Elevation", RangeSpec::new(-5.0, 5.0, -90.0, 90.0).with_smoothing(1.0))
            .input("Distance", RangeSpec::default())
            .property("Target", PropertyKind::Bool, Access::Write)
            .output("Distance")
            .build()
    }
}

impl Module for Drone {
    fn set(&mut self, member: &str, value: Value) -> bool {
        match (member, value) {
            ("X", Value::Float(v)) => self.origin[0] = v,
            ("Y", Value::Float(v)) => self.origin[1] = v,
            ("Z", Value::Float(v)) => self.origin[2] = v,
            ("Orbit", Value::Float(v)) => self.orbit = v,
            ("Elevation", Value::Float(v)) => self.elevation = v,
            ("Distance", Value::Float(v)) => self.distance = v.max(MIN_DISTANCE),
            ("Target", Value::Bool(v)) => self.show_target = v,
            _ => return false,
        }
        true
    }

    fn get(&self, member: &str) -> Option<Value> {
        let value = match member {
            "X" => Value::Float(self.origin[0]),
            "Y" => Value::Float(self.origin[1]),
            "Z" => Value::Float(self.origin[2]),
            "Orbit" => Value::Float(self.orbit),
            "Elevation" => Value::Float(self.elevation),
            "Distance" => Value::Float(self.distance),
            "Target" => Value::Bool(self.show_target),
            _ => return None,
        };
        Some(value)
    }
}

/// Particle emitter whose effect parameters live on a free-form blackboard.
#[derive(Debug)]
pub struct Particles {
    intensity: f32,
    parameters: Blackboard,
}

impl Default for Particles {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            parameters: Blackboard::new()
                .with("Size", ParameterValue::Float(1.0))
                .with("Rate", ParameterValue::Float(10.0))
                .with("Count", ParameterValue::Int(1000))
                .with("Emit", ParameterValue::Bool(true))
                .with("Origin", ParameterValue::Vector3([0.0; 3])),
        }
    }
}

impl Particles {
    pub fn descriptor() -> Result<ModuleDescriptor> {
        ModuleDescriptor::builder("Particles")
            .input("Intensity", RangeSpec::default())
            .output("Intensity")
            .build()
    }
}

impl Module for Particles {
    fn set(&mut self, member: &str, value: Value) -> bool {
        match (member, value) {
            ("Intensity", Value::Float(v)) => {
                self.intensity = v;
                true
            }
            _ => false,
        }
    }

    fn get(&self, member: &str) -> Option<Value> {
        match member {
            "Intensity" => Some(Value::Float(self.intensity)),
            _ => None,
        }
    }

    fn parameters(&mut self) -> Option<&mut dyn ParameterSurface> {
        Some(&mut self.parameters)
    }
}
