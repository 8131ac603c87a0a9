//! Signal conditioning for module inputs: exponential smoothing toward the
//! last received value followed by a (optionally curved) range mapping.

use serde::{Deserialize, Serialize};

use crate::module::PropertyKind;

/// Distance below which smoothing treats an input as converged.
pub const EPSILON: f32 = 1e-4;

/// Describes how a raw control voltage is shaped before it reaches a module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSpec {
    pub min_input: f32,
    pub max_input: f32,
    pub min_output: f32,
    pub max_output: f32,
    pub exponent: f32,
    /// Number of ticks' worth of inertia; 1 jumps straight to the target.
    pub smoothing: f32,
    pub clamp: bool,
}

impl Default for RangeSpec {
    fn default() -> Self {
        Self {
            min_input: 0.0,
            max_input: 10.0,
            min_output: 0.0,
            max_output: 10.0,
            exponent: 1.0,
            smoothing: 3.0,
            clamp: false,
        }
    }
}

impl RangeSpec {
    pub fn new(min_input: f32, max_input: f32, min_output: f32, max_output: f32) -> Self {
        Self {
            min_input,
            max_input,
            min_output,
            max_output,
            ..Self::default()
        }
    }

    pub fn with_exponent(mut self, exponent: f32) -> Self {
        self.exponent = exponent;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn clamped(mut self) -> Self {
        self.clamp = true;
        self
    }

    /// Maps an already smoothed value into the output range.
    pub fn apply(&self, value: f32) -> f32 {
        let mapped = map_exp(
            value,
            self.min_input,
            self.max_input,
            self.min_output,
            self.max_output,
            self.exponent,
        );
        if self.clamp {
            clamp_between(mapped, self.min_output, self.max_output)
        } else {
            mapped
        }
    }

    /// Advances `current` one tick toward `target`. Snaps once within
    /// [`EPSILON`] or once a step is too small to move `current` at all,
    /// which happens first for large magnitudes.
    pub fn smooth(&self, current: f32, target: f32) -> f32 {
        let distance = target - current;
        if distance.abs() <= EPSILON {
            return target;
        }
        let next = current + distance / self.smoothing.max(1.0);
        if next == current {
            target
        } else {
            next
        }
    }
}

/// Linearly rescales `value` from `[min_in, max_in]` to `[min_out, max_out]`.
pub fn map(value: f32, min_in: f32, max_in: f32, min_out: f32, max_out: f32) -> f32 {
    let span = max_in - min_in;
    if span == 0.0 {
        return min_out;
    }
    (value - min_in) / span * (max_out - min_out) + min_out
}

/// Maps linearly, then bends the result with a sign-preserving power curve
/// that still hits both output endpoints.
pub fn map_exp(
    value: f32,
    min_in: f32,
    max_in: f32,
    min_out: f32,
    max_out: f32,
    exponent: f32,
) -> f32 {
    let linear = map(value, min_in, max_in, min_out, max_out);
    if exponent == 1.0 {
        return linear;
    }
    let low = signed_pow(min_out, exponent);
    let high = signed_pow(max_out, exponent);
    if low == high || !low.is_finite() || !high.is_finite() {
        return linear;
    }
    map(signed_pow(linear, exponent), low, high, min_out, max_out)
}

fn signed_pow(value: f32, exponent: f32) -> f32 {
    value.signum() * value.abs().powf(exponent)
}

/// Clamps into a range given in either order.
pub fn clamp_between(value: f32, a: f32, b: f32) -> f32 {
    value.clamp(a.min(b), a.max(b))
}

/// A module input together with its conditioning state.
///
/// `target` changes as soon as a value arrives; `current` only moves in
/// [`InputBinding::condition`], once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub name: String,
    pub kind: PropertyKind,
    pub range: RangeSpec,
    current: f32,
    target: f32,
}

impl InputBinding {
    pub fn new(name: impl Into<String>, kind: PropertyKind, range: RangeSpec) -> Self {
        Self {
            name: name.into(),
            kind,
            range,
            current: 0.0,
            target: 0.0,
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    /// Runs one smoothing step and returns the mapped value to apply.
    pub fn condition(&mut self) -> f32 {
        self.current = self.range.smooth(self.current, self.target);
        self.range.apply(self.current)
    }
}
