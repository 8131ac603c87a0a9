//! Address parsing and the memoised path → binding cache.

use std::collections::HashMap;

use crate::module::ParameterValue;
use crate::registry::{InstanceKey, ModuleInstance, ACTIVE_MEMBER};
use crate::{Result, VrackError};

pub const CONNECT_MEMBER: &str = "Connect";
pub const DISCONNECT_MEMBER: &str = "Disconnect";

/// The routing decision encoded in a message path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address<'a> {
    Add,
    Remove,
    Reset,
    Instance {
        module_type: &'a str,
        id: i32,
        member: &'a str,
    },
}

/// Parses a path; the leading `/` is optional and segments are case-sensitive.
pub fn parse(path: &str) -> Result<Address<'_>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut segments = trimmed.splitn(4, '/');
    let unknown = || VrackError::UnknownAddress(path.to_string());

    match segments.next() {
        Some("Add") => Ok(Address::Add),
        Some("Remove") => Ok(Address::Remove),
        Some("Reset") => Ok(Address::Reset),
        Some("Instance") => {
            let module_type = segments.next().filter(|s| !s.is_empty()).ok_or_else(unknown)?;
            let id = segments
                .next()
                .and_then(|s| s.parse::<i32>().ok())
                .ok_or_else(unknown)?;
            let member = segments.next().filter(|s| !s.is_empty()).ok_or_else(unknown)?;
            Ok(Address::Instance {
                module_type,
                id,
                member,
            })
        }
        _ => Err(unknown()),
    }
}

/// What a resolved member points at on its instance.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberBinding {
    Input(String),
    Property(String),
    Active,
    Parameter(String),
    /// One axis of a 3-vector parameter, addressed as `{name}X|Y|Z`.
    VectorComponent { parameter: String, index: usize },
    Query(String),
    Action(String),
}

/// `/Instance/{type}/{id}/{member}` with the id in its plain decimal form.
pub fn instance_path(owner: &InstanceKey, member: &str) -> String {
    format!("/Instance{owner}/{member}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressBinding {
    pub owner: InstanceKey,
    pub member: MemberBinding,
}

impl AddressBinding {
    /// Queries answer the sender; everything else is fire-and-forget.
    pub fn is_query(&self) -> bool {
        matches!(self.member, MemberBinding::Query(_))
    }
}

/// Resolves `member` on `instance`: declared inputs and properties first,
/// then the activity flag, then the free-form parameter surface, then
/// query and action methods.
pub fn resolve(instance: &mut ModuleInstance, member: &str) -> Option<MemberBinding> {
    let descriptor = instance.descriptor();
    if descriptor.input(member).is_some() {
        return Some(MemberBinding::Input(member.to_string()));
    }
    if descriptor
        .property(member)
        .is_some_and(|property| property.access.writable())
    {
        return Some(MemberBinding::Property(member.to_string()));
    }
    if member == ACTIVE_MEMBER {
        return Some(MemberBinding::Active);
    }
    let is_query = descriptor.has_query(member);
    let is_action = descriptor.has_action(member);

    if let Some(surface) = instance.module_mut().parameters() {
        match surface.parameter(member) {
            Some(ParameterValue::Float(_) | ParameterValue::Int(_) | ParameterValue::Bool(_)) => {
                return Some(MemberBinding::Parameter(member.to_string()));
            }
            Some(ParameterValue::Vector3(_)) => {}
            None => {
                if let Some((parameter, index)) = vector_component(member) {
                    if let Some(ParameterValue::Vector3(_)) = surface.parameter(parameter) {
                        return Some(MemberBinding::VectorComponent {
                            parameter: parameter.to_string(),
                            index,
                        });
                    }
                }
            }
        }
    }

    if is_query {
        return Some(MemberBinding::Query(member.to_string()));
    }
    if is_action {
        return Some(MemberBinding::Action(member.to_string()));
    }
    None
}

fn vector_component(member: &str) -> Option<(&str, usize)> {
    let index = match member.chars().last()? {
        'X' => 0,
        'Y' => 1,
        'Z' => 2,
        _ => return None,
    };
    let parameter = &member[..member.len() - 1];
    (!parameter.is_empty()).then_some((parameter, index))
}

/// Memoised resolutions keyed by full message path.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: HashMap<String, AddressBinding>,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&AddressBinding> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, binding: AddressBinding) {
        self.entries.insert(path.into(), binding);
    }

    /// Drops every entry owned by `owner`. Matching is on the structured key,
    /// so `/Lamp/2` never takes `/Lamp/23` entries with it.
    pub fn invalidate(&mut self, owner: &InstanceKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, binding| &binding.owner != owner);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::builtin_catalog;
    use crate::registry::ModuleRegistry;

    fn registry_with(module_type: &str, id: i32) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new(builtin_catalog());
        registry.create(module_type, id).unwrap();
        registry
    }

    #[test]
    fn parses_directives_and_instance_paths() {
        assert_eq!(parse("/Add").unwrap(), Address::Add);
        assert_eq!(parse("Remove").unwrap(), Address::Remove);
        assert_eq!(parse("/Reset").unwrap(), Address::Reset);
        assert_eq!(
            parse("/Instance/Lamp/12/Brightness").unwrap(),
            Address::Instance {
                module_type: "Lamp",
                id: 12,
                member: "Brightness"
            }
        );
    }

    #[test]
    fn id_spellings_share_one_path() {
        for path in ["/Instance/Lamp/5/Mode", "/Instance/Lamp/05/Mode", "Instance/Lamp/+5/Mode"] {
            let Address::Instance { module_type, id, member } = parse(path).unwrap() else {
                panic!("{path} is an instance path");
            };
            let key = InstanceKey::new(module_type, id);
            assert_eq!(instance_path(&key, member), "/Instance/Lamp/5/Mode");
        }
    }

    #[test]
    fn rejects_unknown_or_incomplete_paths() {
        for path in [
            "/add",
            "/Instance",
            "/Instance/Lamp",
            "/Instance/Lamp/x/Brightness",
            "/Instance/Lamp/3",
            "/Instance//3/Brightness",
            "/Instance/Lamp/3/",
            "",
        ] {
            assert!(
                matches!(parse(path), Err(VrackError::UnknownAddress(_))),
                "{path}"
            );
        }
    }

    #[test]
    fn resolves_in_declared_order() {
        let mut registry = registry_with("Lamp", 1);
        let lamp = registry.get_mut(1).unwrap();

        assert_eq!(resolve(lamp, "Brightness"), Some(MemberBinding::Input("Brightness".into())));
        assert_eq!(resolve(lamp, "Mode"), Some(MemberBinding::Property("Mode".into())));
        assert_eq!(resolve(lamp, "Active"), Some(MemberBinding::Active));
        assert_eq!(resolve(lamp, "Modes"), Some(MemberBinding::Query("Modes".into())));
        assert_eq!(resolve(lamp, "Flash"), Some(MemberBinding::Action("Flash".into())));
        assert_eq!(resolve(lamp, "Flashes"), None);
        assert_eq!(resolve(lamp, "Nope"), None);
    }

    #[test]
    fn falls_back_to_parameter_surface() {
        let mut registry = registry_with("Particles", 4);
        let particles = registry.get_mut(4).unwrap();

        assert_eq!(resolve(particles, "Intensity"), Some(MemberBinding::Input("Intensity".into())));
        assert_eq!(resolve(particles, "Size"), Some(MemberBinding::Parameter("Size".into())));
        assert_eq!(resolve(particles, "Emit"), Some(MemberBinding::Parameter("Emit".into())));
        assert_eq!(
            resolve(particles, "OriginY"),
            Some(MemberBinding::VectorComponent {
                parameter: "Origin".into(),
                index: 1
            })
        );
        assert_eq!(resolve(particles, "Origin"), None);
        assert_eq!(resolve(particles, "SizeX"), None);
        assert_eq!(resolve(particles, "X"), None);
    }

    #[test]
    fn invalidation_uses_exact_owner() {
        let mut cache = AddressCache::new();
        let bind = |id| AddressBinding {
            owner: InstanceKey::new("Lamp", id),
            member: MemberBinding::Active,
        };
        cache.insert("/Instance/Lamp/2/Active", bind(2));
        cache.insert("/Instance/Lamp/23/Active", bind(23));

        assert_eq!(cache.invalidate(&InstanceKey::new("Lamp", 2)), 1);
        assert!(!cache.contains("/Instance/Lamp/2/Active"));
        assert!(cache.contains("/Instance/Lamp/23/Active"));
    }

    #[test]
    fn query_flag() {
        let binding = AddressBinding {
            owner: InstanceKey::new("Lamp", 1),
            member: MemberBinding::Query("Modes".into()),
        };
        assert!(binding.is_query());
    }
}
