//! Core library for the vrack OSC module server.
//!
//! A remote controller drives a rack of module instances over OSC/UDP. The
//! crate is split by concern: the wire codec (`osc`), module types and the
//! catalog they are built from (`module`, `catalog`, `modules`), live
//! instances (`registry`), address resolution (`address`), input
//! conditioning (`mapping`), patch cables (`graph`), the per-frame driver
//! (`rack`) and the UDP front end (`server`).

pub mod address;
pub mod catalog;
pub mod config;
pub mod error;
pub mod graph;
pub mod mapping;
pub mod module;
pub mod modules;
pub mod osc;
pub mod peers;
pub mod rack;
pub mod registry;
pub mod server;

pub use address::{Address, AddressBinding, AddressCache, MemberBinding};
pub use catalog::ModuleCatalog;
pub use config::{AppConfig, ServerConfig};
pub use error::{Result, VrackError};
pub use graph::{ConnectionTarget, Connections};
pub use mapping::{InputBinding, RangeSpec};
pub use module::{Access, Module, ModuleDescriptor, ParameterSurface, ParameterValue, PropertyKind, Value};
pub use osc::{Argument, Encoder, Message, Parser};
pub use peers::{PeerSet, PeerStore};
pub use rack::{Outbound, Rack};
pub use registry::{CreateOutcome, InstanceKey, ModuleInstance, ModuleRegistry};
pub use server::{OscServer, ServerState, Transport, UdpTransport};
