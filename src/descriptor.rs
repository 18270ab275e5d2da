//
// descriptor.rs
//
// Data classes describing what a peer exposes: objects, functions,
// classes, properties and arguments. See spec §3 (DATA MODEL) and §4.B.
//

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The caller's preference for how a reply should be delivered. The
/// runtime may downgrade or upgrade this per spec §4.F's call-style
/// selection rules; it is never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Void,
    Sync,
    Async,
}

/// Describes a single argument position. `index = None` applies to every
/// position that no more specific descriptor (lower `index`) already
/// claims — see spec §9 Open Question (ii): first match by ascending
/// index, `None` catches the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    pub index: Option<u32>,
    /// Present when this argument is itself a callback whose shape needs
    /// describing (so the receiving side can build a matching proxy).
    pub callback: Option<Box<FunctionDescriptor>>,
}

impl ArgumentDescriptor {
    pub fn positional(index: u32) -> Self {
        Self { index: Some(index), callback: None }
    }

    pub fn catch_all() -> Self {
        Self { index: None, callback: None }
    }

    pub fn callback(index: u32, descriptor: FunctionDescriptor) -> Self {
        Self { index: Some(index), callback: Some(Box::new(descriptor)) }
    }

    /// Selects the descriptor for argument `idx` among `descriptors`,
    /// preferring an exact-index match, else the first entry with
    /// `index = None`, in the order the descriptors are listed.
    pub fn select(descriptors: &[ArgumentDescriptor], idx: usize) -> Option<&ArgumentDescriptor> {
        let idx = idx as u32;
        descriptors
            .iter()
            .find(|d| d.index == Some(idx))
            .or_else(|| descriptors.iter().find(|d| d.index.is_none()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDescriptor>,
    pub returns: CallType,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, returns: CallType) -> Self {
        Self { name: name.into(), arguments: Vec::new(), returns }
    }

    pub fn with_arguments(mut self, arguments: Vec<ArgumentDescriptor>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// A proxied property: every read/write is a round trip. `read_only`
/// suppresses the setter side on the generated proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub get: Option<FunctionDescriptor>,
    pub set: Option<FunctionDescriptor>,
    pub read_only: bool,
}

impl PropertyDescriptor {
    pub fn readonly_remote(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            get: Some(FunctionDescriptor::new(format!("get_{}", name), CallType::Async)),
            set: None,
            read_only: true,
            name,
        }
    }

    pub fn read_write(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            get: Some(FunctionDescriptor::new(format!("get_{}", name), CallType::Async)),
            set: Some(FunctionDescriptor::new(format!("set_{}", name), CallType::Void)),
            read_only: false,
            name,
        }
    }
}

/// Names which members of a host instance (or a class's static side) are
/// exposed. `readonly_properties` are evaluated once, at descriptor time,
/// and shipped inline with the object rather than round-tripped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    #[serde(default)]
    pub readonly_properties: Vec<String>,
    #[serde(default)]
    pub proxied_properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub functions: Vec<FunctionDescriptor>,
}

impl ObjectDescriptor {
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.proxied_properties.iter().find(|p| p.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn is_readonly_property(&self, name: &str) -> bool {
        self.readonly_properties.iter().any(|p| p == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub class_id: String,
    #[serde(default)]
    pub static_members: Option<ObjectDescriptor>,
    pub instance: ObjectDescriptor,
    pub ctor: FunctionDescriptor,
}

/// Id-keyed descriptor maps as exchanged in a `DescriptorsResult` message.
/// Spec invariant 5: a new message replaces these maps whole, never merges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorTable {
    #[serde(default)]
    pub objects: HashMap<String, ObjectDescriptor>,
    #[serde(default)]
    pub functions: HashMap<String, FunctionDescriptor>,
    #[serde(default)]
    pub classes: HashMap<String, ClassDescriptor>,
}
