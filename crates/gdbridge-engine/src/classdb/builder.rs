//! Declarative description of a class to register

use std::fmt;
use std::sync::Arc;

use gdbridge_sdk::{CallError, MethodInfo, PropertyInfo, SignalInfo, Value};

use crate::callframe::{PtrArgs, PtrRet};
use crate::dispatch::{ClassInterface, ObjectInterface};

/// Varcall implementation: receives the instance (`None` for static
/// methods) and the decoded arguments, defaults already filled in.
pub type MethodFn =
    Arc<dyn Fn(Option<&dyn ObjectInterface>, &[Value]) -> Result<Value, CallError> + Send + Sync>;

/// Ptrcall implementation: receives typed argument slots directly.
pub type PtrcallFn = Arc<dyn Fn(Option<&dyn ObjectInterface>, PtrArgs, PtrRet) + Send + Sync>;

/// A method and its implementations.
#[derive(Clone)]
pub struct MethodDefinition {
    /// Metadata registered with the host
    pub info: MethodInfo,
    /// Varcall implementation
    pub call: MethodFn,
    /// Optional fast path for typed calls
    pub ptrcall: Option<PtrcallFn>,
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("info", &self.info)
            .field("ptrcall", &self.ptrcall.is_some())
            .finish()
    }
}

/// A property backed by setter/getter methods.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    /// Metadata
    pub info: PropertyInfo,
    /// Setter method name (may be empty for read-only properties)
    pub setter: String,
    /// Getter method name
    pub getter: String,
    /// Index passed to the setter/getter for indexed properties
    pub index: Option<i64>,
}

/// Integer constant, optionally part of a (bitfield) enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDefinition {
    /// Enum name, empty for a plain constant
    pub enum_name: String,
    /// Constant name
    pub name: String,
    /// Value
    pub value: i64,
    /// True if the enum is a bitfield
    pub bitfield: bool,
}

/// Property-list entries, registered in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// A property
    Property(PropertyDefinition),
    /// Start of a property group
    Group {
        /// Group label
        name: String,
        /// Property name prefix
        prefix: String,
    },
    /// Start of a subgroup inside the current group
    Subgroup {
        /// Subgroup label
        name: String,
        /// Property name prefix
        prefix: String,
    },
}

/// Everything registered for one class.
pub struct ClassBuilder {
    pub(super) name: String,
    pub(super) parent: String,
    pub(super) is_virtual: bool,
    pub(super) is_abstract: bool,
    pub(super) is_exposed: bool,
    pub(super) class: Option<Arc<dyn ClassInterface>>,
    pub(super) methods: Vec<MethodDefinition>,
    pub(super) constants: Vec<ConstantDefinition>,
    pub(super) members: Vec<Member>,
    pub(super) signals: Vec<SignalInfo>,
}

impl ClassBuilder {
    /// Class `name` extending the host class `parent`.
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        ClassBuilder {
            name: name.into(),
            parent: parent.into(),
            is_virtual: false,
            is_abstract: false,
            is_exposed: true,
            class: None,
            methods: Vec::new(),
            constants: Vec::new(),
            members: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// Managed implementation that creates instances.
    pub fn class(mut self, class: impl ClassInterface) -> Self {
        self.class = Some(Arc::new(class));
        self
    }

    /// Only inheritable by scripts.
    pub fn virtual_class(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Not instantiable.
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Hidden from the editor.
    pub fn hidden(mut self) -> Self {
        self.is_exposed = false;
        self
    }

    /// Add a method.
    pub fn method<F>(mut self, info: MethodInfo, call: F) -> Self
    where
        F: Fn(Option<&dyn ObjectInterface>, &[Value]) -> Result<Value, CallError>
            + Send
            + Sync
            + 'static,
    {
        self.methods.push(MethodDefinition {
            info,
            call: Arc::new(call),
            ptrcall: None,
        });
        self
    }

    /// Add a method with a typed fast path.
    pub fn method_with_ptrcall<F, P>(mut self, info: MethodInfo, call: F, ptrcall: P) -> Self
    where
        F: Fn(Option<&dyn ObjectInterface>, &[Value]) -> Result<Value, CallError>
            + Send
            + Sync
            + 'static,
        P: Fn(Option<&dyn ObjectInterface>, PtrArgs, PtrRet) + Send + Sync + 'static,
    {
        self.methods.push(MethodDefinition {
            info,
            call: Arc::new(call),
            ptrcall: Some(Arc::new(ptrcall)),
        });
        self
    }

    /// Add a property.
    pub fn property(
        mut self,
        info: PropertyInfo,
        setter: impl Into<String>,
        getter: impl Into<String>,
    ) -> Self {
        self.members.push(Member::Property(PropertyDefinition {
            info,
            setter: setter.into(),
            getter: getter.into(),
            index: None,
        }));
        self
    }

    /// Add a property whose setter and getter take an extra index argument.
    pub fn property_indexed(
        mut self,
        info: PropertyInfo,
        setter: impl Into<String>,
        getter: impl Into<String>,
        index: i64,
    ) -> Self {
        self.members.push(Member::Property(PropertyDefinition {
            info,
            setter: setter.into(),
            getter: getter.into(),
            index: Some(index),
        }));
        self
    }

    /// Start a property group; following properties with `prefix` belong to it.
    pub fn group(mut self, name: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.members.push(Member::Group {
            name: name.into(),
            prefix: prefix.into(),
        });
        self
    }

    /// Start a subgroup.
    pub fn subgroup(mut self, name: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.members.push(Member::Subgroup {
            name: name.into(),
            prefix: prefix.into(),
        });
        self
    }

    /// Add an integer constant; `enum_name` may be empty.
    pub fn constant(
        mut self,
        enum_name: impl Into<String>,
        name: impl Into<String>,
        value: i64,
    ) -> Self {
        self.constants.push(ConstantDefinition {
            enum_name: enum_name.into(),
            name: name.into(),
            value,
            bitfield: false,
        });
        self
    }

    /// Add a flag of a bitfield enum.
    pub fn bitfield_flag(
        mut self,
        enum_name: impl Into<String>,
        name: impl Into<String>,
        value: i64,
    ) -> Self {
        self.constants.push(ConstantDefinition {
            enum_name: enum_name.into(),
            name: name.into(),
            value,
            bitfield: true,
        });
        self
    }

    /// Add a signal.
    pub fn signal(mut self, info: SignalInfo) -> Self {
        self.signals.push(info);
        self
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ClassBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBuilder")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("methods", &self.methods.len())
            .field("members", &self.members.len())
            .field("signals", &self.signals.len())
            .finish()
    }
}
