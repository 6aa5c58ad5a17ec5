//! Enum definitions: ordered `(label, value)` pairs with attributes.

use std::any::TypeId;

use serde_json::Value;

use crate::attribute::{Attribute, AttributeList};
use crate::hash::{Hash32, Hash64};
use crate::ReflectError;

// ---------------------------------------------------------------------------
// ReflectEnum
// ---------------------------------------------------------------------------

/// A Rust enum that can describe itself to the registry.
///
/// ```
/// use orrery_reflect::prelude::*;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Team { Red, Blue }
///
/// impl ReflectEnum for Team {
///     const NAME: &'static str = "Team";
///
///     fn to_value(self) -> i64 { self as i64 }
///
///     fn from_value(value: i64) -> Option<Self> {
///         match value {
///             0 => Some(Team::Red),
///             1 => Some(Team::Blue),
///             _ => None,
///         }
///     }
///
///     fn define(def: &mut EnumDefinition) -> Result<(), ReflectError> {
///         def.variant("Red", Team::Red, attrs![])?
///             .variant("Blue", Team::Blue, attrs![])?;
///         Ok(())
///     }
/// }
/// ```
pub trait ReflectEnum: Copy + Send + Sync + 'static {
    /// Registered name. Its hash is the enum's identity.
    const NAME: &'static str;

    /// Integral value of this variant.
    fn to_value(self) -> i64;

    /// Variant for an integral value, if any.
    fn from_value(value: i64) -> Option<Self>;

    /// Populate the definition's entries and attributes.
    fn define(def: &mut EnumDefinition) -> Result<(), ReflectError>;
}

// ---------------------------------------------------------------------------
// EnumEntry
// ---------------------------------------------------------------------------

/// One `(label, value)` pair.
#[derive(Debug, Clone)]
pub struct EnumEntry {
    pub label: String,
    pub label_hash: Hash32,
    pub value: i64,
    pub attributes: AttributeList,
}

// ---------------------------------------------------------------------------
// EnumDefinition
// ---------------------------------------------------------------------------

/// Runtime description of an enum.
///
/// Labels are unique; values need not be contiguous and may repeat (the
/// first label wins when saving).
#[derive(Debug, Clone)]
pub struct EnumDefinition {
    name: String,
    hash: Hash64,
    type_id: Option<TypeId>,
    entries: Vec<EnumEntry>,
    attributes: AttributeList,
    module: Option<String>,
    defined: bool,
}

impl EnumDefinition {
    /// Empty, unfrozen definition named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            hash: Hash64::from_name(name),
            type_id: None,
            entries: Vec::new(),
            attributes: AttributeList::new(),
            module: None,
            defined: false,
        }
    }

    /// Empty definition bound to the Rust enum `E`.
    pub fn of<E: ReflectEnum>() -> Self {
        let mut def = Self::new(E::NAME);
        def.type_id = Some(TypeId::of::<E>());
        def
    }

    fn ensure_open(&self) -> Result<(), ReflectError> {
        if self.defined {
            return Err(ReflectError::AlreadyDefined {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Append an entry.
    pub fn entry(
        &mut self,
        label: &str,
        value: i64,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError> {
        self.ensure_open()?;
        if self.entries.iter().any(|e| e.label == label) {
            return Err(ReflectError::DuplicateEnumEntry {
                enumeration: self.name.clone(),
                label: label.to_owned(),
            });
        }
        self.entries.push(EnumEntry {
            label: label.to_owned(),
            label_hash: Hash32::from_name(label),
            value,
            attributes: attributes.into(),
        });
        Ok(self)
    }

    /// Append an entry for a typed variant.
    pub fn variant<E: ReflectEnum>(
        &mut self,
        label: &str,
        variant: E,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError> {
        self.entry(label, variant.to_value(), attributes)
    }

    /// Attach an enum-level attribute.
    pub fn attribute(&mut self, attr: impl Attribute) -> Result<&mut Self, ReflectError> {
        self.ensure_open()?;
        self.attributes.push(Box::new(attr));
        Ok(self)
    }

    /// Freeze the definition. Fails if already frozen.
    pub fn mark_defined(&mut self) -> Result<(), ReflectError> {
        self.ensure_open()?;
        self.defined = true;
        tracing::debug!(enumeration = %self.name, entries = self.entries.len(), "enum defined");
        Ok(())
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> Hash64 {
        self.hash
    }

    /// Rust type identity, when registered through [`ReflectEnum`].
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn entries(&self) -> &[EnumEntry] {
        &self.entries
    }

    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// Module that registered this enum, if any.
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub(crate) fn set_module(&mut self, module: Option<String>) {
        self.module = module;
    }

    pub fn entry_by_label(&self, label: &str) -> Option<&EnumEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    pub fn entry_by_hash(&self, label_hash: Hash32) -> Option<&EnumEntry> {
        self.entries.iter().find(|e| e.label_hash == label_hash)
    }

    pub fn entry_by_value(&self, value: i64) -> Option<&EnumEntry> {
        self.entries.iter().find(|e| e.value == value)
    }

    /// Value for a label.
    pub fn value_of(&self, label: &str) -> Option<i64> {
        self.entry_by_label(label).map(|e| e.value)
    }

    /// First label carrying `value`.
    pub fn label_of(&self, value: i64) -> Option<&str> {
        self.entry_by_value(value).map(|e| e.label.as_str())
    }

    /// Decode a document value: a label string or an integer.
    pub fn load_value(&self, value: &Value) -> Result<i64, ReflectError> {
        match value {
            Value::String(label) => self.value_of(label).ok_or_else(|| ReflectError::FieldDecode {
                class: self.name.clone(),
                field: label.clone(),
                details: "unknown enum label".to_owned(),
            }),
            Value::Number(n) => n.as_i64().ok_or_else(|| ReflectError::FieldDecode {
                class: self.name.clone(),
                field: n.to_string(),
                details: "enum value out of range".to_owned(),
            }),
            other => Err(ReflectError::FieldDecode {
                class: self.name.clone(),
                field: String::new(),
                details: format!("expected label or integer, found {other}"),
            }),
        }
    }

    /// Encode a value as its label, or as the integer when unlabelled.
    pub fn save_value(&self, value: i64) -> Value {
        match self.label_of(value) {
            Some(label) => Value::String(label.to_owned()),
            None => Value::from(value),
        }
    }

    /// Hash of name, labels, values and attribute kinds.
    pub fn version_hash(&self) -> Hash64 {
        let mut h = Hash64::from_name(&self.name);
        for entry in &self.entries {
            h = h.chain(entry.label.as_bytes()).chain_u64(entry.value as u64);
            for attr in entry.attributes.iter() {
                h = h.chain(attr.kind_name().as_bytes());
            }
        }
        for attr in self.attributes.iter() {
            h = h.chain(attr.kind_name().as_bytes());
        }
        h
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
