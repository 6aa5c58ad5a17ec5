//! Orrery Reflect -- runtime reflection for classes, enums and attributes.
//!
//! Types describe themselves once through [`Reflect::define`] (or
//! [`ReflectEnum::define`]); the [`Registry`] collects those descriptions on
//! three registration chains and walks them in a fixed order at bootstrap:
//! enums, then attribute kinds, then classes. After bootstrap the registry is
//! read-only and can be shared across threads behind an `Arc`.
//!
//! # Quick Start
//!
//! ```
//! use orrery_reflect::prelude::*;
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Health {
//!     current: u32,
//!     max: u32,
//! }
//!
//! impl Reflect for Health {
//!     const NAME: &'static str = "Health";
//!
//!     fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
//!         class
//!             .field("current", |h: &Health| h.current, |h, v| h.current = v, attrs![])?
//!             .field("max", |h: &Health| h.max, |h, v| h.max = v, attrs![Range { min: 1.0, max: 1000.0 }])?
//!             .default_constructor()?;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register::<Health>();
//! registry.initialize().unwrap();
//!
//! let doc = serde_json::json!({ "current": 40, "max": 100 });
//! let health: Health = registry.from_document(&doc).unwrap();
//! assert_eq!(health, Health { current: 40, max: 100 });
//! ```

#![deny(unsafe_code)]

pub mod attribute;
pub mod component;
pub mod definition;
pub mod enumeration;
pub mod hash;
pub mod registry;
pub mod serialize;

use serde::{Deserialize, Serialize};

pub use definition::{ClassBuilder, ClassDefinition, ContainerKind, Reflect};
pub use enumeration::{EnumDefinition, ReflectEnum};
pub use hash::{Hash32, Hash64, TypeHash};
pub use registry::Registry;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Broad classification of a [`ReflectError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed registration: duplicates, redefinition, collisions.
    Configuration,
    /// A reference to a type, base or field that does not exist.
    Resolution,
    /// A value in a document or byte block could not be converted.
    Data,
    /// A registration chain failed to initialize.
    Bootstrap,
}

/// Errors produced by reflection registration, queries and load/save.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    /// Two fields with the same name on one definition.
    #[error("duplicate field '{field}' on '{class}'")]
    DuplicateField { class: String, field: String },

    /// Two entries with the same label on one enum definition.
    #[error("duplicate entry '{label}' on enum '{enumeration}'")]
    DuplicateEnumEntry { enumeration: String, label: String },

    /// The same base type added twice.
    #[error("base '{base}' already added to '{class}'")]
    DuplicateBase { class: String, base: String },

    /// Mutation of a definition that has been frozen.
    #[error("definition '{name}' is already defined and cannot be modified")]
    AlreadyDefined { name: String },

    /// A value or instance had a different Rust type than expected.
    #[error("type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },

    /// Two different names hashed to the same value on one chain.
    #[error("{chain} hash collision: '{existing}' and '{incoming}' both hash to {hash}")]
    HashCollision {
        chain: &'static str,
        existing: String,
        incoming: String,
        hash: Hash64,
    },

    /// A type was registered twice with different shapes.
    #[error("'{name}' redefined with a different shape (version {existing} vs {incoming})")]
    VersionMismatch {
        name: String,
        existing: Hash64,
        incoming: Hash64,
    },

    /// A class reaches itself through its base links.
    #[error("'{class}' is its own base through its base chain")]
    CyclicBase { class: String },

    /// A base reference names a class that was never registered.
    #[error("'{class}' derives from unregistered base '{base}'")]
    UnknownBase { class: String, base: String },

    /// No definition for the requested type.
    #[error("type '{name}' is not registered")]
    UnknownType { name: String },

    /// No field with that name on the class or any of its bases.
    #[error("class '{class}' has no field '{field}'")]
    UnknownField { class: String, field: String },

    /// Element access on a field that is not a vector or fixed array.
    #[error("field '{field}' on '{class}' is not a container")]
    NotAContainer { class: String, field: String },

    /// Element index past the end of a container field.
    #[error("index {index} out of range for field '{field}' on '{class}' ({len} elements)")]
    IndexOutOfRange {
        class: String,
        field: String,
        index: usize,
        len: usize,
    },

    /// Resize requested on a fixed-length array field.
    #[error("field '{field}' on '{class}' has a fixed length")]
    FixedLength { class: String, field: String },

    /// The field has no setter or is marked read-only.
    #[error("field '{field}' on '{class}' is read-only")]
    ReadOnlyField { class: String, field: String },

    /// A document value could not be decoded into the field's type.
    #[error("failed to decode field '{field}' on '{class}': {details}")]
    FieldDecode {
        class: String,
        field: String,
        details: String,
    },

    /// A field value could not be encoded into a document value.
    #[error("failed to encode field '{field}' on '{class}': {details}")]
    FieldEncode {
        class: String,
        field: String,
        details: String,
    },

    /// Component bytes did not form a valid value of the component type.
    #[error("invalid bytes for component '{component}': {details}")]
    ComponentBytes { component: String, details: String },

    /// A document could not be parsed or written.
    #[error("document error: {details}")]
    Document { details: String },

    /// An attribute kind was used that is not on the attribute chain.
    #[error("attribute kind '{kind}' used by '{target}' is not registered")]
    UnregisteredAttribute { target: String, kind: String },

    /// No constructor takes the requested argument type.
    #[error("class '{class}' has no constructor taking '{signature}'")]
    MissingConstructor { class: String, signature: String },

    /// The class has no component layout attached.
    #[error("'{name}' is not a component type")]
    NotAComponent { name: String },

    /// A chain node failed during [`Registry::initialize`].
    #[error("{chain} chain failed to initialize '{node}': {source}")]
    Bootstrap {
        chain: &'static str,
        node: String,
        #[source]
        source: Box<ReflectError>,
    },
}

impl ReflectError {
    /// Taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReflectError::DuplicateField { .. }
            | ReflectError::DuplicateEnumEntry { .. }
            | ReflectError::DuplicateBase { .. }
            | ReflectError::CyclicBase { .. }
            | ReflectError::AlreadyDefined { .. }
            | ReflectError::HashCollision { .. }
            | ReflectError::VersionMismatch { .. }
            | ReflectError::UnregisteredAttribute { .. }
            | ReflectError::FixedLength { .. }
            | ReflectError::ReadOnlyField { .. } => ErrorKind::Configuration,
            ReflectError::UnknownBase { .. }
            | ReflectError::UnknownType { .. }
            | ReflectError::UnknownField { .. }
            | ReflectError::NotAContainer { .. }
            | ReflectError::IndexOutOfRange { .. }
            | ReflectError::MissingConstructor { .. }
            | ReflectError::NotAComponent { .. } => ErrorKind::Resolution,
            ReflectError::TypeMismatch { .. }
            | ReflectError::FieldDecode { .. }
            | ReflectError::FieldEncode { .. }
            | ReflectError::ComponentBytes { .. }
            | ReflectError::Document { .. } => ErrorKind::Data,
            ReflectError::Bootstrap { .. } => ErrorKind::Bootstrap,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Registry behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Fail class initialization when an attached attribute kind was never
    /// registered on the attribute chain. Default: `false` (logged at warn).
    pub reject_unregistered_attributes: bool,
    /// Rebuild a second registration of an already defined type and require
    /// an identical version hash. Default: `true`.
    pub verify_redefinitions: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reject_unregistered_attributes: false,
            verify_redefinitions: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::attribute::{
        Attribute, AttributeDefinition, AttributeList, DisplayName, NoSerialize, Range, ReadOnly,
        ResourceExtension,
    };
    pub use crate::component::ComponentLayout;
    pub use crate::definition::{
        ClassBuilder, ClassDefinition, ContainerKind, FieldDefinition, Reflect,
    };
    pub use crate::enumeration::{EnumDefinition, EnumEntry, ReflectEnum};
    pub use crate::hash::{Hash32, Hash64, TypeHash};
    pub use crate::registry::Registry;
    pub use crate::serialize::{
        read_document, write_document, DocumentFormat, SerializeReader, SerializeWriter,
    };
    pub use crate::{attrs, impl_attribute, ErrorKind, ReflectError, RegistryConfig};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn error_kinds_follow_taxonomy() {
        let dup = ReflectError::DuplicateField {
            class: "A".into(),
            field: "x".into(),
        };
        assert_eq!(dup.kind(), ErrorKind::Configuration);

        let unknown = ReflectError::UnknownType { name: "B".into() };
        assert_eq!(unknown.kind(), ErrorKind::Resolution);

        let decode = ReflectError::FieldDecode {
            class: "A".into(),
            field: "x".into(),
            details: "expected u32".into(),
        };
        assert_eq!(decode.kind(), ErrorKind::Data);

        let boot = ReflectError::Bootstrap {
            chain: "class",
            node: "A".into(),
            source: Box::new(dup),
        };
        assert_eq!(boot.kind(), ErrorKind::Bootstrap);
    }

    #[test]
    fn bootstrap_error_exposes_source() {
        use std::error::Error;

        let boot = ReflectError::Bootstrap {
            chain: "enum",
            node: "Color".into(),
            source: Box::new(ReflectError::DuplicateEnumEntry {
                enumeration: "Color".into(),
                label: "Red".into(),
            }),
        };
        let msg = boot.to_string();
        assert!(msg.contains("enum chain"));
        assert!(msg.contains("Color"));
        assert!(boot.source().is_some());
    }

    #[test]
    fn config_defaults() {
        let config = RegistryConfig::default();
        assert!(!config.reject_unregistered_attributes);
        assert!(config.verify_redefinitions);

        let parsed: RegistryConfig =
            serde_json::from_str(r#"{ "reject_unregistered_attributes": true }"#).unwrap();
        assert!(parsed.reject_unregistered_attributes);
        assert!(parsed.verify_redefinitions);
    }
}
