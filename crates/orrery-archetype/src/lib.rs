//! Orrery Archetype -- deterministic ECS archetype layouts over reflected
//! component types.
//!
//! An [`ArchetypeBuilder`] collects component references (by name or hash),
//! resolves each one against the reflection [`Registry`] and lays the
//! components out in a single pass: every offset is the running offset
//! rounded up to the component's alignment, and the stride is the final
//! offset rounded up to the largest alignment seen. The same ordered input
//! always yields the same layout.
//!
//! Finalized [`Archetype`]s are immutable and published into a shared
//! [`ArchetypeTable`] keyed by a hash of their layout. The
//! [`EcsManager`] stores entity instances as rows of raw component bytes in a
//! per-archetype arena and layers typed access on top through the reflected
//! component codecs.
//!
//! # Quick Start
//!
//! ```
//! use orrery_archetype::prelude::*;
//! use orrery_reflect::prelude::*;
//!
//! #[repr(C)]
//! #[derive(Debug, Default, Clone, Copy, PartialEq, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! impl Reflect for Position {
//!     const NAME: &'static str = "Position";
//!
//!     fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
//!         class
//!             .field("x", |p: &Position| p.x, |p, v| p.x = v, attrs![])?
//!             .field("y", |p: &Position| p.y, |p, v| p.y = v, attrs![])?
//!             .default_constructor()?
//!             .component()?;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register::<Position>();
//! registry.initialize().unwrap();
//!
//! let doc = serde_json::json!({ "components": ["Position"] });
//! let archetype = ArchetypeBuilder::new().finalize(&registry, &doc).unwrap();
//! assert_eq!(archetype.stride(), 8);
//! assert_eq!(archetype.offset_of(Hash64::from_name("Position")), Some(0));
//! ```
//!
//! [`Registry`]: orrery_reflect::Registry

#![deny(unsafe_code)]

pub mod archetype;
pub mod builder;
pub mod entity;
pub mod loader;
pub mod manager;
pub mod storage;
pub mod table;

use orrery_reflect::{ErrorKind, Hash64, ReflectError};
use serde::{Deserialize, Serialize};

pub use archetype::{Archetype, ComponentEntry};
pub use builder::ArchetypeBuilder;
pub use entity::EntityId;
pub use loader::{ArchetypeFormat, ArchetypeLoader};
pub use manager::EcsManager;
pub use storage::InstanceStorage;
pub use table::ArchetypeTable;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while building, storing or loading archetypes.
#[derive(Debug, thiserror::Error)]
pub enum ArchetypeError {
    /// A component reference did not resolve to a registered class.
    #[error("unknown component '{reference}'")]
    UnknownComponent { reference: String },

    /// The same component was listed twice in one archetype.
    #[error("duplicate component '{name}' in archetype")]
    DuplicateComponent { name: String },

    /// The referenced class exists but carries no component layout.
    #[error("class '{name}' is not a component")]
    NotAComponent { name: String },

    /// More components than [`LayoutConfig::max_components`] allows.
    #[error("archetype lists {count} components, the limit is {max}")]
    TooManyComponents { count: usize, max: usize },

    /// The archetype document has the wrong shape.
    #[error("invalid archetype document: {details}")]
    InvalidDocument { details: String },

    /// A [`LayoutConfig`] value is out of range.
    #[error("invalid layout config: {details}")]
    InvalidConfig { details: String },

    /// The entity was despawned or never allocated.
    #[error("entity {entity} does not exist (stale or never allocated)")]
    StaleEntity { entity: EntityId },

    /// No archetype with that hash has been added.
    #[error("archetype {hash} is not registered")]
    UnknownArchetype { hash: Hash64 },

    /// The component is not part of the archetype.
    #[error("archetype {archetype} has no component '{name}'")]
    MissingComponent { archetype: Hash64, name: String },

    /// Two different layouts produced the same archetype hash.
    #[error("archetype hash {hash} already names a different layout")]
    HashCollision { hash: Hash64 },

    /// No instance row at that index.
    #[error("instance {index} out of range ({len} instances)")]
    InvalidInstance { index: usize, len: usize },

    /// A reflection operation failed.
    #[error(transparent)]
    Reflect(#[from] ReflectError),
}

impl ArchetypeError {
    /// Taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchetypeError::DuplicateComponent { .. }
            | ArchetypeError::TooManyComponents { .. }
            | ArchetypeError::InvalidConfig { .. }
            | ArchetypeError::HashCollision { .. } => ErrorKind::Configuration,
            ArchetypeError::UnknownComponent { .. }
            | ArchetypeError::NotAComponent { .. }
            | ArchetypeError::StaleEntity { .. }
            | ArchetypeError::UnknownArchetype { .. }
            | ArchetypeError::MissingComponent { .. }
            | ArchetypeError::InvalidInstance { .. } => ErrorKind::Resolution,
            ArchetypeError::InvalidDocument { .. } => ErrorKind::Data,
            ArchetypeError::Reflect(inner) => inner.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits and rounding applied by [`ArchetypeBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Upper bound on per-instance plus shared components. Default: `256`.
    pub max_components: usize,
    /// Minimum alignment the stride is rounded to. Must be a power of two.
    /// Default: `1` (stride follows the largest component alignment).
    pub min_stride_align: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_components: 256,
            min_stride_align: 1,
        }
    }
}

impl LayoutConfig {
    /// Reject values the layout pass cannot honour.
    pub fn validate(&self) -> Result<(), ArchetypeError> {
        if self.max_components == 0 {
            return Err(ArchetypeError::InvalidConfig {
                details: "max_components must be at least 1".to_owned(),
            });
        }
        if !self.min_stride_align.is_power_of_two() {
            return Err(ArchetypeError::InvalidConfig {
                details: format!(
                    "min_stride_align must be a power of two, got {}",
                    self.min_stride_align
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ComponentEntry};
    pub use crate::builder::{ArchetypeBuilder, ComponentRef};
    pub use crate::entity::EntityId;
    pub use crate::loader::{ArchetypeFormat, ArchetypeLoader};
    pub use crate::manager::EcsManager;
    pub use crate::storage::InstanceStorage;
    pub use crate::table::ArchetypeTable;
    pub use crate::{ArchetypeError, LayoutConfig};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use orrery_reflect::prelude::*;
    use serde_json::json;

    use crate::prelude::*;

    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy, PartialEq, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Reflect for Position {
        const NAME: &'static str = "Position";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class
                .field("x", |p: &Position| p.x, |p, v| p.x = v, attrs![])?
                .field("y", |p: &Position| p.y, |p, v| p.y = v, attrs![])?
                .default_constructor()?
                .component()?;
            Ok(())
        }
    }

    #[repr(C)]
    #[derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        bytemuck_derive::NoUninit,
        bytemuck_derive::CheckedBitPattern,
    )]
    struct Flag {
        on: bool,
    }

    impl Reflect for Flag {
        const NAME: &'static str = "Flag";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class
                .field("on", |f: &Flag| f.on, |f, v| f.on = v, attrs![])?
                .default_constructor()?
                .component()?;
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register::<Position>();
        registry.register::<Flag>();
        registry.initialize().expect("bootstrap");
        registry
    }

    #[test]
    fn layout_follows_authored_order() {
        let registry = registry();

        let a = ArchetypeBuilder::new()
            .finalize(&registry, &json!({ "components": ["Position", "Flag"] }))
            .unwrap();
        assert_eq!(a.offset_of(Hash64::from_name("Position")), Some(0));
        assert_eq!(a.offset_of(Hash64::from_name("Flag")), Some(8));
        assert_eq!(a.stride(), 12);

        let b = ArchetypeBuilder::new()
            .finalize(&registry, &json!({ "components": ["Flag", "Position"] }))
            .unwrap();
        assert_eq!(b.offset_of(Hash64::from_name("Flag")), Some(0));
        assert_eq!(b.offset_of(Hash64::from_name("Position")), Some(4));
        assert_eq!(b.stride(), 12);

        // Same set, different order: different layout, different identity.
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn manager_round_trip_through_loader() {
        let registry = registry();
        let mut manager = EcsManager::new();
        let bytes = br#"{ "components": ["Position", "Flag"] }"#;

        let archetype = ArchetypeLoader::new()
            .load(&registry, bytes, ArchetypeFormat::Json, &mut manager)
            .unwrap();

        let entity = manager
            .load_entity(
                &registry,
                archetype.hash(),
                &json!({ "Position": { "x": 2.0, "y": 3.0 }, "Flag": { "on": true } }),
            )
            .unwrap();
        assert_eq!(
            manager.get::<Position>(&registry, entity).unwrap(),
            Position { x: 2.0, y: 3.0 }
        );
        assert!(manager.get::<Flag>(&registry, entity).unwrap().on);
    }

    #[test]
    fn error_kinds_follow_taxonomy() {
        let dup = ArchetypeError::DuplicateComponent {
            name: "Position".into(),
        };
        assert_eq!(dup.kind(), ErrorKind::Configuration);

        let unknown = ArchetypeError::UnknownComponent {
            reference: "Ghost".into(),
        };
        assert_eq!(unknown.kind(), ErrorKind::Resolution);

        let wrapped: ArchetypeError = ReflectError::FieldDecode {
            class: "Flag".into(),
            field: "on".into(),
            details: "expected bool".into(),
        }
        .into();
        assert_eq!(wrapped.kind(), ErrorKind::Data);
    }

    #[test]
    fn config_defaults_and_validation() {
        let config = LayoutConfig::default();
        assert_eq!(config.max_components, 256);
        assert_eq!(config.min_stride_align, 1);
        assert!(config.validate().is_ok());

        let parsed: LayoutConfig = serde_json::from_str(r#"{ "min_stride_align": 16 }"#).unwrap();
        assert_eq!(parsed.min_stride_align, 16);
        assert_eq!(parsed.max_components, 256);

        let bad = LayoutConfig {
            min_stride_align: 12,
            ..LayoutConfig::default()
        };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }
}
