//! Archetype construction and the layout pass.
//!
//! The builder only records references. Resolution against the registry,
//! duplicate detection and offset assignment all happen in one place,
//! [`ArchetypeBuilder::build`], so an abandoned builder never leaves anything
//! behind.
//!
//! Archetype documents have two optional keys:
//!
//! ```json
//! {
//!     "components": ["Position", "Flag"],
//!     "shared_components": { "Layer": { "value": 3 } }
//! }
//! ```
//!
//! A component reference is either a class name or its integer type hash.
//! `shared_components` is either an array of references (shared at their
//! default value) or an object mapping references to field overrides.

use std::collections::HashSet;
use std::fmt;

use orrery_reflect::component::ComponentLayout;
use orrery_reflect::serialize::SerializeReader;
use orrery_reflect::{ClassDefinition, Hash64, Reflect, ReflectError, Registry, TypeHash};
use serde_json::Value;

use crate::archetype::{Archetype, ComponentEntry};
use crate::{ArchetypeError, LayoutConfig};

// ---------------------------------------------------------------------------
// ComponentRef
// ---------------------------------------------------------------------------

/// Reference to a component class, by name or by type hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentRef {
    Name(String),
    Hash(TypeHash),
}

impl ComponentRef {
    /// Parse a document value: a string is a name, an unsigned integer a hash.
    pub fn from_value(value: &Value) -> Result<Self, ArchetypeError> {
        match value {
            Value::String(name) => Ok(ComponentRef::Name(name.clone())),
            Value::Number(n) => n
                .as_u64()
                .map(|raw| ComponentRef::Hash(Hash64(raw)))
                .ok_or_else(|| ArchetypeError::InvalidDocument {
                    details: format!("component hash {n} is not an unsigned 64-bit integer"),
                }),
            other => Err(ArchetypeError::InvalidDocument {
                details: format!("component reference must be a name or hash, got {other}"),
            }),
        }
    }

    /// Parse an object key: decimal digits are a hash, anything else a name.
    fn from_key(key: &str) -> Self {
        match key.parse::<u64>() {
            Ok(raw) => ComponentRef::Hash(Hash64(raw)),
            Err(_) => ComponentRef::Name(key.to_owned()),
        }
    }

    /// Type hash this reference resolves to. Class hashes are name hashes,
    /// so no registry is needed.
    pub fn hash(&self) -> TypeHash {
        match self {
            ComponentRef::Name(name) => Hash64::from_name(name),
            ComponentRef::Hash(hash) => *hash,
        }
    }

    fn resolve<'r>(
        &self,
        registry: &'r Registry,
    ) -> Result<(&'r ClassDefinition, &'r ComponentLayout), ArchetypeError> {
        let class = match self {
            ComponentRef::Name(name) => registry.class_by_name(name),
            ComponentRef::Hash(hash) => registry.class(*hash),
        }
        .ok_or_else(|| ArchetypeError::UnknownComponent {
            reference: self.to_string(),
        })?;
        let layout = class.component().ok_or_else(|| ArchetypeError::NotAComponent {
            name: class.name().to_owned(),
        })?;
        Ok((class, layout))
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRef::Name(name) => f.write_str(name),
            ComponentRef::Hash(hash) => write!(f, "#{hash}"),
        }
    }
}

impl From<&str> for ComponentRef {
    fn from(name: &str) -> Self {
        ComponentRef::Name(name.to_owned())
    }
}

impl From<String> for ComponentRef {
    fn from(name: String) -> Self {
        ComponentRef::Name(name)
    }
}

impl From<Hash64> for ComponentRef {
    fn from(hash: Hash64) -> Self {
        ComponentRef::Hash(hash)
    }
}

// ---------------------------------------------------------------------------
// ArchetypeBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SharedRequest {
    reference: ComponentRef,
    /// Starting bytes copied from a base archetype, if any.
    base_bytes: Option<Vec<u8>>,
    /// Field overrides applied in order on top of the starting bytes.
    overrides: Vec<Value>,
}

impl SharedRequest {
    fn new(reference: ComponentRef) -> Self {
        Self {
            reference,
            base_bytes: None,
            overrides: Vec::new(),
        }
    }
}

/// Accumulates component references and produces an [`Archetype`].
#[derive(Debug, Clone, Default)]
pub struct ArchetypeBuilder {
    config: LayoutConfig,
    components: Vec<ComponentRef>,
    shared: Vec<SharedRequest>,
}

impl ArchetypeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LayoutConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Add a per-instance component. Duplicates are reported by `build`.
    pub fn add(&mut self, component: impl Into<ComponentRef>) -> &mut Self {
        self.components.push(component.into());
        self
    }

    /// Add a shared component at its default value.
    pub fn add_shared(&mut self, component: impl Into<ComponentRef>) -> &mut Self {
        self.shared.push(SharedRequest::new(component.into()));
        self
    }

    pub fn add_type<T: Reflect>(&mut self) -> &mut Self {
        self.add(Hash64::from_name(T::NAME))
    }

    pub fn add_shared_type<T: Reflect>(&mut self) -> &mut Self {
        self.add_shared(Hash64::from_name(T::NAME))
    }

    /// Override fields of a shared component. Adds the component if it is
    /// not shared yet, otherwise layers `overrides` on top of its current
    /// value.
    pub fn override_shared(
        &mut self,
        component: impl Into<ComponentRef>,
        overrides: Value,
    ) -> &mut Self {
        let component = component.into();
        let hash = component.hash();
        match self.shared.iter_mut().find(|s| s.reference.hash() == hash) {
            Some(existing) => existing.overrides.push(overrides),
            None => {
                let mut request = SharedRequest::new(component);
                request.overrides.push(overrides);
                self.shared.push(request);
            }
        }
        self
    }

    /// Start from `base`: copy its per-instance components in layout order
    /// and its shared components with their current values.
    pub fn derive_from(&mut self, base: &Archetype) -> &mut Self {
        self.components
            .extend(base.entries().iter().map(|e| ComponentRef::Hash(e.hash)));
        self.shared.extend(base.shared_entries().iter().map(|e| SharedRequest {
            reference: ComponentRef::Hash(e.hash),
            base_bytes: Some(base.shared_bytes()[e.range()].to_vec()),
            overrides: Vec::new(),
        }));
        self
    }

    /// `true` if the component is referenced, shared or not.
    pub fn contains(&self, component: TypeHash) -> bool {
        self.components.iter().any(|c| c.hash() == component)
            || self.shared.iter().any(|s| s.reference.hash() == component)
    }

    /// Number of references recorded so far, duplicates included.
    pub fn len(&self) -> usize {
        self.components.len() + self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the component lists from `reader`, append them to this builder's
    /// state and build. The builder itself is left untouched.
    pub fn finalize(
        &self,
        registry: &Registry,
        reader: &dyn SerializeReader,
    ) -> Result<Archetype, ArchetypeError> {
        let mut combined = self.clone();
        combined.read_document(reader)?;
        combined.build(registry)
    }

    fn read_document(&mut self, reader: &dyn SerializeReader) -> Result<(), ArchetypeError> {
        match reader.read_field("components") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    self.components.push(ComponentRef::from_value(item)?);
                }
            }
            Some(other) => {
                return Err(ArchetypeError::InvalidDocument {
                    details: format!("'components' must be an array, got {other}"),
                })
            }
        }

        match reader.read_field("shared_components") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    self.shared.push(SharedRequest::new(ComponentRef::from_value(item)?));
                }
            }
            Some(Value::Object(map)) => {
                for (key, overrides) in map {
                    match overrides {
                        Value::Null => {
                            self.override_shared(ComponentRef::from_key(key), Value::Null);
                        }
                        Value::Object(_) => {
                            self.override_shared(ComponentRef::from_key(key), overrides.clone());
                        }
                        other => {
                            return Err(ArchetypeError::InvalidDocument {
                                details: format!(
                                    "overrides for shared component '{key}' must be an object, got {other}"
                                ),
                            })
                        }
                    }
                }
            }
            Some(other) => {
                return Err(ArchetypeError::InvalidDocument {
                    details: format!(
                        "'shared_components' must be an array or an object, got {other}"
                    ),
                })
            }
        }
        Ok(())
    }

    /// Resolve every reference, reject duplicates and lay the components out.
    pub fn build(&self, registry: &Registry) -> Result<Archetype, ArchetypeError> {
        self.config.validate()?;

        let count = self.len();
        if count > self.config.max_components {
            return Err(ArchetypeError::TooManyComponents {
                count,
                max: self.config.max_components,
            });
        }

        let instance = self
            .components
            .iter()
            .map(|r| r.resolve(registry))
            .collect::<Result<Vec<_>, _>>()?;
        let shared = self
            .shared
            .iter()
            .map(|s| s.reference.resolve(registry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::with_capacity(count);
        for (class, _) in instance.iter().chain(&shared) {
            if !seen.insert(class.hash()) {
                return Err(ArchetypeError::DuplicateComponent {
                    name: class.name().to_owned(),
                });
            }
        }

        let (entries, running, max_align) = place(&instance, false);
        let align = max_align.max(self.config.min_stride_align);
        let stride = running.next_multiple_of(align);

        let mut default_row = vec![0u8; stride];
        for ((_, layout), entry) in instance.iter().zip(&entries) {
            default_row[entry.range()].copy_from_slice(&layout.default_bytes);
        }

        let (shared_entries, shared_running, shared_align) = place(&shared, true);
        let mut shared_bytes = vec![0u8; shared_running.next_multiple_of(shared_align)];
        for ((request, (class, layout)), entry) in self.shared.iter().zip(&shared).zip(&shared_entries) {
            let slot = &mut shared_bytes[entry.range()];
            match &request.base_bytes {
                Some(bytes) if bytes.len() == layout.size => slot.copy_from_slice(bytes),
                Some(bytes) => {
                    return Err(ReflectError::ComponentBytes {
                        component: class.name().to_owned(),
                        details: format!(
                            "inherited shared value is {} bytes, the component is {}",
                            bytes.len(),
                            layout.size
                        ),
                    }
                    .into())
                }
                None => slot.copy_from_slice(&layout.default_bytes),
            }
            for overrides in &request.overrides {
                class.load_bytes(registry, overrides, slot)?;
            }
        }

        let archetype = Archetype::from_layout(
            stride,
            align,
            entries,
            shared_entries,
            shared_bytes,
            default_row,
        );
        tracing::debug!(
            archetype = %archetype.hash(),
            stride = archetype.stride(),
            components = archetype.entries().len(),
            shared = archetype.shared_entries().len(),
            "archetype finalized"
        );
        Ok(archetype)
    }
}

/// Single pass: each offset is the running offset rounded up to the
/// component's alignment. Returns the entries, the unpadded end and the
/// largest alignment seen (1 if empty).
fn place(
    resolved: &[(&ClassDefinition, &ComponentLayout)],
    shared: bool,
) -> (Vec<ComponentEntry>, usize, usize) {
    let mut running = 0usize;
    let mut max_align = 1usize;
    let entries = resolved
        .iter()
        .map(|(class, layout)| {
            let align = layout.align.max(1);
            let offset = running.next_multiple_of(align);
            running = offset + layout.size;
            max_align = max_align.max(align);
            ComponentEntry {
                hash: class.hash(),
                name: class.name().to_owned(),
                offset,
                size: layout.size,
                align,
                shared,
            }
        })
        .collect();
    (entries, running, max_align)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
