//! Byte arena holding the instance rows of one archetype.
//!
//! Rows are `stride` bytes each and packed back to back. A component inside
//! a row is addressed only through the archetype's offsets, and typed access
//! goes through the reflected component codec, so the arena never hands out
//! typed references into its own memory.

use std::ops::Range;
use std::sync::Arc;

use orrery_reflect::serialize::{SerializeReader, SerializeWriter};
use orrery_reflect::{Hash64, Reflect, Registry, TypeHash};
use serde_json::{Map, Value};

use crate::archetype::{decode_component, encode_component, Archetype, ComponentEntry};
use crate::ArchetypeError;

#[derive(Debug, Clone)]
pub struct InstanceStorage {
    archetype: Arc<Archetype>,
    bytes: Vec<u8>,
    len: usize,
}

impl InstanceStorage {
    pub fn new(archetype: Arc<Archetype>) -> Self {
        Self {
            archetype,
            bytes: Vec::new(),
            len: 0,
        }
    }

    pub fn archetype(&self) -> &Arc<Archetype> {
        &self.archetype
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a row with every component at its default value and return
    /// its index.
    pub fn create(&mut self) -> usize {
        self.bytes.extend_from_slice(self.archetype.default_row());
        self.len += 1;
        self.len - 1
    }

    /// Remove the instance at `index` by moving the last row into its place.
    ///
    /// Returns the former index of the moved row, or `None` if the removed
    /// row was the last one.
    pub fn remove(&mut self, index: usize) -> Result<Option<usize>, ArchetypeError> {
        self.check(index)?;
        let stride = self.archetype.stride();
        let last = self.len - 1;
        if index != last {
            self.bytes
                .copy_within(last * stride..(last + 1) * stride, index * stride);
        }
        self.bytes.truncate(last * stride);
        self.len = last;
        Ok((index != last).then_some(last))
    }

    /// Raw bytes of one row.
    pub fn row(&self, index: usize) -> Result<&[u8], ArchetypeError> {
        let range = self.row_range(index)?;
        Ok(&self.bytes[range])
    }

    /// Raw bytes of one component in one row.
    pub fn component_bytes(&self, index: usize, component: TypeHash) -> Result<&[u8], ArchetypeError> {
        let range = self.component_range(index, component)?;
        Ok(&self.bytes[range])
    }

    pub fn component_bytes_mut(
        &mut self,
        index: usize,
        component: TypeHash,
    ) -> Result<&mut [u8], ArchetypeError> {
        let range = self.component_range(index, component)?;
        Ok(&mut self.bytes[range])
    }

    /// Decode component `T` of instance `index`.
    pub fn get<T: Reflect>(&self, registry: &Registry, index: usize) -> Result<T, ArchetypeError> {
        let bytes = self.component_bytes(index, Hash64::from_name(T::NAME))?;
        decode_component::<T>(registry, bytes)
    }

    /// Overwrite component `T` of instance `index`.
    pub fn set<T: Reflect>(
        &mut self,
        registry: &Registry,
        index: usize,
        value: &T,
    ) -> Result<(), ArchetypeError> {
        let bytes = self.component_bytes_mut(index, Hash64::from_name(T::NAME))?;
        encode_component(registry, value, bytes)
    }

    /// Load instance `index` from an object keyed by component name. Each
    /// value is loaded through that component's class definition; absent
    /// components keep their current bytes and unknown keys are ignored.
    /// The row is only written if every component loads.
    pub fn load_instance(
        &mut self,
        registry: &Registry,
        index: usize,
        reader: &dyn SerializeReader,
    ) -> Result<(), ArchetypeError> {
        let row = self.row_range(index)?;
        let mut scratch = self.bytes[row.clone()].to_vec();
        for entry in self.archetype.entries() {
            let Some(value) = reader.read_field(&entry.name) else {
                continue;
            };
            let class = component_class(registry, entry)?;
            class.load_bytes(registry, value, &mut scratch[entry.range()])?;
        }
        self.bytes[row].copy_from_slice(&scratch);
        Ok(())
    }

    /// Save instance `index` as one object per component, keyed by name.
    pub fn save_instance(
        &self,
        registry: &Registry,
        index: usize,
        writer: &mut dyn SerializeWriter,
    ) -> Result<(), ArchetypeError> {
        let row = self.row(index)?;
        for entry in self.archetype.entries() {
            let class = component_class(registry, entry)?;
            let mut fields = Map::new();
            class.save_bytes(registry, &row[entry.range()], &mut fields)?;
            writer.write_field(&entry.name, Value::Object(fields));
        }
        Ok(())
    }

    fn check(&self, index: usize) -> Result<(), ArchetypeError> {
        if index < self.len {
            Ok(())
        } else {
            Err(ArchetypeError::InvalidInstance {
                index,
                len: self.len,
            })
        }
    }

    fn row_range(&self, index: usize) -> Result<Range<usize>, ArchetypeError> {
        self.check(index)?;
        let stride = self.archetype.stride();
        Ok(index * stride..(index + 1) * stride)
    }

    fn component_range(&self, index: usize, component: TypeHash) -> Result<Range<usize>, ArchetypeError> {
        let row = self.row_range(index)?;
        let entry = self
            .archetype
            .entry(component)
            .ok_or_else(|| self.missing(component))?;
        Ok(row.start + entry.offset..row.start + entry.offset + entry.size)
    }

    fn missing(&self, component: TypeHash) -> ArchetypeError {
        ArchetypeError::MissingComponent {
            archetype: self.archetype.hash(),
            name: component.to_string(),
        }
    }
}

fn component_class<'r>(
    registry: &'r Registry,
    entry: &ComponentEntry,
) -> Result<&'r orrery_reflect::ClassDefinition, ArchetypeError> {
    registry
        .class(entry.hash)
        .ok_or_else(|| ArchetypeError::UnknownComponent {
            reference: entry.name.clone(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
