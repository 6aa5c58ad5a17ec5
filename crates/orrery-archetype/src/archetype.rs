//! Immutable archetype layouts.
//!
//! An [`Archetype`] is the result of one layout pass: for every per-instance
//! component it records the byte offset inside an instance row, and for every
//! shared component the offset inside the archetype's single shared block.
//! Archetypes are value objects. Nothing mutates one after
//! [`ArchetypeBuilder`](crate::ArchetypeBuilder) produces it; a different
//! component set means a different archetype with a different hash.

use orrery_reflect::{Hash64, Reflect, Registry, TypeHash};

use crate::ArchetypeError;

// ---------------------------------------------------------------------------
// ComponentEntry
// ---------------------------------------------------------------------------

/// Placement of one component inside an archetype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentEntry {
    /// Type hash of the component class.
    pub hash: TypeHash,
    /// Registered class name.
    pub name: String,
    /// Byte offset in the instance row (or in the shared block).
    pub offset: usize,
    pub size: usize,
    pub align: usize,
    /// `true` if the component lives in the shared block.
    pub shared: bool,
}

impl ComponentEntry {
    /// Byte range this entry occupies.
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// A finalized component layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archetype {
    hash: Hash64,
    stride: usize,
    align: usize,
    entries: Vec<ComponentEntry>,
    shared_entries: Vec<ComponentEntry>,
    shared_bytes: Vec<u8>,
    default_row: Vec<u8>,
}

impl Archetype {
    /// Assemble an archetype from a completed layout pass and compute its
    /// hash.
    pub(crate) fn from_layout(
        stride: usize,
        align: usize,
        entries: Vec<ComponentEntry>,
        shared_entries: Vec<ComponentEntry>,
        shared_bytes: Vec<u8>,
        default_row: Vec<u8>,
    ) -> Self {
        let hash = Self::compute_hash(stride, align, &entries, &shared_entries, &shared_bytes);
        Self {
            hash,
            stride,
            align,
            entries,
            shared_entries,
            shared_bytes,
            default_row,
        }
    }

    /// FNV-1a 64 over stride and align, then each `(component hash, shared
    /// flag, offset)` in layout order, then the shared block bytes.
    fn compute_hash(
        stride: usize,
        align: usize,
        entries: &[ComponentEntry],
        shared_entries: &[ComponentEntry],
        shared_bytes: &[u8],
    ) -> Hash64 {
        let layout = Hash64::EMPTY
            .chain_u64(stride as u64)
            .chain_u64(align as u64);
        entries
            .iter()
            .chain(shared_entries)
            .fold(layout, |h, e| {
                h.chain_hash(e.hash)
                    .chain(&[u8::from(e.shared)])
                    .chain_u64(e.offset as u64)
            })
            .chain(shared_bytes)
    }

    /// Identity of this layout in the archetype table.
    #[inline]
    pub fn hash(&self) -> Hash64 {
        self.hash
    }

    /// Bytes per instance row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Alignment the stride was rounded to.
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Per-instance components in layout order.
    pub fn entries(&self) -> &[ComponentEntry] {
        &self.entries
    }

    /// Shared components in layout order.
    pub fn shared_entries(&self) -> &[ComponentEntry] {
        &self.shared_entries
    }

    /// Per-instance entry for `component`.
    pub fn entry(&self, component: TypeHash) -> Option<&ComponentEntry> {
        self.entries.iter().find(|e| e.hash == component)
    }

    /// Shared entry for `component`.
    pub fn shared_entry(&self, component: TypeHash) -> Option<&ComponentEntry> {
        self.shared_entries.iter().find(|e| e.hash == component)
    }

    /// Offset of a per-instance component inside a row.
    pub fn offset_of(&self, component: TypeHash) -> Option<usize> {
        self.entry(component).map(|e| e.offset)
    }

    /// Size of a component, per-instance or shared.
    pub fn size_of(&self, component: TypeHash) -> Option<usize> {
        self.entry(component)
            .or_else(|| self.shared_entry(component))
            .map(|e| e.size)
    }

    /// `true` if the component is part of this archetype in either storage.
    pub fn contains(&self, component: TypeHash) -> bool {
        self.entry(component).is_some() || self.shared_entry(component).is_some()
    }

    pub fn is_shared(&self, component: TypeHash) -> bool {
        self.shared_entry(component).is_some()
    }

    /// Offset of a shared component inside the shared block.
    pub fn shared_offset_of(&self, component: TypeHash) -> Option<usize> {
        self.shared_entry(component).map(|e| e.offset)
    }

    /// Size of the shared block.
    #[inline]
    pub fn shared_size(&self) -> usize {
        self.shared_bytes.len()
    }

    /// The shared block.
    pub fn shared_bytes(&self) -> &[u8] {
        &self.shared_bytes
    }

    /// Bytes of a new instance row: every component at its default value.
    pub fn default_row(&self) -> &[u8] {
        &self.default_row
    }

    /// Number of per-instance plus shared components.
    pub fn component_count(&self) -> usize {
        self.entries.len() + self.shared_entries.len()
    }

    /// Decode the shared value of component `T`.
    pub fn shared<T: Reflect>(&self, registry: &Registry) -> Result<T, ArchetypeError> {
        let hash = Hash64::from_name(T::NAME);
        let entry = self
            .shared_entry(hash)
            .ok_or_else(|| ArchetypeError::MissingComponent {
                archetype: self.hash,
                name: T::NAME.to_owned(),
            })?;
        decode_component::<T>(registry, &self.shared_bytes[entry.range()])
    }
}

#[cfg(test)]
impl Archetype {
    /// The same layout filed under another hash.
    pub(crate) fn rehashed(mut self, hash: Hash64) -> Self {
        self.hash = hash;
        self
    }
}

/// Decode `bytes` as component `T` through its registered layout.
pub(crate) fn decode_component<T: Reflect>(
    registry: &Registry,
    bytes: &[u8],
) -> Result<T, ArchetypeError> {
    let class = registry
        .class_of::<T>()
        .ok_or_else(|| ArchetypeError::UnknownComponent {
            reference: T::NAME.to_owned(),
        })?;
    let layout = class
        .component()
        .ok_or_else(|| ArchetypeError::NotAComponent {
            name: T::NAME.to_owned(),
        })?;
    let value = layout.decode(bytes)?;
    value
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| ArchetypeError::NotAComponent {
            name: T::NAME.to_owned(),
        })
}

/// Encode `value` into `out` through `T`'s registered layout.
pub(crate) fn encode_component<T: Reflect>(
    registry: &Registry,
    value: &T,
    out: &mut [u8],
) -> Result<(), ArchetypeError> {
    let layout = registry
        .class_of::<T>()
        .and_then(|class| class.component())
        .ok_or_else(|| ArchetypeError::NotAComponent {
            name: T::NAME.to_owned(),
        })?;
    layout.encode(value, out)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, offset: usize, size: usize, shared: bool) -> ComponentEntry {
        ComponentEntry {
            hash: Hash64::from_name(name),
            name: name.to_owned(),
            offset,
            size,
            align: size.max(1),
            shared,
        }
    }

    fn sample() -> Archetype {
        Archetype::from_layout(
            12,
            4,
            vec![entry("Position", 0, 8, false), entry("Flag", 8, 1, false)],
            vec![entry("Layer", 0, 4, true)],
            vec![3, 0, 0, 0],
            vec![0; 12],
        )
    }

    #[test]
    fn queries_split_instance_and_shared() {
        let a = sample();
        let position = Hash64::from_name("Position");
        let layer = Hash64::from_name("Layer");

        assert_eq!(a.offset_of(position), Some(0));
        assert_eq!(a.offset_of(layer), None);
        assert_eq!(a.shared_offset_of(layer), Some(0));
        assert_eq!(a.size_of(layer), Some(4));
        assert!(a.contains(layer));
        assert!(a.is_shared(layer));
        assert!(!a.is_shared(position));
        assert!(!a.contains(Hash64::from_name("Velocity")));
        assert_eq!(a.shared_size(), 4);
        assert_eq!(a.component_count(), 3);
    }

    #[test]
    fn hash_covers_shared_bytes() {
        let a = sample();
        let b = Archetype::from_layout(
            12,
            4,
            a.entries().to_vec(),
            a.shared_entries().to_vec(),
            vec![4, 0, 0, 0],
            vec![0; 12],
        );
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), sample().hash());
    }

    #[test]
    fn hash_covers_stride_and_offsets() {
        let a = sample();
        let padded = Archetype::from_layout(
            16,
            16,
            a.entries().to_vec(),
            a.shared_entries().to_vec(),
            a.shared_bytes().to_vec(),
            vec![0; 16],
        );
        let shifted = Archetype::from_layout(
            12,
            4,
            vec![entry("Position", 4, 8, false), entry("Flag", 0, 1, false)],
            a.shared_entries().to_vec(),
            a.shared_bytes().to_vec(),
            vec![0; 12],
        );
        assert_ne!(a.hash(), padded.hash());
        assert_ne!(a.hash(), shifted.hash());
    }

    #[test]
    fn hash_distinguishes_shared_flag() {
        let instance = Archetype::from_layout(
            4,
            4,
            vec![entry("Layer", 0, 4, false)],
            Vec::new(),
            Vec::new(),
            vec![0; 4],
        );
        let shared = Archetype::from_layout(
            0,
            1,
            Vec::new(),
            vec![entry("Layer", 0, 4, true)],
            vec![0; 4],
            Vec::new(),
        );
        assert_ne!(instance.hash(), shared.hash());
    }

    #[test]
    fn entry_range() {
        assert_eq!(entry("Flag", 8, 1, false).range(), 8..9);
    }
}
