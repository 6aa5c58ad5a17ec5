//! Process-wide table of finalized archetypes keyed by archetype hash.
//!
//! Readers take a shared lock; only the first insertion of a component set
//! takes the write lock. A repeat insertion returns the archetype already in
//! the table, so every holder of a given hash sees the same `Arc`. An insert
//! whose layout differs from the stored one under the same hash is refused.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use orrery_reflect::serialize::SerializeReader;
use orrery_reflect::{Hash64, Registry};

use crate::archetype::Archetype;
use crate::builder::ArchetypeBuilder;
use crate::ArchetypeError;

#[derive(Debug, Default)]
pub struct ArchetypeTable {
    archetypes: RwLock<HashMap<Hash64, Arc<Archetype>>>,
}

impl ArchetypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `archetype`, or return the equal entry already stored under
    /// its hash.
    pub fn insert(&self, archetype: Archetype) -> Result<Arc<Archetype>, ArchetypeError> {
        let hash = archetype.hash();
        if let Some(existing) = self.get(hash) {
            return cache_hit(existing, &archetype);
        }

        let mut map = self.archetypes.write().unwrap_or_else(|e| e.into_inner());
        // Another writer may have won the race between the read and write lock.
        if let Some(existing) = map.get(&hash) {
            return cache_hit(Arc::clone(existing), &archetype);
        }
        let archetype = Arc::new(archetype);
        map.insert(hash, Arc::clone(&archetype));
        tracing::debug!(
            archetype = %hash,
            stride = archetype.stride(),
            total = map.len(),
            "archetype table insert"
        );
        Ok(archetype)
    }

    /// Build from `builder` and `reader` and publish the result. Nothing is
    /// inserted if the build fails.
    pub fn finalize(
        &self,
        builder: &ArchetypeBuilder,
        registry: &Registry,
        reader: &dyn SerializeReader,
    ) -> Result<Arc<Archetype>, ArchetypeError> {
        let archetype = builder.finalize(registry, reader)?;
        self.insert(archetype)
    }

    pub fn get(&self, hash: Hash64) -> Option<Arc<Archetype>> {
        self.archetypes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&hash)
            .cloned()
    }

    pub fn contains(&self, hash: Hash64) -> bool {
        self.archetypes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.archetypes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashes of every stored archetype, sorted.
    pub fn hashes(&self) -> Vec<Hash64> {
        let mut hashes: Vec<Hash64> = self
            .archetypes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        hashes.sort();
        hashes
    }
}

fn cache_hit(existing: Arc<Archetype>, incoming: &Archetype) -> Result<Arc<Archetype>, ArchetypeError> {
    let hash = incoming.hash();
    if *existing != *incoming {
        tracing::error!(
            archetype = %hash,
            stored_stride = existing.stride(),
            incoming_stride = incoming.stride(),
            "archetype hash collision"
        );
        return Err(ArchetypeError::HashCollision { hash });
    }
    tracing::debug!(archetype = %hash, "archetype table cache hit");
    Ok(existing)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
