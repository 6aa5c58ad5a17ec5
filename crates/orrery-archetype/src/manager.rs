//! Entity manager over archetype instance storage.
//!
//! The manager owns (a handle to) the archetype table, one
//! [`InstanceStorage`] per registered archetype and the entity slot table.
//! Each storage keeps a parallel list of the entity owning every row so a
//! swap-remove can repoint the moved entity.

use std::collections::HashMap;
use std::sync::Arc;

use orrery_reflect::serialize::{SerializeReader, SerializeWriter};
use orrery_reflect::{Hash64, Reflect, Registry};

use crate::archetype::Archetype;
use crate::entity::{Entities, EntityId, EntityLocation};
use crate::storage::InstanceStorage;
use crate::table::ArchetypeTable;
use crate::ArchetypeError;

#[derive(Debug)]
struct Instances {
    storage: InstanceStorage,
    owners: Vec<EntityId>,
}

/// Owns entities and the instance rows backing them.
#[derive(Debug, Default)]
pub struct EcsManager {
    table: Arc<ArchetypeTable>,
    instances: HashMap<Hash64, Instances>,
    entities: Entities,
}

impl EcsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager publishing into an existing, possibly shared, table.
    pub fn with_table(table: Arc<ArchetypeTable>) -> Self {
        Self {
            table,
            instances: HashMap::new(),
            entities: Entities::new(),
        }
    }

    pub fn table(&self) -> &Arc<ArchetypeTable> {
        &self.table
    }

    // -- archetypes -----------------------------------------------------------

    /// Publish `archetype` and prepare storage for it. Adding an archetype
    /// that is already known returns the existing one.
    pub fn add_archetype(&mut self, archetype: Archetype) -> Result<Arc<Archetype>, ArchetypeError> {
        let archetype = self.table.insert(archetype)?;
        self.track(&archetype);
        Ok(archetype)
    }

    /// Prepare storage for an archetype that may already be in the table.
    pub fn add_shared_archetype(
        &mut self,
        archetype: &Arc<Archetype>,
    ) -> Result<Arc<Archetype>, ArchetypeError> {
        let archetype = match self.table.get(archetype.hash()) {
            Some(existing) if existing == *archetype => existing,
            Some(_) => {
                return Err(ArchetypeError::HashCollision {
                    hash: archetype.hash(),
                })
            }
            None => self.table.insert((**archetype).clone())?,
        };
        self.track(&archetype);
        Ok(archetype)
    }

    fn track(&mut self, archetype: &Arc<Archetype>) {
        self.instances
            .entry(archetype.hash())
            .or_insert_with(|| Instances {
                storage: InstanceStorage::new(Arc::clone(archetype)),
                owners: Vec::new(),
            });
    }

    pub fn archetype(&self, hash: Hash64) -> Option<&Arc<Archetype>> {
        self.instances.get(&hash).map(|i| i.storage.archetype())
    }

    pub fn has_archetype(&self, hash: Hash64) -> bool {
        self.instances.contains_key(&hash)
    }

    pub fn archetype_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of live instances of one archetype.
    pub fn instance_count(&self, hash: Hash64) -> usize {
        self.instances.get(&hash).map_or(0, |i| i.storage.len())
    }

    // -- entities -------------------------------------------------------------

    /// Spawn an entity with every component at its default value.
    pub fn create_entity(&mut self, archetype: Hash64) -> Result<EntityId, ArchetypeError> {
        let instances = self
            .instances
            .get_mut(&archetype)
            .ok_or(ArchetypeError::UnknownArchetype { hash: archetype })?;
        let index = instances.storage.create();
        let entity = self.entities.spawn(EntityLocation { archetype, index });
        instances.owners.push(entity);
        tracing::trace!(%entity, %archetype, index, "entity created");
        Ok(entity)
    }

    /// Spawn an entity and load its components from `reader`, an object
    /// keyed by component name. On failure no entity is left behind.
    pub fn load_entity(
        &mut self,
        registry: &Registry,
        archetype: Hash64,
        reader: &dyn SerializeReader,
    ) -> Result<EntityId, ArchetypeError> {
        let entity = self.create_entity(archetype)?;
        let loc = self.location(entity)?;
        let loaded = self
            .storage_mut(loc.archetype)?
            .load_instance(registry, loc.index, reader);
        if let Err(err) = loaded {
            self.despawn(entity)?;
            return Err(err);
        }
        Ok(entity)
    }

    /// Save every component of `entity` into `writer`, keyed by name.
    pub fn save_entity(
        &self,
        registry: &Registry,
        entity: EntityId,
        writer: &mut dyn SerializeWriter,
    ) -> Result<(), ArchetypeError> {
        let loc = self.location(entity)?;
        self.storage(loc.archetype)?
            .save_instance(registry, loc.index, writer)
    }

    /// Remove `entity` and release its handle.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), ArchetypeError> {
        let loc = self
            .entities
            .despawn(entity)
            .ok_or(ArchetypeError::StaleEntity { entity })?;
        let instances = self
            .instances
            .get_mut(&loc.archetype)
            .ok_or(ArchetypeError::UnknownArchetype { hash: loc.archetype })?;

        let moved = instances.storage.remove(loc.index)?;
        instances.owners.swap_remove(loc.index);
        if moved.is_some() {
            let moved_entity = instances.owners[loc.index];
            self.entities.relocate(moved_entity, loc.index);
        }
        tracing::trace!(%entity, archetype = %loc.archetype, "entity despawned");
        Ok(())
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of live entities across all archetypes.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Archetype hash of a live entity.
    pub fn archetype_of(&self, entity: EntityId) -> Option<Hash64> {
        self.entities.location(entity).map(|loc| loc.archetype)
    }

    // -- components -----------------------------------------------------------

    /// Decode component `T` of `entity`.
    pub fn get<T: Reflect>(&self, registry: &Registry, entity: EntityId) -> Result<T, ArchetypeError> {
        let loc = self.location(entity)?;
        self.storage(loc.archetype)?.get::<T>(registry, loc.index)
    }

    /// Overwrite component `T` of `entity`.
    pub fn set<T: Reflect>(
        &mut self,
        registry: &Registry,
        entity: EntityId,
        value: T,
    ) -> Result<(), ArchetypeError> {
        let loc = self.location(entity)?;
        self.storage_mut(loc.archetype)?
            .set(registry, loc.index, &value)
    }

    /// Shared component `T` of `entity`'s archetype.
    pub fn get_shared<T: Reflect>(
        &self,
        registry: &Registry,
        entity: EntityId,
    ) -> Result<T, ArchetypeError> {
        let loc = self.location(entity)?;
        self.storage(loc.archetype)?.archetype().shared::<T>(registry)
    }

    fn location(&self, entity: EntityId) -> Result<EntityLocation, ArchetypeError> {
        self.entities
            .location(entity)
            .ok_or(ArchetypeError::StaleEntity { entity })
    }

    fn storage(&self, hash: Hash64) -> Result<&InstanceStorage, ArchetypeError> {
        self.instances
            .get(&hash)
            .map(|i| &i.storage)
            .ok_or(ArchetypeError::UnknownArchetype { hash })
    }

    fn storage_mut(&mut self, hash: Hash64) -> Result<&mut InstanceStorage, ArchetypeError> {
        self.instances
            .get_mut(&hash)
            .map(|i| &mut i.storage)
            .ok_or(ArchetypeError::UnknownArchetype { hash })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use orrery_reflect::prelude::*;
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::builder::ArchetypeBuilder;

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
    #[derive(Debug, Default, Clone, Copy, PartialEq, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
    struct Layer {
        value: u32,
    }

    impl Reflect for Layer {
        const NAME: &'static str = "Layer";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class
                .field("value", |l: &Layer| l.value, |l, v| l.value = v, attrs![])?
                .default_constructor()?
                .component()?;
            Ok(())
        }
    }

    fn setup() -> (Registry, EcsManager, Hash64) {
        let mut registry = Registry::new();
        registry.register::<Position>();
        registry.register::<Layer>();
        registry.initialize().expect("bootstrap");

        let archetype = ArchetypeBuilder::new()
            .add("Position")
            .override_shared("Layer", json!({ "value": 2 }))
            .build(&registry)
            .unwrap();
        let mut manager = EcsManager::new();
        let hash = manager.add_archetype(archetype).unwrap().hash();
        (registry, manager, hash)
    }

    #[test]
    fn create_get_set() {
        let (registry, mut manager, hash) = setup();
        let e = manager.create_entity(hash).unwrap();
        assert_eq!(manager.get::<Position>(&registry, e).unwrap(), Position::default());

        manager.set(&registry, e, Position { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(
            manager.get::<Position>(&registry, e).unwrap(),
            Position { x: 1.0, y: 2.0 }
        );
        assert_eq!(manager.get_shared::<Layer>(&registry, e).unwrap(), Layer { value: 2 });
        assert_eq!(manager.archetype_of(e), Some(hash));
    }

    #[test]
    fn unknown_archetype_rejected() {
        let (_, mut manager, _) = setup();
        let err = manager.create_entity(Hash64::from_name("nope")).unwrap_err();
        assert!(matches!(err, ArchetypeError::UnknownArchetype { .. }));
        assert_eq!(manager.entity_count(), 0);
    }

    #[test]
    fn despawn_keeps_moved_entity_addressable() {
        let (registry, mut manager, hash) = setup();
        let ids: Vec<EntityId> = (0..3)
            .map(|i| {
                let e = manager.create_entity(hash).unwrap();
                manager
                    .set(&registry, e, Position { x: i as f32, y: 0.0 })
                    .unwrap();
                e
            })
            .collect();

        manager.despawn(ids[0]).unwrap();
        assert!(!manager.is_alive(ids[0]));
        assert_eq!(manager.get::<Position>(&registry, ids[2]).unwrap().x, 2.0);
        assert_eq!(manager.get::<Position>(&registry, ids[1]).unwrap().x, 1.0);
        assert_eq!(manager.instance_count(hash), 2);

        let err = manager.get::<Position>(&registry, ids[0]).unwrap_err();
        assert!(matches!(err, ArchetypeError::StaleEntity { .. }));
        assert!(manager.despawn(ids[0]).is_err());
    }

    #[test]
    fn load_entity_round_trips() {
        let (registry, mut manager, hash) = setup();
        let e = manager
            .load_entity(&registry, hash, &json!({ "Position": { "x": 4.5, "y": -1.0 } }))
            .unwrap();

        let mut out = Map::new();
        manager.save_entity(&registry, e, &mut out).unwrap();
        assert_eq!(Value::Object(out), json!({ "Position": { "x": 4.5, "y": -1.0 } }));
    }

    #[test]
    fn failed_load_leaves_no_entity() {
        let (registry, mut manager, hash) = setup();
        let err = manager
            .load_entity(&registry, hash, &json!({ "Position": { "x": "left" } }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert_eq!(manager.entity_count(), 0);
        assert_eq!(manager.instance_count(hash), 0);
    }

    #[test]
    fn managers_can_share_a_table() {
        let (registry, manager, hash) = setup();
        let mut other = EcsManager::with_table(Arc::clone(manager.table()));
        let archetype = Arc::clone(manager.archetype(hash).unwrap());
        let shared = other.add_shared_archetype(&archetype).unwrap();
        assert!(Arc::ptr_eq(&shared, &archetype));

        let e = other.create_entity(hash).unwrap();
        assert_eq!(other.get::<Position>(&registry, e).unwrap(), Position::default());
        assert_eq!(manager.entity_count(), 0);
    }
}
