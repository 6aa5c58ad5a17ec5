//! Integration tests for the archetype loader callback and the manager it
//! registers into, including layered overrides of a base archetype.

use std::sync::Arc;

use orrery_archetype::prelude::*;
use orrery_reflect::prelude::*;
use serde_json::json;

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
            .component()?
            .attribute(DisplayName("Layer".into()))?;
        Ok(())
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_module("core", |r| {
        r.register::<Position>();
        r.register::<Flag>();
    });
    registry.register_module("scene", |r| {
        r.register::<Layer>();
    });
    registry.initialize().expect("bootstrap");
    registry
}

#[test]
fn position_flag_layouts() {
    let registry = registry();
    let loader = ArchetypeLoader::new();

    let forward = loader
        .parse(&registry, br#"{ "components": ["Position", "Flag"] }"#, ArchetypeFormat::Json)
        .unwrap();
    assert_eq!(forward.offset_of(Hash64::from_name("Position")), Some(0));
    assert_eq!(forward.offset_of(Hash64::from_name("Flag")), Some(8));
    assert_eq!(forward.size_of(Hash64::from_name("Flag")), Some(1));
    assert_eq!(forward.stride(), 12);

    let reverse = loader
        .parse(&registry, br#"{ "components": ["Flag", "Position"] }"#, ArchetypeFormat::Json)
        .unwrap();
    assert_eq!(reverse.offset_of(Hash64::from_name("Flag")), Some(0));
    assert_eq!(reverse.offset_of(Hash64::from_name("Position")), Some(4));
    assert_eq!(reverse.stride(), 12);
}

#[test]
fn binary_file_loads_into_manager() {
    let registry = registry();
    let mut manager = EcsManager::new();
    let doc = json!({
        "components": ["Position", "Flag"],
        "shared_components": { "Layer": { "value": 4 } }
    });
    let bytes = write_document(DocumentFormat::MessagePack, &doc).unwrap();
    let format = ArchetypeFormat::from_extension("crates/player.archetype.bin").unwrap();

    let archetype = ArchetypeLoader::new()
        .load(&registry, &bytes, format, &mut manager)
        .unwrap();
    assert!(manager.has_archetype(archetype.hash()));

    let entity = manager
        .load_entity(
            &registry,
            archetype.hash(),
            &json!({ "Position": { "x": 1.0, "y": 1.5 }, "Flag": { "on": true } }),
        )
        .unwrap();
    assert_eq!(
        manager.get::<Position>(&registry, entity).unwrap(),
        Position { x: 1.0, y: 1.5 }
    );
    assert_eq!(manager.get_shared::<Layer>(&registry, entity).unwrap(), Layer { value: 4 });
}

#[test]
fn layered_override_derives_new_archetype() {
    let registry = registry();
    let mut manager = EcsManager::new();
    let base = ArchetypeLoader::new()
        .load(
            &registry,
            br#"{ "components": ["Position"], "shared_components": ["Layer"] }"#,
            ArchetypeFormat::Json,
            &mut manager,
        )
        .unwrap();

    // A scene layer adds a flag and renames its layer on top of the base.
    let overrides = json!({
        "components": ["Flag"],
        "shared_components": { "Layer": { "value": 12 } }
    });
    let mut builder = ArchetypeBuilder::new();
    builder.derive_from(&base);
    let layered = manager
        .table()
        .finalize(&builder, &registry, &overrides)
        .unwrap();
    let layered = manager.add_shared_archetype(&layered).unwrap();

    assert_ne!(layered.hash(), base.hash());
    assert_eq!(manager.archetype_count(), 2);
    assert_eq!(base.shared::<Layer>(&registry).unwrap(), Layer::default());
    assert_eq!(layered.shared::<Layer>(&registry).unwrap(), Layer { value: 12 });

    let a = manager.create_entity(base.hash()).unwrap();
    let b = manager.create_entity(layered.hash()).unwrap();
    manager.set(&registry, b, Flag { on: true }).unwrap();
    assert!(manager.get::<Flag>(&registry, b).unwrap().on);
    assert!(matches!(
        manager.get::<Flag>(&registry, a),
        Err(ArchetypeError::MissingComponent { .. })
    ));
}

#[test]
fn archetypes_are_readable_across_threads() {
    let registry = Arc::new(registry());
    let table = Arc::new(ArchetypeTable::new());
    let archetype = table
        .finalize(
            &ArchetypeBuilder::new(),
            &registry,
            &json!({ "components": ["Flag", "Position"] }),
        )
        .unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            let table = Arc::clone(&table);
            let expected = Arc::clone(&archetype);
            scope.spawn(move || {
                let again = table
                    .finalize(
                        &ArchetypeBuilder::new(),
                        &registry,
                        &json!({ "components": ["Flag", "Position"] }),
                    )
                    .unwrap();
                assert!(Arc::ptr_eq(&again, &expected));
                assert_eq!(again.stride(), 12);
            });
        }
    });
    assert_eq!(table.len(), 1);
}

#[test]
fn component_classes_are_discoverable() {
    let registry = registry();
    let components: Vec<&str> = registry
        .classes()
        .filter(|c| c.is_component())
        .map(|c| c.name())
        .collect();
    assert_eq!(components.len(), 3);
    assert_eq!(registry.types_in_module("scene"), vec![Hash64::from_name("Layer")]);
    assert!(registry
        .class_of::<Layer>()
        .and_then(|c| c.get_attribute::<DisplayName>())
        .is_some());
}
