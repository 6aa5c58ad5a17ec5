//! Load archetype files and spawn entities from them.
//!
//! Run with:
//!   cargo run --example load_archetype -p orrery-archetype [FILE.archetype ...]
//!
//! Without arguments a built-in archetype is loaded in both encodings.

use std::path::Path;

use anyhow::Context;
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
            .component()?;
        Ok(())
    }
}

fn describe(archetype: &Archetype) {
    println!("archetype {} (stride {})", archetype.hash(), archetype.stride());
    for entry in archetype.entries() {
        println!("  {:<10} offset {:>3} size {:>3}", entry.name, entry.offset, entry.size);
    }
    for entry in archetype.shared_entries() {
        println!("  {:<10} shared offset {:>3} size {:>3}", entry.name, entry.offset, entry.size);
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut registry = Registry::new();
    registry.register_module("demo", |r| {
        r.register::<Position>();
        r.register::<Flag>();
        r.register::<Layer>();
    });
    registry.initialize().context("reflection bootstrap failed")?;

    let mut manager = EcsManager::new();
    let loader = ArchetypeLoader::new();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    let mut loaded = Vec::new();
    if paths.is_empty() {
        let doc = json!({
            "components": ["Position", "Flag"],
            "shared_components": { "Layer": { "value": 2 } }
        });
        for format in [ArchetypeFormat::Json, ArchetypeFormat::MessagePack] {
            let bytes = write_document(format.document_format(), &doc)?;
            loaded.push(loader.load(&registry, &bytes, format, &mut manager)?);
        }
    } else {
        for path in &paths {
            let format = ArchetypeFormat::from_extension(path)
                .with_context(|| format!("'{path}' is not an archetype file"))?;
            let bytes = std::fs::read(Path::new(path)).with_context(|| format!("reading '{path}'"))?;
            loaded.push(
                loader
                    .load(&registry, &bytes, format, &mut manager)
                    .with_context(|| format!("loading '{path}'"))?,
            );
        }
    }

    for archetype in &loaded {
        describe(archetype);
    }
    println!("{} distinct archetype(s)", manager.archetype_count());

    if let Some(archetype) = loaded.first() {
        if archetype.contains(Hash64::from_name("Position")) {
            let entity = manager.load_entity(
                &registry,
                archetype.hash(),
                &json!({ "Position": { "x": 3.0, "y": 4.0 } }),
            )?;
            let position: Position = manager.get(&registry, entity)?;
            println!("spawned {entity} at ({}, {})", position.x, position.y);
        }
    }

    Ok(())
}
