//! Property tests for reflection load/save.
//!
//! For every value of a reflected class, saving it and loading the result
//! into a default instance must reproduce the original, through both the JSON
//! and the MessagePack document encodings.

use orrery_reflect::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mood {
    Calm,
    Alert,
    Hostile,
}

impl ReflectEnum for Mood {
    const NAME: &'static str = "Mood";

    fn to_value(self) -> i64 {
        match self {
            Mood::Calm => 0,
            Mood::Alert => 5,
            Mood::Hostile => 10,
        }
    }

    fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Mood::Calm),
            5 => Some(Mood::Alert),
            10 => Some(Mood::Hostile),
            _ => None,
        }
    }

    fn define(def: &mut EnumDefinition) -> Result<(), ReflectError> {
        def.variant("Calm", Mood::Calm, attrs![])?
            .variant("Alert", Mood::Alert, attrs![])?
            .variant("Hostile", Mood::Hostile, attrs![])?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Body {
    mass: f64,
    layer: u8,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            mass: 1.0,
            layer: 0,
        }
    }
}

impl Reflect for Body {
    const NAME: &'static str = "Body";

    fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
        class
            .field("mass", |b: &Body| b.mass, |b, v| b.mass = v, attrs![])?
            .field("layer", |b: &Body| b.layer, |b, v| b.layer = v, attrs![])?
            .default_constructor()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Creature {
    body: Body,
    name: String,
    health: i32,
    tags: Vec<String>,
    mood: Mood,
}

impl Default for Creature {
    fn default() -> Self {
        Self {
            body: Body::default(),
            name: String::new(),
            health: 0,
            tags: Vec::new(),
            mood: Mood::Calm,
        }
    }
}

impl Reflect for Creature {
    const NAME: &'static str = "Creature";

    fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
        class
            .base::<Body>(|c| &c.body, |c| &mut c.body)?
            .field("name", |c: &Creature| c.name.clone(), |c, v| c.name = v, attrs![])?
            .field("health", |c: &Creature| c.health, |c, v| c.health = v, attrs![])?
            .field("tags", |c: &Creature| c.tags.clone(), |c, v| c.tags = v, attrs![])?
            .enum_field("mood", |c: &Creature| c.mood, |c, v| c.mood = v, attrs![])?
            .default_constructor()?;
        Ok(())
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_enum::<Mood>();
    registry.register::<Body>();
    registry.register::<Creature>();
    registry.initialize().expect("bootstrap");
    registry
}

fn mood_strategy() -> impl Strategy<Value = Mood> {
    prop_oneof![Just(Mood::Calm), Just(Mood::Alert), Just(Mood::Hostile)]
}

fn creature_strategy() -> impl Strategy<Value = Creature> {
    (
        (-1_000_000i64..1_000_000i64).prop_map(|v| v as f64 * 0.125),
        any::<u8>(),
        "[a-zA-Z ]{0,16}",
        any::<i32>(),
        prop::collection::vec("[a-z]{1,8}", 0..5),
        mood_strategy(),
    )
        .prop_map(|(mass, layer, name, health, tags, mood)| Creature {
            body: Body { mass, layer },
            name,
            health,
            tags,
            mood,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn save_then_load_reproduces_value(creature in creature_strategy()) {
        let registry = registry();
        let doc = registry.to_document(&creature).unwrap();
        let back: Creature = registry.from_document(&doc).unwrap();
        prop_assert_eq!(back, creature);
    }

    #[test]
    fn round_trip_survives_both_encodings(creature in creature_strategy()) {
        let registry = registry();
        let doc = registry.to_document(&creature).unwrap();
        for format in [DocumentFormat::Json, DocumentFormat::MessagePack] {
            let bytes = write_document(format, &doc).unwrap();
            let parsed = read_document(format, &bytes).unwrap();
            let back: Creature = registry.from_document(&parsed).unwrap();
            prop_assert_eq!(&back, &creature);
        }
    }

    #[test]
    fn missing_keys_keep_defaults(creature in creature_strategy(), keep_mass in any::<bool>()) {
        let registry = registry();
        let mut doc = registry.to_document(&creature).unwrap();
        let map = doc.as_object_mut().unwrap();
        map.remove("name");
        if !keep_mass {
            map.remove("mass");
        }
        map.insert("unknown_key".to_owned(), serde_json::json!(42));

        let back: Creature = registry.from_document(&doc).unwrap();
        prop_assert_eq!(back.name.as_str(), "");
        prop_assert_eq!(back.body.mass, if keep_mass { creature.body.mass } else { 1.0 });
        prop_assert_eq!(back.health, creature.health);
    }
}
