//! The reflection registry: three registration chains and their definitions.
//!
//! Registration only prepends a node to a chain; nothing is built until
//! [`Registry::initialize`] walks the chains in dependency order:
//!
//! 1. **enums** -- referenced by class fields,
//! 2. **attributes** -- attribute kinds, validated against class attributes,
//! 3. **classes** -- followed by a link pass that resolves every base
//!    reference and copies inheritable base attributes into derived classes.
//!
//! Each node moves `Registered -> Initialized` exactly once. A node whose
//! type is already defined (for example because two modules registered the
//! same type) is skipped after its shape is checked against the existing
//! definition. The first failing node aborts the walk with
//! [`ReflectError::Bootstrap`].
//!
//! After bootstrap the registry is read-only; it is `Send + Sync` and meant to
//! be shared behind an `Arc`.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde_json::{Map, Value};

use crate::attribute::{
    Attribute, AttributeDefinition, AttributeList, DisplayName, NoSerialize, Range, ReadOnly,
    ResourceExtension,
};
use crate::definition::{ClassBuilder, ClassDefinition, Reflect};
use crate::enumeration::{EnumDefinition, ReflectEnum};
use crate::hash::{Hash64, TypeHash};
use crate::serialize::{SerializeReader, SerializeWriter};
use crate::{ReflectError, RegistryConfig};

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

/// One of the three registration chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Enum,
    Attribute,
    Class,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Enum => "enum",
            Chain::Attribute => "attribute",
            Chain::Class => "class",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a chain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Linked into its chain, definition not built yet.
    Registered,
    /// Definition built (or verified against an existing one) and queryable.
    Initialized,
}

type BuildFn<D> = Box<dyn Fn() -> Result<D, ReflectError> + Send + Sync>;

struct ChainNode<D> {
    name: String,
    hash: Hash64,
    module: Option<String>,
    state: NodeState,
    build: BuildFn<D>,
}

/// What the initialization walk needs from a definition.
trait ChainEntry {
    fn entry_name(&self) -> &str;
    fn version(&self) -> Hash64;
    fn assign_module(&mut self, module: Option<String>);
}

impl ChainEntry for EnumDefinition {
    fn entry_name(&self) -> &str {
        self.name()
    }

    fn version(&self) -> Hash64 {
        self.version_hash()
    }

    fn assign_module(&mut self, module: Option<String>) {
        self.set_module(module);
    }
}

impl ChainEntry for AttributeDefinition {
    fn entry_name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Hash64 {
        self.hash.chain(self.type_name.as_bytes())
    }

    fn assign_module(&mut self, module: Option<String>) {
        self.module = module;
    }
}

impl ChainEntry for ClassDefinition {
    fn entry_name(&self) -> &str {
        self.name()
    }

    fn version(&self) -> Hash64 {
        self.version_hash()
    }

    fn assign_module(&mut self, module: Option<String>) {
        self.set_module(module);
    }
}

fn prepend<D>(
    chain: &mut VecDeque<ChainNode<D>>,
    kind: Chain,
    name: &str,
    module: Option<String>,
    build: BuildFn<D>,
) {
    tracing::trace!(chain = %kind, node = name, module = ?module, "registered");
    chain.push_front(ChainNode {
        name: name.to_owned(),
        hash: Hash64::from_name(name),
        module,
        state: NodeState::Registered,
        build,
    });
}

/// Walk one chain, building every `Registered` node. Returns how many nodes
/// were initialized by this call.
fn initialize_chain<D: ChainEntry>(
    kind: Chain,
    chain: &mut VecDeque<ChainNode<D>>,
    defs: &mut HashMap<Hash64, D>,
    verify_redefinitions: bool,
    mut accept: impl FnMut(&D) -> Result<(), ReflectError>,
) -> Result<usize, ReflectError> {
    let mut initialized = 0;
    for node in chain.iter_mut() {
        if node.state == NodeState::Initialized {
            continue;
        }
        initialize_node(kind, node, defs, verify_redefinitions, &mut accept).map_err(|source| {
            ReflectError::Bootstrap {
                chain: kind.as_str(),
                node: node.name.clone(),
                source: Box::new(source),
            }
        })?;
        node.state = NodeState::Initialized;
        initialized += 1;
        tracing::debug!(chain = %kind, node = %node.name, "initialized");
    }
    tracing::info!(
        chain = %kind,
        initialized,
        total = chain.len(),
        "reflection chain initialized"
    );
    Ok(initialized)
}

fn initialize_node<D: ChainEntry>(
    kind: Chain,
    node: &ChainNode<D>,
    defs: &mut HashMap<Hash64, D>,
    verify_redefinitions: bool,
    accept: &mut impl FnMut(&D) -> Result<(), ReflectError>,
) -> Result<(), ReflectError> {
    match defs.get(&node.hash) {
        Some(existing) if existing.entry_name() != node.name => Err(ReflectError::HashCollision {
            chain: kind.as_str(),
            existing: existing.entry_name().to_owned(),
            incoming: node.name.clone(),
            hash: node.hash,
        }),
        Some(existing) => {
            if verify_redefinitions {
                let scratch = (node.build)()?;
                let (old, new) = (existing.version(), scratch.version());
                if old != new {
                    return Err(ReflectError::VersionMismatch {
                        name: node.name.clone(),
                        existing: old,
                        incoming: new,
                    });
                }
            }
            tracing::debug!(chain = %kind, node = %node.name, "already defined, skipped");
            Ok(())
        }
        None => {
            let mut def = (node.build)()?;
            def.assign_module(node.module.clone());
            accept(&def)?;
            defs.insert(node.hash, def);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owner of every enum, attribute and class definition.
pub struct Registry {
    config: RegistryConfig,
    enum_chain: VecDeque<ChainNode<EnumDefinition>>,
    attribute_chain: VecDeque<ChainNode<AttributeDefinition>>,
    class_chain: VecDeque<ChainNode<ClassDefinition>>,
    enums: HashMap<Hash64, EnumDefinition>,
    enum_types: HashMap<TypeId, Hash64>,
    attributes: HashMap<Hash64, AttributeDefinition>,
    attribute_kinds: HashMap<TypeId, Hash64>,
    classes: HashMap<Hash64, ClassDefinition>,
    class_types: HashMap<TypeId, Hash64>,
    current_module: Option<String>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("enums", &self.enums.len())
            .field("attributes", &self.attributes.len())
            .field("classes", &self.classes.len())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with default configuration. The built-in attribute kinds are
    /// already on the attribute chain.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        let mut registry = Self {
            config,
            enum_chain: VecDeque::new(),
            attribute_chain: VecDeque::new(),
            class_chain: VecDeque::new(),
            enums: HashMap::new(),
            enum_types: HashMap::new(),
            attributes: HashMap::new(),
            attribute_kinds: HashMap::new(),
            classes: HashMap::new(),
            class_types: HashMap::new(),
            current_module: None,
        };
        registry.register_attribute::<NoSerialize>("NoSerialize");
        registry.register_attribute::<ReadOnly>("ReadOnly");
        registry.register_attribute::<Range>("Range");
        registry.register_attribute::<ResourceExtension>("ResourceExtension");
        registry.register_attribute::<DisplayName>("DisplayName");
        registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -- registration -------------------------------------------------------

    /// Run `register` with every node it adds owned by module `name`.
    pub fn register_module(&mut self, name: &str, register: impl FnOnce(&mut Registry)) {
        let previous = self.current_module.replace(name.to_owned());
        register(self);
        self.current_module = previous;
    }

    /// Put `E` on the enum chain.
    pub fn register_enum<E: ReflectEnum>(&mut self) {
        let module = self.current_module.clone();
        prepend(
            &mut self.enum_chain,
            Chain::Enum,
            E::NAME,
            module,
            Box::new(|| {
                let mut def = EnumDefinition::of::<E>();
                E::define(&mut def)?;
                def.mark_defined()?;
                Ok(def)
            }),
        );
    }

    /// Put an enum with no Rust counterpart on the enum chain.
    pub fn register_enum_with<F>(&mut self, name: &str, define: F)
    where
        F: Fn(&mut EnumDefinition) -> Result<(), ReflectError> + Send + Sync + 'static,
    {
        let module = self.current_module.clone();
        let enum_name = name.to_owned();
        prepend(
            &mut self.enum_chain,
            Chain::Enum,
            name,
            module,
            Box::new(move || {
                let mut def = EnumDefinition::new(&enum_name);
                define(&mut def)?;
                def.mark_defined()?;
                Ok(def)
            }),
        );
    }

    /// Put attribute kind `A` on the attribute chain under `name`.
    pub fn register_attribute<A: Attribute>(&mut self, name: &str) {
        let module = self.current_module.clone();
        let attr_name = name.to_owned();
        prepend(
            &mut self.attribute_chain,
            Chain::Attribute,
            name,
            module,
            Box::new(move || {
                Ok(AttributeDefinition {
                    name: attr_name.clone(),
                    hash: Hash64::from_name(&attr_name),
                    type_id: TypeId::of::<A>(),
                    type_name: std::any::type_name::<A>(),
                    module: None,
                })
            }),
        );
    }

    /// Put `T` on the class chain, defined by [`Reflect::define`].
    pub fn register<T: Reflect>(&mut self) {
        self.register_with::<T, _>(T::define);
    }

    /// Put `T` on the class chain with a caller-supplied definer.
    pub fn register_with<T, F>(&mut self, define: F)
    where
        T: Reflect,
        F: Fn(&mut ClassBuilder<'_, T>) -> Result<(), ReflectError> + Send + Sync + 'static,
    {
        let module = self.current_module.clone();
        prepend(
            &mut self.class_chain,
            Chain::Class,
            T::NAME,
            module,
            Box::new(move || ClassDefinition::build_with::<T>(&define)),
        );
    }

    // -- initialization -----------------------------------------------------

    /// Initialize every registered node: enums, then attributes, then
    /// classes, then base linking. Safe to call again after registering more
    /// types; already initialized nodes are skipped.
    pub fn initialize(&mut self) -> Result<(), ReflectError> {
        let verify = self.config.verify_redefinitions;

        let enum_types = &mut self.enum_types;
        initialize_chain(
            Chain::Enum,
            &mut self.enum_chain,
            &mut self.enums,
            verify,
            |def| {
                if let Some(type_id) = def.type_id() {
                    enum_types.insert(type_id, def.hash());
                }
                Ok(())
            },
        )?;

        let attribute_kinds = &mut self.attribute_kinds;
        initialize_chain(
            Chain::Attribute,
            &mut self.attribute_chain,
            &mut self.attributes,
            verify,
            |def| {
                attribute_kinds.insert(def.type_id, def.hash);
                Ok(())
            },
        )?;

        let attribute_kinds = &self.attribute_kinds;
        let class_types = &mut self.class_types;
        let reject = self.config.reject_unregistered_attributes;
        initialize_chain(
            Chain::Class,
            &mut self.class_chain,
            &mut self.classes,
            verify,
            |def| {
                check_attribute_kinds(def, attribute_kinds, reject)?;
                class_types.insert(def.type_id(), def.hash());
                Ok(())
            },
        )?;

        self.link_classes()
    }

    /// Resolve base references and propagate inheritable base attributes.
    fn link_classes(&mut self) -> Result<(), ReflectError> {
        for node in &self.class_chain {
            let Some(def) = self.classes.get(&node.hash) else {
                continue;
            };
            if let Some(base) = def.bases().iter().find(|b| !self.classes.contains_key(&b.hash())) {
                return Err(ReflectError::Bootstrap {
                    chain: Chain::Class.as_str(),
                    node: def.name().to_owned(),
                    source: Box::new(ReflectError::UnknownBase {
                        class: def.name().to_owned(),
                        base: base.name().to_owned(),
                    }),
                });
            }
            if self.reaches_itself(def) {
                tracing::error!(class = %def.name(), "base cycle");
                return Err(ReflectError::Bootstrap {
                    chain: Chain::Class.as_str(),
                    node: def.name().to_owned(),
                    source: Box::new(ReflectError::CyclicBase {
                        class: def.name().to_owned(),
                    }),
                });
            }
        }

        let inherited: Vec<(Hash64, AttributeList)> = self
            .classes
            .values()
            .map(|def| (def.hash(), self.collect_inherited(def)))
            .collect();
        for (hash, attributes) in inherited {
            if let Some(def) = self.classes.get_mut(&hash) {
                def.set_inherited_attributes(attributes);
            }
        }
        Ok(())
    }

    /// Whether `def` is reachable from its own bases.
    fn reaches_itself(&self, def: &ClassDefinition) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<TypeHash> = def.bases().iter().map(|b| b.hash()).collect();
        while let Some(hash) = queue.pop_front() {
            if hash == def.hash() {
                return true;
            }
            if !visited.insert(hash) {
                continue;
            }
            if let Some(base) = self.classes.get(&hash) {
                queue.extend(base.bases().iter().map(|b| b.hash()));
            }
        }
        false
    }

    /// Inheritable attributes of every transitive base, nearest first.
    fn collect_inherited(&self, def: &ClassDefinition) -> AttributeList {
        let mut out = AttributeList::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<TypeHash> = def.bases().iter().map(|b| b.hash()).collect();
        while let Some(hash) = queue.pop_front() {
            if hash == def.hash() || !visited.insert(hash) {
                continue;
            }
            if let Some(base) = self.classes.get(&hash) {
                out.extend(base.attributes().inheritable());
                queue.extend(base.bases().iter().map(|b| b.hash()));
            }
        }
        out
    }

    /// Whether every node on every chain is initialized.
    pub fn is_initialized(&self) -> bool {
        self.enum_chain.iter().all(|n| n.state == NodeState::Initialized)
            && self.attribute_chain.iter().all(|n| n.state == NodeState::Initialized)
            && self.class_chain.iter().all(|n| n.state == NodeState::Initialized)
    }

    /// Node names and states of one chain, head first.
    pub fn chain_nodes(&self, chain: Chain) -> Vec<(&str, NodeState)> {
        fn collect<D>(nodes: &VecDeque<ChainNode<D>>) -> Vec<(&str, NodeState)> {
            nodes.iter().map(|n| (n.name.as_str(), n.state)).collect()
        }
        match chain {
            Chain::Enum => collect(&self.enum_chain),
            Chain::Attribute => collect(&self.attribute_chain),
            Chain::Class => collect(&self.class_chain),
        }
    }

    // -- queries ------------------------------------------------------------

    pub fn class(&self, hash: TypeHash) -> Option<&ClassDefinition> {
        self.classes.get(&hash)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassDefinition> {
        self.class(Hash64::from_name(name))
            .filter(|def| def.name() == name)
    }

    pub fn class_of<T: Reflect>(&self) -> Option<&ClassDefinition> {
        self.class(Hash64::from_name(T::NAME))
    }

    /// Class registered for a Rust type, looked up by `TypeId`.
    pub fn class_for_type(&self, type_id: TypeId) -> Option<&ClassDefinition> {
        self.class_types
            .get(&type_id)
            .and_then(|hash| self.classes.get(hash))
    }

    /// Every defined class, in no particular order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.classes.values()
    }

    pub fn enumeration(&self, hash: TypeHash) -> Option<&EnumDefinition> {
        self.enums.get(&hash)
    }

    pub fn enum_by_name(&self, name: &str) -> Option<&EnumDefinition> {
        self.enumeration(Hash64::from_name(name))
            .filter(|def| def.name() == name)
    }

    pub fn enum_of<E: ReflectEnum>(&self) -> Option<&EnumDefinition> {
        self.enum_types
            .get(&TypeId::of::<E>())
            .and_then(|hash| self.enums.get(hash))
    }

    pub fn attribute(&self, hash: Hash64) -> Option<&AttributeDefinition> {
        self.attributes.get(&hash)
    }

    /// Attribute definition for kind `A`, if `A` was registered.
    pub fn attribute_of<A: Attribute>(&self) -> Option<&AttributeDefinition> {
        self.attribute_kinds
            .get(&TypeId::of::<A>())
            .and_then(|hash| self.attributes.get(hash))
    }

    /// Classes carrying a class attribute of kind `A` (own or inherited),
    /// sorted by name.
    pub fn classes_with_attribute<A: Attribute>(&self) -> Vec<&ClassDefinition> {
        let mut out: Vec<&ClassDefinition> = self
            .classes
            .values()
            .filter(|def| def.has_attribute::<A>())
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Classes that have `base` as a direct or transitive base, sorted by
    /// name.
    pub fn classes_implementing(&self, base: TypeHash) -> Vec<&ClassDefinition> {
        let mut out: Vec<&ClassDefinition> = self
            .classes
            .values()
            .filter(|def| def.has_interface(self, base))
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Hashes of the classes and enums owned by module `name`, sorted.
    pub fn types_in_module(&self, name: &str) -> Vec<TypeHash> {
        let mut out: Vec<TypeHash> = self
            .classes
            .values()
            .filter(|def| def.module() == Some(name))
            .map(|def| def.hash())
            .chain(
                self.enums
                    .values()
                    .filter(|def| def.module() == Some(name))
                    .map(|def| def.hash()),
            )
            .collect();
        out.sort();
        out
    }

    // -- typed load / save --------------------------------------------------

    fn require_class<T: Reflect>(&self) -> Result<&ClassDefinition, ReflectError> {
        self.class_of::<T>().ok_or_else(|| ReflectError::UnknownType {
            name: T::NAME.to_owned(),
        })
    }

    /// Load `instance`'s fields from `reader`.
    pub fn load_into<T: Reflect>(
        &self,
        reader: &dyn SerializeReader,
        instance: &mut T,
    ) -> Result<(), ReflectError> {
        self.require_class::<T>()?.load(self, reader, instance)
    }

    /// Save `instance`'s fields into `writer`.
    pub fn save_from<T: Reflect>(
        &self,
        instance: &T,
        writer: &mut dyn SerializeWriter,
    ) -> Result<(), ReflectError> {
        self.require_class::<T>()?.save(self, instance, writer)
    }

    /// Save `instance` into a fresh JSON object.
    pub fn to_document<T: Reflect>(&self, instance: &T) -> Result<Value, ReflectError> {
        let mut map = Map::new();
        self.save_from(instance, &mut map)?;
        Ok(Value::Object(map))
    }

    /// Build a `T` with its zero-argument constructor and load it from
    /// `reader`.
    pub fn from_document<T: Reflect>(
        &self,
        reader: &dyn SerializeReader,
    ) -> Result<T, ReflectError> {
        let def = self.require_class::<T>()?;
        let boxed = def
            .construct_default()
            .ok_or_else(|| ReflectError::MissingConstructor {
                class: T::NAME.to_owned(),
                signature: "()".to_owned(),
            })?;
        let mut instance = boxed.downcast::<T>().map_err(|_| ReflectError::TypeMismatch {
            expected: T::NAME.to_owned(),
            found: "another type".to_owned(),
        })?;
        def.load(self, reader, &mut *instance)?;
        Ok(*instance)
    }
}

fn check_attribute_kinds(
    def: &ClassDefinition,
    registered: &HashMap<TypeId, Hash64>,
    reject: bool,
) -> Result<(), ReflectError> {
    for (owner, attr) in def.attribute_owners() {
        if registered.contains_key(&attr.kind_id()) {
            continue;
        }
        if reject {
            return Err(ReflectError::UnregisteredAttribute {
                target: owner,
                kind: attr.kind_name().to_owned(),
            });
        }
        tracing::warn!(owner = %owner, kind = attr.kind_name(), "attribute kind not registered");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use crate::impl_attribute;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Team {
        Red,
        Blue,
    }

    impl ReflectEnum for Team {
        const NAME: &'static str = "Team";

        fn to_value(self) -> i64 {
            self as i64
        }

        fn from_value(value: i64) -> Option<Self> {
            match value {
                0 => Some(Team::Red),
                1 => Some(Team::Blue),
                _ => None,
            }
        }

        fn define(def: &mut EnumDefinition) -> Result<(), ReflectError> {
            def.variant("Red", Team::Red, attrs![])?
                .variant("Blue", Team::Blue, attrs![])?;
            Ok(())
        }
    }

    #[derive(Debug, Clone)]
    struct Serializable;
    impl_attribute!(Serializable);

    #[derive(Debug, Clone)]
    struct Unregistered;
    impl_attribute!(Unregistered);

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Actor {
        id: u32,
    }

    impl Reflect for Actor {
        const NAME: &'static str = "Actor";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class
                .field("id", |a: &Actor| a.id, |a, v| a.id = v, attrs![])?
                .attribute(Serializable)?
                .attribute(DisplayName("Actor".into()))?
                .default_constructor()?;
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Pawn {
        actor: Actor,
        team: Team,
    }

    impl Default for Pawn {
        fn default() -> Self {
            Self {
                actor: Actor::default(),
                team: Team::Red,
            }
        }
    }

    impl Reflect for Pawn {
        const NAME: &'static str = "Pawn";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class
                .base::<Actor>(|p| &p.actor, |p| &mut p.actor)?
                .enum_field("team", |p: &Pawn| p.team, |p, v| p.team = v, attrs![])?
                .default_constructor()?;
            Ok(())
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Hero {
        pawn: Pawn,
    }

    impl Reflect for Hero {
        const NAME: &'static str = "Hero";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class
                .base::<Pawn>(|h| &h.pawn, |h| &mut h.pawn)?
                .default_constructor()?;
            Ok(())
        }
    }

    fn game_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_module("game", |r| {
            r.register::<Hero>();
            r.register::<Pawn>();
            r.register::<Actor>();
            r.register_enum::<Team>();
        });
        registry.register_attribute::<Serializable>("Serializable");
        registry.initialize().unwrap();
        registry
    }

    #[test]
    fn registry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }

    #[test]
    fn registration_prepends_and_defers_building() {
        let mut registry = Registry::new();
        registry.register::<Actor>();
        registry.register::<Pawn>();
        assert!(!registry.is_initialized());
        assert!(registry.class_of::<Actor>().is_none());
        assert_eq!(
            registry.chain_nodes(Chain::Class),
            vec![("Pawn", NodeState::Registered), ("Actor", NodeState::Registered)]
        );
    }

    #[test]
    fn initialize_builds_every_chain() {
        let registry = game_registry();
        assert!(registry.is_initialized());
        assert!(registry.class_of::<Hero>().is_some());
        assert!(registry.class_by_name("Actor").is_some());
        assert!(registry.class_by_name("Nobody").is_none());
        assert!(registry.enum_of::<Team>().is_some());
        assert!(registry.enum_by_name("Team").is_some());
        assert!(registry.attribute_of::<Serializable>().is_some());
        assert!(registry
            .attribute(Hash64::from_name("NoSerialize"))
            .is_some());
        assert!(registry
            .class_for_type(TypeId::of::<Pawn>())
            .is_some_and(|d| d.name() == "Pawn"));
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut registry = game_registry();
        registry.initialize().unwrap();
        assert!(registry.is_initialized());
        assert_eq!(registry.classes().count(), 3);
    }

    #[test]
    fn duplicate_registration_is_skipped() {
        let mut registry = Registry::new();
        registry.register::<Actor>();
        registry.register::<Actor>();
        registry.initialize().unwrap();
        assert_eq!(registry.classes().count(), 1);
        assert!(registry
            .chain_nodes(Chain::Class)
            .iter()
            .all(|(_, state)| *state == NodeState::Initialized));
    }

    #[test]
    fn redefinition_with_different_shape_fails() {
        let mut registry = Registry::new();
        registry.register::<Actor>();
        registry.initialize().unwrap();

        registry.register_with::<Actor, _>(|class| {
            class.field("id", |a: &Actor| a.id, |a, v| a.id = v, attrs![])?;
            Ok(())
        });
        let err = registry.initialize().unwrap_err();
        match err {
            ReflectError::Bootstrap { chain, node, source } => {
                assert_eq!(chain, "class");
                assert_eq!(node, "Actor");
                assert!(matches!(*source, ReflectError::VersionMismatch { .. }));
            }
            other => panic!("expected bootstrap error, got {other:?}"),
        }
        assert!(!registry.is_initialized());
    }

    #[test]
    fn redefinition_check_can_be_disabled() {
        let mut registry = Registry::with_config(RegistryConfig {
            verify_redefinitions: false,
            ..RegistryConfig::default()
        });
        registry.register::<Actor>();
        registry.register_with::<Actor, _>(|_| Ok(()));
        registry.initialize().unwrap();
        assert!(registry.is_initialized());
    }

    #[test]
    fn failing_node_aborts_walk() {
        let mut registry = Registry::new();
        registry.register_enum_with("Broken", |def| {
            def.entry("A", 0, attrs![])?.entry("A", 1, attrs![])?;
            Ok(())
        });
        registry.register::<Actor>();
        let err = registry.initialize().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Bootstrap);
        // Classes come after enums and were never reached.
        assert!(registry.class_of::<Actor>().is_none());
    }

    #[test]
    fn unknown_base_is_bootstrap_failure() {
        let mut registry = Registry::new();
        registry.register::<Pawn>();
        registry.register_enum::<Team>();
        let err = registry.initialize().unwrap_err();
        match err {
            ReflectError::Bootstrap { source, .. } => {
                assert!(matches!(*source, ReflectError::UnknownBase { .. }));
            }
            other => panic!("expected bootstrap error, got {other:?}"),
        }
    }

    #[derive(Debug, Default)]
    struct Ping {
        pong: Pong,
    }

    #[derive(Debug, Default)]
    struct Pong;

    impl Reflect for Ping {
        const NAME: &'static str = "Ping";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class.base::<Pong>(|p| &p.pong, |p| &mut p.pong)?;
            Ok(())
        }
    }

    impl Reflect for Pong {
        const NAME: &'static str = "Pong";

        fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
            class.base::<Ping>(|_| unreachable!(), |_| unreachable!())?;
            Ok(())
        }
    }

    #[test]
    fn base_cycle_is_bootstrap_failure() {
        let mut registry = Registry::new();
        registry.register::<Ping>();
        registry.register::<Pong>();
        let err = registry.initialize().unwrap_err();
        match err {
            ReflectError::Bootstrap { source, .. } => {
                assert!(matches!(*source, ReflectError::CyclicBase { .. }));
            }
            other => panic!("expected bootstrap error, got {other:?}"),
        }

        // Base walks over the half-linked classes terminate.
        let implementing: Vec<&str> = registry
            .classes_implementing(Hash64::from_name("Ping"))
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(implementing, vec!["Pong"]);

        let ping_def = registry.class_of::<Ping>().unwrap();
        let ping = Ping::default();
        assert!(matches!(
            ping_def.get::<u32>(&registry, &ping, "missing"),
            Err(ReflectError::CyclicBase { .. })
        ));
        assert!(matches!(
            ping_def.to_document(&registry, &ping),
            Err(ReflectError::CyclicBase { .. })
        ));
        assert!(ping_def.get_interface::<u32>(&registry, &ping).is_none());
    }

    #[test]
    fn inheritable_attributes_propagate_transitively() {
        let registry = game_registry();
        let hero = registry.class_of::<Hero>().unwrap();
        assert!(hero.attributes().is_empty());
        assert!(hero.has_attribute::<Serializable>());
        // DisplayName opts out of inheritance.
        assert!(hero.get_attribute::<DisplayName>().is_none());

        let names: Vec<&str> = registry
            .classes_with_attribute::<Serializable>()
            .iter()
            .map(|d| d.name())
            .collect();
        assert_eq!(names, vec!["Actor", "Hero", "Pawn"]);
    }

    #[test]
    fn type_buckets_and_modules() {
        let registry = game_registry();
        let implementing: Vec<&str> = registry
            .classes_implementing(Hash64::from_name("Actor"))
            .iter()
            .map(|d| d.name())
            .collect();
        assert_eq!(implementing, vec!["Hero", "Pawn"]);

        let mut expected = vec![
            Hash64::from_name("Actor"),
            Hash64::from_name("Hero"),
            Hash64::from_name("Pawn"),
            Hash64::from_name("Team"),
        ];
        expected.sort();
        assert_eq!(registry.types_in_module("game"), expected);
        assert!(registry.types_in_module("other").is_empty());
        assert_eq!(
            registry.class_of::<Actor>().and_then(|d| d.module()),
            Some("game")
        );
    }

    #[test]
    fn enum_fields_round_trip_by_label() {
        let registry = game_registry();
        let hero = Hero {
            pawn: Pawn {
                actor: Actor { id: 12 },
                team: Team::Blue,
            },
        };
        let doc = registry.to_document(&hero).unwrap();
        assert_eq!(doc, json!({ "id": 12, "team": "Blue" }));

        let back: Hero = registry.from_document(&doc).unwrap();
        assert_eq!(back, hero);

        let by_value: Hero = registry.from_document(&json!({ "team": 1 })).unwrap();
        assert_eq!(by_value.pawn.team, Team::Blue);

        let err = registry
            .from_document::<Hero>(&json!({ "team": "Green" }))
            .unwrap_err();
        assert!(matches!(err, ReflectError::FieldDecode { .. }));
    }

    #[test]
    fn unregistered_attribute_rejected_when_configured() {
        #[derive(Debug, Default)]
        struct Marked;

        impl Reflect for Marked {
            const NAME: &'static str = "Marked";

            fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
                class.attribute(Unregistered)?;
                Ok(())
            }
        }

        let mut lenient = Registry::new();
        lenient.register::<Marked>();
        lenient.initialize().unwrap();

        let mut strict = Registry::with_config(RegistryConfig {
            reject_unregistered_attributes: true,
            ..RegistryConfig::default()
        });
        strict.register::<Marked>();
        let err = strict.initialize().unwrap_err();
        match err {
            ReflectError::Bootstrap { source, .. } => {
                assert!(matches!(*source, ReflectError::UnregisteredAttribute { .. }));
            }
            other => panic!("expected bootstrap error, got {other:?}"),
        }
    }

    #[test]
    fn from_document_requires_default_constructor() {
        #[derive(Debug)]
        struct NoCtor;

        impl Reflect for NoCtor {
            const NAME: &'static str = "NoCtor";

            fn define(_: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError> {
                Ok(())
            }
        }

        let mut registry = Registry::new();
        registry.register::<NoCtor>();
        registry.initialize().unwrap();
        assert!(matches!(
            registry.from_document::<NoCtor>(&json!({})),
            Err(ReflectError::MissingConstructor { .. })
        ));
    }
}
