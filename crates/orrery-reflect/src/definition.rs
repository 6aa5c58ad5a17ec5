//! Class definitions: named fields, bases, constructors and attributes.
//!
//! A [`ClassDefinition`] is type-erased so the registry can store every
//! class in one map. It is populated through a typed [`ClassBuilder`], which
//! is the only way to add fields: each field is a getter/setter pair over the
//! concrete type plus serde-backed load/save codecs, so no field is ever
//! addressed by raw memory offset.
//!
//! Fields declared with [`ClassBuilder::vec_field`] or
//! [`ClassBuilder::array_field`] also expose their elements: length, per-index
//! get/set and swap, and resize for vectors.
//!
//! Once [`ClassDefinition::mark_defined`] has run the definition is frozen and
//! every builder call fails with [`ReflectError::AlreadyDefined`].
//!
//! # Load / save order
//!
//! `load` and `save` visit base classes first, in the order the bases were
//! added, then the class's own fields in declaration order. Unknown keys in
//! the reader are ignored; missing keys leave the field untouched.

use std::any::{Any, TypeId};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::{CheckedBitPattern, NoUninit};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::attribute::{Attribute, AttributeList, NoSerialize, ReadOnly};
use crate::component::ComponentLayout;
use crate::enumeration::ReflectEnum;
use crate::hash::{Hash32, Hash64, TypeHash};
use crate::registry::Registry;
use crate::serialize::{SerializeReader, SerializeWriter};
use crate::ReflectError;

type GetFn = Box<dyn Fn(&dyn Any) -> Option<Box<dyn Any + Send>> + Send + Sync>;
type SetFn =
    Box<dyn Fn(&mut dyn Any, Box<dyn Any + Send>) -> Result<(), ReflectError> + Send + Sync>;
type LoadFn =
    Box<dyn Fn(&Registry, &mut dyn Any, &Value) -> Result<(), ReflectError> + Send + Sync>;
type SaveFn = Box<dyn Fn(&Registry, &dyn Any) -> Result<Value, ReflectError> + Send + Sync>;
type UpcastFn = Box<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;
type UpcastMutFn = Box<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync>;
type Ctor<A> = Box<dyn Fn(A) -> Box<dyn Any + Send> + Send + Sync>;
type LenFn = Box<dyn Fn(&dyn Any) -> Option<usize> + Send + Sync>;
type ElementGetFn = Box<dyn Fn(&dyn Any, usize) -> Option<Box<dyn Any + Send>> + Send + Sync>;
type ElementSetFn =
    Box<dyn Fn(&mut dyn Any, usize, Box<dyn Any + Send>) -> Result<(), ReflectError> + Send + Sync>;
type ResizeFn = Box<dyn Fn(&mut dyn Any, usize) -> bool + Send + Sync>;
type SwapFn = Box<dyn Fn(&mut dyn Any, usize, usize) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Reflect
// ---------------------------------------------------------------------------

/// A Rust type that can describe itself to the registry.
pub trait Reflect: Any + Send + Sync + Sized {
    /// Registered name. Its hash is the type's identity.
    const NAME: &'static str;

    /// Populate fields, bases, constructors and attributes.
    fn define(class: &mut ClassBuilder<'_, Self>) -> Result<(), ReflectError>;
}

fn mismatch<T: ?Sized>(found: &str) -> ReflectError {
    ReflectError::TypeMismatch {
        expected: std::any::type_name::<T>().to_owned(),
        found: found.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// Shape of a container field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// A growable `Vec`.
    Vector,
    /// A `[V; N]` array.
    FixedArray,
}

/// Element storage a container field projects to.
trait Elements: 'static {
    type Item: Clone + Send + 'static;
    const KIND: ContainerKind;

    fn items(&self) -> &[Self::Item];
    fn items_mut(&mut self) -> &mut [Self::Item];
    /// Returns `false` when the length is fixed.
    fn resize_to(&mut self, len: usize) -> bool;
}

impl<V: Clone + Default + Send + 'static> Elements for Vec<V> {
    type Item = V;
    const KIND: ContainerKind = ContainerKind::Vector;

    fn items(&self) -> &[V] {
        self
    }

    fn items_mut(&mut self) -> &mut [V] {
        self
    }

    fn resize_to(&mut self, len: usize) -> bool {
        self.resize(len, V::default());
        true
    }
}

impl<V: Clone + Send + 'static, const N: usize> Elements for [V; N] {
    type Item = V;
    const KIND: ContainerKind = ContainerKind::FixedArray;

    fn items(&self) -> &[V] {
        self
    }

    fn items_mut(&mut self) -> &mut [V] {
        self
    }

    fn resize_to(&mut self, _: usize) -> bool {
        false
    }
}

/// Type-erased element access for one container field. Every closure
/// returns `None`/`false` when handed an instance of another type.
struct ContainerAccess {
    kind: ContainerKind,
    element_type_name: &'static str,
    len: LenFn,
    get: ElementGetFn,
    set: ElementSetFn,
    resize: ResizeFn,
    swap: SwapFn,
}

fn container_access<T, C>(get: fn(&T) -> &C, get_mut: fn(&mut T) -> &mut C) -> ContainerAccess
where
    T: Reflect,
    C: Elements,
{
    ContainerAccess {
        kind: C::KIND,
        element_type_name: std::any::type_name::<C::Item>(),
        len: Box::new(move |instance: &dyn Any| {
            instance.downcast_ref::<T>().map(|t| get(t).items().len())
        }),
        get: Box::new(
            move |instance: &dyn Any, index: usize| -> Option<Box<dyn Any + Send>> {
                let item = get(instance.downcast_ref::<T>()?).items().get(index)?.clone();
                Some(Box::new(item))
            },
        ),
        set: Box::new(
            move |instance: &mut dyn Any,
                  index: usize,
                  value: Box<dyn Any + Send>|
                  -> Result<(), ReflectError> {
                let target = instance
                    .downcast_mut::<T>()
                    .ok_or_else(|| mismatch::<T>("another type"))?;
                let value = value
                    .downcast::<C::Item>()
                    .map_err(|_| mismatch::<C::Item>("another type"))?;
                if let Some(slot) = get_mut(target).items_mut().get_mut(index) {
                    *slot = *value;
                }
                Ok(())
            },
        ),
        resize: Box::new(move |instance: &mut dyn Any, len: usize| {
            instance
                .downcast_mut::<T>()
                .is_some_and(|t| get_mut(t).resize_to(len))
        }),
        swap: Box::new(move |instance: &mut dyn Any, a: usize, b: usize| {
            let Some(target) = instance.downcast_mut::<T>() else {
                return false;
            };
            get_mut(target).items_mut().swap(a, b);
            true
        }),
    }
}

// ---------------------------------------------------------------------------
// FieldDefinition
// ---------------------------------------------------------------------------

/// One named field of a class.
pub struct FieldDefinition {
    name: String,
    owner: String,
    hash: Hash32,
    value_type: TypeHash,
    value_type_name: &'static str,
    attributes: AttributeList,
    get: GetFn,
    set: Option<SetFn>,
    load: Option<LoadFn>,
    save: SaveFn,
    container: Option<ContainerAccess>,
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("name", &self.name)
            .field("value_type", &self.value_type_name)
            .field("attributes", &self.attributes)
            .field("writable", &self.set.is_some())
            .field("container", &self.container_kind())
            .finish_non_exhaustive()
    }
}

impl FieldDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> Hash32 {
        self.hash
    }

    /// Identity of the value type: the registered name hash for enum fields,
    /// otherwise derived from the Rust type name.
    pub fn value_type(&self) -> TypeHash {
        self.value_type
    }

    pub fn value_type_name(&self) -> &'static str {
        self.value_type_name
    }

    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// No setter, or marked [`ReadOnly`].
    pub fn is_read_only(&self) -> bool {
        self.set.is_none() || self.attributes.has::<ReadOnly>()
    }

    /// Not marked [`NoSerialize`].
    pub fn is_serialized(&self) -> bool {
        !self.attributes.has::<NoSerialize>()
    }

    pub fn container_kind(&self) -> Option<ContainerKind> {
        self.container.as_ref().map(|c| c.kind)
    }

    pub fn is_vector(&self) -> bool {
        self.container_kind() == Some(ContainerKind::Vector)
    }

    pub fn is_fixed_array(&self) -> bool {
        self.container_kind() == Some(ContainerKind::FixedArray)
    }

    // -- element access -------------------------------------------------------
    //
    // `instance` is the class that declares the field, not a derived class.
    // Use the `ClassDefinition` methods to resolve through bases.

    fn container(&self) -> Result<&ContainerAccess, ReflectError> {
        self.container
            .as_ref()
            .ok_or_else(|| ReflectError::NotAContainer {
                class: self.owner.clone(),
                field: self.name.clone(),
            })
    }

    fn ensure_writable(&self) -> Result<(), ReflectError> {
        if self.is_read_only() {
            return Err(ReflectError::ReadOnlyField {
                class: self.owner.clone(),
                field: self.name.clone(),
            });
        }
        Ok(())
    }

    fn wrong_instance(&self) -> ReflectError {
        ReflectError::TypeMismatch {
            expected: self.owner.clone(),
            found: "another type".to_owned(),
        }
    }

    fn check_index(&self, index: usize, len: usize) -> Result<(), ReflectError> {
        if index >= len {
            return Err(ReflectError::IndexOutOfRange {
                class: self.owner.clone(),
                field: self.name.clone(),
                index,
                len,
            });
        }
        Ok(())
    }

    /// Number of elements in the container.
    pub fn len(&self, instance: &dyn Any) -> Result<usize, ReflectError> {
        (self.container()?.len)(instance).ok_or_else(|| self.wrong_instance())
    }

    /// Clone element `index` out as `V`.
    pub fn get_element<V: Any>(&self, instance: &dyn Any, index: usize) -> Result<V, ReflectError> {
        let container = self.container()?;
        self.check_index(index, self.len(instance)?)?;
        let value = (container.get)(instance, index).ok_or_else(|| self.wrong_instance())?;
        value
            .downcast::<V>()
            .map(|v| *v)
            .map_err(|_| mismatch::<V>(container.element_type_name))
    }

    /// Overwrite element `index`.
    pub fn set_element<V: Any + Send>(
        &self,
        instance: &mut dyn Any,
        index: usize,
        value: V,
    ) -> Result<(), ReflectError> {
        let container = self.container()?;
        self.ensure_writable()?;
        self.check_index(index, self.len(&*instance)?)?;
        (container.set)(instance, index, Box::new(value))
    }

    /// Resize a vector field, filling new slots with `Default`.
    pub fn resize(&self, instance: &mut dyn Any, len: usize) -> Result<(), ReflectError> {
        let container = self.container()?;
        self.ensure_writable()?;
        if container.kind == ContainerKind::FixedArray {
            return Err(ReflectError::FixedLength {
                class: self.owner.clone(),
                field: self.name.clone(),
            });
        }
        if !(container.resize)(instance, len) {
            return Err(self.wrong_instance());
        }
        Ok(())
    }

    /// Swap elements `a` and `b`.
    pub fn swap_elements(
        &self,
        instance: &mut dyn Any,
        a: usize,
        b: usize,
    ) -> Result<(), ReflectError> {
        let container = self.container()?;
        self.ensure_writable()?;
        let len = self.len(&*instance)?;
        self.check_index(a, len)?;
        self.check_index(b, len)?;
        if !(container.swap)(instance, a, b) {
            return Err(self.wrong_instance());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BaseDefinition
// ---------------------------------------------------------------------------

/// An "is-a" link from a class to one of its bases.
pub struct BaseDefinition {
    name: String,
    hash: TypeHash,
    type_id: TypeId,
    upcast: UpcastFn,
    upcast_mut: UpcastMutFn,
}

impl fmt::Debug for BaseDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseDefinition")
            .field("name", &self.name)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl BaseDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

struct ConstructorDefinition {
    args: TypeId,
    signature: &'static str,
    ctor: Box<dyn Any + Send + Sync>,
}

// ---------------------------------------------------------------------------
// ClassDefinition
// ---------------------------------------------------------------------------

/// Runtime description of a reflected class.
pub struct ClassDefinition {
    name: String,
    hash: TypeHash,
    type_id: TypeId,
    type_name: &'static str,
    fields: Vec<FieldDefinition>,
    bases: Vec<BaseDefinition>,
    constructors: Vec<ConstructorDefinition>,
    attributes: AttributeList,
    inherited_attributes: AttributeList,
    component: Option<ComponentLayout>,
    module: Option<String>,
    defined: bool,
}

impl fmt::Debug for ClassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDefinition")
            .field("name", &self.name)
            .field("hash", &self.hash)
            .field("fields", &self.fields)
            .field("bases", &self.bases)
            .field("constructors", &self.constructors.len())
            .field("attributes", &self.attributes)
            .field("component", &self.component)
            .field("defined", &self.defined)
            .finish()
    }
}

impl ClassDefinition {
    /// Empty, unfrozen definition for `T`.
    pub fn new<T: Reflect>() -> Self {
        Self {
            name: T::NAME.to_owned(),
            hash: Hash64::from_name(T::NAME),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            fields: Vec::new(),
            bases: Vec::new(),
            constructors: Vec::new(),
            attributes: AttributeList::new(),
            inherited_attributes: AttributeList::new(),
            component: None,
            module: None,
            defined: false,
        }
    }

    /// Run `T::define` into a fresh definition and freeze it.
    pub fn build<T: Reflect>() -> Result<Self, ReflectError> {
        Self::build_with::<T>(T::define)
    }

    /// Like [`build`](Self::build) but with a caller-supplied definer.
    pub fn build_with<T: Reflect>(
        define: impl FnOnce(&mut ClassBuilder<'_, T>) -> Result<(), ReflectError>,
    ) -> Result<Self, ReflectError> {
        let mut def = Self::new::<T>();
        define(&mut def.builder::<T>()?)?;
        def.mark_defined()?;
        Ok(def)
    }

    /// Typed builder over this definition.
    pub fn builder<T: Reflect>(&mut self) -> Result<ClassBuilder<'_, T>, ReflectError> {
        if self.type_id != TypeId::of::<T>() {
            return Err(mismatch::<T>(self.type_name));
        }
        self.ensure_open()?;
        Ok(ClassBuilder {
            def: self,
            _marker: PhantomData,
        })
    }

    fn ensure_open(&self) -> Result<(), ReflectError> {
        if self.defined {
            return Err(ReflectError::AlreadyDefined {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Freeze the definition. Fails if already frozen.
    pub fn mark_defined(&mut self) -> Result<(), ReflectError> {
        self.ensure_open()?;
        self.defined = true;
        tracing::debug!(
            class = %self.name,
            fields = self.fields.len(),
            bases = self.bases.len(),
            component = self.component.is_some(),
            "class defined"
        );
        Ok(())
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the reflected type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Own fields in declaration order (bases excluded).
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Own field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Own field by name hash.
    pub fn field_by_hash(&self, hash: Hash32) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.hash == hash)
    }

    pub fn bases(&self) -> &[BaseDefinition] {
        &self.bases
    }

    /// Attributes attached directly to the class.
    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// Attributes received from bases during registry linking.
    pub fn inherited_attributes(&self) -> &AttributeList {
        &self.inherited_attributes
    }

    /// First class attribute of kind `A`, own before inherited.
    pub fn get_attribute<A: Attribute>(&self) -> Option<&A> {
        self.attributes
            .get::<A>()
            .or_else(|| self.inherited_attributes.get::<A>())
    }

    /// Whether a class attribute of kind `A` is present (own or inherited).
    pub fn has_attribute<A: Attribute>(&self) -> bool {
        self.get_attribute::<A>().is_some()
    }

    /// Component layout, when the class opted in.
    pub fn component(&self) -> Option<&ComponentLayout> {
        self.component.as_ref()
    }

    pub fn is_component(&self) -> bool {
        self.component.is_some()
    }

    /// Module that registered this class, if any.
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub(crate) fn set_module(&mut self, module: Option<String>) {
        self.module = module;
    }

    pub(crate) fn set_inherited_attributes(&mut self, attributes: AttributeList) {
        self.inherited_attributes = attributes;
    }

    /// Every attribute on the class and its fields, with the owner's name.
    pub(crate) fn attribute_owners(&self) -> Vec<(String, &dyn Attribute)> {
        let mut out: Vec<(String, &dyn Attribute)> = self
            .attributes
            .iter()
            .map(|a| (self.name.clone(), a))
            .collect();
        for field in &self.fields {
            for attr in field.attributes.iter() {
                out.push((format!("{}.{}", self.name, field.name), attr));
            }
        }
        out
    }

    /// Hash over the definition's shape. Two registrations of one type must
    /// agree on it.
    pub fn version_hash(&self) -> Hash64 {
        let mut h = Hash64::from_name(&self.name);
        for base in &self.bases {
            h = h.chain_hash(base.hash);
        }
        for field in &self.fields {
            h = h
                .chain(field.name.as_bytes())
                .chain_hash(field.value_type)
                .chain(&[u8::from(field.set.is_some())]);
            for attr in field.attributes.iter() {
                h = h.chain(attr.kind_name().as_bytes());
            }
        }
        for attr in self.attributes.iter() {
            h = h.chain(attr.kind_name().as_bytes());
        }
        for ctor in &self.constructors {
            h = h.chain(ctor.signature.as_bytes());
        }
        if let Some(layout) = &self.component {
            h = h
                .chain_u64(layout.size as u64)
                .chain_u64(layout.align as u64);
        }
        h
    }

    // -- bases / interfaces -------------------------------------------------

    /// Whether `base` is a direct or transitive base of this class.
    pub fn has_interface(&self, registry: &Registry, base: TypeHash) -> bool {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<TypeHash> = self.bases.iter().map(|b| b.hash).collect();
        while let Some(hash) = queue.pop_front() {
            if hash == self.hash || !visited.insert(hash) {
                continue;
            }
            if hash == base {
                return true;
            }
            if let Some(def) = registry.class(hash) {
                queue.extend(def.bases.iter().map(|b| b.hash));
            }
        }
        false
    }

    /// View `instance` as `B`, walking base links transitively.
    pub fn get_interface<'a, B: Any>(
        &self,
        registry: &Registry,
        instance: &'a dyn Any,
    ) -> Option<&'a B> {
        self.find_interface::<B>(registry, instance, &mut Vec::new())
    }

    fn find_interface<'a, B: Any>(
        &self,
        registry: &Registry,
        instance: &'a dyn Any,
        path: &mut Vec<TypeHash>,
    ) -> Option<&'a B> {
        if let Some(direct) = instance.downcast_ref::<B>() {
            return Some(direct);
        }
        self.enter(path).ok()?;
        let found = self.bases.iter().find_map(|base| {
            let def = registry.class(base.hash)?;
            def.ensure_off(path).ok()?;
            let up = (base.upcast)(instance)?;
            def.find_interface::<B>(registry, up, path)
        });
        path.pop();
        found
    }

    /// Fail if this class is already on the base walk `path`.
    fn ensure_off(&self, path: &[TypeHash]) -> Result<(), ReflectError> {
        if path.contains(&self.hash) {
            return Err(ReflectError::CyclicBase {
                class: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Push this class onto a base walk.
    fn enter(&self, path: &mut Vec<TypeHash>) -> Result<(), ReflectError> {
        self.ensure_off(path)?;
        path.push(self.hash);
        Ok(())
    }

    // -- constructors -------------------------------------------------------

    /// Whether a constructor taking `A` exists.
    pub fn has_constructor<A: 'static>(&self) -> bool {
        self.constructors.iter().any(|c| c.args == TypeId::of::<A>())
    }

    /// Construct via the constructor taking `A`.
    pub fn construct<A: 'static>(&self, args: A) -> Option<Box<dyn Any + Send>> {
        let ctor = self
            .constructors
            .iter()
            .find(|c| c.args == TypeId::of::<A>())?;
        let f = ctor.ctor.downcast_ref::<Ctor<A>>()?;
        Some(f(args))
    }

    /// Construct via the zero-argument constructor.
    pub fn construct_default(&self) -> Option<Box<dyn Any + Send>> {
        self.construct::<()>(())
    }

    // -- typed field access -------------------------------------------------

    fn check_instance(&self, instance: &dyn Any) -> Result<(), ReflectError> {
        if instance.type_id() != self.type_id {
            return Err(ReflectError::TypeMismatch {
                expected: self.type_name.to_owned(),
                found: "another type".to_owned(),
            });
        }
        Ok(())
    }

    /// Locate `name` on this class or a base. Returns the chain of base links
    /// to follow and the owning field.
    fn field_path<'r>(
        &'r self,
        registry: &'r Registry,
        name: &str,
        walked: &mut Vec<TypeHash>,
    ) -> Result<Option<(Vec<&'r BaseDefinition>, &'r FieldDefinition)>, ReflectError> {
        if let Some(field) = self.field(name) {
            return Ok(Some((Vec::new(), field)));
        }
        self.enter(walked)?;
        for base in &self.bases {
            let def = self.base_definition(registry, base)?;
            if let Some((mut path, field)) = def.field_path(registry, name, walked)? {
                path.insert(0, base);
                return Ok(Some((path, field)));
            }
        }
        walked.pop();
        Ok(None)
    }

    fn base_definition<'r>(
        &self,
        registry: &'r Registry,
        base: &BaseDefinition,
    ) -> Result<&'r ClassDefinition, ReflectError> {
        registry
            .class(base.hash)
            .ok_or_else(|| ReflectError::UnknownBase {
                class: self.name.clone(),
                base: base.name.clone(),
            })
    }

    fn unknown_field(&self, name: &str) -> ReflectError {
        ReflectError::UnknownField {
            class: self.name.clone(),
            field: name.to_owned(),
        }
    }

    /// Read field `name` (own or inherited) as `V`.
    pub fn get<V: Any>(
        &self,
        registry: &Registry,
        instance: &dyn Any,
        name: &str,
    ) -> Result<V, ReflectError> {
        self.check_instance(instance)?;
        let (path, field) = self
            .field_path(registry, name, &mut Vec::new())?
            .ok_or_else(|| self.unknown_field(name))?;

        let mut target = instance;
        for base in path {
            target = (base.upcast)(target).ok_or_else(|| mismatch::<V>(base.name()))?;
        }
        let value = (field.get)(target).ok_or_else(|| mismatch::<V>(&self.name))?;
        value
            .downcast::<V>()
            .map(|v| *v)
            .map_err(|_| mismatch::<V>(field.value_type_name))
    }

    /// Write field `name` (own or inherited). Read-only fields are refused.
    pub fn set<V: Any + Send>(
        &self,
        registry: &Registry,
        instance: &mut dyn Any,
        name: &str,
        value: V,
    ) -> Result<(), ReflectError> {
        self.check_instance(instance)?;
        let (path, field) = self
            .field_path(registry, name, &mut Vec::new())?
            .ok_or_else(|| self.unknown_field(name))?;
        let setter = match &field.set {
            Some(setter) if !field.attributes.has::<ReadOnly>() => setter,
            _ => {
                return Err(ReflectError::ReadOnlyField {
                    class: self.name.clone(),
                    field: name.to_owned(),
                })
            }
        };

        let mut target = instance;
        for base in path {
            target = (base.upcast_mut)(target).ok_or_else(|| mismatch::<V>(base.name()))?;
        }
        setter(target, Box::new(value))
    }

    // -- container elements ---------------------------------------------------

    /// Resolve `name` through bases and upcast `instance` to its owner.
    fn locate<'r, 'i>(
        &'r self,
        registry: &'r Registry,
        instance: &'i dyn Any,
        name: &str,
    ) -> Result<(&'r FieldDefinition, &'i dyn Any), ReflectError> {
        self.check_instance(instance)?;
        let (path, field) = self
            .field_path(registry, name, &mut Vec::new())?
            .ok_or_else(|| self.unknown_field(name))?;
        let mut target = instance;
        for base in path {
            target = (base.upcast)(target).ok_or_else(|| mismatch::<dyn Any>(base.name()))?;
        }
        Ok((field, target))
    }

    fn locate_mut<'r, 'i>(
        &'r self,
        registry: &'r Registry,
        instance: &'i mut dyn Any,
        name: &str,
    ) -> Result<(&'r FieldDefinition, &'i mut dyn Any), ReflectError> {
        self.check_instance(instance)?;
        let (path, field) = self
            .field_path(registry, name, &mut Vec::new())?
            .ok_or_else(|| self.unknown_field(name))?;
        let mut target = instance;
        for base in path {
            target = (base.upcast_mut)(target).ok_or_else(|| mismatch::<dyn Any>(base.name()))?;
        }
        Ok((field, target))
    }

    /// Element count of container field `name` (own or inherited).
    pub fn field_len(
        &self,
        registry: &Registry,
        instance: &dyn Any,
        name: &str,
    ) -> Result<usize, ReflectError> {
        let (field, target) = self.locate(registry, instance, name)?;
        field.len(target)
    }

    pub fn get_element<V: Any>(
        &self,
        registry: &Registry,
        instance: &dyn Any,
        name: &str,
        index: usize,
    ) -> Result<V, ReflectError> {
        let (field, target) = self.locate(registry, instance, name)?;
        field.get_element(target, index)
    }

    pub fn set_element<V: Any + Send>(
        &self,
        registry: &Registry,
        instance: &mut dyn Any,
        name: &str,
        index: usize,
        value: V,
    ) -> Result<(), ReflectError> {
        let (field, target) = self.locate_mut(registry, instance, name)?;
        field.set_element(target, index, value)
    }

    /// Resize vector field `name`. Fixed arrays are refused.
    pub fn resize_field(
        &self,
        registry: &Registry,
        instance: &mut dyn Any,
        name: &str,
        len: usize,
    ) -> Result<(), ReflectError> {
        let (field, target) = self.locate_mut(registry, instance, name)?;
        field.resize(target, len)
    }

    pub fn swap_elements(
        &self,
        registry: &Registry,
        instance: &mut dyn Any,
        name: &str,
        a: usize,
        b: usize,
    ) -> Result<(), ReflectError> {
        let (field, target) = self.locate_mut(registry, instance, name)?;
        field.swap_elements(target, a, b)
    }

    // -- load / save ----------------------------------------------------------

    /// Populate `instance` from `reader`.
    pub fn load(
        &self,
        registry: &Registry,
        reader: &dyn SerializeReader,
        instance: &mut dyn Any,
    ) -> Result<(), ReflectError> {
        self.check_instance(instance)?;
        self.load_fields(registry, reader, instance, &mut Vec::new())
    }

    fn load_fields(
        &self,
        registry: &Registry,
        reader: &dyn SerializeReader,
        instance: &mut dyn Any,
        path: &mut Vec<TypeHash>,
    ) -> Result<(), ReflectError> {
        self.enter(path)?;
        for base in &self.bases {
            let def = self.base_definition(registry, base)?;
            def.ensure_off(path)?;
            let up = (base.upcast_mut)(&mut *instance)
                .ok_or_else(|| mismatch::<dyn Any>(base.name()))?;
            def.load_fields(registry, reader, up, path)?;
        }
        path.pop();
        for field in &self.fields {
            if !field.is_serialized() || field.is_read_only() {
                continue;
            }
            let (Some(load), Some(value)) = (&field.load, reader.read_field(&field.name)) else {
                continue;
            };
            load(registry, &mut *instance, value)?;
        }
        Ok(())
    }

    /// Write `instance`'s fields into `writer`.
    pub fn save(
        &self,
        registry: &Registry,
        instance: &dyn Any,
        writer: &mut dyn SerializeWriter,
    ) -> Result<(), ReflectError> {
        self.check_instance(instance)?;
        self.save_fields(registry, instance, writer, &mut Vec::new())
    }

    fn save_fields(
        &self,
        registry: &Registry,
        instance: &dyn Any,
        writer: &mut dyn SerializeWriter,
        path: &mut Vec<TypeHash>,
    ) -> Result<(), ReflectError> {
        self.enter(path)?;
        for base in &self.bases {
            let def = self.base_definition(registry, base)?;
            def.ensure_off(path)?;
            let up = (base.upcast)(instance).ok_or_else(|| mismatch::<dyn Any>(base.name()))?;
            def.save_fields(registry, up, writer, path)?;
        }
        path.pop();
        for field in &self.fields {
            if !field.is_serialized() {
                continue;
            }
            writer.write_field(&field.name, (field.save)(registry, instance)?);
        }
        Ok(())
    }

    /// Save `instance` into a fresh JSON object.
    pub fn to_document(&self, registry: &Registry, instance: &dyn Any) -> Result<Value, ReflectError> {
        let mut map = Map::new();
        self.save(registry, instance, &mut map)?;
        Ok(Value::Object(map))
    }

    // -- component bytes ------------------------------------------------------

    fn layout(&self) -> Result<&ComponentLayout, ReflectError> {
        self.component.as_ref().ok_or_else(|| ReflectError::NotAComponent {
            name: self.name.clone(),
        })
    }

    /// Decode `bytes`, load fields from `reader`, re-encode into `bytes`.
    pub fn load_bytes(
        &self,
        registry: &Registry,
        reader: &dyn SerializeReader,
        bytes: &mut [u8],
    ) -> Result<(), ReflectError> {
        let layout = self.layout()?;
        let mut value = layout.decode(bytes)?;
        self.load_fields(registry, reader, &mut *value, &mut Vec::new())?;
        layout.encode(&*value, bytes)
    }

    /// Decode `bytes` and save its fields into `writer`.
    pub fn save_bytes(
        &self,
        registry: &Registry,
        bytes: &[u8],
        writer: &mut dyn SerializeWriter,
    ) -> Result<(), ReflectError> {
        let value = self.layout()?.decode(bytes)?;
        self.save_fields(registry, &*value, writer, &mut Vec::new())
    }
}

// ---------------------------------------------------------------------------
// ClassBuilder
// ---------------------------------------------------------------------------

/// Typed mutation handle over a [`ClassDefinition`] for `T`.
///
/// Every method fails with [`ReflectError::AlreadyDefined`] once the
/// definition is frozen, and returns `&mut Self` on success so calls chain
/// with `?`.
pub struct ClassBuilder<'a, T: Reflect> {
    def: &'a mut ClassDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Reflect> ClassBuilder<'a, T> {
    /// The definition being built.
    pub fn definition(&self) -> &ClassDefinition {
        &*self.def
    }

    #[allow(clippy::too_many_arguments)]
    fn push_field(
        &mut self,
        name: &str,
        value_type: TypeHash,
        value_type_name: &'static str,
        attributes: Vec<Box<dyn Attribute>>,
        get: GetFn,
        set: Option<SetFn>,
        load: Option<LoadFn>,
        save: SaveFn,
    ) -> Result<&mut Self, ReflectError> {
        self.def.ensure_open()?;
        if self.def.field(name).is_some() {
            return Err(ReflectError::DuplicateField {
                class: self.def.name.clone(),
                field: name.to_owned(),
            });
        }
        self.def.fields.push(FieldDefinition {
            name: name.to_owned(),
            owner: self.def.name.clone(),
            hash: Hash32::from_name(name),
            value_type,
            value_type_name,
            attributes: attributes.into(),
            get,
            set,
            load,
            save,
            container: None,
        });
        Ok(self)
    }

    fn attach_container(&mut self, access: ContainerAccess) {
        if let Some(field) = self.def.fields.last_mut() {
            field.container = Some(access);
        }
    }

    /// Add a read/write field whose value is serialized with serde.
    pub fn field<V, G, S>(
        &mut self,
        name: &str,
        get: G,
        set: S,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let get = Arc::new(get);
        let set = Arc::new(set);
        let field_name = name.to_owned();

        let load: LoadFn = {
            let set = Arc::clone(&set);
            let field_name = field_name.clone();
            Box::new(
                move |_: &Registry, instance: &mut dyn Any, value: &Value| -> Result<(), ReflectError> {
                    let target = instance
                        .downcast_mut::<T>()
                        .ok_or_else(|| mismatch::<T>("another type"))?;
                    let decoded: V = serde_json::from_value(value.clone()).map_err(|e| {
                        ReflectError::FieldDecode {
                            class: T::NAME.to_owned(),
                            field: field_name.clone(),
                            details: e.to_string(),
                        }
                    })?;
                    set(target, decoded);
                    Ok(())
                },
            )
        };
        let save: SaveFn = {
            let get = Arc::clone(&get);
            Box::new(
                move |_: &Registry, instance: &dyn Any| -> Result<Value, ReflectError> {
                    let source = instance
                        .downcast_ref::<T>()
                        .ok_or_else(|| mismatch::<T>("another type"))?;
                    serde_json::to_value(get(source)).map_err(|e| ReflectError::FieldEncode {
                        class: T::NAME.to_owned(),
                        field: field_name.clone(),
                        details: e.to_string(),
                    })
                },
            )
        };

        self.push_field(
            name,
            Hash64::of_type::<V>(),
            std::any::type_name::<V>(),
            attributes,
            erase_get::<T, V, G>(get),
            Some(erase_set::<T, V, S>(set)),
            Some(load),
            save,
        )
    }

    /// Add a field with a getter only. It is saved but never loaded or set.
    pub fn read_only_field<V, G>(
        &mut self,
        name: &str,
        get: G,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError>
    where
        V: Serialize + Send + 'static,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        let get = Arc::new(get);
        let field_name = name.to_owned();
        let save: SaveFn = {
            let get = Arc::clone(&get);
            Box::new(
                move |_: &Registry, instance: &dyn Any| -> Result<Value, ReflectError> {
                    let source = instance
                        .downcast_ref::<T>()
                        .ok_or_else(|| mismatch::<T>("another type"))?;
                    serde_json::to_value(get(source)).map_err(|e| ReflectError::FieldEncode {
                        class: T::NAME.to_owned(),
                        field: field_name.clone(),
                        details: e.to_string(),
                    })
                },
            )
        };
        self.push_field(
            name,
            Hash64::of_type::<V>(),
            std::any::type_name::<V>(),
            attributes,
            erase_get::<T, V, G>(get),
            None,
            None,
            save,
        )
    }

    /// Add a `Vec` field. It loads and saves as a whole list and also
    /// exposes per-element access.
    pub fn vec_field<V>(
        &mut self,
        name: &str,
        get: fn(&T) -> &Vec<V>,
        get_mut: fn(&mut T) -> &mut Vec<V>,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError>
    where
        V: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
    {
        self.field(
            name,
            move |t: &T| get(t).clone(),
            move |t: &mut T, v: Vec<V>| *get_mut(t) = v,
            attributes,
        )?;
        self.attach_container(container_access::<T, Vec<V>>(get, get_mut));
        Ok(self)
    }

    /// Add a `[V; N]` field. A document must supply exactly `N` elements.
    pub fn array_field<V, const N: usize>(
        &mut self,
        name: &str,
        get: fn(&T) -> &[V; N],
        get_mut: fn(&mut T) -> &mut [V; N],
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let field_name = name.to_owned();
        let load: LoadFn = {
            let field_name = field_name.clone();
            Box::new(
                move |_: &Registry, instance: &mut dyn Any, value: &Value| -> Result<(), ReflectError> {
                    let target = instance
                        .downcast_mut::<T>()
                        .ok_or_else(|| mismatch::<T>("another type"))?;
                    let decode_err = |details: String| ReflectError::FieldDecode {
                        class: T::NAME.to_owned(),
                        field: field_name.clone(),
                        details,
                    };
                    let items: Vec<V> = serde_json::from_value(value.clone())
                        .map_err(|e| decode_err(e.to_string()))?;
                    let items: [V; N] = items.try_into().map_err(|items: Vec<V>| {
                        decode_err(format!("expected {} elements, found {}", N, items.len()))
                    })?;
                    *get_mut(target) = items;
                    Ok(())
                },
            )
        };
        let save: SaveFn = Box::new(
            move |_: &Registry, instance: &dyn Any| -> Result<Value, ReflectError> {
                let source = instance
                    .downcast_ref::<T>()
                    .ok_or_else(|| mismatch::<T>("another type"))?;
                serde_json::to_value(get(source).as_slice()).map_err(|e| ReflectError::FieldEncode {
                    class: T::NAME.to_owned(),
                    field: field_name.clone(),
                    details: e.to_string(),
                })
            },
        );
        let getter = Arc::new(move |t: &T| get(t).clone());
        let setter = Arc::new(move |t: &mut T, v: [V; N]| *get_mut(t) = v);

        self.push_field(
            name,
            Hash64::of_type::<[V; N]>(),
            std::any::type_name::<[V; N]>(),
            attributes,
            erase_get::<T, [V; N], _>(getter),
            Some(erase_set::<T, [V; N], _>(setter)),
            Some(load),
            save,
        )?;
        self.attach_container(container_access::<T, [V; N]>(get, get_mut));
        Ok(self)
    }

    /// Add an enum-typed field, serialized by label through the registry's
    /// [`EnumDefinition`](crate::EnumDefinition) for `E`.
    pub fn enum_field<E, G, S>(
        &mut self,
        name: &str,
        get: G,
        set: S,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError>
    where
        E: ReflectEnum,
        G: Fn(&T) -> E + Send + Sync + 'static,
        S: Fn(&mut T, E) + Send + Sync + 'static,
    {
        let get = Arc::new(get);
        let set = Arc::new(set);
        let field_name = name.to_owned();

        let load: LoadFn = {
            let set = Arc::clone(&set);
            let field_name = field_name.clone();
            Box::new(
                move |registry: &Registry, instance: &mut dyn Any, value: &Value| -> Result<(), ReflectError> {
                    let target = instance
                        .downcast_mut::<T>()
                        .ok_or_else(|| mismatch::<T>("another type"))?;
                    let def = registry.enum_of::<E>().ok_or_else(|| ReflectError::UnknownType {
                        name: E::NAME.to_owned(),
                    })?;
                    let decode_err = |details: String| ReflectError::FieldDecode {
                        class: T::NAME.to_owned(),
                        field: field_name.clone(),
                        details,
                    };
                    let raw = def.load_value(value).map_err(|e| decode_err(e.to_string()))?;
                    let variant = E::from_value(raw)
                        .ok_or_else(|| decode_err(format!("{raw} is not a valid {}", E::NAME)))?;
                    set(target, variant);
                    Ok(())
                },
            )
        };
        let save: SaveFn = {
            let get = Arc::clone(&get);
            Box::new(
                move |registry: &Registry, instance: &dyn Any| -> Result<Value, ReflectError> {
                    let source = instance
                        .downcast_ref::<T>()
                        .ok_or_else(|| mismatch::<T>("another type"))?;
                    let def = registry.enum_of::<E>().ok_or_else(|| ReflectError::UnknownType {
                        name: E::NAME.to_owned(),
                    })?;
                    Ok(def.save_value(get(source).to_value()))
                },
            )
        };

        self.push_field(
            name,
            Hash64::from_name(E::NAME),
            std::any::type_name::<E>(),
            attributes,
            erase_get::<T, E, G>(get),
            Some(erase_set::<T, E, S>(set)),
            Some(load),
            save,
        )
    }

    /// Record `B` as a base of `T`.
    pub fn base<B: Reflect>(
        &mut self,
        upcast: fn(&T) -> &B,
        upcast_mut: fn(&mut T) -> &mut B,
    ) -> Result<&mut Self, ReflectError> {
        self.def.ensure_open()?;
        if TypeId::of::<B>() == TypeId::of::<T>() {
            return Err(ReflectError::CyclicBase {
                class: self.def.name.clone(),
            });
        }
        let hash = Hash64::from_name(B::NAME);
        if self.def.bases.iter().any(|b| b.hash == hash) {
            return Err(ReflectError::DuplicateBase {
                class: self.def.name.clone(),
                base: B::NAME.to_owned(),
            });
        }
        self.def.bases.push(BaseDefinition {
            name: B::NAME.to_owned(),
            hash,
            type_id: TypeId::of::<B>(),
            upcast: erase_upcast(upcast),
            upcast_mut: erase_upcast_mut(upcast_mut),
        });
        Ok(self)
    }

    /// Add a constructor keyed by its argument type `A` (use a tuple for
    /// several arguments). A second constructor for the same `A` replaces the
    /// first.
    pub fn constructor<A, F>(&mut self, f: F) -> Result<&mut Self, ReflectError>
    where
        A: 'static,
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        self.def.ensure_open()?;
        let ctor: Ctor<A> = Box::new(move |args: A| Box::new(f(args)) as Box<dyn Any + Send>);
        let args = TypeId::of::<A>();
        self.def.constructors.retain(|c| c.args != args);
        self.def.constructors.push(ConstructorDefinition {
            args,
            signature: std::any::type_name::<A>(),
            ctor: Box::new(ctor),
        });
        Ok(self)
    }

    /// Add the zero-argument constructor from `Default`.
    pub fn default_constructor(&mut self) -> Result<&mut Self, ReflectError>
    where
        T: Default,
    {
        self.constructor::<(), _>(|()| T::default())
    }

    /// Attach a class-level attribute.
    pub fn attribute(&mut self, attr: impl Attribute) -> Result<&mut Self, ReflectError> {
        self.def.ensure_open()?;
        self.def.attributes.push(Box::new(attr));
        Ok(self)
    }

    /// Attach several class-level attributes.
    pub fn attributes(
        &mut self,
        attributes: Vec<Box<dyn Attribute>>,
    ) -> Result<&mut Self, ReflectError> {
        self.def.ensure_open()?;
        self.def.attributes.extend(attributes);
        Ok(self)
    }

    /// Mark `T` as a component so archetypes may lay it out.
    pub fn component(&mut self) -> Result<&mut Self, ReflectError>
    where
        T: NoUninit + CheckedBitPattern + Default,
    {
        self.def.ensure_open()?;
        self.def.component = Some(ComponentLayout::of::<T>(T::NAME));
        Ok(self)
    }
}

fn erase_get<T, V, G>(get: Arc<G>) -> GetFn
where
    T: Reflect,
    V: Send + 'static,
    G: Fn(&T) -> V + Send + Sync + 'static,
{
    Box::new(move |instance: &dyn Any| -> Option<Box<dyn Any + Send>> {
        instance
            .downcast_ref::<T>()
            .map(|t| Box::new(get(t)) as Box<dyn Any + Send>)
    })
}

fn erase_set<T, V, S>(set: Arc<S>) -> SetFn
where
    T: Reflect,
    V: Send + 'static,
    S: Fn(&mut T, V) + Send + Sync + 'static,
{
    Box::new(
        move |instance: &mut dyn Any, value: Box<dyn Any + Send>| -> Result<(), ReflectError> {
            let target = instance
                .downcast_mut::<T>()
                .ok_or_else(|| mismatch::<T>("another type"))?;
            let value = value
                .downcast::<V>()
                .map_err(|_| mismatch::<V>("another type"))?;
            set(target, *value);
            Ok(())
        },
    )
}

fn erase_upcast<T: Any, B: Any>(upcast: fn(&T) -> &B) -> UpcastFn {
    Box::new(move |instance: &dyn Any| {
        instance
            .downcast_ref::<T>()
            .map(|t| upcast(t) as &dyn Any)
    })
}

fn erase_upcast_mut<T: Any, B: Any>(upcast_mut: fn(&mut T) -> &mut B) -> UpcastMutFn {
    Box::new(move |instance: &mut dyn Any| {
        instance
            .downcast_mut::<T>()
            .map(|t| upcast_mut(t) as &mut dyn Any)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
