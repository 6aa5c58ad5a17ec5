//! Attachable metadata for classes, enums and fields.
//!
//! An [`Attribute`] is an opaque, cloneable value attached to exactly one
//! target. Consumers (editors, serializers, resource loaders) query a
//! definition for an attribute *kind* and get back `Option<&A>`; absence is
//! never an error.
//!
//! Attributes are owned by the definition they are attached to. When a
//! derived class receives attributes from its bases the values are cloned via
//! [`Attribute::clone_attribute`], never shared, and only when
//! [`Attribute::can_inherit`] allows it.

use std::any::{Any, TypeId};
use std::fmt;

use crate::hash::Hash64;

// ---------------------------------------------------------------------------
// Attribute trait
// ---------------------------------------------------------------------------

/// A polymorphic metadata value.
///
/// Implementors are usually small `Clone` structs; the [`impl_attribute!`]
/// macro writes the boilerplate.
///
/// [`impl_attribute!`]: crate::impl_attribute
pub trait Attribute: Any + Send + Sync + fmt::Debug {
    /// Deep copy of this attribute.
    fn clone_attribute(&self) -> Box<dyn Attribute>;

    /// Whether derived definitions receive this attribute through base-type
    /// propagation.
    fn can_inherit(&self) -> bool {
        true
    }

    /// Upcast for downcasting to the concrete kind.
    fn as_any(&self) -> &dyn Any;

    /// Rust type name of the concrete kind. Feeds definition version hashes.
    fn kind_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Implement [`Attribute`] for a `Clone + Debug` type.
///
/// ```
/// use orrery_reflect::impl_attribute;
///
/// #[derive(Debug, Clone)]
/// struct Tooltip(String);
/// impl_attribute!(Tooltip);
///
/// #[derive(Debug, Clone)]
/// struct EditorOnly;
/// impl_attribute!(EditorOnly, inherit = false);
/// ```
#[macro_export]
macro_rules! impl_attribute {
    ($ty:ty) => {
        $crate::impl_attribute!($ty, inherit = true);
    };
    ($ty:ty, inherit = $inherit:expr) => {
        impl $crate::attribute::Attribute for $ty {
            fn clone_attribute(&self) -> ::std::boxed::Box<dyn $crate::attribute::Attribute> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn can_inherit(&self) -> bool {
                $inherit
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Build a `Vec<Box<dyn Attribute>>` from attribute values.
///
/// ```
/// use orrery_reflect::attrs;
/// use orrery_reflect::attribute::{NoSerialize, Range};
///
/// let list = attrs![NoSerialize, Range { min: 0.0, max: 1.0 }];
/// assert_eq!(list.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        ::std::vec::Vec::<::std::boxed::Box<dyn $crate::attribute::Attribute>>::new()
    };
    ($($attr:expr),+ $(,)?) => {
        ::std::vec![$(::std::boxed::Box::new($attr) as ::std::boxed::Box<dyn $crate::attribute::Attribute>),+]
    };
}

impl dyn Attribute {
    /// Downcast to a concrete attribute kind.
    pub fn downcast_ref<A: Attribute>(&self) -> Option<&A> {
        self.as_any().downcast_ref::<A>()
    }

    /// Whether this attribute is of kind `A`.
    pub fn is<A: Attribute>(&self) -> bool {
        self.as_any().is::<A>()
    }

    /// Rust type identity of the concrete kind.
    pub fn kind_id(&self) -> TypeId {
        self.as_any().type_id()
    }
}

impl Clone for Box<dyn Attribute> {
    fn clone(&self) -> Self {
        self.clone_attribute()
    }
}

// ---------------------------------------------------------------------------
// AttributeList
// ---------------------------------------------------------------------------

/// Ordered collection of attributes attached to one target.
#[derive(Debug, Default, Clone)]
pub struct AttributeList {
    attrs: Vec<Box<dyn Attribute>>,
}

impl AttributeList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self { attrs: Vec::new() }
    }

    /// Append an attribute.
    pub fn push(&mut self, attr: Box<dyn Attribute>) {
        self.attrs.push(attr);
    }

    /// Append every attribute from `attrs`.
    pub fn extend(&mut self, attrs: impl IntoIterator<Item = Box<dyn Attribute>>) {
        self.attrs.extend(attrs);
    }

    /// First attribute of kind `A`, if any.
    pub fn get<A: Attribute>(&self) -> Option<&A> {
        self.attrs.iter().find_map(|a| a.downcast_ref::<A>())
    }

    /// Every attribute of kind `A`, in attachment order.
    pub fn get_all<A: Attribute>(&self) -> Vec<&A> {
        self.attrs.iter().filter_map(|a| a.downcast_ref::<A>()).collect()
    }

    /// Whether an attribute of kind `A` is attached.
    pub fn has<A: Attribute>(&self) -> bool {
        self.attrs.iter().any(|a| a.is::<A>())
    }

    /// Whether an attribute whose concrete type is `kind` is attached.
    pub fn has_kind(&self, kind: TypeId) -> bool {
        self.attrs.iter().any(|a| a.kind_id() == kind)
    }

    /// Clones of every attribute that may be inherited.
    pub fn inheritable(&self) -> Vec<Box<dyn Attribute>> {
        self.attrs
            .iter()
            .filter(|a| a.can_inherit())
            .map(|a| a.clone_attribute())
            .collect()
    }

    /// Iterate attributes in attachment order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Attribute> {
        self.attrs.iter().map(|a| &**a)
    }

    /// Number of attached attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

impl From<Vec<Box<dyn Attribute>>> for AttributeList {
    fn from(attrs: Vec<Box<dyn Attribute>>) -> Self {
        Self { attrs }
    }
}

// ---------------------------------------------------------------------------
// AttributeDefinition
// ---------------------------------------------------------------------------

/// Registry entry describing an attribute kind placed on the attribute chain.
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    /// Registered name.
    pub name: String,
    /// Hash of `name`.
    pub hash: Hash64,
    /// Rust type identity of the kind.
    pub type_id: TypeId,
    /// Rust type name of the kind.
    pub type_name: &'static str,
    /// Module that registered the kind, if any.
    pub module: Option<String>,
}

// ---------------------------------------------------------------------------
// Built-in attribute kinds
// ---------------------------------------------------------------------------

/// Field is skipped by `load` and `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSerialize;
impl_attribute!(NoSerialize);

/// Field setter is refused; `load` leaves the field untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOnly;
impl_attribute!(ReadOnly);

/// Inclusive numeric range hint for editors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}
impl_attribute!(Range);

/// File extension handled by a resource type (e.g. `".archetype"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceExtension(pub String);
impl_attribute!(ResourceExtension, inherit = false);

/// Human-readable label shown by editors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName(pub String);
impl_attribute!(DisplayName, inherit = false);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_by_kind() {
        let list = AttributeList::from(attrs![Range { min: 0.0, max: 10.0 }, NoSerialize]);
        assert!(list.has::<NoSerialize>());
        assert!(!list.has::<ReadOnly>());
        assert_eq!(list.get::<Range>(), Some(&Range { min: 0.0, max: 10.0 }));
        assert!(list.get::<DisplayName>().is_none());
    }

    #[test]
    fn get_all_preserves_order() {
        let list = AttributeList::from(attrs![
            ResourceExtension(".archetype".to_owned()),
            NoSerialize,
            ResourceExtension(".archetype.bin".to_owned()),
        ]);
        let exts: Vec<&str> = list
            .get_all::<ResourceExtension>()
            .into_iter()
            .map(|e| e.0.as_str())
            .collect();
        assert_eq!(exts, vec![".archetype", ".archetype.bin"]);
    }

    #[test]
    fn clone_is_deep() {
        let list = AttributeList::from(attrs![DisplayName("Player".to_owned())]);
        let copy = list.clone();
        drop(list);
        assert_eq!(copy.get::<DisplayName>().map(|d| d.0.as_str()), Some("Player"));
    }

    #[test]
    fn inheritable_filters_non_inheriting_kinds() {
        let list = AttributeList::from(attrs![
            DisplayName("Base".to_owned()),
            ReadOnly,
            ResourceExtension(".thing".to_owned()),
        ]);
        let inherited = AttributeList::from(list.inheritable());
        assert_eq!(inherited.len(), 1);
        assert!(inherited.has::<ReadOnly>());
    }

    #[test]
    fn kind_id_matches_type_id() {
        let attr: Box<dyn Attribute> = Box::new(ReadOnly);
        assert_eq!(attr.kind_id(), TypeId::of::<ReadOnly>());
        assert!(AttributeList::from(vec![attr]).has_kind(TypeId::of::<ReadOnly>()));
    }
}
