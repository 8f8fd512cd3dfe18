//! Contains the tag traits and the runtime tag identity used to address items
//! in a box.

use downcast_rs::{impl_downcast, Downcast};
use std::{
    any::TypeId,
    fmt::{Display, Formatter},
    hash::Hasher,
};

use super::{args::ArgumentSet, databox::DataBox, prefix::PrefixInfo};

/// Unique runtime ID for a tag.
///
/// Two keys compare equal exactly when they name the same tag type; the type
/// name is carried for diagnostics only.
#[derive(Copy, Clone, Debug, Eq)]
pub struct TagKey {
    type_id: TypeId,
    name: &'static str,
}

impl TagKey {
    /// Returns the key of the given tag type.
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the internal `TypeId` of the tag.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the tag's type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TagKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id.eq(&other.type_id)
    }
}

impl PartialOrd for TagKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl std::hash::Hash for TagKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl Display for TagKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Blanket trait for values that can be stored in a box.
pub trait Item: 'static + Downcast + Send {}
impl<T> Item for T where T: 'static + Send {}
impl_downcast!(Item);

/// A named, typed quantity addressable in a box.
///
/// Implementors are usually zero-sized marker types; the type itself is the
/// name. A tag implementing only this trait is a *simple* tag: its value is
/// stored directly and changed only through
/// [`mutate`](crate::DataBox::mutate).
pub trait Tag: 'static {
    /// The type of the stored value.
    type Type: Item;

    /// The tag's name, for diagnostics.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The tag's runtime key.
    fn key() -> TagKey
    where
        Self: Sized,
    {
        TagKey::of::<Self>()
    }

    /// Base tags this tag derives from, resolvable through
    /// [`get_base`](crate::DataBox::get_base) and base-tag arguments.
    fn base_tags() -> Vec<TagKey> {
        Vec::new()
    }

    /// Prefix structure, if this tag wraps another tag.
    fn prefix_info() -> Option<PrefixInfo> {
        None
    }
}

/// A polymorphic lookup key with no storage of its own.
///
/// A base tag is resolved, when a schema is built or queried, to exactly one
/// concrete tag that lists it in [`Tag::base_tags`]. The resolved tag must
/// store exactly `Type`; anything else is a schema error.
pub trait BaseTag: 'static {
    /// The type stored by any concrete tag deriving from this base.
    type Type: Item;

    /// The base tag's name, for diagnostics.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The base tag's runtime key.
    fn key() -> TagKey
    where
        Self: Sized,
    {
        TagKey::of::<Self>()
    }
}

/// A tag whose value is derived on demand from other tags.
///
/// The value is computed lazily on first access, memoized, and recomputed
/// only after one of the (transitive) argument tags is mutated.
pub trait ComputeTag: Tag {
    /// The argument queries, fetched positionally for [`Self::compute`].
    type Arguments: ArgumentSet;

    /// Argument tags exempt from directional/interface transforms that a
    /// consumer applies uniformly to the rest of the argument list. This is a
    /// pass-through annotation preserved alongside the resolved arguments.
    fn volume_tags() -> Vec<TagKey> {
        Vec::new()
    }

    /// Computes the value from the current argument values.
    fn compute(args: <Self::Arguments as ArgumentSet>::Refs<'_>) -> Self::Type;
}

/// A compute tag that writes into a persistent owned buffer in place rather
/// than returning a freshly constructed value each time.
///
/// The buffer is default-constructed on the first evaluation and reused for
/// every re-evaluation, so recomputation does not allocate.
pub trait MutatingComputeTag: Tag {
    /// The argument queries, fetched positionally for [`Self::compute`].
    type Arguments: ArgumentSet;

    /// See [`ComputeTag::volume_tags`].
    fn volume_tags() -> Vec<TagKey> {
        Vec::new()
    }

    /// Updates the buffer from the current argument values.
    fn compute(result: &mut Self::Type, args: <Self::Arguments as ArgumentSet>::Refs<'_>);
}

/// Query that resolves to the enclosing box itself.
///
/// Usable only as an [`apply`](crate::DataBox::apply) argument, so an
/// invokable can receive the box as an opaque read-only handle. It is a
/// query, not storage: it cannot be registered, mutated, or depended on by a
/// compute item.
pub struct DataBoxSelf;

impl Tag for DataBoxSelf {
    type Type = DataBox;
}

/// Storage classification of a registered tag.
///
/// The kinds are mutually exclusive. Unregistered keys classify as `None`
/// ("not a tag") wherever classification drives dispatch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TagKind {
    /// Owns a directly stored value.
    Simple,
    /// Derived lazily from other tags.
    Compute,
    /// Derived lazily, writing into a persistent buffer in place.
    MutatingCompute,
    /// A projection into a parent item's storage.
    Subitem,
}

impl TagKind {
    /// Returns `true` for both compute kinds.
    pub fn is_compute(self) -> bool {
        matches!(self, TagKind::Compute | TagKind::MutatingCompute)
    }
}
