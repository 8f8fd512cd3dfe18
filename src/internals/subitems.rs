//! Contains the subitem protocol, by which a composite item exposes its
//! constituent fields as independently addressable tags aliasing the parent's
//! storage.

use std::{any::TypeId, marker::PhantomData};

use super::tag::{Item, Tag, TagKey};

/// Type-erased projection from a parent item into one of its subitems.
///
/// A subitem slot owns no storage; reads and writes go through these
/// projections into the parent's value, so mutation through either view is
/// visible through the other.
#[derive(Clone)]
pub struct Projector {
    /// The subitem's key.
    pub(crate) key: TagKey,
    /// The subitem's item type.
    pub(crate) item_type: TypeId,
    pub(crate) item_type_name: &'static str,
    /// Base tags the subitem tag derives from.
    pub(crate) bases: Vec<TagKey>,
    /// Shared projection into the parent's value.
    pub(crate) get: fn(&dyn Item) -> &dyn Item,
    /// Mutable projection into the parent's value.
    pub(crate) get_mut: fn(&mut dyn Item) -> &mut dyn Item,
}

/// A subitem registration, pairing a projector with its parent tag.
#[derive(Clone)]
pub struct SubitemRecord {
    pub(crate) parent: TagKey,
    pub(crate) projector: Projector,
}

/// A tag addressing one field of a composite parent item.
///
/// The projections establish the aliasing: mutating the subitem writes into
/// the parent's storage, and reading it reads out of the parent's current
/// (for compute parents: cached) value.
pub trait SubitemTag: Tag {
    /// The composite tag this subitem projects into.
    type Parent: Tag;

    /// Projects the subitem out of the parent's value.
    fn extract(parent: &<Self::Parent as Tag>::Type) -> &Self::Type;

    /// Projects the subitem mutably out of the parent's value.
    ///
    /// Only reachable when the parent is a simple item; compute parents are
    /// read-only.
    fn extract_mut(parent: &mut <Self::Parent as Tag>::Type) -> &mut Self::Type;
}

/// Implemented by composite tags to enumerate their subitems.
pub trait Subitems: Tag + Sized {
    /// Registers every subitem of this tag.
    fn subitems(registrar: &mut SubitemRegistrar<'_, Self>);
}

/// Collects subitem registrations for one parent tag.
pub struct SubitemRegistrar<'a, P: Tag> {
    records: &'a mut Vec<SubitemRecord>,
    _parent: PhantomData<P>,
}

impl<'a, P: Tag> SubitemRegistrar<'a, P> {
    pub(crate) fn new(records: &'a mut Vec<SubitemRecord>) -> Self {
        Self {
            records,
            _parent: PhantomData,
        }
    }

    /// Registers the subitem `S` of the parent `P`.
    pub fn add<S: SubitemTag<Parent = P>>(&mut self) {
        self.records.push(SubitemRecord {
            parent: P::key(),
            projector: Projector {
                key: S::key(),
                item_type: TypeId::of::<S::Type>(),
                item_type_name: std::any::type_name::<S::Type>(),
                bases: S::base_tags(),
                get: |parent| {
                    let parent = parent
                        .downcast_ref::<P::Type>()
                        .expect("parent storage holds the parent tag's declared type");
                    S::extract(parent)
                },
                get_mut: |parent| {
                    let parent = parent
                        .downcast_mut::<P::Type>()
                        .expect("parent storage holds the parent tag's declared type");
                    S::extract_mut(parent)
                },
            },
        });
    }
}
