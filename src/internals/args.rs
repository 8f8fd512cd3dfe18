//! Contains argument sets: tuples of queries fetched positionally from a box
//! for compute functions, `apply`, and `mutate`.

use std::{any::TypeId, marker::PhantomData};

use super::{
    databox::DataBox,
    tag::{BaseTag, Item, Tag, TagKey},
    SlotIndex,
};

/// Query wrapper resolving through a base tag.
///
/// `Base<B>` carries the base tag's key and item type, so wherever a tag is
/// queried (compute arguments, `apply`, `mutate`) it resolves to the unique
/// concrete tag deriving from `B`. It is a query, not storage: do not
/// register it.
pub struct Base<B>(PhantomData<B>);

impl<B: BaseTag> Tag for Base<B> {
    type Type = B::Type;

    fn name() -> &'static str {
        B::name()
    }

    fn key() -> TagKey {
        B::key()
    }
}

/// Fetches one resolved query; `slot` is `None` only for the reserved
/// [`DataBoxSelf`](super::tag::DataBoxSelf) query, which yields the box
/// itself.
fn fetch_one<T: Tag>(store: &DataBox, slot: Option<SlotIndex>) -> &T::Type {
    match slot {
        Some(slot) => store
            .item_ref(slot)
            .downcast_ref::<T::Type>()
            .unwrap_or_else(|| {
                panic!(
                    "tag `{}` does not hold a `{}`",
                    T::name(),
                    std::any::type_name::<T::Type>()
                )
            }),
        None => (store as &dyn Item)
            .downcast_ref::<T::Type>()
            .unwrap_or_else(|| {
                panic!(
                    "the box self-reference yields the box itself, not a `{}`",
                    std::any::type_name::<T::Type>()
                )
            }),
    }
}

/// A set of argument queries fetched together and passed positionally.
///
/// Implemented for tuples of up to eight queries (and for `()`). A query is
/// any tag, a [`Base`] indirection, or the reserved
/// [`DataBoxSelf`](super::tag::DataBoxSelf) handle.
pub trait ArgumentSet: 'static {
    /// The references the set yields, positionally.
    type Refs<'a>;

    /// The query keys, in order.
    fn keys() -> Vec<TagKey>;

    /// The expected item types, in order.
    fn item_types() -> Vec<(TypeId, &'static str)>;

    /// Fetches all queries. Every resolved slot must already be evaluated.
    fn fetch<'a>(store: &'a DataBox, indices: &[Option<SlotIndex>]) -> Self::Refs<'a>;
}

impl ArgumentSet for () {
    type Refs<'a> = ();

    fn keys() -> Vec<TagKey> {
        Vec::new()
    }

    fn item_types() -> Vec<(TypeId, &'static str)> {
        Vec::new()
    }

    fn fetch<'a>(_: &'a DataBox, _: &[Option<SlotIndex>]) {}
}

macro_rules! argument_set_tuple {
    ($( ($ty:ident, $idx:tt) ),*) => {
        impl<$( $ty: Tag ),*> ArgumentSet for ($( $ty, )*) {
            type Refs<'a> = ($( &'a <$ty as Tag>::Type, )*);

            fn keys() -> Vec<TagKey> {
                vec![$( $ty::key() ),*]
            }

            fn item_types() -> Vec<(TypeId, &'static str)> {
                vec![$(
                    (
                        TypeId::of::<<$ty as Tag>::Type>(),
                        std::any::type_name::<<$ty as Tag>::Type>(),
                    )
                ),*]
            }

            fn fetch<'a>(store: &'a DataBox, indices: &[Option<SlotIndex>]) -> Self::Refs<'a> {
                ($( fetch_one::<$ty>(store, indices[$idx]), )*)
            }
        }
    };
}

argument_set_tuple!((A, 0));
argument_set_tuple!((A, 0), (B, 1));
argument_set_tuple!((A, 0), (B, 1), (C, 2));
argument_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
argument_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
argument_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
argument_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
argument_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));

/// A set of mutable targets for
/// [`mutate_many`](crate::DataBox::mutate_many), passed positionally.
///
/// Implemented for tuples of up to eight simple (or subitem) tags.
pub trait MutateSet: 'static {
    /// The mutable handles the set yields, positionally.
    type Muts<'a>;

    /// The target keys, in order.
    fn keys() -> Vec<TagKey>;

    /// Fetches mutable handles to all targets.
    ///
    /// # Safety
    /// The caller must hold exclusive access to `store` and the indices must
    /// address distinct, non-aliasing slots.
    unsafe fn fetch_unchecked<'a>(store: &'a DataBox, indices: &[SlotIndex]) -> Self::Muts<'a>;
}

macro_rules! mutate_set_tuple {
    ($( ($ty:ident, $idx:tt) ),*) => {
        impl<$( $ty: Tag ),*> MutateSet for ($( $ty, )*) {
            type Muts<'a> = ($( &'a mut <$ty as Tag>::Type, )*);

            fn keys() -> Vec<TagKey> {
                vec![$( $ty::key() ),*]
            }

            unsafe fn fetch_unchecked<'a>(
                store: &'a DataBox,
                indices: &[SlotIndex],
            ) -> Self::Muts<'a> {
                ($(
                    {
                        let item = unsafe { store.item_mut_unchecked(indices[$idx]) };
                        item.downcast_mut::<<$ty as Tag>::Type>().unwrap_or_else(|| {
                            panic!(
                                "tag `{}` does not hold a `{}`",
                                $ty::name(),
                                std::any::type_name::<<$ty as Tag>::Type>()
                            )
                        })
                    },
                )*)
            }
        }
    };
}

mutate_set_tuple!((A, 0));
mutate_set_tuple!((A, 0), (B, 1));
mutate_set_tuple!((A, 0), (B, 1), (C, 2));
mutate_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
mutate_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
mutate_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
mutate_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
mutate_set_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));
