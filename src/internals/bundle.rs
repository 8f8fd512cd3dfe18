//! Contains field bundles: tags aggregating an inner list of field tags into
//! one stored value, with every field addressable as a subitem of the bundle.

use std::{any::TypeId, marker::PhantomData};

use super::{
    prefix::{PrefixFamily, PrefixTag},
    subitems::Projector,
    tag::{Item, Tag, TagKey},
};

/// An ordered list of field tags, implemented for tuples of tags.
///
/// The aggregate value type is the tuple of the field item types, so a bundle
/// of `(MassDensity, Velocity)` stores a `(f64, [f64; 3])` (say) contiguously
/// in one slot.
pub trait FieldList: 'static {
    /// The aggregate value type: the tuple of the field item types.
    type Values: Item;

    /// The field tag keys, in order.
    fn keys() -> Vec<TagKey>;

    /// One storage projection per field, in order.
    fn projectors() -> Vec<Projector>;
}

/// Tag for an aggregate of several field tags stored together.
///
/// Registering a bundle (see
/// [`with_bundle`](crate::DataBoxBuilder::with_bundle)) also registers every
/// field as a subitem aliasing into the bundle's storage.
pub struct Bundle<L>(PhantomData<L>);

impl<L: FieldList> Tag for Bundle<L> {
    type Type = L::Values;
}

/// Recovers the field list of a (possibly generic) bundle tag.
pub trait BundleTag: Tag {
    /// The bundled field tags.
    type Fields: FieldList;
}

impl<L: FieldList> BundleTag for Bundle<L> {
    type Fields = L;
}

/// Wraps every tag of a field list in the prefix family `P`.
pub trait WrapTags<P: PrefixFamily>: FieldList {
    /// The field list with each tag wrapped.
    type Wrapped: FieldList;
}

/// Removes one prefix from every tag of a field list.
pub trait UnwrapTags: FieldList {
    /// The field list with one prefix removed from each tag.
    type Unwrapped: FieldList;
}

/// Wrap a bundle over `L` in the prefix family `P`.
///
/// The prefix distributes into the field list rather than applying to the
/// bundle tag alone: the result bundles the wrapped fields.
pub type AddBundlePrefix<P, L> =
    <P as PrefixFamily>::Of<Bundle<<L as WrapTags<P>>::Wrapped>>;

/// Remove the outer prefix from a prefixed bundle, unwrapping the field list
/// as well.
pub type RemoveBundlePrefix<T> =
    Bundle<<<<T as PrefixTag>::Inner as BundleTag>::Fields as UnwrapTags>::Unwrapped>;

macro_rules! field_list_tuple {
    ($( ($ty:ident, $idx:tt) ),*) => {
        impl<$( $ty: Tag ),*> FieldList for ($( $ty, )*) {
            type Values = ($( <$ty as Tag>::Type, )*);

            fn keys() -> Vec<TagKey> {
                vec![$( $ty::key() ),*]
            }

            fn projectors() -> Vec<Projector> {
                vec![$(
                    Projector {
                        key: $ty::key(),
                        item_type: TypeId::of::<<$ty as Tag>::Type>(),
                        item_type_name: std::any::type_name::<<$ty as Tag>::Type>(),
                        bases: $ty::base_tags(),
                        get: |parent| {
                            let values = parent
                                .downcast_ref::<Self::Values>()
                                .expect("bundle storage holds its declared value tuple");
                            &values.$idx
                        },
                        get_mut: |parent| {
                            let values = parent
                                .downcast_mut::<Self::Values>()
                                .expect("bundle storage holds its declared value tuple");
                            &mut values.$idx
                        },
                    }
                ),*]
            }
        }

        impl<P: PrefixFamily, $( $ty: Tag ),*> WrapTags<P> for ($( $ty, )*) {
            type Wrapped = ($( <P as PrefixFamily>::Of<$ty>, )*);
        }

        impl<$( $ty: PrefixTag ),*> UnwrapTags for ($( $ty, )*) {
            type Unwrapped = ($( <$ty as PrefixTag>::Inner, )*);
        }
    };
}

field_list_tuple!((A, 0));
field_list_tuple!((A, 0), (B, 1));
field_list_tuple!((A, 0), (B, 1), (C, 2));
field_list_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
field_list_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
field_list_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
field_list_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
field_list_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));
