//! Contains the prefix tag algebra: wrapping a tag in a decorating prefix,
//! unwrapping it again, and stripping every prefix at once.

use super::tag::{Tag, TagKey};

/// Runtime record of a prefix tag's structure.
///
/// Carries both the immediately wrapped tag and the fully unprefixed tag at
/// the bottom of the chain, so stripping all prefixes never needs to walk the
/// schema.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PrefixInfo {
    /// The tag this prefix immediately wraps.
    pub wrapped: TagKey,
    /// `wrapped` with every remaining prefix removed.
    pub bare: TagKey,
}

impl PrefixInfo {
    /// Builds the record for a prefix wrapping `Inner`, chaining through
    /// `Inner`'s own prefix structure.
    pub fn of<Inner: Tag>() -> Self {
        let bare = Inner::prefix_info()
            .map(|info| info.bare)
            .unwrap_or_else(Inner::key);
        Self {
            wrapped: Inner::key(),
            bare,
        }
    }
}

/// A tag that wraps another tag, inheriting and decorating its identity.
///
/// Implementors are generic wrapper types `P<T>`; the wrapped tag is
/// recovered as `P::Inner`. Implementations must also override
/// [`Tag::prefix_info`] with [`PrefixInfo::of::<Inner>`] so the runtime
/// algebra can see the chain.
pub trait PrefixTag: Tag {
    /// The wrapped tag.
    type Inner: Tag;
}

/// A family of prefix tags, naming the wrapper generically.
///
/// Where a [`PrefixTag`] is one concrete wrapped tag (`FluxOf<Field>`), the
/// family is the wrapper itself (`Flux`), so a prefix can be applied to an
/// arbitrary tag or distributed over a bundle's field list.
pub trait PrefixFamily: 'static {
    /// The family's wrapper applied to `T`.
    type Of<T: Tag>: PrefixTag<Inner = T> + Tag<Type = <T as Tag>::Type>;
}

/// Wrap `T` in the prefix family `P`.
pub type AddTagPrefix<P, T> = <P as PrefixFamily>::Of<T>;

/// Remove one prefix from `T`.
pub type RemoveTagPrefix<T> = <T as PrefixTag>::Inner;

/// Returns the key of `T` with every prefix removed.
pub fn remove_all_prefixes<T: Tag>() -> TagKey {
    T::prefix_info().map(|info| info.bare).unwrap_or_else(T::key)
}

/// Returns `true` if the prefix tag `P` wraps the tag `T`.
///
/// Useful for extracting, from a list of prefix tags, the subset wrapping a
/// specified tag.
pub fn prefix_wraps<P: PrefixTag, T: Tag>() -> bool {
    <P::Inner as Tag>::key() == T::key()
}
