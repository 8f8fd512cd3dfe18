//! The tag declaration surface: tag traits, prefix algebra, bundles, and the
//! subitem protocol.

pub use crate::internals::{
    bundle::{
        AddBundlePrefix, Bundle, BundleTag, FieldList, RemoveBundlePrefix, UnwrapTags, WrapTags,
    },
    prefix::{
        prefix_wraps, remove_all_prefixes, AddTagPrefix, PrefixFamily, PrefixInfo, PrefixTag,
        RemoveTagPrefix,
    },
    subitems::{SubitemRegistrar, SubitemTag, Subitems},
    tag::{BaseTag, ComputeTag, DataBoxSelf, Item, MutatingComputeTag, Tag, TagKey, TagKind},
};
