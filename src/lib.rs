//! Tagbox is a dependency-driven, typed heterogeneous data store for
//! per-element simulation state.
//!
//! A [`DataBox`] holds one slot per *tag*: a marker type naming a quantity
//! and declaring its value type. Simple tags store a value directly; compute
//! tags derive their value lazily from other tags and cache it; base tags
//! resolve polymorphically to the unique concrete tag deriving from them;
//! prefix tags decorate another tag's identity; bundles aggregate several
//! field tags into one slot while keeping every field addressable. The whole
//! dependency graph is validated when the box is built, so an unsatisfiable
//! argument, an ambiguous lookup, or a dependency cycle fails fast with a
//! diagnostic naming the offending tag — never as a data-dependent runtime
//! failure.
//!
//! # Getting Started
//!
//! ```rust
//! use tagbox::{ComputeTag, DataBox, Tag};
//!
//! // Declare the quantities: the tag type is the name, the associated type
//! // is what gets stored.
//! struct Extents;
//! impl Tag for Extents {
//!     type Type = Vec<f64>;
//! }
//!
//! struct TotalExtent;
//! impl Tag for TotalExtent {
//!     type Type = f64;
//! }
//! impl ComputeTag for TotalExtent {
//!     type Arguments = (Extents,);
//!     fn compute((extents,): (&Vec<f64>,)) -> f64 {
//!         extents.iter().sum()
//!     }
//! }
//!
//! let mut element = DataBox::builder()
//!     .with::<Extents>(vec![1.0, 2.0])
//!     .with_compute::<TotalExtent>()
//!     .build()?;
//!
//! // Compute items evaluate on first access and are cached afterwards.
//! assert_eq!(*element.get::<TotalExtent>(), 3.0);
//!
//! // Mutating an upstream tag invalidates everything downstream of it;
//! // recomputation happens on the next access.
//! element.mutate::<Extents, _>(|extents| extents.push(3.0));
//! assert_eq!(*element.get::<TotalExtent>(), 6.0);
//! # Ok::<(), tagbox::SchemaError>(())
//! ```
//!
//! # Features
//!
//! ### Lazy, self-invalidating compute graph
//!
//! [`DataBox::get`] brings a compute item up to date by walking its
//! precomputed evaluation plan; repeated reads between mutations return the
//! identical cached value. [`DataBox::mutate`] flips the precomputed
//! downstream set to invalid and defers all recomputation.
//!
//! ### Polymorphic lookup through base tags
//!
//! A [`BaseTag`] names a quantity abstractly; concrete tags declare the bases
//! they derive from, and both [`DataBox::get_base`] and compute arguments
//! (via [`Base`]) resolve to the unique concrete match.
//!
//! ### Prefixes and bundles
//!
//! A [`PrefixTag`] wraps another tag, inheriting its value type
//! ("the flux *of* the field"); prefixes compose and distribute over
//! [`Bundle`]s of field tags rather than applying to the bundle itself.
//!
//! ### Subitems
//!
//! A composite item can expose its constituents as independently addressable
//! tags that alias the parent's storage (see [`Subitems`]); mutating a
//! subitem writes through to the parent, and mutating the parent invalidates
//! everything derived from its subitems.
//!
//! ### Merging boxes
//!
//! [`DataBox::extend`] moves a box's values and surviving compute caches into
//! a builder so initialization code can add state progressively across
//! phases; the extended schema is revalidated in full.

mod internals;

pub mod store;
pub mod tags;

pub use store::{ArgumentSet, Base, DataBox, DataBoxBuilder, MutateSet, Schema, SchemaError};
pub use tags::{
    BaseTag, Bundle, BundleTag, ComputeTag, DataBoxSelf, FieldList, Item, MutatingComputeTag,
    PrefixFamily, PrefixInfo, PrefixTag, SubitemRegistrar, SubitemTag, Subitems, Tag, TagKey,
    TagKind,
};
