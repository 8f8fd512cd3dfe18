//! The runtime store surface: the box itself, its builder, and the argument
//! machinery `apply` and `mutate` fetch through.

pub use crate::internals::{
    args::{ArgumentSet, Base, MutateSet},
    databox::DataBox,
    schema::{DataBoxBuilder, Schema, SchemaError},
    SlotIndex,
};
