//! Contains tag registration and schema validation.
//!
//! A schema is built once, before any data flows: the builder collects tag
//! registrations, and [`DataBoxBuilder::build`] resolves every compute item's
//! arguments, rejects structural errors, and precomputes the evaluation
//! metadata the runtime indexes into. Structural problems can therefore never
//! surface as data-dependent runtime failures.

use std::{
    any::TypeId,
    collections::HashMap,
    hash::BuildHasherDefault,
    sync::Arc,
};

use bit_set::BitSet;
use itertools::Itertools;
use smallvec::SmallVec;
use tracing::{debug, span, Level};

use super::{
    args::ArgumentSet,
    bundle::{Bundle, BundleTag, FieldList},
    databox::DataBox,
    graph::{self, Node},
    hash::TagKeyHasher,
    storage::{SlotCell, SlotState, Storage},
    subitems::{Projector, SubitemRecord, SubitemRegistrar, Subitems},
    tag::{ComputeTag, DataBoxSelf, Item, MutatingComputeTag, Tag, TagKey, TagKind},
    SlotIndex,
};

pub(crate) type KeyMap<V> = HashMap<TagKey, V, BuildHasherDefault<TagKeyHasher>>;

/// Error type representing a structurally invalid schema.
///
/// Every variant names the offending tag; none of them is recoverable at
/// runtime.
#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum SchemaError {
    /// The same tag was registered more than once.
    #[error("tag `{tag}` is registered more than once")]
    DuplicateTag { tag: &'static str },
    /// A query (compute argument or lookup) matched no tag in the schema.
    #[error("no tag in the schema matches `{query}` (needed by `{requested_by}`)")]
    NoMatchingTag {
        query: &'static str,
        requested_by: &'static str,
    },
    /// A query matched more than one tag in the schema.
    #[error("`{query}` matches more than one tag in the schema (`{first}` and `{second}`)")]
    AmbiguousTag {
        query: &'static str,
        first: &'static str,
        second: &'static str,
    },
    /// A compute item depends, directly or transitively, on itself.
    #[error("dependency cycle: {path}")]
    DependencyCycle { path: String },
    /// A base tag resolved to a concrete tag storing a different type.
    #[error(
        "base tag `{base}` declares `{expected}` but resolves to `{concrete}`, which holds `{found}`"
    )]
    BaseTypeMismatch {
        base: &'static str,
        concrete: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    /// A subitem's parent tag is not in the schema.
    #[error("subitem `{subitem}` projects into `{parent}`, which is not in the schema")]
    MissingParent {
        subitem: &'static str,
        parent: &'static str,
    },
    /// A compute item listed the box self-reference among its arguments.
    #[error("compute item `{tag}` cannot take the box itself as an argument")]
    SelfArgument { tag: &'static str },
    /// A reserved query key was registered as a tag.
    #[error("`{tag}` is a reserved query and cannot be registered")]
    ReservedTag { tag: &'static str },
}

/// Type-erased compute function: evaluates the slot `own` in `store`,
/// reading the resolved arguments and writing the slot's cache.
pub(crate) type Evaluator = Arc<dyn Fn(&DataBox, SlotIndex) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum TagRole {
    Simple,
    Compute {
        evaluator: Evaluator,
        mutating: bool,
        argument_keys: Vec<TagKey>,
        argument_types: Vec<(TypeId, &'static str)>,
        volume_tags: Vec<TagKey>,
    },
    Subitem {
        parent: TagKey,
        projector: Projector,
    },
}

/// One tag registration, kept by the schema so an extended box can be rebuilt
/// from it.
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) key: TagKey,
    pub(crate) item_type: TypeId,
    pub(crate) item_type_name: &'static str,
    pub(crate) bases: Vec<TagKey>,
    pub(crate) role: TagRole,
}

/// A value (and, for compute slots, its validity) carried into a build:
/// the initial value of a simple tag, or state moved out of a box being
/// extended.
pub(crate) struct CarriedSlot {
    pub(crate) value: Box<dyn Item>,
    pub(crate) valid: bool,
}

/// Resolved per-slot metadata.
pub(crate) struct SlotMeta {
    pub(crate) key: TagKey,
    pub(crate) kind: TagKind,
    pub(crate) item_type: TypeId,
    pub(crate) item_type_name: &'static str,
    /// Resolved argument slots, in declaration order (compute slots only).
    pub(crate) args: SmallVec<[Option<SlotIndex>; 8]>,
    pub(crate) volume_tags: Vec<TagKey>,
    pub(crate) evaluator: Option<Evaluator>,
    pub(crate) parent: Option<SlotIndex>,
    pub(crate) projector: Option<Projector>,
    pub(crate) subitems: SmallVec<[SlotIndex; 4]>,
    /// Transitive compute dependencies in evaluation order, self included.
    pub(crate) plan: Vec<SlotIndex>,
    /// Slots transitively depending on this one.
    pub(crate) downstream: BitSet,
    /// The owning parent slot for subitems; the slot itself otherwise.
    pub(crate) alias_root: SlotIndex,
}

/// The validated, immutable description of one box layout: slot table, key
/// index, and base-tag resolutions.
pub struct Schema {
    slots: Vec<SlotMeta>,
    index: KeyMap<SlotIndex>,
    base_matches: KeyMap<Vec<SlotIndex>>,
    registrations: Vec<Registration>,
}

impl Schema {
    /// The number of slots in the schema.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the schema has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The registered tag keys, in registration order.
    pub fn tags(&self) -> impl Iterator<Item = TagKey> + '_ {
        self.slots.iter().map(|slot| slot.key)
    }

    /// Storage classification of `key`, or `None` if it does not name a
    /// registered tag.
    pub fn kind(&self, key: TagKey) -> Option<TagKind> {
        self.index.get(&key).map(|slot| self.slots[slot.index()].kind)
    }

    /// The item type stored for `key`, resolving base keys to their unique
    /// concrete tag; `None` if the query does not resolve.
    pub fn item_type_id(&self, key: TagKey) -> Option<TypeId> {
        self.resolve(key, "item_type_id")
            .ok()
            .map(|slot| self.slots[slot.index()].item_type)
    }

    /// The volume-tag annotation of the compute item `key`.
    pub fn volume_tags(&self, key: TagKey) -> Option<&[TagKey]> {
        self.index
            .get(&key)
            .map(|slot| self.slots[slot.index()].volume_tags.as_slice())
    }

    /// The subitem tags of `key`, in registration order. Empty if `key` has
    /// no subitems; `None` if it is not registered.
    pub fn subitems_of(&self, key: TagKey) -> Option<Vec<TagKey>> {
        self.index.get(&key).map(|slot| {
            self.slots[slot.index()]
                .subitems
                .iter()
                .map(|sub| self.slots[sub.index()].key)
                .collect()
        })
    }

    /// The unique concrete tag matching `query`.
    ///
    /// A concrete key matches itself; a base key matches the unique concrete
    /// tag deriving from it; the reserved [`DataBoxSelf`] key always resolves
    /// to itself.
    pub fn first_matching_tag(&self, query: TagKey) -> Result<TagKey, SchemaError> {
        if query == TagKey::of::<DataBoxSelf>() {
            return Ok(query);
        }
        self.resolve(query, "first_matching_tag")
            .map(|slot| self.slots[slot.index()].key)
    }

    pub(crate) fn index_of(&self, key: TagKey) -> Option<SlotIndex> {
        self.index.get(&key).copied()
    }

    pub(crate) fn meta(&self, slot: SlotIndex) -> &SlotMeta {
        &self.slots[slot.index()]
    }

    pub(crate) fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Resolves a concrete or base query to its unique slot.
    pub(crate) fn resolve(
        &self,
        query: TagKey,
        requested_by: &'static str,
    ) -> Result<SlotIndex, SchemaError> {
        if let Some(&slot) = self.index.get(&query) {
            return Ok(slot);
        }
        match self.base_matches.get(&query).map(Vec::as_slice) {
            None | Some([]) => Err(SchemaError::NoMatchingTag {
                query: query.name(),
                requested_by,
            }),
            Some([only]) => Ok(*only),
            Some([first, second, ..]) => Err(SchemaError::AmbiguousTag {
                query: query.name(),
                first: self.slots[first.index()].key.name(),
                second: self.slots[second.index()].key.name(),
            }),
        }
    }
}

/// Collects tag registrations and initial values for a box.
///
/// Obtained from [`DataBox::builder`] (empty) or [`DataBox::extend`]
/// (preloaded with an existing box's registrations, values, and caches).
#[derive(Default)]
pub struct DataBoxBuilder {
    registrations: Vec<Registration>,
    values: KeyMap<CarriedSlot>,
}

impl DataBoxBuilder {
    pub(crate) fn from_parts(
        registrations: Vec<Registration>,
        values: KeyMap<CarriedSlot>,
    ) -> Self {
        Self {
            registrations,
            values,
        }
    }

    /// Registers the simple tag `T` with its initial value.
    pub fn with<T: Tag>(mut self, value: T::Type) -> Self {
        self.registrations.push(Registration {
            key: T::key(),
            item_type: TypeId::of::<T::Type>(),
            item_type_name: std::any::type_name::<T::Type>(),
            bases: T::base_tags(),
            role: TagRole::Simple,
        });
        self.values.insert(
            T::key(),
            CarriedSlot {
                value: Box::new(value),
                valid: true,
            },
        );
        self
    }

    /// Registers the compute tag `C`.
    pub fn with_compute<C: ComputeTag>(mut self) -> Self {
        let evaluator: Evaluator = Arc::new(|store: &DataBox, own: SlotIndex| {
            let value = C::compute(<C::Arguments as ArgumentSet>::fetch(
                store,
                store.resolved_args(own),
            ));
            // Safety: `own` is Computing, so nothing borrows into it.
            unsafe { store.replace_slot(own, Box::new(value)) };
        });
        self.push_compute::<C, C::Arguments>(evaluator, false, C::volume_tags());
        self
    }

    /// Registers the mutating compute tag `C`. Its buffer is
    /// default-constructed on first evaluation and updated in place on every
    /// re-evaluation.
    pub fn with_mutating_compute<C: MutatingComputeTag>(mut self) -> Self
    where
        C::Type: Default,
    {
        let evaluator: Evaluator = Arc::new(|store: &DataBox, own: SlotIndex| {
            if !store.slot_populated(own) {
                // Safety: `own` is Computing, so nothing borrows into it.
                unsafe { store.replace_slot(own, Box::new(<C::Type as Default>::default())) };
            }
            // Safety: `own` is Computing; the buffer cannot alias the
            // argument references because the graph is acyclic.
            let buffer = unsafe { store.slot_mut_for_eval(own) }
                .downcast_mut::<C::Type>()
                .expect("mutating compute buffer holds the declared type");
            let args =
                <C::Arguments as ArgumentSet>::fetch(store, store.resolved_args(own));
            C::compute(buffer, args);
        });
        self.push_compute::<C, C::Arguments>(evaluator, true, C::volume_tags());
        self
    }

    /// Registers every subitem the composite tag `P` enumerates.
    pub fn with_subitems<P: Subitems>(mut self) -> Self {
        let mut records = Vec::new();
        P::subitems(&mut SubitemRegistrar::new(&mut records));
        for record in records {
            self.push_subitem(record);
        }
        self
    }

    /// Registers every field of the bundle `B` as a subitem of it.
    pub fn with_subitems_of<B: BundleTag>(mut self) -> Self {
        for projector in <B::Fields as FieldList>::projectors() {
            self.push_subitem(SubitemRecord {
                parent: B::key(),
                projector,
            });
        }
        self
    }

    /// Registers the bundle over `L` with its initial field values, exposing
    /// every field as a subitem.
    pub fn with_bundle<L: FieldList>(self, values: L::Values) -> Self {
        self.with::<Bundle<L>>(values).with_subitems_of::<Bundle<L>>()
    }

    fn push_compute<C: Tag, A: ArgumentSet>(
        &mut self,
        evaluator: Evaluator,
        mutating: bool,
        volume_tags: Vec<TagKey>,
    ) {
        self.registrations.push(Registration {
            key: C::key(),
            item_type: TypeId::of::<C::Type>(),
            item_type_name: std::any::type_name::<C::Type>(),
            bases: C::base_tags(),
            role: TagRole::Compute {
                evaluator,
                mutating,
                argument_keys: A::keys(),
                argument_types: A::item_types(),
                volume_tags,
            },
        });
    }

    fn push_subitem(&mut self, record: SubitemRecord) {
        self.registrations.push(Registration {
            key: record.projector.key,
            item_type: record.projector.item_type,
            item_type_name: record.projector.item_type_name,
            bases: record.projector.bases.clone(),
            role: TagRole::Subitem {
                parent: record.parent,
                projector: record.projector,
            },
        });
    }

    /// Validates the schema and builds the box.
    ///
    /// Resolves every compute argument and subitem parent, rejects duplicate
    /// tags, ambiguous or unsatisfiable queries, base-type mismatches, and
    /// dependency cycles, then precomputes evaluation plans and downstream
    /// sets.
    pub fn build(mut self) -> Result<DataBox, SchemaError> {
        let build_span = span!(Level::TRACE, "schema_build");
        let _guard = build_span.enter();

        let self_key = TagKey::of::<DataBoxSelf>();
        if let Some(reserved) = self
            .registrations
            .iter()
            .find(|registration| registration.key == self_key)
        {
            return Err(SchemaError::ReservedTag {
                tag: reserved.key.name(),
            });
        }

        if let Some(duplicate) = self
            .registrations
            .iter()
            .map(|registration| registration.key)
            .duplicates()
            .next()
        {
            return Err(SchemaError::DuplicateTag {
                tag: duplicate.name(),
            });
        }

        let index: KeyMap<SlotIndex> = self
            .registrations
            .iter()
            .enumerate()
            .map(|(position, registration)| (registration.key, SlotIndex(position as u32)))
            .collect();

        let mut base_matches: KeyMap<Vec<SlotIndex>> = KeyMap::default();
        for (position, registration) in self.registrations.iter().enumerate() {
            for base in &registration.bases {
                base_matches
                    .entry(*base)
                    .or_default()
                    .push(SlotIndex(position as u32));
            }
        }

        let resolve = |query: TagKey, requested_by: &'static str| -> Result<SlotIndex, SchemaError> {
            if let Some(&slot) = index.get(&query) {
                return Ok(slot);
            }
            match base_matches.get(&query).map(Vec::as_slice) {
                None | Some([]) => Err(SchemaError::NoMatchingTag {
                    query: query.name(),
                    requested_by,
                }),
                Some([only]) => Ok(*only),
                Some([first, second, ..]) => Err(SchemaError::AmbiguousTag {
                    query: query.name(),
                    first: self.registrations[first.index()].key.name(),
                    second: self.registrations[second.index()].key.name(),
                }),
            }
        };

        // Resolve arguments and parents, and collect the graph's nodes.
        let mut resolved_args: Vec<SmallVec<[Option<SlotIndex>; 8]>> = Vec::new();
        let mut parents: Vec<Option<SlotIndex>> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();
        for registration in &self.registrations {
            let name = registration.key.name();
            let mut args: SmallVec<[Option<SlotIndex>; 8]> = SmallVec::new();
            let mut parent = None;
            let mut deps: SmallVec<[SlotIndex; 8]> = SmallVec::new();
            match &registration.role {
                TagRole::Simple => {}
                TagRole::Compute {
                    argument_keys,
                    argument_types,
                    ..
                } => {
                    for (key, (expected, expected_name)) in
                        argument_keys.iter().zip(argument_types)
                    {
                        if *key == self_key {
                            return Err(SchemaError::SelfArgument { tag: name });
                        }
                        let slot = resolve(*key, name)?;
                        let target = &self.registrations[slot.index()];
                        if target.item_type != *expected {
                            // Exact key matches share the tag's declared item
                            // type by construction; only a base resolution
                            // can disagree.
                            debug_assert!(!index.contains_key(key));
                            return Err(SchemaError::BaseTypeMismatch {
                                base: key.name(),
                                concrete: target.key.name(),
                                expected: expected_name,
                                found: target.item_type_name,
                            });
                        }
                        args.push(Some(slot));
                        deps.push(slot);
                    }
                }
                TagRole::Subitem {
                    parent: parent_key, ..
                } => {
                    let slot = index.get(parent_key).copied().ok_or(
                        SchemaError::MissingParent {
                            subitem: name,
                            parent: parent_key.name(),
                        },
                    )?;
                    parent = Some(slot);
                    deps.push(slot);
                }
            }
            nodes.push(Node {
                name,
                is_compute: matches!(registration.role, TagRole::Compute { .. }),
                deps,
            });
            resolved_args.push(args);
            parents.push(parent);
        }

        let graph_data = graph::validate(&nodes)?;

        // Alias roots: subitems resolve to their (transitively) owning slot.
        let mut alias_roots: Vec<SlotIndex> = (0..self.registrations.len())
            .map(|position| SlotIndex(position as u32))
            .collect();
        for position in 0..self.registrations.len() {
            let mut root = SlotIndex(position as u32);
            while let Some(parent) = parents[root.index()] {
                root = parent;
            }
            alias_roots[position] = root;
        }

        let mut subitem_lists: Vec<SmallVec<[SlotIndex; 4]>> =
            vec![SmallVec::new(); self.registrations.len()];
        for (position, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                subitem_lists[parent.index()].push(SlotIndex(position as u32));
            }
        }

        // Assemble slot metadata and storage.
        let mut slots = Vec::with_capacity(self.registrations.len());
        let mut cells = Vec::with_capacity(self.registrations.len());
        let mut plans = graph_data.plans.into_iter();
        let mut downstream_sets = graph_data.downstream.into_iter();
        let mut subitem_iter = subitem_lists.into_iter();
        for (position, registration) in self.registrations.iter().enumerate() {
            let carried = self.values.remove(&registration.key);
            let (kind, evaluator, projector, volume_tags) = match &registration.role {
                TagRole::Simple => (TagKind::Simple, None, None, Vec::new()),
                TagRole::Compute {
                    evaluator,
                    mutating,
                    volume_tags,
                    ..
                } => (
                    if *mutating {
                        TagKind::MutatingCompute
                    } else {
                        TagKind::Compute
                    },
                    Some(evaluator.clone()),
                    None,
                    volume_tags.clone(),
                ),
                TagRole::Subitem { projector, .. } => {
                    (TagKind::Subitem, None, Some(projector.clone()), Vec::new())
                }
            };
            let cell = match kind {
                TagKind::Simple => {
                    let carried = carried
                        .expect("simple tags are registered together with a value");
                    SlotCell::new(Some(carried.value), SlotState::Valid)
                }
                TagKind::Compute | TagKind::MutatingCompute => match carried {
                    Some(carried) => SlotCell::new(
                        Some(carried.value),
                        if carried.valid {
                            SlotState::Valid
                        } else {
                            SlotState::Invalid
                        },
                    ),
                    None => SlotCell::new(None, SlotState::Invalid),
                },
                // Subitems own no storage; the cell is inert.
                TagKind::Subitem => SlotCell::new(None, SlotState::Valid),
            };
            cells.push(cell);
            slots.push(SlotMeta {
                key: registration.key,
                kind,
                item_type: registration.item_type,
                item_type_name: registration.item_type_name,
                args: resolved_args[position].clone(),
                volume_tags,
                evaluator,
                parent: parents[position],
                projector,
                subitems: subitem_iter.next().expect("one subitem list per slot"),
                plan: plans.next().expect("one plan per slot"),
                downstream: downstream_sets.next().expect("one downstream set per slot"),
                alias_root: alias_roots[position],
            });
        }

        debug!(slots = slots.len(), "validated schema");

        let schema = Schema {
            slots,
            index,
            base_matches,
            registrations: std::mem::take(&mut self.registrations),
        };
        Ok(DataBox::from_parts(Arc::new(schema), Storage::new(cells)))
    }
}
