//! Contains the [`DataBox`]: the runtime store implementing the on-demand
//! evaluation contract over a validated schema.

use std::{fmt, sync::Arc};

use tracing::trace;

use super::{
    args::{ArgumentSet, MutateSet},
    schema::{CarriedSlot, DataBoxBuilder, KeyMap, Schema, SchemaError},
    storage::{SlotState, Storage},
    tag::{BaseTag, DataBoxSelf, Item, Tag, TagKey, TagKind},
    SlotIndex,
};

/// A typed, dependency-driven heterogeneous store.
///
/// A box owns one storage slot per registered tag: simple items hold their
/// value directly; compute items hold a lazily populated, automatically
/// invalidated cache; subitems project into their parent's storage. One box
/// belongs to one owning context (it is `Send` but not `Sync`); all calls on
/// it are sequential, so repeated [`get`](Self::get)s between mutations
/// return the identical cached value without recomputation.
pub struct DataBox {
    schema: Arc<Schema>,
    storage: Storage,
}

impl DataBox {
    /// Starts building a new box.
    pub fn builder() -> DataBoxBuilder {
        DataBoxBuilder::default()
    }

    pub(crate) fn from_parts(schema: Arc<Schema>, storage: Storage) -> Self {
        Self { schema, storage }
    }

    /// The box's validated schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns `true` if the tag `T` is registered in this box.
    pub fn contains<T: Tag>(&self) -> bool {
        self.schema.index_of(T::key()).is_some()
    }

    /// Returns the current value of `T`, evaluating and caching any compute
    /// items it depends on.
    ///
    /// # Panics
    /// Panics if `T` is not present in this box.
    pub fn get<T: Tag>(&self) -> &T::Type {
        let slot = self.lookup(T::key());
        self.force(slot);
        self.item_ref(slot)
            .downcast_ref::<T::Type>()
            .unwrap_or_else(|| {
                panic!(
                    "tag `{}` does not hold a `{}`",
                    T::name(),
                    std::any::type_name::<T::Type>()
                )
            })
    }

    /// Returns the current value of the unique concrete tag deriving from the
    /// base tag `B`.
    ///
    /// # Panics
    /// Panics if zero or more than one registered tag derives from `B`, or if
    /// the resolved tag does not store `B::Type`.
    pub fn get_base<B: BaseTag>(&self) -> &B::Type {
        let slot = match self.schema.resolve(B::key(), "get_base") {
            Ok(slot) => slot,
            Err(error) => panic!("{error}"),
        };
        self.force(slot);
        self.item_ref(slot)
            .downcast_ref::<B::Type>()
            .unwrap_or_else(|| {
                panic!(
                    "base tag `{}` resolves to `{}`, which does not hold a `{}`",
                    B::name(),
                    self.schema.meta(slot).key.name(),
                    std::any::type_name::<B::Type>()
                )
            })
    }

    /// Mutates the simple (or subitem-of-simple) tag `T` in place, then marks
    /// every compute item transitively downstream of it invalid.
    /// Recomputation is deferred to the next `get`.
    ///
    /// # Panics
    /// Panics if `T` is absent or is a compute item.
    pub fn mutate<T: Tag, R>(&mut self, f: impl FnOnce(&mut T::Type) -> R) -> R {
        self.mutate_many::<(T,), R>(|(value,)| f(value))
    }

    /// Mutates several tags in one call; see [`mutate`](Self::mutate).
    ///
    /// # Panics
    /// Panics if any target is absent or not mutable, or if two targets alias
    /// the same storage (a subitem and its parent, or two subitems of one
    /// parent).
    pub fn mutate_many<M: MutateSet, R>(&mut self, f: impl FnOnce(M::Muts<'_>) -> R) -> R {
        let targets = self.mutate_targets::<M>();
        // Safety: we hold the box exclusively and the targets are distinct
        // non-aliasing slots (checked above).
        let result = unsafe { f(M::fetch_unchecked(self, &targets)) };
        self.invalidate_downstream(&targets);
        result
    }

    /// Mutates the tags in `M` while reading the argument queries in `A`.
    ///
    /// The arguments observe the values current at the time of the call (any
    /// compute items among them are evaluated before the mutation runs).
    ///
    /// # Panics
    /// Panics as [`mutate_many`](Self::mutate_many) does, and additionally if
    /// an argument is, aliases, or transitively depends on one of the mutated
    /// tags, or if `A` requests the box self-reference.
    pub fn mutate_apply<M: MutateSet, A: ArgumentSet, R>(
        &mut self,
        f: impl FnOnce(M::Muts<'_>, A::Refs<'_>) -> R,
    ) -> R {
        let targets = self.mutate_targets::<M>();
        let args = self.apply_slots::<A>("mutate_apply");
        for (key, arg) in A::keys().iter().zip(&args) {
            let arg = match arg {
                Some(arg) => *arg,
                None => panic!("the box self-reference is not available during mutation"),
            };
            let arg_root = self.schema.meta(arg).alias_root;
            for &target in &targets {
                let target_root = self.schema.meta(target).alias_root;
                if arg_root == target_root
                    || self
                        .schema
                        .meta(target_root)
                        .downstream
                        .contains(arg.index())
                {
                    panic!(
                        "argument `{}` aliases or depends on a tag being mutated",
                        key.name()
                    );
                }
            }
        }
        for slot in args.iter().flatten() {
            self.force(*slot);
        }
        // Safety: exclusive access; targets are distinct non-aliasing slots,
        // and the overlap check above keeps every argument disjoint from
        // them.
        let result = unsafe {
            let muts = M::fetch_unchecked(self, &targets);
            let refs = A::fetch(self, &args);
            f(muts, refs)
        };
        self.invalidate_downstream(&targets);
        result
    }

    /// Replaces the value of the simple tag `T` wholesale.
    pub fn assign<T: Tag>(&mut self, value: T::Type) {
        self.mutate::<T, _>(|current| *current = value);
    }

    /// Fetches every query in `A` and invokes `f` with the values
    /// positionally, without mutating anything.
    ///
    /// The reserved [`DataBoxSelf`] query yields the box itself as a
    /// read-only handle.
    pub fn apply<A: ArgumentSet, R>(&self, f: impl FnOnce(A::Refs<'_>) -> R) -> R {
        let slots = self.apply_slots::<A>("apply");
        for slot in slots.iter().flatten() {
            self.force(*slot);
        }
        f(A::fetch(self, &slots))
    }

    /// Consumes the box and returns a builder preloaded with its
    /// registrations, values, and compute caches, ready for additional tags.
    ///
    /// Extension only adds tags, so surviving caches stay valid and are
    /// preserved; newly registered compute items start unevaluated. The
    /// extended schema is revalidated in full by
    /// [`build`](DataBoxBuilder::build).
    pub fn extend(mut self) -> DataBoxBuilder {
        let schema = self.schema.clone();
        let mut values: KeyMap<CarriedSlot> = KeyMap::default();
        for position in 0..schema.len() {
            let slot = SlotIndex(position as u32);
            let meta = schema.meta(slot);
            if meta.kind == TagKind::Subitem {
                continue;
            }
            let (value, valid) = self.storage.take(position);
            if let Some(value) = value {
                values.insert(meta.key, CarriedSlot { value, valid });
            }
        }
        DataBoxBuilder::from_parts(schema.registrations().to_vec(), values)
    }

    /// Resolves a query key (concrete or base) for `get`/`mutate`, with the
    /// usage-error diagnostics those operations promise.
    fn lookup(&self, key: TagKey) -> SlotIndex {
        match self.schema.resolve(key, "lookup") {
            Ok(slot) => slot,
            Err(SchemaError::NoMatchingTag { .. }) => {
                panic!("tag `{}` is not present in this box", key.name())
            }
            Err(error) => panic!("{error}"),
        }
    }

    /// Brings `slot` and its transitive dependencies up to date by walking
    /// its precomputed evaluation plan in order.
    fn force(&self, slot: SlotIndex) {
        for &step in &self.schema.meta(slot).plan {
            match self.storage.state(step.index()) {
                SlotState::Valid => {}
                SlotState::Computing => panic!(
                    "compute item `{}` is already being evaluated",
                    self.schema.meta(step).key.name()
                ),
                SlotState::Invalid => {
                    let meta = self.schema.meta(step);
                    trace!(tag = meta.key.name(), "evaluating compute item");
                    self.storage.set_state(step.index(), SlotState::Computing);
                    let evaluator = meta
                        .evaluator
                        .as_deref()
                        .expect("compute slots have evaluators");
                    evaluator(self, step);
                    self.storage.set_state(step.index(), SlotState::Valid);
                }
            }
        }
    }

    fn mutate_targets<M: MutateSet>(&self) -> Vec<SlotIndex> {
        let keys = M::keys();
        let mut targets = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = self.lookup(key);
            let meta = self.schema.meta(slot);
            match meta.kind {
                TagKind::Simple => {}
                TagKind::Subitem => {
                    if self.schema.meta(meta.alias_root).kind != TagKind::Simple {
                        panic!(
                            "tag `{}` is a subitem of a compute item and cannot be mutated",
                            key.name()
                        );
                    }
                }
                TagKind::Compute | TagKind::MutatingCompute => panic!(
                    "tag `{}` is a compute item and cannot be mutated directly",
                    key.name()
                ),
            }
            targets.push(slot);
        }
        for (position, &first) in targets.iter().enumerate() {
            for &second in &targets[..position] {
                if self.schema.meta(first).alias_root == self.schema.meta(second).alias_root {
                    panic!(
                        "tags `{}` and `{}` alias the same storage and cannot be mutated together",
                        self.schema.meta(first).key.name(),
                        self.schema.meta(second).key.name()
                    );
                }
            }
        }
        targets
    }

    fn invalidate_downstream(&self, targets: &[SlotIndex]) {
        let mut invalidated = 0usize;
        for &target in targets {
            let root = self.schema.meta(target).alias_root;
            for dependent in self.schema.meta(root).downstream.iter() {
                let meta = self.schema.meta(SlotIndex(dependent as u32));
                if meta.kind.is_compute()
                    && self.storage.state(dependent) == SlotState::Valid
                {
                    self.storage.set_state(dependent, SlotState::Invalid);
                    invalidated += 1;
                }
            }
        }
        trace!(invalidated, "invalidated downstream compute items");
    }

    fn apply_slots<A: ArgumentSet>(&self, requested_by: &'static str) -> Vec<Option<SlotIndex>> {
        A::keys()
            .into_iter()
            .map(|key| {
                if key == TagKey::of::<DataBoxSelf>() {
                    None
                } else {
                    match self.schema.resolve(key, requested_by) {
                        Ok(slot) => Some(slot),
                        Err(error) => panic!("{error}"),
                    }
                }
            })
            .collect()
    }

    /// Shared access to a slot's current value, projecting through subitem
    /// parents. The slot must be up to date.
    pub(crate) fn item_ref(&self, slot: SlotIndex) -> &dyn Item {
        let meta = self.schema.meta(slot);
        match (&meta.projector, meta.parent) {
            (Some(projector), Some(parent)) => (projector.get)(self.item_ref(parent)),
            _ => self.storage.value_ref(slot.index()),
        }
    }

    /// Mutable access to a slot's current value, projecting through subitem
    /// parents.
    ///
    /// # Safety
    /// The caller must either hold the box exclusively (mutation) or be
    /// evaluating this slot, and must not create aliasing references.
    pub(crate) unsafe fn item_mut_unchecked(&self, slot: SlotIndex) -> &mut dyn Item {
        let meta = self.schema.meta(slot);
        match (&meta.projector, meta.parent) {
            (Some(projector), Some(parent)) => {
                (projector.get_mut)(unsafe { self.item_mut_unchecked(parent) })
            }
            _ => unsafe { self.storage.value_mut_unchecked(slot.index()) },
        }
    }

    pub(crate) fn resolved_args(&self, slot: SlotIndex) -> &[Option<SlotIndex>] {
        &self.schema.meta(slot).args
    }

    pub(crate) fn slot_populated(&self, slot: SlotIndex) -> bool {
        self.storage.is_populated(slot.index())
    }

    /// # Safety
    /// The slot must not be `Valid`.
    pub(crate) unsafe fn replace_slot(&self, slot: SlotIndex, item: Box<dyn Item>) {
        unsafe { self.storage.replace(slot.index(), item) };
    }

    /// # Safety
    /// The slot must be `Computing`.
    pub(crate) unsafe fn slot_mut_for_eval(&self, slot: SlotIndex) -> &mut dyn Item {
        unsafe { self.storage.value_mut_unchecked(slot.index()) }
    }
}

impl fmt::Debug for DataBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBox")
            .field("slots", &self.schema.len())
            .finish()
    }
}
