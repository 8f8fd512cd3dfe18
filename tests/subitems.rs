use std::sync::atomic::{AtomicUsize, Ordering};

use tagbox::{
    Bundle, ComputeTag, DataBox, SchemaError, SubitemRegistrar, SubitemTag, Subitems, Tag,
};

struct FieldA;
impl Tag for FieldA {
    type Type = f64;
}

struct FieldB;
impl Tag for FieldB {
    type Type = f64;
}

type Fields = (FieldA, FieldB);

#[derive(Default)]
struct Primitives {
    density: f64,
    velocity: [f64; 3],
}

struct PrimitiveSet;
impl Tag for PrimitiveSet {
    type Type = Primitives;
}

struct Density;
impl Tag for Density {
    type Type = f64;
}
impl SubitemTag for Density {
    type Parent = PrimitiveSet;
    fn extract(parent: &Primitives) -> &f64 {
        &parent.density
    }
    fn extract_mut(parent: &mut Primitives) -> &mut f64 {
        &mut parent.density
    }
}

struct Velocity;
impl Tag for Velocity {
    type Type = [f64; 3];
}
impl SubitemTag for Velocity {
    type Parent = PrimitiveSet;
    fn extract(parent: &Primitives) -> &[f64; 3] {
        &parent.velocity
    }
    fn extract_mut(parent: &mut Primitives) -> &mut [f64; 3] {
        &mut parent.velocity
    }
}

impl Subitems for PrimitiveSet {
    fn subitems(registrar: &mut SubitemRegistrar<'_, Self>) {
        registrar.add::<Density>();
        registrar.add::<Velocity>();
    }
}

#[test]
fn bundle_fields_alias_the_parent_storage() {
    let mut element = DataBox::builder()
        .with_bundle::<Fields>((1.0, 2.0))
        .build()
        .unwrap();

    assert_eq!(*element.get::<FieldA>(), 1.0);
    assert_eq!(*element.get::<FieldB>(), 2.0);

    element.mutate::<FieldA, _>(|field| *field = 5.0);
    assert_eq!(element.get::<Bundle<Fields>>().0, 5.0);

    element.mutate::<Bundle<Fields>, _>(|fields| fields.1 = 7.0);
    assert_eq!(*element.get::<FieldB>(), 7.0);
}

#[test]
fn subitem_mutation_invalidates_the_parents_dependents() {
    static EVALUATIONS: AtomicUsize = AtomicUsize::new(0);
    struct Total;
    impl Tag for Total {
        type Type = f64;
    }
    impl ComputeTag for Total {
        type Arguments = (Bundle<Fields>,);
        fn compute((fields,): (&(f64, f64),)) -> f64 {
            EVALUATIONS.fetch_add(1, Ordering::SeqCst);
            fields.0 + fields.1
        }
    }

    let mut element = DataBox::builder()
        .with_bundle::<Fields>((1.0, 2.0))
        .with_compute::<Total>()
        .build()
        .unwrap();

    assert_eq!(*element.get::<Total>(), 3.0);
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 1);

    // The parent's cached dependents see the slice written through the
    // subitem before they are next evaluated.
    element.mutate::<FieldA, _>(|field| *field = 10.0);
    assert_eq!(*element.get::<Total>(), 12.0);
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 2);
}

#[test]
fn parent_mutation_invalidates_the_subitems_dependents() {
    static EVALUATIONS: AtomicUsize = AtomicUsize::new(0);
    struct Doubled;
    impl Tag for Doubled {
        type Type = f64;
    }
    impl ComputeTag for Doubled {
        type Arguments = (FieldA,);
        fn compute((field,): (&f64,)) -> f64 {
            EVALUATIONS.fetch_add(1, Ordering::SeqCst);
            field * 2.0
        }
    }

    let mut element = DataBox::builder()
        .with_bundle::<Fields>((1.0, 2.0))
        .with_compute::<Doubled>()
        .build()
        .unwrap();

    assert_eq!(*element.get::<Doubled>(), 2.0);
    element.mutate::<Bundle<Fields>, _>(|fields| fields.0 = 3.0);
    assert_eq!(*element.get::<Doubled>(), 6.0);
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 2);
}

#[test]
fn custom_subitems_write_through() {
    let mut element = DataBox::builder()
        .with::<PrimitiveSet>(Primitives {
            density: 1.0,
            velocity: [0.0, 0.0, 0.0],
        })
        .with_subitems::<PrimitiveSet>()
        .build()
        .unwrap();

    assert_eq!(
        element.schema().subitems_of(PrimitiveSet::key()),
        Some(vec![Density::key(), Velocity::key()])
    );

    element.mutate::<Density, _>(|density| *density = 2.5);
    assert_eq!(element.get::<PrimitiveSet>().density, 2.5);

    element.mutate::<PrimitiveSet, _>(|primitives| primitives.velocity = [1.0, 0.0, 0.0]);
    assert_eq!(*element.get::<Velocity>(), [1.0, 0.0, 0.0]);
}

#[test]
fn subitems_of_compute_parents_are_read_only_projections() {
    struct InitialDensity;
    impl Tag for InitialDensity {
        type Type = f64;
    }

    struct Reconstructed;
    impl Tag for Reconstructed {
        type Type = Primitives;
    }
    impl ComputeTag for Reconstructed {
        type Arguments = (InitialDensity,);
        fn compute((density,): (&f64,)) -> Primitives {
            Primitives {
                density: *density,
                velocity: [0.0, 0.0, 0.0],
            }
        }
    }

    struct ReconstructedDensity;
    impl Tag for ReconstructedDensity {
        type Type = f64;
    }
    impl SubitemTag for ReconstructedDensity {
        type Parent = Reconstructed;
        fn extract(parent: &Primitives) -> &f64 {
            &parent.density
        }
        fn extract_mut(parent: &mut Primitives) -> &mut f64 {
            &mut parent.density
        }
    }

    impl Subitems for Reconstructed {
        fn subitems(registrar: &mut SubitemRegistrar<'_, Self>) {
            registrar.add::<ReconstructedDensity>();
        }
    }

    let mut element = DataBox::builder()
        .with::<InitialDensity>(4.0)
        .with_compute::<Reconstructed>()
        .with_subitems::<Reconstructed>()
        .build()
        .unwrap();

    // Reading the subitem forces the parent and projects into its cache.
    assert_eq!(*element.get::<ReconstructedDensity>(), 4.0);

    element.assign::<InitialDensity>(6.0);
    assert_eq!(*element.get::<ReconstructedDensity>(), 6.0);
}

#[test]
#[should_panic(expected = "subitem of a compute item")]
fn mutating_a_subitem_of_a_compute_parent_panics() {
    struct InitialDensity;
    impl Tag for InitialDensity {
        type Type = f64;
    }

    struct Derived;
    impl Tag for Derived {
        type Type = Primitives;
    }
    impl ComputeTag for Derived {
        type Arguments = (InitialDensity,);
        fn compute((density,): (&f64,)) -> Primitives {
            Primitives {
                density: *density,
                velocity: [0.0, 0.0, 0.0],
            }
        }
    }

    struct DerivedDensity;
    impl Tag for DerivedDensity {
        type Type = f64;
    }
    impl SubitemTag for DerivedDensity {
        type Parent = Derived;
        fn extract(parent: &Primitives) -> &f64 {
            &parent.density
        }
        fn extract_mut(parent: &mut Primitives) -> &mut f64 {
            &mut parent.density
        }
    }
    impl Subitems for Derived {
        fn subitems(registrar: &mut SubitemRegistrar<'_, Self>) {
            registrar.add::<DerivedDensity>();
        }
    }

    let mut element = DataBox::builder()
        .with::<InitialDensity>(4.0)
        .with_compute::<Derived>()
        .with_subitems::<Derived>()
        .build()
        .unwrap();
    element.mutate::<DerivedDensity, _>(|density| *density = 0.0);
}

#[test]
fn subitems_without_their_parent_are_rejected() {
    let error = DataBox::builder()
        .with_subitems::<PrimitiveSet>()
        .build()
        .unwrap_err();
    assert!(matches!(error, SchemaError::MissingParent { .. }));
    assert!(error.to_string().contains("PrimitiveSet"));
}

#[test]
#[should_panic(expected = "alias the same storage")]
fn mutating_two_subitems_of_one_parent_together_panics() {
    let mut element = DataBox::builder()
        .with_bundle::<Fields>((1.0, 2.0))
        .build()
        .unwrap();
    element.mutate_many::<(FieldA, FieldB), _>(|(a, b)| {
        *a = 0.0;
        *b = 0.0;
    });
}

#[test]
#[should_panic(expected = "alias the same storage")]
fn mutating_a_subitem_with_its_parent_panics() {
    let mut element = DataBox::builder()
        .with_bundle::<Fields>((1.0, 2.0))
        .build()
        .unwrap();
    element.mutate_many::<(FieldA, Bundle<Fields>), _>(|(a, fields)| {
        *a = 0.0;
        fields.1 = 0.0;
    });
}
