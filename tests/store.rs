use std::sync::atomic::{AtomicUsize, Ordering};

use tagbox::{ComputeTag, DataBox, DataBoxSelf, MutatingComputeTag, Tag};

struct MassDensity;
impl Tag for MassDensity {
    type Type = f64;
}

struct SpecificEnergy;
impl Tag for SpecificEnergy {
    type Type = f64;
}

struct Pressure;
impl Tag for Pressure {
    type Type = f64;
}
impl ComputeTag for Pressure {
    type Arguments = (MassDensity, SpecificEnergy);
    fn compute((density, energy): (&f64, &f64)) -> f64 {
        0.4 * density * energy
    }
}

#[test]
fn simple_get_and_mutate() {
    let mut element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();

    assert_eq!(*element.get::<MassDensity>(), 2.0);
    assert_eq!(*element.get::<Pressure>(), 0.4 * 2.0 * 1.5);

    element.assign::<MassDensity>(4.0);
    assert_eq!(*element.get::<Pressure>(), 0.4 * 4.0 * 1.5);
}

#[test]
fn compute_items_are_memoized() {
    struct Radius;
    impl Tag for Radius {
        type Type = f64;
    }

    static EVALUATIONS: AtomicUsize = AtomicUsize::new(0);
    struct Circumference;
    impl Tag for Circumference {
        type Type = f64;
    }
    impl ComputeTag for Circumference {
        type Arguments = (Radius,);
        fn compute((radius,): (&f64,)) -> f64 {
            EVALUATIONS.fetch_add(1, Ordering::SeqCst);
            2.0 * std::f64::consts::PI * radius
        }
    }

    let mut element = DataBox::builder()
        .with::<Radius>(1.0)
        .with_compute::<Circumference>()
        .build()
        .unwrap();

    element.get::<Circumference>();
    element.get::<Circumference>();
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 1);

    element.mutate::<Radius, _>(|radius| *radius = 2.0);
    assert_eq!(
        *element.get::<Circumference>(),
        4.0 * std::f64::consts::PI
    );
    element.get::<Circumference>();
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 2);
}

#[test]
fn repeated_gets_are_referentially_stable() {
    let element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();

    let first = element.get::<Pressure>();
    let second = element.get::<Pressure>();
    assert!(std::ptr::eq(first, second));
}

#[test]
fn invalidation_is_transitive() {
    struct Spacing;
    impl Tag for Spacing {
        type Type = f64;
    }

    struct InverseSpacing;
    impl Tag for InverseSpacing {
        type Type = f64;
    }
    impl ComputeTag for InverseSpacing {
        type Arguments = (Spacing,);
        fn compute((spacing,): (&f64,)) -> f64 {
            1.0 / spacing
        }
    }

    static STEP_EVALUATIONS: AtomicUsize = AtomicUsize::new(0);
    struct StableStep;
    impl Tag for StableStep {
        type Type = f64;
    }
    impl ComputeTag for StableStep {
        type Arguments = (InverseSpacing,);
        fn compute((inverse,): (&f64,)) -> f64 {
            STEP_EVALUATIONS.fetch_add(1, Ordering::SeqCst);
            0.5 / inverse
        }
    }

    let mut element = DataBox::builder()
        .with::<Spacing>(0.25)
        .with_compute::<InverseSpacing>()
        .with_compute::<StableStep>()
        .build()
        .unwrap();

    assert_eq!(*element.get::<StableStep>(), 0.125);
    assert_eq!(STEP_EVALUATIONS.load(Ordering::SeqCst), 1);

    // Mutating the tag two levels upstream re-evaluates the whole chain.
    element.mutate::<Spacing, _>(|spacing| *spacing = 0.5);
    assert_eq!(*element.get::<StableStep>(), 0.25);
    assert_eq!(STEP_EVALUATIONS.load(Ordering::SeqCst), 2);
}

#[test]
fn mutating_compute_items_update_in_place() {
    struct Samples;
    impl Tag for Samples {
        type Type = Vec<f64>;
    }

    static EVALUATIONS: AtomicUsize = AtomicUsize::new(0);
    struct Normalized;
    impl Tag for Normalized {
        type Type = Vec<f64>;
    }
    impl MutatingComputeTag for Normalized {
        type Arguments = (Samples,);
        fn compute(result: &mut Vec<f64>, (samples,): (&Vec<f64>,)) {
            EVALUATIONS.fetch_add(1, Ordering::SeqCst);
            let total: f64 = samples.iter().sum();
            result.clear();
            result.extend(samples.iter().map(|sample| sample / total));
        }
    }

    let mut element = DataBox::builder()
        .with::<Samples>(vec![1.0, 3.0])
        .with_mutating_compute::<Normalized>()
        .build()
        .unwrap();

    assert_eq!(element.get::<Normalized>(), &[0.25, 0.75]);
    element.get::<Normalized>();
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 1);

    element.mutate::<Samples, _>(|samples| samples.push(4.0));
    assert_eq!(element.get::<Normalized>(), &[0.125, 0.375, 0.5]);
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 2);
}

#[test]
fn apply_passes_values_positionally() {
    let element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();

    let ratio = element.apply::<(Pressure, MassDensity), _>(|(pressure, density)| {
        pressure / density
    });
    assert_eq!(ratio, 0.4 * 1.5);
}

#[test]
fn apply_can_hand_out_the_box_itself() {
    let element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();

    let pressure = element.apply::<(DataBoxSelf, MassDensity), _>(|(the_box, density)| {
        assert_eq!(*density, 2.0);
        *the_box.get::<Pressure>()
    });
    assert_eq!(pressure, 0.4 * 2.0 * 1.5);
}

#[test]
fn mutate_many_updates_several_tags() {
    let mut element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();

    element.mutate_many::<(MassDensity, SpecificEnergy), _>(|(density, energy)| {
        *density = 1.0;
        *energy = 1.0;
    });
    assert_eq!(*element.get::<Pressure>(), 0.4);
}

#[test]
fn mutate_apply_observes_values_current_at_the_call() {
    let mut element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .build()
        .unwrap();

    element.mutate_apply::<(MassDensity,), (SpecificEnergy,), _>(|(density, ), (energy,)| {
        *density = 10.0 * energy;
    });
    assert_eq!(*element.get::<MassDensity>(), 15.0);
}

#[test]
#[should_panic(expected = "aliases or depends on a tag being mutated")]
fn mutate_apply_rejects_dependent_arguments() {
    let mut element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();

    element.mutate_apply::<(MassDensity,), (Pressure,), _>(|(density,), (pressure,)| {
        *density = *pressure;
    });
}

#[test]
fn extend_preserves_values_and_caches() {
    struct Lapse;
    impl Tag for Lapse {
        type Type = f64;
    }

    static EVALUATIONS: AtomicUsize = AtomicUsize::new(0);
    struct Shift;
    impl Tag for Shift {
        type Type = f64;
    }
    impl ComputeTag for Shift {
        type Arguments = (Lapse,);
        fn compute((lapse,): (&f64,)) -> f64 {
            EVALUATIONS.fetch_add(1, Ordering::SeqCst);
            lapse - 1.0
        }
    }

    struct ConformalFactor;
    impl Tag for ConformalFactor {
        type Type = f64;
    }

    let element = DataBox::builder()
        .with::<Lapse>(2.0)
        .with_compute::<Shift>()
        .build()
        .unwrap();
    assert_eq!(*element.get::<Shift>(), 1.0);
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 1);

    // The extended box keeps the moved values and the still-valid cache.
    let extended = element.extend().with::<ConformalFactor>(1.5).build().unwrap();
    assert_eq!(*extended.get::<Lapse>(), 2.0);
    assert_eq!(*extended.get::<ConformalFactor>(), 1.5);
    assert_eq!(*extended.get::<Shift>(), 1.0);
    assert_eq!(EVALUATIONS.load(Ordering::SeqCst), 1);
}

#[test]
fn extend_carries_pending_invalidation() {
    struct Lapse;
    impl Tag for Lapse {
        type Type = f64;
    }

    struct Shift;
    impl Tag for Shift {
        type Type = f64;
    }
    impl ComputeTag for Shift {
        type Arguments = (Lapse,);
        fn compute((lapse,): (&f64,)) -> f64 {
            lapse - 1.0
        }
    }

    struct ConformalFactor;
    impl Tag for ConformalFactor {
        type Type = f64;
    }

    let mut element = DataBox::builder()
        .with::<Lapse>(2.0)
        .with_compute::<Shift>()
        .build()
        .unwrap();
    element.get::<Shift>();
    element.assign::<Lapse>(3.0);

    let extended = element.extend().with::<ConformalFactor>(1.0).build().unwrap();
    assert_eq!(*extended.get::<Shift>(), 2.0);
}

#[test]
fn contains_reports_registration() {
    let element = DataBox::builder().with::<MassDensity>(1.0).build().unwrap();
    assert!(element.contains::<MassDensity>());
    assert!(!element.contains::<SpecificEnergy>());
}

#[test]
#[should_panic(expected = "is not present in this box")]
fn get_of_an_absent_tag_panics() {
    let element = DataBox::builder().with::<MassDensity>(1.0).build().unwrap();
    element.get::<SpecificEnergy>();
}

#[test]
#[should_panic(expected = "is not present in this box")]
fn mutate_of_an_absent_tag_panics() {
    let mut element = DataBox::builder().with::<MassDensity>(1.0).build().unwrap();
    element.mutate::<SpecificEnergy, _>(|energy| *energy = 0.0);
}

#[test]
#[should_panic(expected = "cannot be mutated directly")]
fn mutate_of_a_compute_item_panics() {
    let mut element = DataBox::builder()
        .with::<MassDensity>(2.0)
        .with::<SpecificEnergy>(1.5)
        .with_compute::<Pressure>()
        .build()
        .unwrap();
    element.mutate::<Pressure, _>(|pressure| *pressure = 0.0);
}
