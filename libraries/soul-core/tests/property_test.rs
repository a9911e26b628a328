//! Property-based tests for value encoding
//!
//! Every property kind must survive the text encoding used by persistence
//! and query serialization.

use proptest::prelude::*;
use soul_core::types::{EntryType, PropKind, PropType, Value};

// ===== Helpers =====

fn arbitrary_double() -> impl Strategy<Value = f64> {
    prop_oneof![
        4 => any::<f64>().prop_filter("NaN is covered below", |v| !v.is_nan()),
        1 => Just(-0.0),
        1 => Just(0.0),
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
        1 => Just(f64::MIN_POSITIVE / 2.0),
        1 => Just(0.1 + 0.2),
    ]
}

fn arbitrary_entry_type() -> impl Strategy<Value = EntryType> {
    prop_oneof![
        Just(EntryType::Song),
        Just(EntryType::PodcastFeed),
        Just(EntryType::PodcastPost),
        Just(EntryType::ImportError),
        "[a-z]{1,12}".prop_map(|name| EntryType::from_name(&format!("custom-{}", name))),
    ]
}

fn arbitrary_value(kind: PropKind) -> BoxedStrategy<Value> {
    match kind {
        PropKind::String => any::<String>().prop_map(Value::from).boxed(),
        PropKind::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        PropKind::ULong => any::<u64>().prop_map(Value::ULong).boxed(),
        PropKind::Double => arbitrary_double().prop_map(Value::Double).boxed(),
        PropKind::Timestamp => any::<u64>().prop_map(Value::Timestamp).boxed(),
        PropKind::EntryType => arbitrary_entry_type().prop_map(Value::EntryType).boxed(),
    }
}

fn arbitrary_prop_value() -> impl Strategy<Value = (PropType, Value)> {
    let props: Vec<PropType> = PropType::all().collect();
    prop::sample::select(props).prop_flat_map(|prop| (Just(prop), arbitrary_value(prop.kind())))
}

// ===== Property Tests =====

proptest! {
    /// Property: decoding the text encoding gives back an equal value
    #[test]
    fn text_encoding_round_trips((prop, value) in arbitrary_prop_value()) {
        prop_assert!(prop.check(&value).is_ok());
        let decoded = Value::from_text(prop.kind(), &value.to_text()).unwrap();
        prop_assert_eq!(decoded, value);
    }

    /// Property: only the default value of a kind reports as default
    #[test]
    fn defaults_are_exact(value in arbitrary_double().prop_map(Value::Double)) {
        prop_assert_eq!(value.is_default(), value == Value::default_for(PropKind::Double));
    }
}
