//! Proptest generators for property-based testing.

use proptest::prelude::*;

use cadversion_core::{diff, Document, PatchOp, Pointer, Value};

/// A map key.
pub fn key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}".prop_map(String::from)
}

/// A scalar leaf. Floats are finite so documents compare equal to
/// themselves.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9f64).prop_map(Value::Float),
        "[ -~]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// An arbitrary value tree.
pub fn value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(key(), inner, 0..6).prop_map(Value::Map),
        ]
    })
}

/// A document: always a map at the root.
pub fn document() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(key(), value(), 0..8).prop_map(Value::Map)
}

/// A path that is absent from every document built by [`document`].
pub fn missing_path() -> impl Strategy<Value = Pointer> {
    key().prop_map(|k| Pointer::from_tokens([format!("MISSING_{}", k)]))
}

/// A starting document plus changesets that each move it to the next of
/// a series of arbitrary documents.
#[derive(Debug, Clone)]
pub struct EditScript {
    pub initial: Document,
    pub states: Vec<Document>,
    pub changesets: Vec<Vec<PatchOp>>,
}

impl EditScript {
    pub fn from_states(initial: Document, states: Vec<Document>) -> Self {
        let mut changesets = Vec::with_capacity(states.len());
        let mut previous = &initial;
        for state in &states {
            changesets.push(diff(previous, state));
            previous = state;
        }
        Self {
            initial,
            states,
            changesets,
        }
    }

    /// The document after the last changeset.
    pub fn last(&self) -> &Document {
        self.states.last().unwrap_or(&self.initial)
    }
}

impl Arbitrary for EditScript {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (document(), prop::collection::vec(document(), 1..8))
            .prop_map(|(initial, states)| EditScript::from_states(initial, states))
            .boxed()
    }
}

/// An edit script of exactly `len` steps.
pub fn edit_script(len: usize) -> impl Strategy<Value = EditScript> {
    (document(), prop::collection::vec(document(), len))
        .prop_map(|(initial, states)| EditScript::from_states(initial, states))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadversion_core::{apply, canonical_value_bytes};

    proptest! {
        #[test]
        fn test_script_replays_to_each_state(script: EditScript) {
            let mut state = script.initial.clone();
            for (ops, expected) in script.changesets.iter().zip(&script.states) {
                state = apply(&state, ops).unwrap();
                prop_assert_eq!(&state, expected);
            }
            prop_assert_eq!(&state, script.last());
        }

        #[test]
        fn test_canonical_bytes_deterministic(doc in document()) {
            let copy = doc.clone();
            prop_assert_eq!(canonical_value_bytes(&doc), canonical_value_bytes(&copy));
        }

        #[test]
        fn test_missing_path_is_missing(doc in document(), path in missing_path()) {
            let err = apply(&doc, &[PatchOp::remove(path)]).unwrap_err();
            let is_path_not_found = matches!(err, cadversion_core::PatchError::PathNotFound { .. });
            prop_assert!(is_path_not_found);
        }
    }
}
