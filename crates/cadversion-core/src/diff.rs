//! Structural diff between two documents.
//!
//! Produces a changeset that the strict patch engine accepts:
//! `apply(a, &diff(a, b)) == Ok(b)`. The output is not minimal for arrays;
//! elements are compared positionally.

use crate::patch::PatchOp;
use crate::pointer::Pointer;
use crate::value::Value;

/// Compute a changeset turning `from` into `to`.
pub fn diff(from: &Value, to: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at(&Pointer::root(), from, to, &mut ops);
    ops
}

fn diff_at(path: &Pointer, from: &Value, to: &Value, ops: &mut Vec<PatchOp>) {
    if from == to {
        return;
    }
    match (from, to) {
        (Value::Map(a), Value::Map(b)) => {
            for key in a.keys().filter(|k| !b.contains_key(*k)) {
                ops.push(PatchOp::remove(path.child(key.as_str())));
            }
            for (key, new) in b {
                match a.get(key) {
                    Some(old) => diff_at(&path.child(key.as_str()), old, new, ops),
                    None => ops.push(PatchOp::add(path.child(key.as_str()), new.clone())),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_at(&path.child(i.to_string()), &a[i], &b[i], ops);
            }
            // Trim from the end so earlier indices stay valid.
            for i in (common..a.len()).rev() {
                ops.push(PatchOp::remove(path.child(i.to_string())));
            }
            for (i, item) in b.iter().enumerate().skip(common) {
                ops.push(PatchOp::add(path.child(i.to_string()), item.clone()));
            }
        }
        _ => ops.push(PatchOp::replace(path.clone(), to.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::apply;

    #[test]
    fn test_identical_documents_give_empty_diff() {
        let v = Value::from_entries([("a", Value::from(1))]);
        assert!(diff(&v, &v).is_empty());
    }

    #[test]
    fn test_diff_applies_cleanly() {
        let a = Value::from_entries([
            ("units", Value::from("mm")),
            ("elements", Value::from(vec![Value::from(1), Value::from(2), Value::from(3)])),
            ("stale", Value::from(true)),
        ]);
        let b = Value::from_entries([
            ("units", Value::from("in")),
            ("elements", Value::from(vec![Value::from(1), Value::from(5)])),
            ("title", Value::from("Site plan")),
        ]);

        let ops = diff(&a, &b);
        assert_eq!(apply(&a, &ops).unwrap(), b);
    }

    #[test]
    fn test_diff_grows_array() {
        let a = Value::from(vec![Value::from(1)]);
        let b = Value::from(vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(apply(&a, &diff(&a, &b)).unwrap(), b);
    }

    #[test]
    fn test_type_change_is_replace() {
        let a = Value::from_entries([("x", Value::from(1))]);
        let b = Value::from("scalar");
        let ops = diff(&a, &b);
        assert_eq!(ops, vec![PatchOp::replace(Pointer::root(), "scalar")]);
    }
}
