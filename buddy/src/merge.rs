// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The deep-merge algorithm shared by the config loader's layered merge and
//! the updater's per-file configuration merge.

use serde_json::Value;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum MergeStrategy {
    KeepUser,
    UseNew,
    ShallowMerge,
    DeepMerge,
}

/// Applies one of the four merge strategies to a `new` and `existing`
/// (user-held) JSON value. Arrays are always replaced, never merged, under
/// every strategy that descends into them.
pub(crate) fn merge(strategy: MergeStrategy, new: &Value, existing: &Value) -> Value {
    match strategy {
        MergeStrategy::KeepUser => existing.clone(),
        MergeStrategy::UseNew => new.clone(),
        MergeStrategy::ShallowMerge => shallow_merge(new, existing),
        MergeStrategy::DeepMerge => deep_merge(new, existing),
    }
}

/// `merged = new then existing` — user keys win at the top level only.
pub(crate) fn shallow_merge(new: &Value, existing: &Value) -> Value {
    match (new, existing) {
        (Value::Object(new_map), Value::Object(existing_map)) => {
            let mut merged = new_map.clone();
            for (key, value) in existing_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => existing.clone(),
    }
}

/// Recursive object merge: at every level, the user (`existing`) value wins
/// if present and both sides are objects; otherwise the user value replaces
/// the new value outright. New-only keys are carried in at every depth.
/// Arrays are never merged, only replaced.
pub(crate) fn deep_merge(new: &Value, existing: &Value) -> Value {
    match (new, existing) {
        (Value::Object(new_map), Value::Object(existing_map)) => {
            let mut merged = new_map.clone();
            for (key, existing_value) in existing_map {
                match merged.get(key) {
                    Some(new_value) => {
                        merged.insert(key.clone(), deep_merge(new_value, existing_value));
                    }
                    None => {
                        merged.insert(key.clone(), existing_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        _ => existing.clone(),
    }
}

/// A single top-level key present in both `new` and `existing` with
/// structurally different values (§4.5.5 conflict detection).
#[derive(Clone, Debug)]
pub(crate) struct MergeConflict {
    pub(crate) key: String,
    pub(crate) new_value: Value,
    pub(crate) existing_value: Value,
    /// Always `keep_user` initially; callers may promote this.
    pub(crate) resolution: &'static str,
}

/// Compares top-level keys present in both objects for canonical-JSON
/// equality, returning the unequal pairs.
pub(crate) fn detect_conflicts(new: &Value, existing: &Value) -> Vec<MergeConflict> {
    let (Value::Object(new_map), Value::Object(existing_map)) = (new, existing) else {
        return Vec::new();
    };
    let mut conflicts = Vec::new();
    for (key, new_value) in new_map {
        if let Some(existing_value) = existing_map.get(key) {
            if existing_value != new_value {
                conflicts.push(MergeConflict {
                    key: key.clone(),
                    new_value: new_value.clone(),
                    existing_value: existing_value.clone(),
                    resolution: "keep_user",
                });
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shallow_merge_keys_union_user_wins_top_level() {
        let new = json!({"timeout": 30, "version": "1.1.0", "newField": "x"});
        let existing = json!({"timeout": 60, "version": "1.0.0"});
        let merged = shallow_merge(&new, &existing);
        assert_eq!(merged, json!({"timeout": 60, "version": "1.0.0", "newField": "x"}));
    }

    #[test]
    fn deep_merge_user_leaf_dominates_new_keys_added() {
        let new = json!({"a": {"x": 1, "y": 2}, "onlyNew": true});
        let existing = json!({"a": {"x": 99}});
        let merged = deep_merge(&new, &existing);
        assert_eq!(merged, json!({"a": {"x": 99, "y": 2}, "onlyNew": true}));
    }

    #[test]
    fn deep_merge_never_merges_arrays() {
        let new = json!({"list": [1, 2, 3]});
        let existing = json!({"list": [9]});
        let merged = deep_merge(&new, &existing);
        assert_eq!(merged, json!({"list": [9]}));
    }

    #[test]
    fn detect_conflicts_lists_unequal_shared_keys_only() {
        let new = json!({"timeout": 30, "version": "1.1.0", "untouched": "same"});
        let existing = json!({"timeout": 60, "version": "1.0.0", "untouched": "same"});
        let conflicts = detect_conflicts(&new, &existing);
        let keys: Vec<&str> = conflicts.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["timeout", "version"]);
        assert!(conflicts.iter().all(|c| c.resolution == "keep_user"));
    }

    proptest::proptest! {
        #[test]
        fn deep_merge_keys_superset_of_both_inputs(
            a_keys in proptest::collection::vec("[a-c]", 0..3),
            b_keys in proptest::collection::vec("[a-c]", 0..3),
        ) {
            let new = Value::Object(a_keys.iter().map(|k| (k.clone(), json!(1))).collect());
            let existing = Value::Object(b_keys.iter().map(|k| (k.clone(), json!(2))).collect());
            let merged = deep_merge(&new, &existing);
            let merged_obj = merged.as_object().unwrap();
            for k in a_keys.iter().chain(b_keys.iter()) {
                proptest::prop_assert!(merged_obj.contains_key(k));
            }
        }
    }
}
