use serde_json::Value;

/// Merge `patch` into `base` in place.
///
/// Objects merge key by key, recursively. A `null` in the patch removes
/// the key. Any other value (including arrays) replaces the base value.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                if patch_val.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && patch_val.is_object() => {
                        deep_merge(existing, patch_val);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (base, patch) => {
            *base = patch.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge() {
        let mut base = json!({"gateway": {"port": 7420, "bind": "loopback"}});
        deep_merge(&mut base, &json!({"gateway": {"port": 8080}}));
        assert_eq!(base, json!({"gateway": {"port": 8080, "bind": "loopback"}}));
    }

    #[test]
    fn null_removes_and_arrays_replace() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "list": [1, 2, 3]});
        deep_merge(&mut base, &json!({"a": {"x": null}, "list": [9]}));
        assert_eq!(base, json!({"a": {"y": 2}, "list": [9]}));
    }

    #[test]
    fn sequential_patches_compose() {
        let base = json!({"agent": {"model": "openai/gpt-4o"}, "channels": {}});
        let p1 = json!({"channels": {"tg": {"token": "T1"}}});
        let p2 = json!({"channels": {"tg": {"allowUsers": ["alice"]}}, "agent": {"model": "anthropic/claude"}});

        let mut stepwise = base.clone();
        deep_merge(&mut stepwise, &p1);
        deep_merge(&mut stepwise, &p2);

        assert_eq!(
            stepwise,
            json!({
                "agent": {"model": "anthropic/claude"},
                "channels": {"tg": {"token": "T1", "allowUsers": ["alice"]}}
            })
        );
    }
}
