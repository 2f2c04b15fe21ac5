use crate::user::User;
use serde_json::Value;
use sha1::{Digest, Sha1};

// 15 hex digits of 0xF: the denominator for the leading-60-bit fraction.
const LONG_SCALE: f64 = 0xFFF_FFFF_FFFF_FFFF_u64 as f64;

/// Deterministically maps a user to a point in `[0, 1)`, scoped by a flag
/// or segment key and its salt. The formula is wire-interop critical and
/// must bit-match peer implementations:
///
/// `sha1_hex(scopeKey.salt.id)[..15]` parsed as hex, over `2^60 - 1`.
pub fn bucket_user(user: &User, scope_key: &str, attr: &str, salt: &str) -> f64 {
    let Some(mut id) = bucketable(user, attr) else {
        return 0.0;
    };
    if let Some(secondary) = user.secondary() {
        id.push('.');
        id.push_str(secondary);
    }

    let hash = hex::encode(Sha1::digest(format!("{scope_key}.{salt}.{id}")));
    let n = u64::from_str_radix(&hash[..15], 16).unwrap_or(0);
    n as f64 / LONG_SCALE
}

/// Strings pass through; integers render in base 10; floats and other
/// shapes have no bucketable value.
fn bucketable(user: &User, attr: &str) -> Option<String> {
    match user.attribute(attr)? {
        Value::String(s) => Some(s),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(n.to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPSILON: f64 = 1e-7;

    fn user_with_key(key: &str) -> User {
        User::with_key(key)
    }

    #[test]
    fn golden_bucket_values() {
        let cases = [
            ("userKeyA", 0.42157587),
            ("userKeyB", 0.67084850),
            ("userKeyC", 0.10343106),
        ];
        for (key, expected) in cases {
            let bucket = bucket_user(&user_with_key(key), "hashKey", "key", "saltyA");
            assert!(
                (bucket - expected).abs() < EPSILON,
                "bucket({key}) = {bucket}, expected {expected}"
            );
        }
    }

    #[test]
    fn bucket_is_always_in_unit_interval() {
        for i in 0..512 {
            let bucket = bucket_user(&user_with_key(&format!("user-{i}")), "scope", "key", "salt");
            assert!((0.0..1.0).contains(&bucket));
        }
    }

    #[test]
    fn secondary_key_perturbs_the_bucket() {
        let without = bucket_user(&user_with_key("userKeyA"), "hashKey", "key", "saltyA");

        let mut user = user_with_key("userKeyA");
        user.secondary = Some("999".into());
        let with = bucket_user(&user, "hashKey", "key", "saltyA");

        assert_ne!(without, with);
        // And the perturbed value is itself deterministic.
        assert_eq!(with, bucket_user(&user, "hashKey", "key", "saltyA"));
    }

    #[test]
    fn integer_attribute_buckets_like_its_string_rendering() {
        let mut int_user = user_with_key("u");
        int_user.custom.insert("intAttr".into(), json!(33333));
        let mut str_user = user_with_key("u");
        str_user.custom.insert("intAttr".into(), json!("33333"));

        assert_eq!(
            bucket_user(&int_user, "hashKey", "intAttr", "saltyA"),
            bucket_user(&str_user, "hashKey", "intAttr", "saltyA"),
        );
    }

    #[test]
    fn float_and_missing_attributes_bucket_to_zero() {
        let mut user = user_with_key("u");
        user.custom.insert("floatAttr".into(), json!(999.999));
        assert_eq!(bucket_user(&user, "hashKey", "floatAttr", "saltyA"), 0.0);
        assert_eq!(bucket_user(&user, "hashKey", "absent", "saltyA"), 0.0);
        user.custom.insert("boolAttr".into(), json!(true));
        assert_eq!(bucket_user(&user, "hashKey", "boolAttr", "saltyA"), 0.0);
    }
}
