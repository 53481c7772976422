//! Short public identifiers.

use rand::{Rng, distr::Alphanumeric};

/// Length of generated identifiers. 62^10 keeps collisions negligible at
/// the volumes a single node serves; the store still rejects duplicates.
pub const ID_LEN: usize = 10;

/// Upper bound accepted by [`is_safe_id`]; leaves room for custom generators.
const MAX_ID_LEN: usize = 64;

/// Source of short identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random `[A-Za-z0-9]` identifiers drawn from the thread-local CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(ID_LEN)
            .map(char::from)
            .collect()
    }
}

/// Whether `id` is usable as a single path component.
///
/// Requests carry the id verbatim in their path, so anything other than
/// `[A-Za-z0-9_-]{1,64}` is refused before it gets near the filesystem.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_short_and_alphanumeric() {
        let id = RandomIdGenerator.generate();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(is_safe_id(&id));
    }

    #[test]
    fn generated_ids_do_not_repeat() {
        let ids: HashSet<String> = (0..1000).map(|_| RandomIdGenerator.generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(!is_safe_id(""));
        assert!(!is_safe_id(".."));
        assert!(!is_safe_id("../etc"));
        assert!(!is_safe_id("a/b"));
        assert!(!is_safe_id("a\\b"));
        assert!(!is_safe_id("abc.txt"));
        assert!(!is_safe_id(&"a".repeat(65)));
        assert!(is_safe_id("Ab3_x-9"));
    }
}
