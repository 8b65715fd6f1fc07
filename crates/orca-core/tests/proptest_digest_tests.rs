//! Property-based tests for content verification.
//!
//! - Content always verifies against its own descriptor
//! - Any single flipped bit is detected
//! - Truncated content is detected

#![allow(clippy::unwrap_used, clippy::expect_used)]

use orca_core::{DEFAULT_BLOB, Descriptor, ErrorKind, ensure_verified, verify};
use proptest::prelude::*;

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..2048)
}

proptest! {
    #[test]
    fn prop_content_verifies(content in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let descriptor = Descriptor::from_bytes(DEFAULT_BLOB, &content);
        prop_assert!(verify(&descriptor, &content));
        prop_assert!(ensure_verified(&descriptor, &content).is_ok());
    }

    #[test]
    fn prop_single_bit_flip_detected(
        (content, index, bit) in content_strategy()
            .prop_flat_map(|c| { let len = c.len(); (Just(c), 0..len, 0..8_u8) })
    ) {
        let descriptor = Descriptor::from_bytes(DEFAULT_BLOB, &content);
        let mut mutated = content.clone();
        mutated[index] ^= 1 << bit;

        prop_assert!(!verify(&descriptor, &mutated));
        let err = ensure_verified(&descriptor, &mutated).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::CorruptContent);
    }

    #[test]
    fn prop_truncation_detected(content in content_strategy()) {
        let descriptor = Descriptor::from_bytes(DEFAULT_BLOB, &content);
        prop_assert!(!verify(&descriptor, &content[..content.len() - 1]));
    }
}
