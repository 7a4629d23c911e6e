//! Handle encoding.
//!
//! A handle is a pointer-sized token whose bits are
//! `(context tag << TAG_SHIFT) | registry id`. The shim never dereferences
//! it; the only operations are a zero test and a registry lookup. The tag
//! makes a handle issued by one simulation miss in every other one even
//! when both registries issued the same id.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Bits below the tag carry the registry id.
pub(crate) const TAG_SHIFT: u32 = usize::BITS * 3 / 4;

/// Largest registry id a handle can carry.
pub(crate) const MAX_ID: u64 = (1u64 << TAG_SHIFT) - 1;

const TAG_LIMIT: usize = 1 << (usize::BITS - TAG_SHIFT);

static NEXT_TAG: AtomicUsize = AtomicUsize::new(1);

/// Next non-zero context tag. Tags wrap after `TAG_LIMIT - 1` contexts.
pub(crate) fn next_tag() -> usize {
    loop {
        let tag = NEXT_TAG.fetch_add(1, Ordering::Relaxed) % TAG_LIMIT;
        if tag != 0 {
            return tag;
        }
    }
}

pub(crate) fn encode<T>(tag: usize, id: u64) -> *mut T {
    debug_assert!(id != 0 && id <= MAX_ID);
    std::ptr::without_provenance_mut((tag << TAG_SHIFT) | id as usize)
}

/// Splits a handle into `(tag, id)`. The null handle decodes to id 0,
/// which no registry issues.
pub(crate) fn decode<T>(handle: *mut T) -> (usize, u64) {
    let bits = handle.addr();
    (bits >> TAG_SHIFT, (bits as u64) & MAX_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_handle_has_no_id() {
        assert_eq!(decode::<u8>(std::ptr::null_mut()), (0, 0));
    }

    #[test]
    fn tags_are_never_zero() {
        for _ in 0..1000 {
            assert_ne!(next_tag(), 0);
        }
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(tag in 1usize..TAG_LIMIT, id in 1u64..=MAX_ID) {
            let handle = encode::<u8>(tag, id);
            prop_assert!(!handle.is_null());
            prop_assert_eq!(decode(handle), (tag, id));
        }

        #[test]
        fn different_tags_give_different_handles(
            a in 1usize..TAG_LIMIT,
            b in 1usize..TAG_LIMIT,
            id in 1u64..=MAX_ID,
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(encode::<u8>(a, id), encode::<u8>(b, id));
        }
    }
}
