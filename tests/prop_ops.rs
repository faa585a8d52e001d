use proptest::prelude::*;
use ownership_core::ops::{kind, kinds_in, Op, OpMask};

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        Just(Op::Update),
        Just(Op::UpdateOne),
        Just(Op::Delete),
        Just(Op::DeleteOne),
    ]
}

proptest! {
    /// `is` agrees with the expansion of the mask.
    #[test]
    fn prop_is_matches_kinds_in(mask in any::<OpMask>(), op in op()) {
        prop_assert_eq!(op.is(mask), kinds_in(mask).contains(&op));
    }

    /// Union of masks is the union of their kinds.
    #[test]
    fn prop_mask_union(a in any::<OpMask>(), b in any::<OpMask>(), op in op()) {
        prop_assert_eq!(op.is(a | b), op.is(a) || op.is(b));
    }

    /// Every kind is exactly one of create, update or delete.
    #[test]
    fn prop_kind_partition(op in op()) {
        let classes = [op.is_create(), op.is_update(), op.is_delete()];
        prop_assert_eq!(classes.iter().filter(|c| **c).count(), 1);
        prop_assert!(op.is(kind::ALL_MUTATIONS));
        prop_assert!(!(op.is_single() && op.is_create()));
    }

    /// Kind names round-trip through serde.
    #[test]
    fn prop_serde_name(op in op()) {
        let json = serde_json::to_string(&op).unwrap();
        prop_assert_eq!(json, format!("\"{}\"", op.as_str()));
    }
}
