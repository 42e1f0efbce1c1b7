//! Snapshot region bookkeeping under arbitrary lease lifetimes

use heron_vm_exec::{OsrError, OsrTempRegion, RegionLease};
use proptest::prelude::*;

proptest! {
    #[test]
    fn leases_never_overlap_or_exceed_capacity(
        capacity in 0usize..512,
        steps in proptest::collection::vec((any::<bool>(), 0usize..96), 1..60),
    ) {
        let region = OsrTempRegion::new(capacity);
        let mut held: Vec<RegionLease> = Vec::new();
        for (allocate, bytes) in steps {
            if allocate || held.is_empty() {
                let before = region.available();
                match region.allocate(bytes) {
                    Ok(lease) => {
                        prop_assert!(lease.start() + lease.len() <= capacity);
                        for other in &held {
                            prop_assert!(lease.is_empty() || other.is_empty()
                                || lease.start() >= other.start() + other.len()
                                || other.start() >= lease.start() + lease.len());
                        }
                        held.push(lease);
                    }
                    Err(OsrError::OutOfMemory { requested, available }) => {
                        prop_assert_eq!(requested, bytes);
                        prop_assert!(requested > available);
                        prop_assert_eq!(region.available(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected {other}"),
                }
            } else {
                held.remove(bytes % held.len());
            }
            prop_assert_eq!(region.live_leases(), held.len());
            prop_assert!(region.high_water() <= capacity);
        }
        held.clear();
        prop_assert_eq!(region.available(), capacity);
    }
}
