// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the region table and teardown paths
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; random mmap/munmap/fault sequences against the fakes
//!
//! TEST_SCOPE:
//!   - Table invariants survive any operation sequence
//!   - Frame accounting: live frames == present PTEs, zero after exit
//!   - Split pieces plus the cut gap reconstruct the original length
//!
//! TEST_SCENARIOS:
//!   - random_sequences_keep_invariants(): ordered, disjoint, bounded table; no leaked frames
//!   - fixed_mapping_lands_exactly_or_conflicts(): fixed placement never moves a mapping
//!   - interior_cut_reconstructs_length(): front + gap + tail == original length

use alloc::vec::Vec;

use proptest::prelude::*;

use crate::error::MmapError;
use crate::flags::{Prot, Sharing};
use crate::hal::PageTable;
use crate::layout::{MmapConfig, MMAP_BASE, PAGE_SIZE};
use crate::mock::{MockFrames, MockPageTable};
use crate::space::{AddressSpace, FaultAccess, MmapRequest};

const WINDOW_PAGES: usize = 64;
const MAX_REGIONS: usize = 6;

#[derive(Clone, Debug)]
enum Op {
    Fixed { page: usize, len: usize },
    Dynamic { len: usize },
    Unmap { page: usize, len: usize },
    Touch { page: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WINDOW_PAGES, 1usize..=6 * PAGE_SIZE).prop_map(|(page, len)| Op::Fixed { page, len }),
        (1usize..=8 * PAGE_SIZE).prop_map(|len| Op::Dynamic { len }),
        (0..WINDOW_PAGES, 0usize..=10 * PAGE_SIZE).prop_map(|(page, len)| Op::Unmap { page, len }),
        (0..WINDOW_PAGES).prop_map(|page| Op::Touch { page }),
    ]
}

fn small_space() -> AddressSpace<MockPageTable> {
    let ceiling = MMAP_BASE + WINDOW_PAGES * PAGE_SIZE;
    let config = MmapConfig::new(MMAP_BASE, ceiling, MAX_REGIONS).expect("valid window");
    AddressSpace::with_config(MockPageTable::new(), config)
}

fn page_addr(page: usize) -> usize {
    MMAP_BASE + page * PAGE_SIZE
}

proptest! {
    #[test]
    fn random_sequences_keep_invariants(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let mut space = small_space();
        let mut frames = MockFrames::new(WINDOW_PAGES);
        let rw = Prot::READ | Prot::WRITE;

        for op in ops {
            let result = match op {
                Op::Fixed { page, len } => space
                    .mmap(MmapRequest::anonymous(len, rw, Sharing::Shared).at(page_addr(page)))
                    .map(drop),
                Op::Dynamic { len } => {
                    space.mmap(MmapRequest::anonymous(len, rw, Sharing::Private)).map(drop)
                }
                Op::Unmap { page, len } => space.munmap(page_addr(page), len, &mut frames),
                Op::Touch { page } => {
                    space.resolve_fault(page_addr(page) + 8, FaultAccess::Write, &mut frames)
                }
            };
            if let Err(err) = result {
                prop_assert!(!matches!(
                    err,
                    MmapError::AllocationFailure | MmapError::InstallFailure(_) | MmapError::IoFailure(_)
                ));
            }

            prop_assert!(space.regions().check_invariants());
            prop_assert!(space.regions().len() <= MAX_REGIONS);
            let present = space.page_table().present_pages();
            prop_assert_eq!(present.len(), frames.live());
            for va in present {
                prop_assert!(space.regions().find_containing(va).is_some());
                let entry = space.page_table().lookup(va).expect("present entry");
                prop_assert!(frames.is_live(entry.frame));
            }
        }

        space.release_all(&mut frames).expect("exit");
        prop_assert!(space.regions().is_empty());
        prop_assert_eq!(frames.live(), 0);
    }

    #[test]
    fn fixed_mapping_lands_exactly_or_conflicts(
        first in 0..WINDOW_PAGES / 2,
        first_pages in 1usize..8,
        second in 0..WINDOW_PAGES / 2,
        second_pages in 1usize..8,
    ) {
        let mut space = small_space();
        let a = page_addr(first);
        let b = page_addr(second);
        let request = |addr: usize, pages: usize| {
            MmapRequest::anonymous(pages * PAGE_SIZE, Prot::READ, Sharing::Shared).at(addr)
        };
        prop_assert_eq!(space.mmap(request(a, first_pages)), Ok(a));

        let overlaps = b < a + first_pages * PAGE_SIZE && a < b + second_pages * PAGE_SIZE;
        let expected = if overlaps { Err(MmapError::PlacementConflict) } else { Ok(b) };
        prop_assert_eq!(space.mmap(request(b, second_pages)), expected);
    }

    #[test]
    fn interior_cut_reconstructs_length(
        total_pages in 3usize..16,
        cut_start in 1usize..14,
        cut_pages in 1usize..14,
        slack in 0usize..PAGE_SIZE,
    ) {
        prop_assume!(cut_start + cut_pages < total_pages);
        let mut space = small_space();
        let mut frames = MockFrames::new(0);
        let len = total_pages * PAGE_SIZE - slack;
        let base = space
            .mmap(MmapRequest::anonymous(len, Prot::READ, Sharing::Private))
            .expect("map");

        let lower = base + cut_start * PAGE_SIZE;
        space.munmap(lower, cut_pages * PAGE_SIZE, &mut frames).expect("split");
        let pieces: Vec<(usize, usize)> =
            space.regions().iter().map(|r| (r.base(), r.len())).collect();
        prop_assert_eq!(pieces.len(), 2);
        let (front, tail) = (pieces[0], pieces[1]);
        prop_assert_eq!(front, (base, cut_start * PAGE_SIZE));
        prop_assert_eq!(tail.0, lower + cut_pages * PAGE_SIZE);
        prop_assert_eq!(front.1 + cut_pages * PAGE_SIZE + tail.1, len);
    }
}
