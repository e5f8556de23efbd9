//! Property tests for the breakpoint book and resync planning.

use cairn_core::{collapse_duplicates, Breakpoint, Location};
use cairn_session::{plan, BreakpointBook};
use cairn_testing::proptest_config;
use proptest::prelude::*;
use std::collections::HashSet;

const PATHS: [&str; 2] = ["/src/a.js", "/src/b.js"];

fn breakpoint() -> impl Strategy<Value = Breakpoint> {
    (
        0..PATHS.len(),
        0u32..20,
        prop::option::of(prop::sample::select(vec!["", "x > 1", "y"])),
    )
        .prop_map(|(path, line, condition)| {
            let bp = Breakpoint::new(PATHS[path], line);
            match condition {
                Some(c) => bp.with_condition(c),
                None => bp,
            }
        })
}

fn assert_unique_locations(list: &[Breakpoint]) -> Result<(), TestCaseError> {
    let mut seen = HashSet::new();
    for bp in list {
        prop_assert!(
            seen.insert(bp.location_key()),
            "two breakpoints at {:?}",
            bp.location_key()
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(proptest_config::auto_config())]

    #[test]
    fn plan_partitions_both_sides(
        local in prop::collection::vec(breakpoint(), 0..12),
        remote in prop::collection::vec(breakpoint(), 0..12),
    ) {
        let collapsed = collapse_duplicates(local.clone()).len();
        let remote_len = remote.len();
        let result = plan(local, remote);

        prop_assert_eq!(result.synced.len() + result.to_add.len(), collapsed);
        prop_assert_eq!(result.synced.len() + result.to_remove.len(), remote_len);
        for pair in &result.synced {
            prop_assert!(pair.local.is_equivalent(&pair.remote));
        }
    }

    #[test]
    fn book_never_holds_two_breakpoints_at_one_location(
        requested in prop::collection::vec(breakpoint(), 1..12),
        moves in prop::collection::vec(0u32..20, 12),
    ) {
        let mut book = BreakpointBook::from_list(requested);
        assert_unique_locations(&book.visible())?;

        let snapshot = book.visible();
        for (id, (bp, target)) in snapshot.iter().zip(&moves).enumerate() {
            let resolved = bp
                .clone()
                .with_id(id as i64 + 1)
                .with_actual(Location::new(bp.path.clone(), *target));
            book.apply_resolution(&resolved);
            assert_unique_locations(&book.visible())?;
        }
    }

    #[test]
    fn merged_survivor_takes_last_nonempty_condition(
        conditions in prop::collection::vec(prop::option::of("[a-z]{1,3}"), 1..6),
    ) {
        let list: Vec<Breakpoint> = conditions
            .iter()
            .map(|c| match c {
                Some(c) => Breakpoint::new(PATHS[0], 7).with_condition(c.clone()),
                None => Breakpoint::new(PATHS[0], 7),
            })
            .collect();
        let book = BreakpointBook::from_list(list);
        let visible = book.visible();

        prop_assert_eq!(visible.len(), 1);
        let expected = conditions.iter().rev().flatten().next().map(String::as_str);
        prop_assert_eq!(visible[0].effective_condition(), expected);
    }

    #[test]
    fn bounds_leave_every_line_inside_the_document(
        requested in prop::collection::vec(breakpoint(), 0..12),
        length in 1u32..25,
    ) {
        let mut book = BreakpointBook::from_list(requested);
        let before = book.len();
        let outcome = book.apply_bounds(PATHS[0], length);

        prop_assert_eq!(book.len() + outcome.removed.len(), before);
        for bp in book.visible().iter().filter(|bp| bp.resolved_path() == PATHS[0]) {
            prop_assert!(bp.resolved_line() < length);
        }
    }
}
