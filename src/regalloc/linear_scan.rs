//! The linear-scan allocator. Intervals are processed in increasing start
//! order; intervals whose end precedes the current start are expired and
//! their registers freed. When no register is free the interval competes
//! with the active interval holding the furthest end point: whichever ends
//! later is spilled, so the sooner-ending value keeps a register and frees
//! it first.
//!
//! Intervals that arrive pre-assigned (fixed hardware roles) pass through
//! untouched: they are never spilled and their register is withheld from
//! the pool while they are live.

use crate::{
    ir::PhysicalRegister,
    regalloc::LiveInterval,
};

struct Active {
    /// Index into the result vector
    interval: usize,
    register: PhysicalRegister,
    /// Whether `register` was taken from the free pool (and so returns to
    /// it on expiry)
    from_pool: bool,
    /// Pre-assigned intervals must never be evicted
    evictable: bool,
}

/// Annotates every interval with either a physical register or a spill
/// slot, preserving input order. Spill slots count up monotonically and are
/// never reused within one allocation run.
pub fn allocate(intervals: &[LiveInterval], pool: &[PhysicalRegister]) -> Vec<LiveInterval> {
    let mut result = intervals.to_vec();

    let mut order: Vec<usize> = (0..result.len()).collect();
    order.sort_by_key(|index| result[*index].range.start);

    let mut free: Vec<PhysicalRegister> = pool.to_vec();
    let mut active: Vec<Active> = Vec::new();
    let mut next_spill_slot = 0;

    for index in order {
        let start = result[index].range.start;
        let end = result[index].range.end;

        /* Expire old intervals */

        active.retain(|entry| {
            if result[entry.interval].range.end <= start {
                if entry.from_pool {
                    free.push(entry.register);
                }
                false
            } else {
                true
            }
        });

        /* Pass pre-assigned intervals through, withholding their register */

        if let Some(fixed) = result[index].physical {
            let from_pool = match free.iter().position(|register| *register == fixed) {
                Some(position) => {
                    free.remove(position);
                    true
                }
                None => false,
            };

            active.push(Active {
                interval: index,
                register: fixed,
                from_pool,
                evictable: false,
            });
            continue;
        }

        /* Assign a free register when one exists */

        if !free.is_empty() {
            let register = free.remove(0);
            result[index].physical = Some(register);
            active.push(Active {
                interval: index,
                register,
                from_pool: true,
                evictable: true,
            });
            continue;
        }

        /* Spill: compete with the furthest-ending active interval */

        let candidate = active
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.evictable)
            .max_by_key(|(_, entry)| result[entry.interval].range.end)
            .map(|(position, entry)| {
                (position, entry.register, entry.interval, result[entry.interval].range.end)
            });

        match candidate {
            Some((position, register, evicted, candidate_end)) if candidate_end > end => {
                active.remove(position);

                result[evicted].physical = None;
                result[evicted].spill_slot = Some(next_spill_slot);
                next_spill_slot += 1;

                result[index].physical = Some(register);
                active.push(Active {
                    interval: index,
                    register,
                    from_pool: true,
                    evictable: true,
                });
            }
            _ => {
                result[index].spill_slot = Some(next_spill_slot);
                next_spill_slot += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Register;
    use crate::regalloc::LiveInterval;

    fn virtual_interval(n: u32, range: std::ops::Range<usize>) -> LiveInterval {
        LiveInterval::new(Register::Virtual(n), range)
    }

    fn pool(k: usize) -> Vec<PhysicalRegister> {
        PhysicalRegister::ALLOCATABLE[..k].to_vec()
    }

    /// No two intervals with overlapping ranges may share a register, and
    /// every interval gets exactly one of register or spill slot.
    fn check_invariants(allocated: &[LiveInterval]) {
        for interval in allocated {
            assert!(
                interval.physical.is_some() ^ interval.spill_slot.is_some(),
                "interval {interval:?} must have exactly one assignment"
            );
        }

        for (i, a) in allocated.iter().enumerate() {
            for b in allocated.iter().skip(i + 1) {
                let overlap = a.range.start < b.range.end && b.range.start < a.range.end;
                if overlap && a.physical.is_some() {
                    assert_ne!(
                        a.physical, b.physical,
                        "overlapping intervals {a:?} and {b:?} share a register"
                    );
                }
            }
        }
    }

    #[test]
    fn disjoint_intervals_reuse_registers() {
        let intervals = vec![
            virtual_interval(0, 0..2),
            virtual_interval(1, 2..4),
            virtual_interval(2, 4..6),
        ];

        let allocated = allocate(&intervals, &pool(1));

        check_invariants(&allocated);
        assert!(allocated.iter().all(|interval| interval.spill_slot.is_none()));
        assert!(
            allocated
                .iter()
                .all(|interval| interval.physical == Some(PhysicalRegister::R0))
        );
    }

    /// Three intervals simultaneously live across [2, 3) with two
    /// registers spills exactly one interval, with no error.
    #[test]
    fn overcommitted_intervals_spill_exactly_one() {
        let intervals = vec![
            virtual_interval(1, 0..4),
            virtual_interval(2, 1..5),
            virtual_interval(3, 2..3),
        ];

        let allocated = allocate(&intervals, &pool(2));

        check_invariants(&allocated);
        let spilled = allocated
            .iter()
            .filter(|interval| interval.spill_slot.is_some())
            .count();
        assert_eq!(spilled, 1);
    }

    /// The interval ending furthest away is the one evicted.
    #[test]
    fn eviction_prefers_the_furthest_end_point() {
        let intervals = vec![
            virtual_interval(0, 0..10),
            virtual_interval(1, 1..3),
            virtual_interval(2, 2..4),
        ];

        let allocated = allocate(&intervals, &pool(2));

        check_invariants(&allocated);
        // vr0 ends at 10, far beyond vr2's end at 4, so vr0 is spilled
        assert_eq!(allocated[0].spill_slot, Some(0));
        assert!(allocated[1].physical.is_some());
        assert!(allocated[2].physical.is_some());
    }

    /// When no active interval ends later, the new interval spills itself.
    #[test]
    fn the_new_interval_spills_when_it_ends_last() {
        let intervals = vec![
            virtual_interval(0, 0..4),
            virtual_interval(1, 1..20),
        ];

        let allocated = allocate(&intervals, &pool(1));

        check_invariants(&allocated);
        assert!(allocated[0].physical.is_some());
        assert_eq!(allocated[1].spill_slot, Some(0));
    }

    #[test]
    fn pre_assigned_intervals_pass_through_and_block_their_register() {
        let mut fixed = LiveInterval::new(Register::Physical(PhysicalRegister::R0), 0..10);
        fixed.physical = Some(PhysicalRegister::R0);

        let intervals = vec![fixed, virtual_interval(1, 1..5)];

        let allocated = allocate(&intervals, &pool(2));

        check_invariants(&allocated);
        assert_eq!(allocated[0].physical, Some(PhysicalRegister::R0));
        assert_eq!(allocated[0].spill_slot, None);
        // The virtual interval had to take the other register
        assert_eq!(allocated[1].physical, Some(PhysicalRegister::R1));
    }

    #[test]
    fn spill_slots_count_up_and_are_never_reused() {
        let intervals = vec![
            virtual_interval(0, 0..10),
            virtual_interval(1, 1..11),
            virtual_interval(2, 2..12),
        ];

        let allocated = allocate(&intervals, &pool(1));

        check_invariants(&allocated);
        let mut slots: Vec<usize> = allocated
            .iter()
            .filter_map(|interval| interval.spill_slot)
            .collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn output_preserves_input_order() {
        let intervals = vec![
            virtual_interval(5, 3..6),
            virtual_interval(6, 0..2),
        ];

        let allocated = allocate(&intervals, &pool(2));

        assert_eq!(allocated[0].register, Register::Virtual(5));
        assert_eq!(allocated[1].register, Register::Virtual(6));
    }
}
