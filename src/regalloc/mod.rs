//! Register allocation: live-interval computation, the linear-scan
//! allocator, and the spiller with its retry driver. The input is a flat
//! [`Program`](crate::ir::Program) over unbounded virtual registers; the
//! output is the same program bounded by the physical register file, with
//! load/store spill code inserted where demand exceeded supply.

use std::ops::Range;

use hashbrown::HashMap;

use crate::ir::{PhysicalRegister, Program, Register};

pub mod linear_scan;
pub mod spill;

/// The contiguous instruction-index span over which a register's value must
/// remain available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    pub register: Register,
    /// Half-open `[start, end)` over instruction indices
    pub range: Range<usize>,
    /// Pre-assigned physical register for fixed hardware roles, or the
    /// allocator's assignment once made
    pub physical: Option<PhysicalRegister>,
    /// Assigned by the allocator when the interval does not fit in a
    /// register; mutually exclusive with `physical`
    pub spill_slot: Option<usize>,
}

impl LiveInterval {
    pub fn new(register: Register, range: Range<usize>) -> Self {
        let physical = match register {
            Register::Physical(physical) => Some(physical),
            Register::Virtual(_) => None,
        };

        Self {
            register,
            range,
            physical,
            spill_slot: None,
        }
    }

    pub fn is_live_at(&self, index: usize) -> bool {
        self.range.contains(&index)
    }
}

/// Computes one interval per register, spanning from its first occurrence
/// to just past its last. Registers with fixed hardware roles come back
/// pre-assigned to themselves.
pub fn compute_live_intervals(program: &Program) -> Vec<LiveInterval> {
    let mut ranges: HashMap<Register, Range<usize>> = HashMap::new();
    let mut order: Vec<Register> = Vec::new();

    for (index, instruction) in program.instructions.iter().enumerate() {
        let mut touch = |register: Register| {
            match ranges.get_mut(&register) {
                Some(range) => range.end = index + 1,
                None => {
                    ranges.insert(register, index..index + 1);
                    order.push(register);
                }
            };
        };

        for source in instruction.sources() {
            touch(source);
        }
        if let Some(destination) = instruction.destination() {
            touch(destination);
        }
    }

    let mut intervals: Vec<LiveInterval> = order
        .into_iter()
        .map(|register| LiveInterval::new(register, ranges[&register].clone()))
        .collect();

    intervals.sort_by_key(|interval| interval.range.start);
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::BinaryOperator,
        ir::{AccessWidth, Instruction},
    };

    #[test]
    fn intervals_span_first_definition_to_last_use() {
        let program = Program::from_instructions(vec![
            // 0: li vr0, 1
            Instruction::LoadImmediate {
                destination: Register::Virtual(0),
                value: 1,
            },
            // 1: li vr1, 2
            Instruction::LoadImmediate {
                destination: Register::Virtual(1),
                value: 2,
            },
            // 2: add vr2, vr0, vr1
            Instruction::Binary {
                operator: BinaryOperator::Add,
                destination: Register::Virtual(2),
                left: Register::Virtual(0),
                right: Register::Virtual(1),
            },
            // 3: store vr2, -2(fp)
            Instruction::Store {
                source: Register::Virtual(2),
                base: Register::Physical(PhysicalRegister::Fp),
                offset: -2,
                width: AccessWidth::Word,
            },
        ]);

        let intervals = compute_live_intervals(&program);

        let of = |register: Register| {
            intervals
                .iter()
                .find(|interval| interval.register == register)
                .unwrap()
        };

        assert_eq!(of(Register::Virtual(0)).range, 0..3);
        assert_eq!(of(Register::Virtual(1)).range, 1..3);
        assert_eq!(of(Register::Virtual(2)).range, 2..4);

        // The frame pointer arrives pre-assigned to itself
        let fp = of(Register::Physical(PhysicalRegister::Fp));
        assert_eq!(fp.physical, Some(PhysicalRegister::Fp));
    }

    #[test]
    fn intervals_are_sorted_by_start() {
        let program = Program::from_instructions(vec![
            Instruction::LoadImmediate {
                destination: Register::Virtual(5),
                value: 1,
            },
            Instruction::LoadImmediate {
                destination: Register::Virtual(3),
                value: 1,
            },
        ]);

        let intervals = compute_live_intervals(&program);
        assert!(intervals.windows(2).all(|w| w[0].range.start <= w[1].range.start));
    }
}
