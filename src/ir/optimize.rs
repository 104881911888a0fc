//! Per-block dead-store elimination. A backward scan over a simulated
//! byte-granularity memory freshness model: a store whose every byte is
//! overwritten by a later store, with no intervening read, produced a dead
//! value and is removed. Only frame-pointer-relative accesses with constant
//! offsets are modeled; anything with uncontrolled memory effects (indirect
//! stores, calls) conservatively resets the whole model, which keeps the
//! pass sound without alias analysis.

use crate::ir::{
    Instruction, PhysicalRegister, Program, Register,
    block::{BasicBlock, partition, stitch},
};

const ADDRESS_SPACE: usize = 0x1_0000;

fn frame_range(offset: i16, bytes: usize) -> std::ops::Range<usize> {
    // Negative frame offsets wrap into the top of the model's index space;
    // only relative overlap matters
    let base = (offset as i32).rem_euclid(ADDRESS_SPACE as i32) as usize;
    base..(base + bytes).min(ADDRESS_SPACE)
}

pub fn eliminate_dead_stores(block: &mut BasicBlock) {
    // dirty = true means a later store overwrites this byte before any read
    let mut dirty = vec![false; ADDRESS_SPACE];
    let mut dead = vec![false; block.instructions.len()];

    for index in (0..block.instructions.len()).rev() {
        match &block.instructions[index] {
            Instruction::Store {
                base: Register::Physical(PhysicalRegister::Fp),
                offset,
                width,
                ..
            } => {
                let range = frame_range(*offset, width.bytes());

                if range.clone().all(|byte| dirty[byte]) {
                    dead[index] = true;
                } else {
                    for byte in range {
                        dirty[byte] = true;
                    }
                }
            }
            Instruction::Load {
                base: Register::Physical(PhysicalRegister::Fp),
                offset,
                width,
                ..
            } => {
                for byte in frame_range(*offset, width.bytes()) {
                    dirty[byte] = false;
                }
            }
            // Uncontrolled memory effects: every byte may be read
            Instruction::Store { .. }
            | Instruction::Load { .. }
            | Instruction::Call(_)
            | Instruction::CallIndirect { .. }
            | Instruction::Halt => {
                dirty.fill(false);
            }
            _ => {}
        }
    }

    let mut keep = dead.iter().map(|dead| !dead);
    block.instructions.retain(|_| keep.next().unwrap());
    let mut keep = dead.iter().map(|dead| !dead);
    block.locations.retain(|_| keep.next().unwrap());
    let mut keep = dead.iter().map(|dead| !dead);
    block.scopes.retain(|_| keep.next().unwrap());
}

/// Partitions, optimizes each block, and reassembles
pub fn optimize_program(program: &Program) -> Program {
    let mut blocks = partition(program);

    for block in &mut blocks {
        eliminate_dead_stores(block);
    }

    stitch(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternedSymbol, ir::AccessWidth};

    fn store(n: u32, offset: i16, width: AccessWidth) -> Instruction {
        Instruction::Store {
            source: Register::Virtual(n),
            base: Register::Physical(PhysicalRegister::Fp),
            offset,
            width,
        }
    }

    fn load(n: u32, offset: i16, width: AccessWidth) -> Instruction {
        Instruction::Load {
            destination: Register::Virtual(n),
            base: Register::Physical(PhysicalRegister::Fp),
            offset,
            width,
        }
    }

    #[test]
    fn an_overwritten_store_is_removed() {
        let program = Program::from_instructions(vec![
            store(0, -2, AccessWidth::Word),
            store(1, -2, AccessWidth::Word),
            Instruction::Return,
        ]);

        let optimized = optimize_program(&program);

        assert_eq!(
            optimized.instructions,
            vec![store(1, -2, AccessWidth::Word), Instruction::Return]
        );
    }

    #[test]
    fn an_intervening_read_keeps_the_store() {
        let program = Program::from_instructions(vec![
            store(0, -2, AccessWidth::Word),
            load(2, -2, AccessWidth::Word),
            store(1, -2, AccessWidth::Word),
            Instruction::Return,
        ]);

        let optimized = optimize_program(&program);
        assert_eq!(optimized.instructions.len(), 4);
    }

    #[test]
    fn a_partial_overwrite_keeps_the_store() {
        // The wide store still provides the second byte
        let program = Program::from_instructions(vec![
            store(0, -2, AccessWidth::Word),
            store(1, -2, AccessWidth::Byte),
            Instruction::Return,
        ]);

        let optimized = optimize_program(&program);
        assert_eq!(optimized.instructions.len(), 3);
    }

    #[test]
    fn calls_reset_the_model() {
        let program = Program::from_instructions(vec![
            store(0, -2, AccessWidth::Word),
            Instruction::Call(InternedSymbol::new("observe")),
            store(1, -2, AccessWidth::Word),
            Instruction::Return,
        ]);

        let optimized = optimize_program(&program);
        assert_eq!(optimized.instructions.len(), 4);
    }

    #[test]
    fn elimination_is_block_local() {
        // The first store's value could be read by another block jumping
        // to .L0, so nothing may be removed across the boundary
        let program = Program::from_instructions(vec![
            store(0, -2, AccessWidth::Word),
            Instruction::Jump(InternedSymbol::new(".L0")),
            Instruction::Label(InternedSymbol::new(".L0")),
            store(1, -2, AccessWidth::Word),
            Instruction::Return,
        ]);

        let optimized = optimize_program(&program);
        assert_eq!(optimized.instructions.len(), 5);
    }
}
