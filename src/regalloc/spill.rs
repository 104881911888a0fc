//! Spill-code insertion and the allocation driver. For every instruction
//! touching a spilled virtual register, the spiller borrows a scratch
//! register from a reserved pool, loads the value from its
//! frame-pointer-relative slot before a read, and stores it back after a
//! write. Slot offsets beyond the direct load/store immediate range get a
//! short synthesized address computation instead. The leading frame-setup
//! instruction grows to cover the new slots.
//!
//! The driver runs allocation to a fixed point: whenever the spiller runs
//! out of scratch registers, one more physical register is withdrawn from
//! the allocatable pool and dedicated to scratch duty, and the whole
//! allocation is retried. The pool only shrinks, so the loop terminates;
//! exhausting it entirely is a fatal error.

use log::trace;

use crate::{
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    ir::{AccessWidth, Instruction, PhysicalRegister, Program, Register},
    regalloc::{LiveInterval, compute_live_intervals, linear_scan},
};

/// Offsets a direct load/store can encode
pub const DIRECT_OFFSET_MIN: i16 = -128;
pub const DIRECT_OFFSET_MAX: i16 = 127;

const SPILL_WORD_SIZE: u16 = 2;

fn fits_direct(offset: i32) -> bool {
    offset >= DIRECT_OFFSET_MIN as i32 && offset <= DIRECT_OFFSET_MAX as i32
}

/// A per-instruction lease on the scratch pool
struct ScratchLease<'a> {
    pool: &'a [PhysicalRegister],
    next: usize,
}

impl ScratchLease<'_> {
    fn borrow(&mut self) -> CompileResult<PhysicalRegister> {
        let register = self
            .pool
            .get(self.next)
            .copied()
            .ok_or_else(|| CompileError::new(CompileErrorKind::OutOfScratchRegisters))?;
        self.next += 1;
        Ok(register)
    }
}

fn slot_offset(frame_size: u16, slot: usize) -> i32 {
    -((frame_size as i32) + ((slot as i32) + 1) * SPILL_WORD_SIZE as i32)
}

/// Emits a load from a spill slot, synthesizing an address computation when
/// the offset does not encode directly
fn emit_slot_load(
    out: &mut Vec<Instruction>,
    scratch: &mut ScratchLease,
    destination: PhysicalRegister,
    offset: i32,
) -> CompileResult<()> {
    if fits_direct(offset) {
        out.push(Instruction::Load {
            destination: Register::Physical(destination),
            base: Register::Physical(PhysicalRegister::Fp),
            offset: offset as i16,
            width: AccessWidth::Word,
        });
    } else {
        let address = scratch.borrow()?;
        out.push(Instruction::LoadImmediate {
            destination: Register::Physical(address),
            value: offset as i16,
        });
        out.push(Instruction::Binary {
            operator: crate::ast::BinaryOperator::Add,
            destination: Register::Physical(address),
            left: Register::Physical(address),
            right: Register::Physical(PhysicalRegister::Fp),
        });
        out.push(Instruction::Load {
            destination: Register::Physical(destination),
            base: Register::Physical(address),
            offset: 0,
            width: AccessWidth::Word,
        });
    }

    Ok(())
}

fn emit_slot_store(
    out: &mut Vec<Instruction>,
    scratch: &mut ScratchLease,
    source: PhysicalRegister,
    offset: i32,
) -> CompileResult<()> {
    if fits_direct(offset) {
        out.push(Instruction::Store {
            source: Register::Physical(source),
            base: Register::Physical(PhysicalRegister::Fp),
            offset: offset as i16,
            width: AccessWidth::Word,
        });
    } else {
        let address = scratch.borrow()?;
        out.push(Instruction::LoadImmediate {
            destination: Register::Physical(address),
            value: offset as i16,
        });
        out.push(Instruction::Binary {
            operator: crate::ast::BinaryOperator::Add,
            destination: Register::Physical(address),
            left: Register::Physical(address),
            right: Register::Physical(PhysicalRegister::Fp),
        });
        out.push(Instruction::Store {
            source: Register::Physical(source),
            base: Register::Physical(address),
            offset: 0,
            width: AccessWidth::Word,
        });
    }

    Ok(())
}

/// Rewrites every access to a spilled register through a borrowed scratch
/// register bracketed by slot loads/stores, and grows the frame to cover
/// the slots.
pub fn insert_spill_code(
    program: &Program,
    intervals: &[LiveInterval],
    scratch_pool: &[PhysicalRegister],
) -> CompileResult<Program> {
    let Some(Instruction::Enter { size: frame_size }) = program.instructions.first().cloned()
    else {
        return Err(CompileError::new(CompileErrorKind::MissingFrameSetup));
    };

    let spilled: Vec<&LiveInterval> = intervals
        .iter()
        .filter(|interval| interval.spill_slot.is_some())
        .collect();

    let slot_count = spilled.len();

    let mut result = Program::new();

    for (index, instruction) in program.instructions.iter().enumerate() {
        let location = program.locations.get(index).copied().flatten();
        let scope = program.scopes.get(index).copied().flatten();

        let mut scratch = ScratchLease {
            pool: scratch_pool,
            next: 0,
        };

        let mut rewritten = instruction.clone();
        let mut before = Vec::new();
        let mut after = Vec::new();

        for interval in spilled.iter().filter(|interval| interval.is_live_at(index)) {
            let slot = interval
                .spill_slot
                .ok_or_else(|| CompileError::new(CompileErrorKind::MissingSpillSlot))?;
            let offset = slot_offset(frame_size, slot);

            let reads = instruction.sources().contains(&interval.register);
            let writes = instruction.destination() == Some(interval.register);

            if !reads && !writes {
                continue;
            }

            let borrowed = scratch.borrow()?;

            if reads {
                emit_slot_load(&mut before, &mut scratch, borrowed, offset)?;
                rewritten.rewrite_sources(interval.register, Register::Physical(borrowed));
            }

            if writes {
                rewritten.rewrite_destination(interval.register, Register::Physical(borrowed));
                emit_slot_store(&mut after, &mut scratch, borrowed, offset)?;
            }
        }

        // Rewrite the grown frame size as we copy the setup instruction
        if index == 0 {
            rewritten = Instruction::Enter {
                size: frame_size + slot_count as u16 * SPILL_WORD_SIZE,
            };
        }

        for instruction in before {
            result.push(instruction, location, scope);
        }
        result.push(rewritten, location, scope);
        for instruction in after {
            result.push(instruction, location, scope);
        }
    }

    Ok(result)
}

/// The allocation driver: computes intervals, allocates, inserts spill
/// code, and retries with a smaller pool whenever scratch demand cannot be
/// met. Returns the fully register-allocated, spill-resolved program.
pub fn allocate_registers(program: &Program) -> CompileResult<Program> {
    let mut available: Vec<PhysicalRegister> = PhysicalRegister::ALLOCATABLE.to_vec();

    // A small reserved pool of scratch temporaries to start with
    let mut scratch = vec![available.pop().expect("the register file is not empty")];

    loop {
        let intervals = compute_live_intervals(program);
        let allocated = linear_scan::allocate(&intervals, &available);

        match insert_spill_code(program, &allocated, &scratch) {
            Ok(mut spilled) => {
                // Map the surviving virtual registers onto their assigned
                // physical registers
                let assignments: hashbrown::HashMap<Register, PhysicalRegister> = allocated
                    .iter()
                    .filter(|interval| matches!(interval.register, Register::Virtual(_)))
                    .filter_map(|interval| {
                        interval.physical.map(|physical| (interval.register, physical))
                    })
                    .collect();

                for instruction in &mut spilled.instructions {
                    instruction.map_registers(|register| {
                        assignments
                            .get(&register)
                            .map(|physical| Register::Physical(*physical))
                            .unwrap_or(register)
                    });
                }

                return Ok(spilled);
            }
            Err(error) if error.kind == CompileErrorKind::OutOfScratchRegisters => {
                let Some(reserved) = available.pop() else {
                    return Err(CompileError::new(
                        CompileErrorKind::RegisterAllocationInfeasible,
                    ));
                };

                trace!(
                    "spiller ran out of temporaries; reserving {reserved} and retrying \
                     with {} allocatable registers",
                    available.len()
                );
                scratch.push(reserved);
            }
            Err(error) => return Err(error),
        }
    }
}
