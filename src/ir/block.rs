//! Basic-block partitioning. A new block begins at any label definition and
//! ends after any control transfer; both rules can fire on the same
//! instruction. Each block keeps its slice of the per-instruction side
//! tables so debug info survives block-local rewriting.

use crate::{
    ir::{Instruction, Program},
    sema::symbols::ScopeId,
    source::Span,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
    pub locations: Vec<Option<Span>>,
    pub scopes: Vec<Option<ScopeId>>,
}

impl BasicBlock {
    fn push(&mut self, instruction: Instruction, location: Option<Span>, scope: Option<ScopeId>) {
        self.instructions.push(instruction);
        self.locations.push(location);
        self.scopes.push(scope);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

pub fn partition(program: &Program) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    let mut current = BasicBlock::default();

    for (index, instruction) in program.instructions.iter().enumerate() {
        if instruction.is_label() && !current.is_empty() {
            blocks.push(std::mem::take(&mut current));
        }

        current.push(
            instruction.clone(),
            program.locations.get(index).copied().flatten(),
            program.scopes.get(index).copied().flatten(),
        );

        if instruction.is_control_transfer() {
            blocks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Reassembles a partitioned program, side tables included
pub fn stitch(blocks: Vec<BasicBlock>) -> Program {
    let mut program = Program::new();

    for block in blocks {
        for ((instruction, location), scope) in block
            .instructions
            .into_iter()
            .zip(block.locations)
            .zip(block.scopes)
        {
            program.push(instruction, location, scope);
        }
    }

    program
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        intern::InternedSymbol,
        ir::{PhysicalRegister, Register},
    };

    fn label(name: &str) -> Instruction {
        Instruction::Label(InternedSymbol::new(name))
    }

    fn jump(name: &str) -> Instruction {
        Instruction::Jump(InternedSymbol::new(name))
    }

    fn load_immediate(n: u32, value: i16) -> Instruction {
        Instruction::LoadImmediate {
            destination: Register::Virtual(n),
            value,
        }
    }

    #[test]
    fn blocks_split_at_labels_and_after_control_transfers() {
        let program = Program::from_instructions(vec![
            Instruction::Enter { size: 0 },
            label(".L0"),
            load_immediate(0, 1),
            jump(".L0"),
            label(".L1"),
            Instruction::Return,
        ]);

        let blocks = partition(&program);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].instructions, vec![Instruction::Enter { size: 0 }]);
        assert_eq!(
            blocks[1].instructions,
            vec![label(".L0"), load_immediate(0, 1), jump(".L0")]
        );
        assert_eq!(
            blocks[2].instructions,
            vec![label(".L1"), Instruction::Return]
        );
    }

    #[test]
    fn a_jump_followed_by_a_label_closes_and_opens_in_one_step() {
        let program = Program::from_instructions(vec![jump(".L0"), label(".L0")]);

        let blocks = partition(&program);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn stitch_round_trips() {
        let mut program = Program::new();
        program.push(Instruction::Enter { size: 2 }, None, None);
        program.push(
            Instruction::Store {
                source: Register::Virtual(0),
                base: Register::Physical(PhysicalRegister::Fp),
                offset: -2,
                width: crate::ir::AccessWidth::Word,
            },
            Some(crate::source::Span::new(3, 9)),
            None,
        );
        program.push(Instruction::Return, None, None);

        assert_eq!(stitch(partition(&program)), program);
    }
}
