//! The flat intermediate instruction form the lowered tree is emitted into:
//! a three-address-code-like stream over an unbounded set of virtual
//! registers, with labels and jumps for control flow. The emission itself
//! lives in the back end; this module owns the instruction model, the
//! basic-block partitioner, and the per-block local optimizer, and is what
//! the register allocator consumes.

use crate::{
    ast::{BinaryOperator, UnaryOperator},
    intern::InternedSymbol,
    sema::symbols::ScopeId,
    source::Span,
};

pub mod block;
pub mod optimize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PhysicalRegister {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    /// Stack pointer; fixed hardware role, never allocated
    Sp,
    /// Frame pointer
    Fp,
    /// Link register
    Ra,
}

impl PhysicalRegister {
    /// General purpose registers available to the allocator
    pub const ALLOCATABLE: [Self; 8] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    Virtual(u32),
    Physical(PhysicalRegister),
}

impl core::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Virtual(n) => write!(f, "vr{n}"),
            Register::Physical(physical) => write!(f, "{physical}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    Byte,
    Word,
}

impl AccessWidth {
    pub fn bytes(self) -> usize {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Frame setup; always the first instruction of a function's stream.
    /// `size` is the number of bytes reserved for locals and spill slots.
    Enter { size: u16 },
    Leave,
    Label(InternedSymbol),
    Jump(InternedSymbol),
    JumpIfFalse {
        condition: Register,
        target: InternedSymbol,
    },
    Call(InternedSymbol),
    CallIndirect { target: Register },
    Return,
    Halt,
    LoadImmediate {
        destination: Register,
        value: i16,
    },
    LoadAddress {
        destination: Register,
        label: InternedSymbol,
    },
    Load {
        destination: Register,
        base: Register,
        offset: i16,
        width: AccessWidth,
    },
    Store {
        source: Register,
        base: Register,
        offset: i16,
        width: AccessWidth,
    },
    Move {
        destination: Register,
        source: Register,
    },
    Unary {
        operator: UnaryOperator,
        destination: Register,
        operand: Register,
    },
    Binary {
        operator: BinaryOperator,
        destination: Register,
        left: Register,
        right: Register,
    },
    AddImmediate {
        destination: Register,
        source: Register,
        value: i16,
    },
}

impl Instruction {
    /// The register this instruction writes, if any
    pub fn destination(&self) -> Option<Register> {
        match self {
            Instruction::LoadImmediate { destination, .. }
            | Instruction::LoadAddress { destination, .. }
            | Instruction::Load { destination, .. }
            | Instruction::Move { destination, .. }
            | Instruction::Unary { destination, .. }
            | Instruction::Binary { destination, .. }
            | Instruction::AddImmediate { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// The registers this instruction reads
    pub fn sources(&self) -> Vec<Register> {
        match self {
            Instruction::JumpIfFalse { condition, .. } => vec![*condition],
            Instruction::CallIndirect { target } => vec![*target],
            Instruction::Load { base, .. } => vec![*base],
            Instruction::Store { source, base, .. } => vec![*source, *base],
            Instruction::Move { source, .. } => vec![*source],
            Instruction::Unary { operand, .. } => vec![*operand],
            Instruction::Binary { left, right, .. } => vec![*left, *right],
            Instruction::AddImmediate { source, .. } => vec![*source],
            _ => Vec::new(),
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Instruction::Label(_))
    }

    /// Whether control does not necessarily fall through to the next
    /// instruction
    pub fn is_control_transfer(&self) -> bool {
        matches!(
            self,
            Instruction::Jump(_)
                | Instruction::JumpIfFalse { .. }
                | Instruction::Call(_)
                | Instruction::CallIndirect { .. }
                | Instruction::Return
                | Instruction::Halt
        )
    }

    /// Replaces `from` in every read position
    pub fn rewrite_sources(&mut self, from: Register, to: Register) {
        let replace = |r: &mut Register| {
            if *r == from {
                *r = to;
            }
        };

        match self {
            Instruction::JumpIfFalse { condition, .. } => replace(condition),
            Instruction::CallIndirect { target } => replace(target),
            Instruction::Load { base, .. } => replace(base),
            Instruction::Store { source, base, .. } => {
                replace(source);
                replace(base);
            }
            Instruction::Move { source, .. } => replace(source),
            Instruction::Unary { operand, .. } => replace(operand),
            Instruction::Binary { left, right, .. } => {
                replace(left);
                replace(right);
            }
            Instruction::AddImmediate { source, .. } => replace(source),
            _ => {}
        }
    }

    /// Replaces `from` in the write position
    pub fn rewrite_destination(&mut self, from: Register, to: Register) {
        match self {
            Instruction::LoadImmediate { destination, .. }
            | Instruction::LoadAddress { destination, .. }
            | Instruction::Load { destination, .. }
            | Instruction::Move { destination, .. }
            | Instruction::Unary { destination, .. }
            | Instruction::Binary { destination, .. }
            | Instruction::AddImmediate { destination, .. } => {
                if *destination == from {
                    *destination = to;
                }
            }
            _ => {}
        }
    }

    /// Applies `f` to every register operand, read or write
    pub fn map_registers(&mut self, f: impl Fn(Register) -> Register) {
        let sources = self.sources();
        for source in sources {
            self.rewrite_sources(source, f(source));
        }
        if let Some(destination) = self.destination() {
            self.rewrite_destination(destination, f(destination));
        }
    }
}

fn binary_mnemonic(operator: BinaryOperator) -> &'static str {
    match operator {
        BinaryOperator::Add => "add",
        BinaryOperator::Subtract => "sub",
        BinaryOperator::Multiply => "mul",
        BinaryOperator::Divide => "div",
        BinaryOperator::Modulus => "mod",
        BinaryOperator::Equals => "eq",
        BinaryOperator::NotEquals => "ne",
        BinaryOperator::LessThan => "lt",
        BinaryOperator::GreaterThan => "gt",
        BinaryOperator::LessThanOrEqual => "le",
        BinaryOperator::GreaterThanOrEqual => "ge",
        BinaryOperator::BitwiseAnd => "and",
        BinaryOperator::BitwiseOr => "or",
        BinaryOperator::BitwiseXor => "xor",
        BinaryOperator::ShiftLeft => "shl",
        BinaryOperator::ShiftRight => "shr",
        BinaryOperator::LogicalAnd => "land",
        BinaryOperator::LogicalOr => "lor",
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Enter { size } => write!(f, "enter {size}"),
            Instruction::Leave => write!(f, "leave"),
            Instruction::Label(label) => write!(f, "{label}:"),
            Instruction::Jump(label) => write!(f, "jmp {label}"),
            Instruction::JumpIfFalse { condition, target } => write!(f, "jf {condition}, {target}"),
            Instruction::Call(label) => write!(f, "call {label}"),
            Instruction::CallIndirect { target } => write!(f, "callr {target}"),
            Instruction::Return => write!(f, "ret"),
            Instruction::Halt => write!(f, "hlt"),
            Instruction::LoadImmediate { destination, value } => {
                write!(f, "li {destination}, {value}")
            }
            Instruction::LoadAddress { destination, label } => {
                write!(f, "la {destination}, {label}")
            }
            Instruction::Load {
                destination,
                base,
                offset,
                width,
            } => match width {
                AccessWidth::Byte => write!(f, "load.b {destination}, {offset}({base})"),
                AccessWidth::Word => write!(f, "load {destination}, {offset}({base})"),
            },
            Instruction::Store {
                source,
                base,
                offset,
                width,
            } => match width {
                AccessWidth::Byte => write!(f, "store.b {source}, {offset}({base})"),
                AccessWidth::Word => write!(f, "store {source}, {offset}({base})"),
            },
            Instruction::Move {
                destination,
                source,
            } => write!(f, "mov {destination}, {source}"),
            Instruction::Unary {
                operator,
                destination,
                operand,
            } => {
                let mnemonic = match operator {
                    UnaryOperator::Negate => "neg",
                    UnaryOperator::Bang => "not",
                    UnaryOperator::Tilde => "com",
                    UnaryOperator::AddressOf => "lea",
                };
                write!(f, "{mnemonic} {destination}, {operand}")
            }
            Instruction::Binary {
                operator,
                destination,
                left,
                right,
            } => write!(
                f,
                "{} {destination}, {left}, {right}",
                binary_mnemonic(*operator)
            ),
            Instruction::AddImmediate {
                destination,
                source,
                value,
            } => write!(f, "addi {destination}, {source}, {value}"),
        }
    }
}

/// A flat instruction stream plus the parallel per-instruction side tables
/// used to reconstruct debug info (originating source location and symbol
/// table scope).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub locations: Vec<Option<Span>>,
    pub scopes: Vec<Option<ScopeId>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a program with empty side tables; the usual constructor in
    /// tests
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let len = instructions.len();

        Self {
            instructions,
            locations: vec![None; len],
            scopes: vec![None; len],
        }
    }

    pub fn push(&mut self, instruction: Instruction, location: Option<Span>, scope: Option<ScopeId>) {
        self.instructions.push(instruction);
        self.locations.push(location);
        self.scopes.push(scope);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl core::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, instruction) in self.instructions.iter().enumerate() {
            if instruction.is_label() {
                writeln!(f, "{index:>4}  {instruction}")?;
            } else {
                writeln!(f, "{index:>4}      {instruction}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        let program = Program::from_instructions(vec![
            Instruction::Enter { size: 4 },
            Instruction::Label(InternedSymbol::new(".L0")),
            Instruction::LoadImmediate {
                destination: Register::Virtual(0),
                value: 42,
            },
            Instruction::Store {
                source: Register::Virtual(0),
                base: Register::Physical(PhysicalRegister::Fp),
                offset: -2,
                width: AccessWidth::Word,
            },
        ]);

        assert_eq!(
            program.to_string(),
            indoc::indoc! {"
                   0      enter 4
                   1  .L0:
                   2      li vr0, 42
                   3      store vr0, -2(fp)
            "}
        );
    }

    #[test]
    fn sources_and_destinations() {
        let instruction = Instruction::Binary {
            operator: BinaryOperator::Add,
            destination: Register::Virtual(2),
            left: Register::Virtual(0),
            right: Register::Virtual(1),
        };

        assert_eq!(instruction.destination(), Some(Register::Virtual(2)));
        assert_eq!(
            instruction.sources(),
            vec![Register::Virtual(0), Register::Virtual(1)]
        );
    }

    #[test]
    fn rewriting_reads_does_not_touch_writes() {
        let mut instruction = Instruction::Move {
            destination: Register::Virtual(0),
            source: Register::Virtual(0),
        };

        instruction.rewrite_sources(Register::Virtual(0), Register::Virtual(9));

        assert_eq!(
            instruction,
            Instruction::Move {
                destination: Register::Virtual(0),
                source: Register::Virtual(9),
            }
        );
    }
}
