//! Compiler error taxonomy. Every failure in the pipeline is a
//! [`CompileError`]: a kind plus the source span of the offending node when
//! one is available. Passes are fail-fast; the first error raised aborts the
//! whole pipeline run and is surfaced to the caller unchanged.

use colored::Colorize;
use thiserror::Error;

use crate::{intern::InternedSymbol, source::SourceFile, source::Span};

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    /* Redefinition */
    #[error("variable `{0}` redefines an existing symbol in this scope")]
    RedefinedVariable(InternedSymbol),
    #[error("function `{0}` redefines an existing symbol in this scope")]
    RedefinedFunction(InternedSymbol),
    #[error("type `{0}` redefines an existing type in this scope")]
    RedefinedType(InternedSymbol),
    #[error("typealias `{0}` redefines an existing type in this scope")]
    RedefinedTypealias(InternedSymbol),
    #[error("label `{0}` redefines an existing label in this scope")]
    RedefinedLabel(InternedSymbol),
    #[error("test `{0}` is declared more than once")]
    RedefinedTest(InternedSymbol),

    /* Resolution */
    #[error("use of unresolved identifier `{0}`")]
    UnresolvedIdentifier(InternedSymbol),
    #[error("use of undeclared type `{0}`")]
    UnresolvedType(InternedSymbol),
    #[error("value of type `{ty}` has no member `{member}`")]
    UnknownMember { ty: String, member: InternedSymbol },

    /* Types */
    #[error("binary operator `{operator}` cannot be applied to operands of type `{left}` and `{right}`")]
    BinaryOperandMismatch {
        operator: String,
        left: String,
        right: String,
    },
    #[error("unary operator `{operator}` cannot be applied to an operand of type `{operand}`")]
    InvalidUnaryOperand { operator: String, operand: String },
    #[error("expected condition of type `bool` but found `{0}`")]
    NonBooleanCondition(String),
    #[error("cannot convert value of type `{from}` to expected type `{to}`")]
    CannotConvert { from: String, to: String },
    #[error("cannot assign to value of type `{0}`: value is immutable")]
    AssignmentToImmutable(String),
    #[error("expression is not assignable")]
    NotAnLvalue,
    #[error("expected {expected} argument(s) to `{callee}` but found {found}")]
    ArgumentCountMismatch {
        callee: InternedSymbol,
        expected: usize,
        found: usize,
    },
    #[error("cannot call value of type `{0}`")]
    CannotCallValue(String),
    #[error("value of type `{0}` cannot be subscripted")]
    NotSubscriptable(String),
    #[error("subscript index must be an integer but found `{0}`")]
    InvalidSubscriptIndex(String),
    #[error("function `{0}` is missing a return statement on at least one path")]
    MissingReturn(InternedSymbol),
    #[error("`return` statement can only be used within a function body")]
    ReturnOutsideFunction,
    #[error("struct `{0}` is recursive: {1}")]
    RecursiveStruct(InternedSymbol, String),
    #[error("initializer for struct `{name}` is missing fields: {fields}")]
    MissingStructFields {
        name: InternedSymbol,
        fields: String,
    },
    #[error("division by zero in a compile time expression")]
    ComptimeDivisionByZero,
    #[error("expression is not a valid type annotation")]
    InvalidTypeExpression,
    #[error("cannot infer the type of `{0}` without an explicit type or initializer")]
    CannotInferType(InternedSymbol),
    #[error("cannot iterate over value of type `{0}`")]
    NotIterable(String),

    /* Match exhaustiveness */
    #[error("match statement is missing clauses for: {0}")]
    MatchMissingClauses(String),
    #[error("match statement has extraneous clauses for: {0}")]
    MatchExtraneousClauses(String),
    #[error("cannot match on value of non-union type `{0}` without an else clause")]
    MatchNotAUnion(String),

    /* Generics */
    #[error("expected {expected} type argument(s) to `{callee}` but found {found}")]
    GenericArgumentCountMismatch {
        callee: InternedSymbol,
        expected: usize,
        found: usize,
    },
    #[error("cannot infer type arguments for call to generic function `{0}`")]
    CannotInferTypeArguments(InternedSymbol),

    /* Traits */
    #[error("`{struct_name}` does not implement required methods of trait `{trait_name}`: {methods}")]
    MissingTraitMethods {
        trait_name: InternedSymbol,
        struct_name: InternedSymbol,
        methods: String,
    },
    #[error("method `{method}` of `{struct_name}` does not match the declaration in trait `{trait_name}`")]
    TraitMethodSignatureMismatch {
        trait_name: InternedSymbol,
        struct_name: InternedSymbol,
        method: InternedSymbol,
    },

    /* Internal consistency. These indicate pipeline invariant violations
     * rather than user mistakes. */
    #[error("internal compiler error: {0}")]
    Internal(String),

    /* Resources */
    #[error("no such module `{0}`")]
    NoSuchModule(InternedSymbol),
    #[error("access to module file `{0}` was denied")]
    ModuleAccessDenied(String),
    #[error("failed to parse imported module `{module}`: {message}")]
    ParseFailed {
        module: InternedSymbol,
        message: String,
    },
    #[error("ran out of scratch registers while inserting spill code")]
    OutOfScratchRegisters,
    #[error("expected a frame setup instruction at the start of the program")]
    MissingFrameSetup,
    #[error("spilled interval has no assigned spill slot")]
    MissingSpillSlot,
    #[error("register allocation is infeasible for this program on this target")]
    RegisterAllocationInfeasible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub location: Option<Span>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    pub fn at(span: Span, kind: CompileErrorKind) -> Self {
        Self {
            kind,
            location: Some(span),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Internal(message.into()))
    }

    /// Renders the error to stderr in the compiler's usual
    /// `error: <message> (at <origin>:<row>:<col>)` shape. Only used by
    /// embedding drivers; the pipeline itself just returns the error.
    pub fn report(&self, source_file: &SourceFile) {
        match self.location {
            Some(span) => eprintln!(
                "{}: {} {}",
                "error".red(),
                self.kind,
                format!("(at {})", source_file.format_span_position(span)).white()
            ),
            None => eprintln!("{}: {}", "error".red(), self.kind),
        }
    }
}

impl core::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let error = CompileError::new(CompileErrorKind::UnresolvedIdentifier(
            InternedSymbol::new("foo"),
        ));

        assert_eq!(error.to_string(), "use of unresolved identifier `foo`");
    }
}
