//! The syntax tree shared by every lowering pass. The external parser
//! produces the surface forms; successive passes rewrite them away until only
//! the core language (blocks, declarations, assignments, labels, gotos, and
//! primitive expressions) remains.
//!
//! Nodes are value types: a pass never mutates a node in place, it builds a
//! modified copy. Declaration nodes additionally carry a [`DeclId`] which
//! survives those copies, giving later passes (escape analysis in
//! particular) a stable identity for "this specific declaration site".

use std::sync::atomic::{AtomicU32, Ordering};

use crate::{index::simple_index, intern::InternedSymbol, sema::types::Type, source::Span};

simple_index! {
    /// Stable identity of a declaration site. Preserved across the
    /// copy-on-write rewrites every pass performs.
    pub struct DeclId;
}

impl DeclId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);

        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

/// Where a declared value lives. Everything starts out `Automatic` (or
/// `Static` at the top level); escape analysis later promotes qualifying
/// compiler temporaries to `Register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageQualifier {
    Static,
    Automatic,
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryOperator {
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "!")]
    Bang,
    #[strum(serialize = "~")]
    Tilde,
    #[strum(serialize = "&")]
    AddressOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Modulus,
    #[strum(serialize = "==")]
    Equals,
    #[strum(serialize = "!=")]
    NotEquals,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = "<=")]
    LessThanOrEqual,
    #[strum(serialize = ">=")]
    GreaterThanOrEqual,
    #[strum(serialize = "&")]
    BitwiseAnd,
    #[strum(serialize = "|")]
    BitwiseOr,
    #[strum(serialize = "^")]
    BitwiseXor,
    #[strum(serialize = "<<")]
    ShiftLeft,
    #[strum(serialize = ">>")]
    ShiftRight,
    #[strum(serialize = "&&")]
    LogicalAnd,
    #[strum(serialize = "||")]
    LogicalOr,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equals
                | BinaryOperator::NotEquals
                | BinaryOperator::LessThan
                | BinaryOperator::GreaterThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThanOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr)
    }

    pub fn is_arithmetic(self) -> bool {
        !self.is_comparison() && !self.is_logical()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub symbol: InternedSymbol,
    pub span: Span,
}

impl Identifier {
    pub fn new(symbol: impl Into<InternedSymbol>, span: Span) -> Self {
        Self {
            symbol: symbol.into(),
            span,
        }
    }

    pub fn synthesized(symbol: impl Into<InternedSymbol>) -> Self {
        Self::new(symbol, Span::SYNTHESIZED)
    }
}

/* Statements */

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Block(Block),
    /// Like a block but introduces no scope; the flattening target
    Seq(Seq),
    VarDeclaration(VarDeclaration),
    Expression(Expression),
    If(If),
    While(While),
    ForIn(ForIn),
    Return(Return),
    FunctionDeclaration(FunctionDeclaration),
    StructDeclaration(StructDeclaration),
    TraitDeclaration(TraitDeclaration),
    Impl(Impl),
    ImplFor(ImplFor),
    Match(Match),
    Assert(Assert),
    Typealias(Typealias),
    Import(Import),
    TestDeclaration(TestDeclaration),
    Goto(Goto),
    GotoIfFalse(GotoIfFalse),
    LabelDeclaration(LabelDeclaration),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    pub span: Span,
    pub children: Vec<Statement>,
}

impl Block {
    pub fn new(span: Span, children: Vec<Statement>) -> Self {
        Self { span, children }
    }

    pub fn empty() -> Self {
        Self::new(Span::SYNTHESIZED, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Seq {
    pub span: Span,
    pub children: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarDeclaration {
    pub decl_id: DeclId,
    pub span: Span,
    pub identifier: Identifier,
    /// Type annotation. Filled in (from the initializer) by the implicit
    /// conversion pass if the source omitted it.
    pub explicit_type: Option<Box<Expression>>,
    pub expression: Option<Box<Expression>>,
    pub storage: StorageQualifier,
    pub is_mutable: bool,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct If {
    pub span: Span,
    pub condition: Expression,
    pub then_branch: Box<Statement>,
    pub else_branch: Option<Box<Statement>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct While {
    pub span: Span,
    pub condition: Expression,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForIn {
    pub span: Span,
    pub identifier: Identifier,
    pub sequence: Expression,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Return {
    pub span: Span,
    pub expression: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionDeclaration {
    pub decl_id: DeclId,
    pub span: Span,
    pub identifier: Identifier,
    pub function_type: FunctionTypeExpression,
    /// One name per entry in `function_type.arguments`
    pub parameter_names: Vec<Identifier>,
    /// Generic type parameters; empty for concrete functions
    pub type_arguments: Vec<Identifier>,
    pub body: Block,
    pub visibility: Visibility,
}

impl FunctionDeclaration {
    pub fn is_generic(&self) -> bool {
        !self.type_arguments.is_empty()
    }
}

/// A function type annotation: the callable shape without parameter names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionTypeExpression {
    pub span: Span,
    pub return_type: Box<Expression>,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructDeclaration {
    pub span: Span,
    pub identifier: Identifier,
    pub members: Vec<StructMemberDeclaration>,
    pub type_arguments: Vec<Identifier>,
    pub visibility: Visibility,
}

impl StructDeclaration {
    pub fn is_generic(&self) -> bool {
        !self.type_arguments.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructMemberDeclaration {
    pub name: Identifier,
    pub ty: Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitDeclaration {
    pub span: Span,
    pub identifier: Identifier,
    /// Method name and function type annotation pairs
    pub members: Vec<TraitMemberDeclaration>,
    pub type_arguments: Vec<Identifier>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitMemberDeclaration {
    pub name: Identifier,
    pub ty: Expression,
}

/// An `impl` block attaching methods to a struct
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Impl {
    pub span: Span,
    pub type_arguments: Vec<Identifier>,
    pub struct_type_expr: Expression,
    pub children: Vec<FunctionDeclaration>,
}

/// An `impl Trait for Struct` block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImplFor {
    pub span: Span,
    pub type_arguments: Vec<Identifier>,
    pub trait_type_expr: Expression,
    pub struct_type_expr: Expression,
    pub children: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Match {
    pub span: Span,
    pub expression: Expression,
    pub clauses: Vec<MatchClause>,
    pub else_clause: Option<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchClause {
    /// Name bound to the narrowed value inside the clause body
    pub value_identifier: Identifier,
    pub value_type: Expression,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assert {
    pub span: Span,
    pub condition: Expression,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Typealias {
    pub span: Span,
    pub identifier: Identifier,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Import {
    pub span: Span,
    pub module_name: Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestDeclaration {
    pub span: Span,
    pub name: Identifier,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Goto {
    pub span: Span,
    pub target: InternedSymbol,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GotoIfFalse {
    pub span: Span,
    pub condition: Expression,
    pub target: InternedSymbol,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelDeclaration {
    pub span: Span,
    pub identifier: InternedSymbol,
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Block(s) => s.span,
            Statement::Seq(s) => s.span,
            Statement::VarDeclaration(s) => s.span,
            Statement::Expression(e) => e.span(),
            Statement::If(s) => s.span,
            Statement::While(s) => s.span,
            Statement::ForIn(s) => s.span,
            Statement::Return(s) => s.span,
            Statement::FunctionDeclaration(s) => s.span,
            Statement::StructDeclaration(s) => s.span,
            Statement::TraitDeclaration(s) => s.span,
            Statement::Impl(s) => s.span,
            Statement::ImplFor(s) => s.span,
            Statement::Match(s) => s.span,
            Statement::Assert(s) => s.span,
            Statement::Typealias(s) => s.span,
            Statement::Import(s) => s.span,
            Statement::TestDeclaration(s) => s.span,
            Statement::Goto(s) => s.span,
            Statement::GotoIfFalse(s) => s.span,
            Statement::LabelDeclaration(s) => s.span,
        }
    }
}

/* Expressions */

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    LiteralInt(LiteralInt),
    LiteralBool(LiteralBool),
    LiteralString(LiteralString),
    LiteralArray(LiteralArray),
    Identifier(Identifier),
    Unary(Unary),
    Binary(Binary),
    Assignment(Assignment),
    /// The assignment form emitted for declaration initializers; identical to
    /// `Assignment` except it may target an immutable binding
    InitialAssignment(Assignment),
    Call(Call),
    As(As),
    /// Reinterpretation without conversion; synthesized by union erasure
    Bitcast(Bitcast),
    Is(Is),
    Subscript(Subscript),
    Get(Get),
    StructInitializer(StructInitializer),
    /// A resolved type used in expression position. Passes synthesize these
    /// in place of surface type annotations once the type is known.
    PrimitiveType(PrimitiveType),
    TypeOf(TypeOf),
    SizeOf(SizeOf),
    GenericTypeApplication(GenericTypeApplication),

    /* Type annotation forms */
    PointerType(PointerType),
    ConstType(ConstType),
    ArrayType(ArrayType),
    UnionType(UnionType),
    FunctionType(FunctionTypeExpression),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiteralInt {
    pub span: Span,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiteralBool {
    pub span: Span,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiteralString {
    pub span: Span,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiteralArray {
    pub span: Span,
    pub array_type: Box<Expression>,
    pub elements: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unary {
    pub span: Span,
    pub operator: UnaryOperator,
    pub child: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub span: Span,
    pub operator: BinaryOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub span: Span,
    pub lexpr: Box<Expression>,
    pub rexpr: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub span: Span,
    pub callee: Box<Expression>,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct As {
    pub span: Span,
    pub expr: Box<Expression>,
    pub target_type: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bitcast {
    pub span: Span,
    pub expr: Box<Expression>,
    pub target_type: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Is {
    pub span: Span,
    pub expr: Box<Expression>,
    pub test_type: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscript {
    pub span: Span,
    pub subscriptable: Box<Expression>,
    pub argument: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Get {
    pub span: Span,
    pub expr: Box<Expression>,
    pub member: Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructInitializer {
    pub span: Span,
    pub struct_type_expr: Box<Expression>,
    pub arguments: Vec<StructInitializerArgument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructInitializerArgument {
    pub name: Identifier,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimitiveType {
    pub span: Span,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeOf {
    pub span: Span,
    pub expr: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SizeOf {
    pub span: Span,
    pub expr: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericTypeApplication {
    pub span: Span,
    pub identifier: Identifier,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointerType {
    pub span: Span,
    pub child: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstType {
    pub span: Span,
    pub child: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayType {
    pub span: Span,
    /// `None` for a dynamic array
    pub count: Option<Box<Expression>>,
    pub element: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionType {
    pub span: Span,
    pub members: Vec<Expression>,
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::LiteralInt(e) => e.span,
            Expression::LiteralBool(e) => e.span,
            Expression::LiteralString(e) => e.span,
            Expression::LiteralArray(e) => e.span,
            Expression::Identifier(e) => e.span,
            Expression::Unary(e) => e.span,
            Expression::Binary(e) => e.span,
            Expression::Assignment(e) => e.span,
            Expression::InitialAssignment(e) => e.span,
            Expression::Call(e) => e.span,
            Expression::As(e) => e.span,
            Expression::Bitcast(e) => e.span,
            Expression::Is(e) => e.span,
            Expression::Subscript(e) => e.span,
            Expression::Get(e) => e.span,
            Expression::StructInitializer(e) => e.span,
            Expression::PrimitiveType(e) => e.span,
            Expression::TypeOf(e) => e.span,
            Expression::SizeOf(e) => e.span,
            Expression::GenericTypeApplication(e) => e.span,
            Expression::PointerType(e) => e.span,
            Expression::ConstType(e) => e.span,
            Expression::ArrayType(e) => e.span,
            Expression::UnionType(e) => e.span,
            Expression::FunctionType(e) => e.span,
        }
    }

    pub fn literal_int(value: i64) -> Self {
        Expression::LiteralInt(LiteralInt {
            span: Span::SYNTHESIZED,
            value,
        })
    }

    pub fn literal_bool(value: bool) -> Self {
        Expression::LiteralBool(LiteralBool {
            span: Span::SYNTHESIZED,
            value,
        })
    }

    pub fn identifier(symbol: impl Into<InternedSymbol>) -> Self {
        Expression::Identifier(Identifier::synthesized(symbol))
    }

    pub fn primitive_type(ty: Type) -> Self {
        Expression::PrimitiveType(PrimitiveType {
            span: Span::SYNTHESIZED,
            ty,
        })
    }
}
