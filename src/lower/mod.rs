//! The compiler pass framework. Every lowering pass is a [`Rewriter`]: a
//! structural tree visitor whose default behavior is "rewrite the children,
//! keep the node", with a hook per node kind that a pass overrides for the
//! one construct it erases. The framework owns the things every pass would
//! otherwise reimplement:
//!
//!   - scope push/pop at block and function boundaries, with the scope
//!     restored on the error path,
//!   - symbol binding at variable declarations, so every pass sees live
//!     local type information,
//!   - the declaration prescan that registers functions, structs, traits,
//!     impl methods, and typealiases before a body is visited, so forward
//!     references resolve.
//!
//! Passes are pure with respect to the tree (they return new nodes) but
//! mutate the shared [`Env`] by binding synthesized symbols and drawing
//! fresh label/temporary names.

use std::rc::Rc;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    ast::{self, Expression, Statement, StorageQualifier, Visibility},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    sema::{
        rvalue::check_rvalue,
        symbols::{Env, ScopeKind, Symbol},
        type_context::check_type_expression,
        types::{FunctionTypeInfo, StructField, StructTypeInfo, TraitMethod, TraitTypeInfo, Type},
        types::{
            GenericFunctionTypeInfo, GenericStructTypeInfo, GenericTraitTypeInfo,
        },
    },
};

pub mod comptime;
pub mod const_erasure;
pub mod control_flow;
pub mod conversions;
pub mod escape;
pub mod flatten;
pub mod for_in;
pub mod generics;
pub mod impl_blocks;
pub mod imports;
pub mod matches;
pub mod methods;
pub mod pipeline;
pub mod returns;
pub mod test_decls;
pub mod traits;
pub mod unions;

pub trait Rewriter: Sized {
    fn env(&mut self) -> &mut Env;

    /// Passes that only manipulate tree shape can opt out of the declaration
    /// prescan (and with it, symbol binding at declarations)
    fn runs_declaration_scan(&self) -> bool {
        true
    }

    /// Entry point. Running a pass on no input is a no-op.
    fn run(&mut self, statement: Option<&Statement>) -> CompileResult<Option<Statement>> {
        match statement {
            None => Ok(None),
            Some(statement) => self.rewrite_statement(statement).map(Some),
        }
    }

    fn rewrite_statement(&mut self, statement: &Statement) -> CompileResult<Statement> {
        dispatch_statement(self, statement)
    }

    /* Statement hooks */

    fn rewrite_block(&mut self, block: &ast::Block) -> CompileResult<Statement> {
        walk_block(self, block)
    }

    fn rewrite_seq(&mut self, seq: &ast::Seq) -> CompileResult<Statement> {
        walk_seq(self, seq)
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        walk_var_declaration(self, decl)
    }

    fn rewrite_expression_statement(&mut self, expression: &Expression) -> CompileResult<Statement> {
        Ok(Statement::Expression(self.rewrite_expression(expression)?))
    }

    fn rewrite_if(&mut self, statement: &ast::If) -> CompileResult<Statement> {
        walk_if(self, statement)
    }

    fn rewrite_while(&mut self, statement: &ast::While) -> CompileResult<Statement> {
        walk_while(self, statement)
    }

    fn rewrite_for_in(&mut self, statement: &ast::ForIn) -> CompileResult<Statement> {
        walk_for_in(self, statement)
    }

    fn rewrite_return(&mut self, statement: &ast::Return) -> CompileResult<Statement> {
        walk_return(self, statement)
    }

    fn rewrite_function_declaration(
        &mut self,
        decl: &ast::FunctionDeclaration,
    ) -> CompileResult<Statement> {
        walk_function_declaration(self, decl).map(Statement::FunctionDeclaration)
    }

    fn rewrite_struct_declaration(
        &mut self,
        decl: &ast::StructDeclaration,
    ) -> CompileResult<Statement> {
        walk_struct_declaration(self, decl)
    }

    fn rewrite_trait_declaration(
        &mut self,
        decl: &ast::TraitDeclaration,
    ) -> CompileResult<Statement> {
        Ok(Statement::TraitDeclaration(decl.clone()))
    }

    fn rewrite_impl(&mut self, statement: &ast::Impl) -> CompileResult<Statement> {
        walk_impl(self, statement)
    }

    fn rewrite_impl_for(&mut self, statement: &ast::ImplFor) -> CompileResult<Statement> {
        walk_impl_for(self, statement)
    }

    fn rewrite_match(&mut self, statement: &ast::Match) -> CompileResult<Statement> {
        walk_match(self, statement)
    }

    fn rewrite_assert(&mut self, statement: &ast::Assert) -> CompileResult<Statement> {
        Ok(Statement::Assert(ast::Assert {
            span: statement.span,
            condition: self.rewrite_expression(&statement.condition)?,
            message: statement.message.clone(),
        }))
    }

    fn rewrite_typealias(&mut self, statement: &ast::Typealias) -> CompileResult<Statement> {
        Ok(Statement::Typealias(statement.clone()))
    }

    fn rewrite_import(&mut self, statement: &ast::Import) -> CompileResult<Statement> {
        Ok(Statement::Import(statement.clone()))
    }

    fn rewrite_test_declaration(
        &mut self,
        decl: &ast::TestDeclaration,
    ) -> CompileResult<Statement> {
        walk_test_declaration(self, decl)
    }

    fn rewrite_goto(&mut self, statement: &ast::Goto) -> CompileResult<Statement> {
        Ok(Statement::Goto(statement.clone()))
    }

    fn rewrite_goto_if_false(&mut self, statement: &ast::GotoIfFalse) -> CompileResult<Statement> {
        Ok(Statement::GotoIfFalse(ast::GotoIfFalse {
            span: statement.span,
            condition: self.rewrite_expression(&statement.condition)?,
            target: statement.target,
        }))
    }

    fn rewrite_label_declaration(
        &mut self,
        statement: &ast::LabelDeclaration,
    ) -> CompileResult<Statement> {
        Ok(Statement::LabelDeclaration(statement.clone()))
    }

    /* Expression hooks */

    fn rewrite_expression(&mut self, expression: &Expression) -> CompileResult<Expression> {
        dispatch_expression(self, expression)
    }

    fn rewrite_identifier(&mut self, identifier: &ast::Identifier) -> CompileResult<Expression> {
        Ok(Expression::Identifier(identifier.clone()))
    }

    fn rewrite_unary(&mut self, e: &ast::Unary) -> CompileResult<Expression> {
        Ok(Expression::Unary(ast::Unary {
            span: e.span,
            operator: e.operator,
            child: Box::new(self.rewrite_expression(&e.child)?),
        }))
    }

    fn rewrite_binary(&mut self, e: &ast::Binary) -> CompileResult<Expression> {
        Ok(Expression::Binary(ast::Binary {
            span: e.span,
            operator: e.operator,
            left: Box::new(self.rewrite_expression(&e.left)?),
            right: Box::new(self.rewrite_expression(&e.right)?),
        }))
    }

    fn rewrite_assignment(&mut self, e: &ast::Assignment) -> CompileResult<Expression> {
        Ok(Expression::Assignment(walk_assignment(self, e)?))
    }

    fn rewrite_initial_assignment(&mut self, e: &ast::Assignment) -> CompileResult<Expression> {
        Ok(Expression::InitialAssignment(walk_assignment(self, e)?))
    }

    fn rewrite_call(&mut self, e: &ast::Call) -> CompileResult<Expression> {
        walk_call(self, e)
    }

    fn rewrite_as(&mut self, e: &ast::As) -> CompileResult<Expression> {
        Ok(Expression::As(ast::As {
            span: e.span,
            expr: Box::new(self.rewrite_expression(&e.expr)?),
            target_type: Box::new(self.rewrite_expression(&e.target_type)?),
        }))
    }

    fn rewrite_bitcast(&mut self, e: &ast::Bitcast) -> CompileResult<Expression> {
        Ok(Expression::Bitcast(ast::Bitcast {
            span: e.span,
            expr: Box::new(self.rewrite_expression(&e.expr)?),
            target_type: e.target_type.clone(),
        }))
    }

    fn rewrite_is(&mut self, e: &ast::Is) -> CompileResult<Expression> {
        Ok(Expression::Is(ast::Is {
            span: e.span,
            expr: Box::new(self.rewrite_expression(&e.expr)?),
            test_type: Box::new(self.rewrite_expression(&e.test_type)?),
        }))
    }

    fn rewrite_subscript(&mut self, e: &ast::Subscript) -> CompileResult<Expression> {
        Ok(Expression::Subscript(ast::Subscript {
            span: e.span,
            subscriptable: Box::new(self.rewrite_expression(&e.subscriptable)?),
            argument: Box::new(self.rewrite_expression(&e.argument)?),
        }))
    }

    fn rewrite_get(&mut self, e: &ast::Get) -> CompileResult<Expression> {
        Ok(Expression::Get(ast::Get {
            span: e.span,
            expr: Box::new(self.rewrite_expression(&e.expr)?),
            member: e.member.clone(),
        }))
    }

    fn rewrite_primitive_type(&mut self, e: &ast::PrimitiveType) -> CompileResult<Expression> {
        Ok(Expression::PrimitiveType(e.clone()))
    }

    fn rewrite_struct_initializer(
        &mut self,
        e: &ast::StructInitializer,
    ) -> CompileResult<Expression> {
        let arguments = e
            .arguments
            .iter()
            .map(|argument| {
                Ok(ast::StructInitializerArgument {
                    name: argument.name.clone(),
                    expression: self.rewrite_expression(&argument.expression)?,
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;

        Ok(Expression::StructInitializer(ast::StructInitializer {
            span: e.span,
            struct_type_expr: Box::new(self.rewrite_expression(&e.struct_type_expr)?),
            arguments,
        }))
    }

    fn rewrite_type_of(&mut self, e: &ast::TypeOf) -> CompileResult<Expression> {
        Ok(Expression::TypeOf(ast::TypeOf {
            span: e.span,
            expr: Box::new(self.rewrite_expression(&e.expr)?),
        }))
    }

    fn rewrite_size_of(&mut self, e: &ast::SizeOf) -> CompileResult<Expression> {
        Ok(Expression::SizeOf(ast::SizeOf {
            span: e.span,
            expr: Box::new(self.rewrite_expression(&e.expr)?),
        }))
    }

    fn rewrite_generic_type_application(
        &mut self,
        e: &ast::GenericTypeApplication,
    ) -> CompileResult<Expression> {
        let arguments = e
            .arguments
            .iter()
            .map(|argument| self.rewrite_expression(argument))
            .collect::<CompileResult<Vec<_>>>()?;

        Ok(Expression::GenericTypeApplication(
            ast::GenericTypeApplication {
                span: e.span,
                identifier: e.identifier.clone(),
                arguments,
            },
        ))
    }
}

/* Dispatch */

fn dispatch_statement<R: Rewriter>(r: &mut R, statement: &Statement) -> CompileResult<Statement> {
    match statement {
        Statement::Block(s) => r.rewrite_block(s),
        Statement::Seq(s) => r.rewrite_seq(s),
        Statement::VarDeclaration(s) => r.rewrite_var_declaration(s),
        Statement::Expression(e) => r.rewrite_expression_statement(e),
        Statement::If(s) => r.rewrite_if(s),
        Statement::While(s) => r.rewrite_while(s),
        Statement::ForIn(s) => r.rewrite_for_in(s),
        Statement::Return(s) => r.rewrite_return(s),
        Statement::FunctionDeclaration(s) => r.rewrite_function_declaration(s),
        Statement::StructDeclaration(s) => r.rewrite_struct_declaration(s),
        Statement::TraitDeclaration(s) => r.rewrite_trait_declaration(s),
        Statement::Impl(s) => r.rewrite_impl(s),
        Statement::ImplFor(s) => r.rewrite_impl_for(s),
        Statement::Match(s) => r.rewrite_match(s),
        Statement::Assert(s) => r.rewrite_assert(s),
        Statement::Typealias(s) => r.rewrite_typealias(s),
        Statement::Import(s) => r.rewrite_import(s),
        Statement::TestDeclaration(s) => r.rewrite_test_declaration(s),
        Statement::Goto(s) => r.rewrite_goto(s),
        Statement::GotoIfFalse(s) => r.rewrite_goto_if_false(s),
        Statement::LabelDeclaration(s) => r.rewrite_label_declaration(s),
    }
}

fn dispatch_expression<R: Rewriter>(r: &mut R, expression: &Expression) -> CompileResult<Expression> {
    match expression {
        Expression::LiteralInt(_) | Expression::LiteralBool(_) | Expression::LiteralString(_) => {
            Ok(expression.clone())
        }
        Expression::LiteralArray(e) => {
            let elements = e
                .elements
                .iter()
                .map(|element| r.rewrite_expression(element))
                .collect::<CompileResult<Vec<_>>>()?;

            Ok(Expression::LiteralArray(ast::LiteralArray {
                span: e.span,
                array_type: Box::new(r.rewrite_expression(&e.array_type)?),
                elements,
            }))
        }
        Expression::Identifier(e) => r.rewrite_identifier(e),
        Expression::Unary(e) => r.rewrite_unary(e),
        Expression::Binary(e) => r.rewrite_binary(e),
        Expression::Assignment(e) => r.rewrite_assignment(e),
        Expression::InitialAssignment(e) => r.rewrite_initial_assignment(e),
        Expression::Call(e) => r.rewrite_call(e),
        Expression::As(e) => r.rewrite_as(e),
        Expression::Bitcast(e) => r.rewrite_bitcast(e),
        Expression::Is(e) => r.rewrite_is(e),
        Expression::Subscript(e) => r.rewrite_subscript(e),
        Expression::Get(e) => r.rewrite_get(e),
        Expression::StructInitializer(e) => r.rewrite_struct_initializer(e),
        Expression::PrimitiveType(e) => r.rewrite_primitive_type(e),
        Expression::TypeOf(e) => r.rewrite_type_of(e),
        Expression::SizeOf(e) => r.rewrite_size_of(e),
        Expression::GenericTypeApplication(e) => r.rewrite_generic_type_application(e),
        Expression::PointerType(e) => Ok(Expression::PointerType(ast::PointerType {
            span: e.span,
            child: Box::new(r.rewrite_expression(&e.child)?),
        })),
        Expression::ConstType(e) => Ok(Expression::ConstType(ast::ConstType {
            span: e.span,
            child: Box::new(r.rewrite_expression(&e.child)?),
        })),
        Expression::ArrayType(e) => {
            let count = match &e.count {
                Some(count) => Some(Box::new(r.rewrite_expression(count)?)),
                None => None,
            };

            Ok(Expression::ArrayType(ast::ArrayType {
                span: e.span,
                count,
                element: Box::new(r.rewrite_expression(&e.element)?),
            }))
        }
        Expression::UnionType(e) => {
            let members = e
                .members
                .iter()
                .map(|member| r.rewrite_expression(member))
                .collect::<CompileResult<Vec<_>>>()?;

            Ok(Expression::UnionType(ast::UnionType {
                span: e.span,
                members,
            }))
        }
        Expression::FunctionType(e) => Ok(Expression::FunctionType(walk_function_type(r, e)?)),
    }
}

/* Walk functions: the default structural recursion each hook falls back to */

pub fn walk_block<R: Rewriter>(r: &mut R, block: &ast::Block) -> CompileResult<Statement> {
    r.env().enter_scope(ScopeKind::Block);
    let children = walk_block_children(r, block);
    r.env().exit_scope();

    Ok(Statement::Block(ast::Block {
        span: block.span,
        children: children?,
    }))
}

pub fn walk_block_children<R: Rewriter>(
    r: &mut R,
    block: &ast::Block,
) -> CompileResult<Vec<Statement>> {
    if r.runs_declaration_scan() {
        scan_declarations(r.env(), &block.children)?;
    }

    block
        .children
        .iter()
        .map(|child| r.rewrite_statement(child))
        .collect()
}

pub fn walk_seq<R: Rewriter>(r: &mut R, seq: &ast::Seq) -> CompileResult<Statement> {
    let children = seq
        .children
        .iter()
        .map(|child| r.rewrite_statement(child))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(Statement::Seq(ast::Seq {
        span: seq.span,
        children,
    }))
}

pub fn walk_var_declaration<R: Rewriter>(
    r: &mut R,
    decl: &ast::VarDeclaration,
) -> CompileResult<Statement> {
    let explicit_type = match &decl.explicit_type {
        Some(ty) => Some(Box::new(r.rewrite_expression(ty)?)),
        None => None,
    };
    let expression = match &decl.expression {
        Some(expression) => Some(Box::new(r.rewrite_expression(expression)?)),
        None => None,
    };

    let rewritten = ast::VarDeclaration {
        decl_id: decl.decl_id,
        span: decl.span,
        identifier: decl.identifier.clone(),
        explicit_type,
        expression,
        storage: decl.storage,
        is_mutable: decl.is_mutable,
        visibility: decl.visibility,
    };

    if r.runs_declaration_scan() {
        bind_var_declaration(r.env(), &rewritten)?;
    }

    Ok(Statement::VarDeclaration(rewritten))
}

/// Computes the declared type of a variable (explicit annotation first,
/// initializer second) and binds it in the current scope, allocating storage
/// unless the declaration is register-resident or compile time constant.
pub fn bind_var_declaration(env: &mut Env, decl: &ast::VarDeclaration) -> CompileResult<Symbol> {
    if env.is_locally_bound(decl.identifier.symbol) {
        return Err(CompileError::at(
            decl.identifier.span,
            CompileErrorKind::RedefinedVariable(decl.identifier.symbol),
        ));
    }

    let ty = declared_type(env, decl)?;

    let symbol = if decl.storage == StorageQualifier::Register {
        let symbol = Symbol {
            ty,
            storage: crate::sema::symbols::StorageClass::Register,
            visibility: decl.visibility,
            location: Some(decl.span),
        };
        env.bind(decl.identifier.symbol, symbol.clone());
        symbol
    } else if ty.is_comptime() {
        // Compile time constants occupy no storage; const erasure folds
        // their uses away entirely
        let symbol = Symbol::unbacked(ty, decl.visibility, Some(decl.span));
        env.bind(decl.identifier.symbol, symbol.clone());
        symbol
    } else {
        env.bind_with_storage(decl.identifier.symbol, ty, decl.visibility, Some(decl.span))
    };

    Ok(symbol)
}

/// The type a declaration binds, before any storage decision
pub fn declared_type(env: &Env, decl: &ast::VarDeclaration) -> CompileResult<Type> {
    let ty = match (&decl.explicit_type, &decl.expression) {
        (Some(annotation), _) => check_type_expression(env, annotation)?,
        (None, Some(initializer)) => check_rvalue(env, initializer)?,
        (None, None) => {
            return Err(CompileError::at(
                decl.span,
                CompileErrorKind::CannotInferType(decl.identifier.symbol),
            ));
        }
    };

    Ok(if decl.is_mutable {
        ty.corresponding_mutable()
    } else if ty.is_comptime() {
        ty
    } else {
        ty.corresponding_const()
    })
}

pub fn walk_if<R: Rewriter>(r: &mut R, statement: &ast::If) -> CompileResult<Statement> {
    let else_branch = match &statement.else_branch {
        Some(branch) => Some(Box::new(r.rewrite_statement(branch)?)),
        None => None,
    };

    Ok(Statement::If(ast::If {
        span: statement.span,
        condition: r.rewrite_expression(&statement.condition)?,
        then_branch: Box::new(r.rewrite_statement(&statement.then_branch)?),
        else_branch,
    }))
}

pub fn walk_while<R: Rewriter>(r: &mut R, statement: &ast::While) -> CompileResult<Statement> {
    Ok(Statement::While(ast::While {
        span: statement.span,
        condition: r.rewrite_expression(&statement.condition)?,
        body: Box::new(r.rewrite_statement(&statement.body)?),
    }))
}

pub fn walk_for_in<R: Rewriter>(r: &mut R, statement: &ast::ForIn) -> CompileResult<Statement> {
    let sequence = r.rewrite_expression(&statement.sequence)?;

    let element = if r.runs_declaration_scan() {
        let sequence_ty = check_rvalue(r.env(), &sequence)?;

        Some(sequence_ty.array_element().cloned().ok_or_else(|| {
            CompileError::at(
                statement.sequence.span(),
                CompileErrorKind::NotIterable(sequence_ty.to_string()),
            )
        })?)
    } else {
        None
    };

    r.env().enter_scope(ScopeKind::Block);

    if let Some(element) = element {
        let symbol = Symbol::unbacked(
            element.corresponding_const(),
            Visibility::Private,
            Some(statement.identifier.span),
        );
        r.env().bind(statement.identifier.symbol, symbol);
    }

    let body = r.rewrite_statement(&statement.body);
    r.env().exit_scope();

    Ok(Statement::ForIn(ast::ForIn {
        span: statement.span,
        identifier: statement.identifier.clone(),
        sequence,
        body: Box::new(body?),
    }))
}

pub fn walk_return<R: Rewriter>(r: &mut R, statement: &ast::Return) -> CompileResult<Statement> {
    let expression = match &statement.expression {
        Some(expression) => Some(r.rewrite_expression(expression)?),
        None => None,
    };

    Ok(Statement::Return(ast::Return {
        span: statement.span,
        expression,
    }))
}

pub fn walk_function_type<R: Rewriter>(
    r: &mut R,
    e: &ast::FunctionTypeExpression,
) -> CompileResult<ast::FunctionTypeExpression> {
    let arguments = e
        .arguments
        .iter()
        .map(|argument| r.rewrite_expression(argument))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(ast::FunctionTypeExpression {
        span: e.span,
        return_type: Box::new(r.rewrite_expression(&e.return_type)?),
        arguments,
    })
}

/// Evaluates a function declaration's annotation to a [`FunctionTypeInfo`]
/// whose entry label is the declaration's own identifier
pub fn function_type_info(
    env: &Env,
    decl: &ast::FunctionDeclaration,
) -> CompileResult<Rc<FunctionTypeInfo>> {
    let return_type = check_type_expression(env, &decl.function_type.return_type)?;
    let arguments = decl
        .function_type
        .arguments
        .iter()
        .map(|argument| check_type_expression(env, argument))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(Rc::new(FunctionTypeInfo {
        name: Some(decl.identifier.symbol),
        return_type,
        arguments,
    }))
}

pub fn walk_function_declaration<R: Rewriter>(
    r: &mut R,
    decl: &ast::FunctionDeclaration,
) -> CompileResult<ast::FunctionDeclaration> {
    // Generic templates are rewritten only when instantiated; visiting the
    // un-substituted body would trip over the unresolved type parameters
    if decl.is_generic() {
        return Ok(decl.clone());
    }

    let function_type = walk_function_type(r, &decl.function_type)?;

    let info = if r.runs_declaration_scan() {
        Some(function_type_info(
            r.env(),
            &ast::FunctionDeclaration {
                function_type: function_type.clone(),
                ..decl.clone()
            },
        )?)
    } else {
        None
    };

    let kind = match &info {
        Some(info) => ScopeKind::Function {
            name: decl.identifier.symbol,
            ty: info.clone(),
        },
        // Without the prescan we still track the frame boundary
        None => ScopeKind::Function {
            name: decl.identifier.symbol,
            ty: Rc::new(FunctionTypeInfo {
                name: Some(decl.identifier.symbol),
                return_type: Type::Void,
                arguments: Vec::new(),
            }),
        },
    };
    r.env().enter_scope(kind);

    let body = (|| {
        if let Some(info) = &info {
            for (name, ty) in decl.parameter_names.iter().zip(info.arguments.iter()) {
                r.env().bind_with_storage(
                    name.symbol,
                    ty.clone(),
                    Visibility::Private,
                    Some(name.span),
                );
            }
        }

        rewrite_block_as_block(r, &decl.body)
    })();

    r.env().exit_scope();

    Ok(ast::FunctionDeclaration {
        decl_id: decl.decl_id,
        span: decl.span,
        identifier: decl.identifier.clone(),
        function_type,
        parameter_names: decl.parameter_names.clone(),
        type_arguments: decl.type_arguments.clone(),
        body: body?,
        visibility: decl.visibility,
    })
}

/// Rewrites a block through the pass's own block hook and coerces the result
/// back into a `Block` node
pub fn rewrite_block_as_block<R: Rewriter>(
    r: &mut R,
    block: &ast::Block,
) -> CompileResult<ast::Block> {
    match r.rewrite_block(block)? {
        Statement::Block(block) => Ok(block),
        other => Ok(ast::Block {
            span: other.span(),
            children: vec![other],
        }),
    }
}

pub fn walk_struct_declaration<R: Rewriter>(
    r: &mut R,
    decl: &ast::StructDeclaration,
) -> CompileResult<Statement> {
    if decl.is_generic() {
        return Ok(Statement::StructDeclaration(decl.clone()));
    }

    let members = decl
        .members
        .iter()
        .map(|member| {
            Ok(ast::StructMemberDeclaration {
                name: member.name.clone(),
                ty: r.rewrite_expression(&member.ty)?,
            })
        })
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(Statement::StructDeclaration(ast::StructDeclaration {
        span: decl.span,
        identifier: decl.identifier.clone(),
        members,
        type_arguments: decl.type_arguments.clone(),
        visibility: decl.visibility,
    }))
}

pub fn walk_impl<R: Rewriter>(r: &mut R, statement: &ast::Impl) -> CompileResult<Statement> {
    if !statement.type_arguments.is_empty() {
        return Ok(Statement::Impl(statement.clone()));
    }

    let children = statement
        .children
        .iter()
        .map(|child| walk_function_declaration(r, child))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(Statement::Impl(ast::Impl {
        span: statement.span,
        type_arguments: statement.type_arguments.clone(),
        struct_type_expr: r.rewrite_expression(&statement.struct_type_expr)?,
        children,
    }))
}

pub fn walk_impl_for<R: Rewriter>(r: &mut R, statement: &ast::ImplFor) -> CompileResult<Statement> {
    if !statement.type_arguments.is_empty() {
        return Ok(Statement::ImplFor(statement.clone()));
    }

    let children = statement
        .children
        .iter()
        .map(|child| walk_function_declaration(r, child))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(Statement::ImplFor(ast::ImplFor {
        span: statement.span,
        type_arguments: statement.type_arguments.clone(),
        trait_type_expr: r.rewrite_expression(&statement.trait_type_expr)?,
        struct_type_expr: r.rewrite_expression(&statement.struct_type_expr)?,
        children,
    }))
}

pub fn walk_match<R: Rewriter>(r: &mut R, statement: &ast::Match) -> CompileResult<Statement> {
    let expression = r.rewrite_expression(&statement.expression)?;

    let clauses = statement
        .clauses
        .iter()
        .map(|clause| walk_match_clause(r, clause))
        .collect::<CompileResult<Vec<_>>>()?;

    let else_clause = match &statement.else_clause {
        Some(block) => Some(rewrite_block_as_block(r, block)?),
        None => None,
    };

    Ok(Statement::Match(ast::Match {
        span: statement.span,
        expression,
        clauses,
        else_clause,
    }))
}

fn walk_match_clause<R: Rewriter>(
    r: &mut R,
    clause: &ast::MatchClause,
) -> CompileResult<ast::MatchClause> {
    let value_type = r.rewrite_expression(&clause.value_type)?;

    let bound_type = if r.runs_declaration_scan() {
        Some(check_type_expression(r.env(), &value_type)?)
    } else {
        None
    };

    r.env().enter_scope(ScopeKind::Block);

    if let Some(ty) = bound_type {
        let symbol = Symbol::unbacked(
            ty.corresponding_const(),
            Visibility::Private,
            Some(clause.value_identifier.span),
        );
        r.env().bind(clause.value_identifier.symbol, symbol);
    }

    let block = rewrite_block_as_block(r, &clause.block);
    r.env().exit_scope();

    Ok(ast::MatchClause {
        value_identifier: clause.value_identifier.clone(),
        value_type,
        block: block?,
    })
}

pub fn walk_test_declaration<R: Rewriter>(
    r: &mut R,
    decl: &ast::TestDeclaration,
) -> CompileResult<Statement> {
    let kind = ScopeKind::Function {
        name: decl.name.symbol,
        ty: Rc::new(FunctionTypeInfo {
            name: Some(decl.name.symbol),
            return_type: Type::Void,
            arguments: Vec::new(),
        }),
    };

    r.env().enter_scope(kind);
    let body = rewrite_block_as_block(r, &decl.body);
    r.env().exit_scope();

    Ok(Statement::TestDeclaration(ast::TestDeclaration {
        span: decl.span,
        name: decl.name.clone(),
        body: body?,
    }))
}

fn walk_assignment<R: Rewriter>(r: &mut R, e: &ast::Assignment) -> CompileResult<ast::Assignment> {
    Ok(ast::Assignment {
        span: e.span,
        lexpr: Box::new(r.rewrite_expression(&e.lexpr)?),
        rexpr: Box::new(r.rewrite_expression(&e.rexpr)?),
    })
}

fn walk_call<R: Rewriter>(r: &mut R, e: &ast::Call) -> CompileResult<Expression> {
    let arguments = e
        .arguments
        .iter()
        .map(|argument| r.rewrite_expression(argument))
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(Expression::Call(ast::Call {
        span: e.span,
        callee: Box::new(r.rewrite_expression(&e.callee)?),
        arguments,
    }))
}

/* Declaration prescan */

/// Flattens a statement list through `Seq` nodes, which are scope
/// transparent. Spliced module contents arrive as `Seq`s, and their
/// declarations belong to the enclosing scope.
fn each_scanned_statement<'a>(children: &'a [Statement], out: &mut Vec<&'a Statement>) {
    for child in children {
        match child {
            Statement::Seq(seq) => each_scanned_statement(&seq.children, out),
            other => out.push(other),
        }
    }
}

/// Pre-registers every declaration in a statement list (names and types
/// only, no lowering) so that forward references between siblings resolve.
/// Struct types materialize recursively with cycle detection; everything
/// else binds in a dependency-friendly phase order.
pub fn scan_declarations(env: &mut Env, children: &[Statement]) -> CompileResult<()> {
    let mut flattened = Vec::new();
    each_scanned_statement(children, &mut flattened);
    let children: Vec<&Statement> = flattened;
    let children = &children[..];

    scan_struct_declarations(env, children)?;

    /* Typealiases and traits */

    for child in children {
        match child {
            Statement::Typealias(alias) => {
                if env.is_type_locally_bound(alias.identifier.symbol) {
                    return Err(CompileError::at(
                        alias.identifier.span,
                        CompileErrorKind::RedefinedTypealias(alias.identifier.symbol),
                    ));
                }

                let ty = check_type_expression(env, &alias.expression)?;
                env.bind_type(alias.identifier.symbol, ty);
            }
            Statement::TraitDeclaration(decl) => scan_trait_declaration(env, decl)?,
            _ => {}
        }
    }

    /* Functions */

    for child in children {
        if let Statement::FunctionDeclaration(decl) = child {
            scan_function_declaration(env, decl)?;
        }
    }

    /* Impl blocks */

    for child in children {
        match child {
            Statement::Impl(statement) => scan_impl(env, statement)?,
            Statement::ImplFor(statement) => scan_impl_for(env, statement)?,
            _ => {}
        }
    }

    /* Labels */

    for child in children {
        if let Statement::LabelDeclaration(label) = child {
            if env.is_locally_bound(label.identifier) {
                return Err(CompileError::at(
                    label.span,
                    CompileErrorKind::RedefinedLabel(label.identifier),
                ));
            }

            env.bind(
                label.identifier,
                Symbol::unbacked(Type::Label, Visibility::Private, Some(label.span)),
            );
        }
    }

    Ok(())
}

fn scan_struct_declarations(env: &mut Env, children: &[&Statement]) -> CompileResult<()> {
    let mut decls_by_name: HashMap<InternedSymbol, &ast::StructDeclaration> = HashMap::new();

    for child in children {
        if let Statement::StructDeclaration(decl) = child {
            if env.is_type_locally_bound(decl.identifier.symbol)
                || decls_by_name.contains_key(&decl.identifier.symbol)
            {
                return Err(CompileError::at(
                    decl.identifier.span,
                    CompileErrorKind::RedefinedType(decl.identifier.symbol),
                ));
            }

            if decl.is_generic() {
                env.bind_type(
                    decl.identifier.symbol,
                    Type::GenericStruct(Rc::new(GenericStructTypeInfo {
                        declaration: decl.clone(),
                    })),
                );
            } else {
                decls_by_name.insert(decl.identifier.symbol, decl);
            }
        }
    }

    let names = decls_by_name.keys().copied().collect::<Vec<_>>();
    let mut visiting = Vec::new();

    for name in names {
        materialize_struct(env, &decls_by_name, name, &mut visiting)?;
    }

    Ok(())
}

/// Evaluates a struct declaration to its type, materializing any
/// yet-unbound sibling struct it references first. A cycle in that recursion
/// is an illegal recursive struct.
fn materialize_struct(
    env: &mut Env,
    decls_by_name: &HashMap<InternedSymbol, &ast::StructDeclaration>,
    name: InternedSymbol,
    visiting: &mut Vec<InternedSymbol>,
) -> CompileResult<()> {
    if env.lookup_type(name).is_some() {
        return Ok(());
    }

    let decl = decls_by_name[&name];

    if visiting.contains(&name) {
        let chain = visiting
            .iter()
            .chain(std::iter::once(&name))
            .map(|n| n.to_string())
            .join(" -> ");

        return Err(CompileError::at(
            decl.identifier.span,
            CompileErrorKind::RecursiveStruct(name, chain),
        ));
    }

    visiting.push(name);

    let mut fields = Vec::with_capacity(decl.members.len());

    for member in &decl.members {
        let ty = loop {
            match check_type_expression(env, &member.ty) {
                Ok(ty) => break ty,
                Err(error) => match error.kind {
                    CompileErrorKind::UnresolvedType(referenced)
                        if decls_by_name.contains_key(&referenced)
                            && env.lookup_type(referenced).is_none() =>
                    {
                        materialize_struct(env, decls_by_name, referenced, visiting)?;
                    }
                    _ => return Err(error),
                },
            }
        };

        fields.push(StructField {
            name: member.name.symbol,
            ty,
        });
    }

    visiting.pop();

    env.bind_type(
        name,
        Type::Struct(Rc::new(StructTypeInfo { name, fields })),
    );

    Ok(())
}

fn scan_trait_declaration(env: &mut Env, decl: &ast::TraitDeclaration) -> CompileResult<()> {
    if env.is_type_locally_bound(decl.identifier.symbol) {
        return Err(CompileError::at(
            decl.identifier.span,
            CompileErrorKind::RedefinedType(decl.identifier.symbol),
        ));
    }

    if !decl.type_arguments.is_empty() {
        env.bind_type(
            decl.identifier.symbol,
            Type::GenericTrait(Rc::new(GenericTraitTypeInfo {
                declaration: decl.clone(),
            })),
        );
        return Ok(());
    }

    let info = trait_type_info(env, decl)?;
    env.bind_type(decl.identifier.symbol, Type::Trait(info));

    Ok(())
}

/// Evaluates a concrete trait declaration to its [`TraitTypeInfo`]. The
/// trait's own name in a self-position pointer is erased to `*void`: a
/// trait object carries its data opaquely.
pub(crate) fn trait_type_info(
    env: &Env,
    decl: &ast::TraitDeclaration,
) -> CompileResult<Rc<TraitTypeInfo>> {
    let mut methods = Vec::with_capacity(decl.members.len());

    for member in &decl.members {
        let Expression::FunctionType(fte) = &member.ty else {
            return Err(CompileError::at(
                member.ty.span(),
                CompileErrorKind::InvalidTypeExpression,
            ));
        };

        let return_type = check_type_expression(env, &fte.return_type)?;
        let arguments = fte
            .arguments
            .iter()
            .map(|argument| {
                if let Expression::PointerType(pointer) = argument
                    && let Expression::Identifier(identifier) = pointer.child.as_ref()
                    && identifier.symbol == decl.identifier.symbol
                {
                    return Ok(Type::Pointer(Box::new(Type::Void)));
                }

                check_type_expression(env, argument)
            })
            .collect::<CompileResult<Vec<_>>>()?;

        methods.push(TraitMethod {
            name: member.name.symbol,
            ty: Rc::new(FunctionTypeInfo {
                name: None,
                return_type,
                arguments,
            }),
        });
    }

    Ok(Rc::new(TraitTypeInfo {
        name: decl.identifier.symbol,
        methods,
    }))
}

fn scan_function_declaration(env: &mut Env, decl: &ast::FunctionDeclaration) -> CompileResult<()> {
    if env.is_locally_bound(decl.identifier.symbol) {
        return Err(CompileError::at(
            decl.identifier.span,
            CompileErrorKind::RedefinedFunction(decl.identifier.symbol),
        ));
    }

    let ty = if decl.is_generic() {
        Type::GenericFunction(Rc::new(GenericFunctionTypeInfo {
            declaration: decl.clone(),
        }))
    } else {
        Type::Function(function_type_info(env, decl)?)
    };

    env.bind(
        decl.identifier.symbol,
        Symbol::unbacked(ty, decl.visibility, Some(decl.span)),
    );

    Ok(())
}

/// The mangled free-function name of a method
pub fn mangle_method(struct_name: InternedSymbol, method: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("__{struct_name}_{method}"))
}

/// The mangled free-function name of a trait impl method
pub fn mangle_trait_method(
    trait_name: InternedSymbol,
    struct_name: InternedSymbol,
    method: InternedSymbol,
) -> InternedSymbol {
    InternedSymbol::new(&format!("__{trait_name}_{struct_name}_{method}"))
}

/// Name of the synthesized static vtable instance for a conformance
pub fn vtable_instance_name(
    trait_name: InternedSymbol,
    struct_name: InternedSymbol,
) -> InternedSymbol {
    InternedSymbol::new(&format!("__{trait_name}_{struct_name}_vtable_instance"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Block, Identifier},
        sema::layout::SixteenBitLayout,
        source::Span,
    };
    use std::rc::Rc as StdRc;

    /// A pass with only the framework defaults
    struct NoopPass<'a> {
        env: &'a mut Env,
    }

    impl Rewriter for NoopPass<'_> {
        fn env(&mut self) -> &mut Env {
            self.env
        }
    }

    fn var(name: &str) -> Statement {
        Statement::VarDeclaration(ast::VarDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized(name),
            explicit_type: Some(Box::new(Expression::primitive_type(Type::U16))),
            expression: None,
            storage: StorageQualifier::Automatic,
            is_mutable: true,
            visibility: Visibility::Private,
        })
    }

    #[test]
    fn redefinition_in_the_same_block_is_rejected() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![var("x"), var("x")],
        ));

        let mut pass = NoopPass { env: &mut env };
        let error = pass.run(Some(&root)).unwrap_err();

        assert_eq!(
            error.kind,
            CompileErrorKind::RedefinedVariable(InternedSymbol::new("x"))
        );
    }

    #[test]
    fn shadowing_in_a_nested_block_is_accepted() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                var("x"),
                Statement::Block(Block::new(Span::SYNTHESIZED, vec![var("x")])),
            ],
        ));

        let mut pass = NoopPass { env: &mut env };
        assert!(pass.run(Some(&root)).is_ok());
    }

    #[test]
    fn sibling_functions_resolve_forward_references() {
        let callee = ast::FunctionDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized("callee"),
            function_type: ast::FunctionTypeExpression {
                span: Span::SYNTHESIZED,
                return_type: Box::new(Expression::primitive_type(Type::U16)),
                arguments: vec![],
            },
            parameter_names: vec![],
            type_arguments: vec![],
            body: Block::new(
                Span::SYNTHESIZED,
                vec![Statement::Return(ast::Return {
                    span: Span::SYNTHESIZED,
                    expression: Some(Expression::literal_int(1)),
                })],
            ),
            visibility: Visibility::Private,
        };

        // `caller` is declared before `callee` but calls it
        let caller = ast::FunctionDeclaration {
            decl_id: ast::DeclId::fresh(),
            identifier: Identifier::synthesized("caller"),
            body: Block::new(
                Span::SYNTHESIZED,
                vec![Statement::VarDeclaration(ast::VarDeclaration {
                    decl_id: ast::DeclId::fresh(),
                    span: Span::SYNTHESIZED,
                    identifier: Identifier::synthesized("result"),
                    explicit_type: None,
                    expression: Some(Box::new(Expression::Call(ast::Call {
                        span: Span::SYNTHESIZED,
                        callee: Box::new(Expression::identifier("callee")),
                        arguments: vec![],
                    }))),
                    storage: StorageQualifier::Automatic,
                    is_mutable: false,
                    visibility: Visibility::Private,
                })],
            ),
            ..callee.clone()
        };

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                Statement::FunctionDeclaration(caller),
                Statement::FunctionDeclaration(callee),
            ],
        ));

        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        let mut pass = NoopPass { env: &mut env };
        assert!(pass.run(Some(&root)).is_ok());
    }
}

fn scan_impl(env: &mut Env, statement: &ast::Impl) -> CompileResult<()> {
    if !statement.type_arguments.is_empty() {
        return Ok(());
    }

    let target = check_type_expression(env, &statement.struct_type_expr)?;
    let Some(info) = target.struct_info().cloned() else {
        return Err(CompileError::at(
            statement.struct_type_expr.span(),
            CompileErrorKind::InvalidTypeExpression,
        ));
    };

    for method in &statement.children {
        let mangled = mangle_method(info.name, method.identifier.symbol);

        if env.is_locally_bound(mangled) {
            return Err(CompileError::at(
                method.identifier.span,
                CompileErrorKind::RedefinedFunction(method.identifier.symbol),
            ));
        }

        let mut ty = function_type_info(env, method)?.as_ref().clone();
        ty.name = Some(mangled);

        env.bind(
            mangled,
            Symbol::unbacked(
                Type::Function(Rc::new(ty)),
                method.visibility,
                Some(method.span),
            ),
        );
        env.register_method(info.name, method.identifier.symbol, mangled);
    }

    Ok(())
}

fn scan_impl_for(env: &mut Env, statement: &ast::ImplFor) -> CompileResult<()> {
    if !statement.type_arguments.is_empty() {
        return Ok(());
    }

    let trait_ty = check_type_expression(env, &statement.trait_type_expr)?;
    let struct_ty = check_type_expression(env, &statement.struct_type_expr)?;

    // After vtable synthesis the trait's name denotes its object struct, so
    // recover the trait through the object registry
    let trait_name = match trait_ty.trait_info() {
        Some(info) => info.name,
        None => match trait_ty
            .struct_info()
            .and_then(|info| env.trait_object_info(info.name))
        {
            Some(info) => info.name,
            None => {
                return Err(CompileError::at(
                    statement.trait_type_expr.span(),
                    CompileErrorKind::InvalidTypeExpression,
                ));
            }
        },
    };

    let Some(struct_info) = struct_ty.struct_info().cloned() else {
        return Err(CompileError::at(
            statement.struct_type_expr.span(),
            CompileErrorKind::InvalidTypeExpression,
        ));
    };

    for method in &statement.children {
        let mangled = mangle_trait_method(trait_name, struct_info.name, method.identifier.symbol);

        if env.is_locally_bound(mangled) {
            return Err(CompileError::at(
                method.identifier.span,
                CompileErrorKind::RedefinedFunction(method.identifier.symbol),
            ));
        }

        let mut ty = function_type_info(env, method)?.as_ref().clone();
        ty.name = Some(mangled);

        env.bind(
            mangled,
            Symbol::unbacked(
                Type::Function(Rc::new(ty)),
                method.visibility,
                Some(method.span),
            ),
        );
        env.register_method(struct_info.name, method.identifier.symbol, mangled);
    }

    env.register_conformance(
        struct_info.name,
        trait_name,
        vtable_instance_name(trait_name, struct_info.name),
    );

    Ok(())
}
