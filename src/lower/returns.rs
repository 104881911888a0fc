//! Terminal-return synthesis. Void functions that fall off the end of
//! their body gain an explicit `return`; non-void functions that can fall
//! off the end are a compile error.

use crate::{
    ast::{self, Statement},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    lower::{Rewriter, walk_function_declaration},
    sema::{Env, type_context::check_type_expression, types::Type},
    source::Span,
};

pub struct SynthesizeTerminalReturns<'a> {
    env: &'a mut Env,
}

impl<'a> SynthesizeTerminalReturns<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }
}

/// Whether control cannot flow past this statement
fn always_returns(statement: &Statement) -> bool {
    match statement {
        Statement::Return(_) => true,
        Statement::Block(block) => block.children.last().is_some_and(always_returns),
        Statement::Seq(seq) => seq.children.last().is_some_and(always_returns),
        Statement::If(s) => {
            s.else_branch.as_ref().is_some_and(|e| always_returns(e))
                && always_returns(&s.then_branch)
        }
        Statement::Match(s) => {
            s.clauses
                .iter()
                .all(|clause| clause.block.children.last().is_some_and(always_returns))
                && s.else_clause
                    .as_ref()
                    .is_some_and(|block| block.children.last().is_some_and(always_returns))
        }
        _ => false,
    }
}

impl Rewriter for SynthesizeTerminalReturns<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_function_declaration(
        &mut self,
        decl: &ast::FunctionDeclaration,
    ) -> CompileResult<Statement> {
        let mut rewritten = walk_function_declaration(self, decl)?;

        let return_type = check_type_expression(self.env, &rewritten.function_type.return_type)?;
        let body_returns = rewritten.body.children.last().is_some_and(always_returns);

        if return_type == Type::Void {
            if !body_returns {
                rewritten.body.children.push(Statement::Return(ast::Return {
                    span: Span::SYNTHESIZED,
                    expression: None,
                }));
            }
        } else if !always_returns(&Statement::Block(rewritten.body.clone())) {
            return Err(CompileError::at(
                decl.span,
                CompileErrorKind::MissingReturn(decl.identifier.symbol),
            ));
        }

        Ok(Statement::FunctionDeclaration(rewritten))
    }
}
