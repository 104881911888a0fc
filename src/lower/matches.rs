//! Match-statement lowering. A match over a union-typed scrutinee becomes a
//! chain of `is` tests and narrowing bindings, built innermost-first so the
//! generated chain evaluates clauses in the order they were written:
//!
//! ```text
//! match u {            {
//!     (a: A) { f(a) }      let __indexN = u
//!     else { g() }         if __indexN is A {
//! }                            let a = __indexN as A
//!                              f(a)
//!                          } else {
//!                              g()
//!                          }
//!                      }
//! ```
//!
//! Exhaustiveness is checked before lowering: without an else clause, every
//! union member must be covered exactly once, and no clause may name a type
//! outside the union.

use crate::{
    ast::{self, Expression, Identifier, Statement, StorageQualifier, Visibility},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    lower::Rewriter,
    sema::{Env, rvalue::check_rvalue, type_context::check_type_expression, types::Type},
    source::Span,
};

use itertools::Itertools;

pub struct LowerMatches<'a> {
    env: &'a mut Env,
}

impl<'a> LowerMatches<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    fn check_exhaustiveness(
        &mut self,
        statement: &ast::Match,
        members: &[Type],
        clause_types: &[Type],
    ) -> CompileResult<()> {
        let normalized_members: Vec<Type> = members
            .iter()
            .map(|member| member.corresponding_mutable())
            .collect();

        let mut extraneous = Vec::new();
        let mut seen: Vec<Type> = Vec::new();

        for ty in clause_types {
            let normalized = ty.corresponding_mutable();

            if !normalized_members.contains(&normalized) || seen.contains(&normalized) {
                extraneous.push(normalized.to_string());
            } else {
                seen.push(normalized);
            }
        }

        if !extraneous.is_empty() {
            return Err(CompileError::at(
                statement.span,
                CompileErrorKind::MatchExtraneousClauses(extraneous.iter().join(", ")),
            ));
        }

        if statement.else_clause.is_none() {
            let missing: Vec<String> = normalized_members
                .iter()
                .filter(|member| !seen.contains(member))
                .map(|member| member.to_string())
                .collect();

            if !missing.is_empty() {
                return Err(CompileError::at(
                    statement.span,
                    CompileErrorKind::MatchMissingClauses(missing.iter().join(", ")),
                ));
            }
        }

        Ok(())
    }
}

impl Rewriter for LowerMatches<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_match(&mut self, statement: &ast::Match) -> CompileResult<Statement> {
        let scrutinee_ty = check_rvalue(self.env, &statement.expression)?;

        let Some(union_info) = scrutinee_ty.union_info().cloned() else {
            return Err(CompileError::at(
                statement.expression.span(),
                CompileErrorKind::MatchNotAUnion(scrutinee_ty.to_string()),
            ));
        };

        let clause_types = statement
            .clauses
            .iter()
            .map(|clause| check_type_expression(self.env, &clause.value_type))
            .collect::<CompileResult<Vec<_>>>()?;

        self.check_exhaustiveness(statement, &union_info.members, &clause_types)?;

        let temp = self.env.temp_name("index");

        // Fold the clause list in declaration order reversed; the last
        // clause becomes the innermost test
        let mut chain: Option<Statement> = statement
            .else_clause
            .as_ref()
            .map(|block| Statement::Block(block.clone()));

        for clause in statement.clauses.iter().rev() {
            let binding = Statement::VarDeclaration(ast::VarDeclaration {
                decl_id: ast::DeclId::fresh(),
                span: clause.value_identifier.span,
                identifier: clause.value_identifier.clone(),
                explicit_type: None,
                expression: Some(Box::new(Expression::As(ast::As {
                    span: clause.value_identifier.span,
                    expr: Box::new(Expression::Identifier(Identifier::new(
                        temp,
                        clause.value_identifier.span,
                    ))),
                    target_type: Box::new(clause.value_type.clone()),
                }))),
                storage: StorageQualifier::Automatic,
                is_mutable: false,
                visibility: Visibility::Private,
            });

            let mut body = vec![binding];
            body.extend(clause.block.children.iter().cloned());

            chain = Some(Statement::If(ast::If {
                span: clause.block.span,
                condition: Expression::Is(ast::Is {
                    span: clause.value_type.span(),
                    expr: Box::new(Expression::Identifier(Identifier::new(
                        temp,
                        statement.expression.span(),
                    ))),
                    test_type: Box::new(clause.value_type.clone()),
                }),
                then_branch: Box::new(Statement::Block(ast::Block::new(clause.block.span, body))),
                else_branch: chain.take().map(Box::new),
            }));
        }

        let mut children = vec![Statement::VarDeclaration(ast::VarDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: statement.expression.span(),
            identifier: Identifier::new(temp, statement.expression.span()),
            explicit_type: None,
            expression: Some(Box::new(statement.expression.clone())),
            storage: StorageQualifier::Automatic,
            is_mutable: false,
            visibility: Visibility::Private,
        })];
        children.extend(chain);

        let lowered = Statement::Block(ast::Block::new(statement.span, children));

        // Recurse to lower nested matches and bind the synthesized
        // declarations
        self.rewrite_statement(&lowered)
    }
}
