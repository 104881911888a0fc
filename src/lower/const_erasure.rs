//! Const erasure. Compile time constants carry their value in their type,
//! so every reference to one folds to a literal and the declarations
//! themselves vanish. After this pass, remaining identifiers denote real
//! storage or functions.

use crate::{
    ast::{self, Expression, Statement},
    diagnostics::CompileResult,
    lower::{Rewriter, walk_var_declaration},
    sema::{Env, rvalue::check_rvalue, types::Type},
};

pub struct EraseConstants<'a> {
    env: &'a mut Env,
}

impl<'a> EraseConstants<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    /// Collapses an expression whose type carries a compile time value
    fn fold(&mut self, expression: Expression) -> CompileResult<Expression> {
        match check_rvalue(self.env, &expression) {
            Ok(Type::CompTimeInt(value)) => Ok(Expression::LiteralInt(ast::LiteralInt {
                span: expression.span(),
                value,
            })),
            Ok(Type::CompTimeBool(value)) => Ok(Expression::LiteralBool(ast::LiteralBool {
                span: expression.span(),
                value,
            })),
            _ => Ok(expression),
        }
    }
}

impl Rewriter for EraseConstants<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_identifier(&mut self, identifier: &ast::Identifier) -> CompileResult<Expression> {
        // Unresolved names are left alone: this hook also sees identifiers
        // in type-annotation position, which live in the other namespace
        match self.env.lookup(identifier.symbol).map(|symbol| &symbol.ty) {
            Some(Type::CompTimeInt(value)) => Ok(Expression::LiteralInt(ast::LiteralInt {
                span: identifier.span,
                value: *value,
            })),
            Some(Type::CompTimeBool(value)) => Ok(Expression::LiteralBool(ast::LiteralBool {
                span: identifier.span,
                value: *value,
            })),
            _ => Ok(Expression::Identifier(identifier.clone())),
        }
    }

    fn rewrite_binary(&mut self, e: &ast::Binary) -> CompileResult<Expression> {
        let rewritten = Expression::Binary(ast::Binary {
            span: e.span,
            operator: e.operator,
            left: Box::new(self.rewrite_expression(&e.left)?),
            right: Box::new(self.rewrite_expression(&e.right)?),
        });

        self.fold(rewritten)
    }

    fn rewrite_unary(&mut self, e: &ast::Unary) -> CompileResult<Expression> {
        let rewritten = Expression::Unary(ast::Unary {
            span: e.span,
            operator: e.operator,
            child: Box::new(self.rewrite_expression(&e.child)?),
        });

        self.fold(rewritten)
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        let rewritten = walk_var_declaration(self, decl)?;

        let is_comptime = self
            .env
            .lookup(decl.identifier.symbol)
            .is_some_and(|symbol| symbol.ty.is_comptime());

        if is_comptime {
            // The value lives entirely in the symbol table now
            Ok(Statement::Seq(ast::Seq {
                span: decl.span,
                children: Vec::new(),
            }))
        } else {
            Ok(rewritten)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, Identifier, StorageQualifier, Visibility},
        sema::layout::SixteenBitLayout,
        source::Span,
    };

    fn let_const(name: &str, value: i64) -> Statement {
        Statement::VarDeclaration(ast::VarDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized(name),
            explicit_type: None,
            expression: Some(Box::new(Expression::literal_int(value))),
            storage: StorageQualifier::Automatic,
            is_mutable: false,
            visibility: Visibility::Private,
        })
    }

    #[test]
    fn constant_uses_fold_and_declarations_vanish() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                let_const("limit", 10),
                Statement::Expression(Expression::identifier("limit")),
            ],
        ));

        let mut pass = EraseConstants::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };

        assert!(matches!(&block.children[0], Statement::Seq(seq) if seq.children.is_empty()));
        assert_eq!(
            block.children[1],
            Statement::Expression(Expression::LiteralInt(ast::LiteralInt {
                span: Span::SYNTHESIZED,
                value: 10
            }))
        );
    }

    #[test]
    fn constant_arithmetic_folds_to_a_literal() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                let_const("limit", 10),
                Statement::Expression(Expression::Binary(ast::Binary {
                    span: Span::SYNTHESIZED,
                    operator: crate::ast::BinaryOperator::Multiply,
                    left: Box::new(Expression::identifier("limit")),
                    right: Box::new(Expression::literal_int(3)),
                })),
            ],
        ));

        let mut pass = EraseConstants::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        assert_eq!(
            block.children[1],
            Statement::Expression(Expression::LiteralInt(ast::LiteralInt {
                span: Span::SYNTHESIZED,
                value: 30
            }))
        );
    }

    #[test]
    fn mutable_declarations_survive() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let mut decl = match let_const("x", 10) {
            Statement::VarDeclaration(decl) => decl,
            _ => unreachable!(),
        };
        decl.is_mutable = true;

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::VarDeclaration(decl)],
        ));

        let mut pass = EraseConstants::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        assert!(matches!(&block.children[0], Statement::VarDeclaration(_)));
    }
}
