//! For-in desugaring. A `for x in seq { ... }` loop becomes an
//! index-driven while loop over a captured copy of the sequence:
//!
//! ```text
//! {
//!     let __sequenceN = seq
//!     var __indexN: u16 = 0
//!     let __limitN: u16 = __sequenceN.count
//!     while __indexN != __limitN {
//!         let x = __sequenceN[__indexN]
//!         ...
//!         __indexN = __indexN + 1
//!     }
//! }
//! ```

use crate::{
    ast::{self, BinaryOperator, Expression, Identifier, Statement, StorageQualifier, Visibility},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::Rewriter,
    sema::{Env, rvalue::check_rvalue, types::Type},
    source::Span,
};

pub struct DesugarForIn<'a> {
    env: &'a mut Env,
}

impl<'a> DesugarForIn<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }
}

fn let_decl(name: InternedSymbol, ty: Option<Type>, initializer: Expression) -> Statement {
    Statement::VarDeclaration(ast::VarDeclaration {
        decl_id: ast::DeclId::fresh(),
        span: Span::SYNTHESIZED,
        identifier: Identifier::synthesized(name),
        explicit_type: ty.map(|ty| Box::new(Expression::primitive_type(ty))),
        expression: Some(Box::new(initializer)),
        storage: StorageQualifier::Automatic,
        is_mutable: false,
        visibility: Visibility::Private,
    })
}

impl Rewriter for DesugarForIn<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_for_in(&mut self, statement: &ast::ForIn) -> CompileResult<Statement> {
        let sequence_ty = check_rvalue(self.env, &statement.sequence)?;

        if sequence_ty.array_element().is_none() {
            return Err(CompileError::at(
                statement.sequence.span(),
                CompileErrorKind::NotIterable(sequence_ty.to_string()),
            ));
        }

        let sequence = self.env.temp_name("sequence");
        let index = self.env.temp_name("index");
        let limit = self.env.temp_name("limit");

        let get_count = Expression::Get(ast::Get {
            span: Span::SYNTHESIZED,
            expr: Box::new(Expression::identifier(sequence)),
            member: Identifier::synthesized("count"),
        });

        let element = Expression::Subscript(ast::Subscript {
            span: Span::SYNTHESIZED,
            subscriptable: Box::new(Expression::identifier(sequence)),
            argument: Box::new(Expression::identifier(index)),
        });

        let increment = Statement::Expression(Expression::Assignment(ast::Assignment {
            span: Span::SYNTHESIZED,
            lexpr: Box::new(Expression::identifier(index)),
            rexpr: Box::new(Expression::Binary(ast::Binary {
                span: Span::SYNTHESIZED,
                operator: BinaryOperator::Add,
                left: Box::new(Expression::identifier(index)),
                right: Box::new(Expression::literal_int(1)),
            })),
        }));

        let mut index_decl = match let_decl(index, Some(Type::U16), Expression::literal_int(0)) {
            Statement::VarDeclaration(decl) => decl,
            _ => unreachable!(),
        };
        index_decl.is_mutable = true;

        let lowered = Statement::Block(ast::Block::new(
            statement.span,
            vec![
                let_decl(sequence, None, statement.sequence.clone()),
                Statement::VarDeclaration(index_decl),
                let_decl(limit, Some(Type::U16), get_count),
                Statement::While(ast::While {
                    span: statement.span,
                    condition: Expression::Binary(ast::Binary {
                        span: Span::SYNTHESIZED,
                        operator: BinaryOperator::NotEquals,
                        left: Box::new(Expression::identifier(index)),
                        right: Box::new(Expression::identifier(limit)),
                    }),
                    body: Box::new(Statement::Block(ast::Block::new(
                        statement.body.span(),
                        vec![
                            let_decl(
                                statement.identifier.symbol,
                                None,
                                element,
                            ),
                            statement.body.as_ref().clone(),
                            increment,
                        ],
                    ))),
                }),
            ],
        ));

        // Recurse so nested for-in loops in the body desugar too and the
        // synthesized declarations are bound along the way
        self.rewrite_statement(&lowered)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::Block,
        sema::{layout::SixteenBitLayout, symbols::Symbol},
    };

    #[test]
    fn for_in_desugars_to_a_while_loop() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("xs"),
            Symbol::unbacked(
                Type::Array {
                    count: 3,
                    element: Box::new(Type::U16),
                },
                Visibility::Private,
                None,
            ),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::ForIn(ast::ForIn {
                span: Span::SYNTHESIZED,
                identifier: Identifier::synthesized("x"),
                sequence: Expression::identifier("xs"),
                body: Box::new(Statement::Block(Block::empty())),
            })],
        ));

        let mut pass = DesugarForIn::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(outer) = result else {
            panic!("expected block");
        };
        let Statement::Block(scaffold) = &outer.children[0] else {
            panic!("expected scaffold block, found {:?}", outer.children[0]);
        };

        assert_eq!(scaffold.children.len(), 4);
        assert!(matches!(scaffold.children[0], Statement::VarDeclaration(_)));
        assert!(matches!(scaffold.children[3], Statement::While(_)));

        let Statement::While(while_loop) = &scaffold.children[3] else {
            unreachable!()
        };
        assert!(matches!(
            while_loop.condition,
            Expression::Binary(ast::Binary {
                operator: BinaryOperator::NotEquals,
                ..
            })
        ));
    }

    #[test]
    fn iterating_a_scalar_is_an_error() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("n"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::ForIn(ast::ForIn {
                span: Span::SYNTHESIZED,
                identifier: Identifier::synthesized("x"),
                sequence: Expression::identifier("n"),
                body: Box::new(Statement::Block(Block::empty())),
            })],
        ));

        let mut pass = DesugarForIn::new(&mut env);
        let error = pass.run(Some(&root)).unwrap_err();

        assert!(matches!(error.kind, CompileErrorKind::NotIterable(_)));
    }
}
