//! Compile-time-expression erasure. `typeof`, `sizeof`, and statically
//! decidable `is` tests become literals. Dynamic `is` tests on union values
//! are left in place for union erasure to turn into tag comparisons.

use crate::{
    ast::{self, Expression},
    diagnostics::CompileResult,
    lower::Rewriter,
    sema::{Env, rvalue::check_rvalue, types::Type},
};

pub struct EraseCompileTimeExpressions<'a> {
    env: &'a mut Env,
}

impl<'a> EraseCompileTimeExpressions<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }
}

impl Rewriter for EraseCompileTimeExpressions<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_is(&mut self, e: &ast::Is) -> CompileResult<Expression> {
        let expr = self.rewrite_expression(&e.expr)?;
        let test_type = self.rewrite_expression(&e.test_type)?;

        let rewritten = ast::Is {
            span: e.span,
            expr: Box::new(expr),
            test_type: Box::new(test_type),
        };

        match check_rvalue(self.env, &Expression::Is(rewritten.clone()))? {
            Type::CompTimeBool(value) => Ok(Expression::LiteralBool(ast::LiteralBool {
                span: e.span,
                value,
            })),
            _ => Ok(Expression::Is(rewritten)),
        }
    }

    fn rewrite_type_of(&mut self, e: &ast::TypeOf) -> CompileResult<Expression> {
        let expr = self.rewrite_expression(&e.expr)?;
        let ty = check_rvalue(self.env, &expr)?;

        Ok(Expression::PrimitiveType(ast::PrimitiveType {
            span: e.span,
            ty,
        }))
    }

    fn rewrite_size_of(&mut self, e: &ast::SizeOf) -> CompileResult<Expression> {
        let expr = self.rewrite_expression(&e.expr)?;
        let ty = check_rvalue(self.env, &expr)?;
        let size = self.env.layout().size_of(&ty);

        Ok(Expression::LiteralInt(ast::LiteralInt {
            span: e.span,
            value: size as i64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, Statement, Visibility},
        intern::InternedSymbol,
        sema::{layout::SixteenBitLayout, symbols::Symbol, types::UnionTypeInfo},
        source::Span,
    };

    fn run_expression(env: &mut Env, expression: Expression) -> Expression {
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::Expression(expression)],
        ));

        let mut pass = EraseCompileTimeExpressions::new(env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Expression(e) = &block.children[0] else {
            panic!("expected expression statement");
        };
        e.clone()
    }

    #[test]
    fn sizeof_becomes_a_literal() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("x"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let e = Expression::SizeOf(ast::SizeOf {
            span: Span::SYNTHESIZED,
            expr: Box::new(Expression::identifier("x")),
        });

        assert_eq!(run_expression(&mut env, e), Expression::literal_int(2));
    }

    #[test]
    fn static_is_tests_fold_to_booleans() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("x"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let e = Expression::Is(ast::Is {
            span: Span::SYNTHESIZED,
            expr: Box::new(Expression::identifier("x")),
            test_type: Box::new(Expression::primitive_type(Type::U16)),
        });

        assert_eq!(run_expression(&mut env, e), Expression::literal_bool(true));
    }

    #[test]
    fn union_is_tests_stay_dynamic() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("u"),
            Symbol::unbacked(
                Type::Union(Rc::new(UnionTypeInfo {
                    members: vec![Type::U16, Type::Bool],
                })),
                Visibility::Private,
                None,
            ),
        );

        let e = Expression::Is(ast::Is {
            span: Span::SYNTHESIZED,
            expr: Box::new(Expression::identifier("u")),
            test_type: Box::new(Expression::primitive_type(Type::U16)),
        });

        assert!(matches!(run_expression(&mut env, e), Expression::Is(_)));
    }
}
