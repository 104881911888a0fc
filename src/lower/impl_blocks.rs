//! Impl-block erasure. Method bodies were already rewritten by earlier
//! passes; here the blocks themselves dissolve into top-level functions
//! under their mangled names, which the declaration scan and the method
//! registry have been pointing at all along.

use crate::{
    ast::{self, Identifier, Statement},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    lower::{Rewriter, mangle_method, mangle_trait_method, walk_function_declaration},
    sema::{Env, type_context::check_type_expression},
};

pub struct EraseImplBlocks<'a> {
    env: &'a mut Env,
}

impl<'a> EraseImplBlocks<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    fn hoist(
        &mut self,
        span: crate::source::Span,
        children: &[ast::FunctionDeclaration],
        mangle: impl Fn(&ast::FunctionDeclaration) -> crate::intern::InternedSymbol,
    ) -> CompileResult<Statement> {
        let hoisted = children
            .iter()
            .map(|method| {
                let renamed = ast::FunctionDeclaration {
                    identifier: Identifier::new(mangle(method), method.identifier.span),
                    ..method.clone()
                };

                walk_function_declaration(self, &renamed).map(Statement::FunctionDeclaration)
            })
            .collect::<CompileResult<Vec<_>>>()?;

        Ok(Statement::Seq(ast::Seq {
            span,
            children: hoisted,
        }))
    }
}

impl Rewriter for EraseImplBlocks<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_impl(&mut self, statement: &ast::Impl) -> CompileResult<Statement> {
        let target = check_type_expression(self.env, &statement.struct_type_expr)?;
        let Some(info) = target.struct_info().cloned() else {
            return Err(CompileError::at(
                statement.struct_type_expr.span(),
                CompileErrorKind::InvalidTypeExpression,
            ));
        };

        self.hoist(statement.span, &statement.children, |method| {
            mangle_method(info.name, method.identifier.symbol)
        })
    }

    fn rewrite_impl_for(&mut self, statement: &ast::ImplFor) -> CompileResult<Statement> {
        let trait_ty = check_type_expression(self.env, &statement.trait_type_expr)?;
        let struct_ty = check_type_expression(self.env, &statement.struct_type_expr)?;

        // The traits pass replaced the trait name with its object struct, so
        // recover the trait through the object registry
        let trait_name = match trait_ty.trait_info() {
            Some(info) => info.name,
            None => match trait_ty
                .struct_info()
                .and_then(|info| self.env.trait_object_info(info.name))
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

        let Some(info) = struct_ty.struct_info().cloned() else {
            return Err(CompileError::at(
                statement.struct_type_expr.span(),
                CompileErrorKind::InvalidTypeExpression,
            ));
        };

        self.hoist(statement.span, &statement.children, |method| {
            mangle_trait_method(trait_name, info.name, method.identifier.symbol)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, Expression, FunctionTypeExpression, PointerType, Visibility},
        sema::{layout::SixteenBitLayout, types::Type},
        source::Span,
    };

    #[test]
    fn impl_methods_hoist_to_mangled_functions() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![
                Statement::StructDeclaration(ast::StructDeclaration {
                    span: Span::SYNTHESIZED,
                    identifier: ast::Identifier::synthesized("Counter"),
                    members: vec![ast::StructMemberDeclaration {
                        name: ast::Identifier::synthesized("value"),
                        ty: Expression::primitive_type(Type::U16),
                    }],
                    type_arguments: vec![],
                    visibility: Visibility::Public,
                }),
                Statement::Impl(ast::Impl {
                    span: Span::SYNTHESIZED,
                    type_arguments: vec![],
                    struct_type_expr: Expression::identifier("Counter"),
                    children: vec![ast::FunctionDeclaration {
                        decl_id: ast::DeclId::fresh(),
                        span: Span::SYNTHESIZED,
                        identifier: ast::Identifier::synthesized("get"),
                        function_type: FunctionTypeExpression {
                            span: Span::SYNTHESIZED,
                            return_type: Box::new(Expression::primitive_type(Type::U16)),
                            arguments: vec![Expression::PointerType(PointerType {
                                span: Span::SYNTHESIZED,
                                child: Box::new(Expression::identifier("Counter")),
                            })],
                        },
                        parameter_names: vec![ast::Identifier::synthesized("self")],
                        type_arguments: vec![],
                        body: Block::new(
                            Span::SYNTHESIZED,
                            vec![Statement::Return(ast::Return {
                                span: Span::SYNTHESIZED,
                                expression: Some(Expression::literal_int(0)),
                            })],
                        ),
                        visibility: Visibility::Public,
                    }],
                }),
            ],
        ));

        let mut pass = EraseImplBlocks::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Seq(seq) = &block.children[1] else {
            panic!("expected hoisted seq");
        };
        let Statement::FunctionDeclaration(hoisted) = &seq.children[0] else {
            panic!("expected hoisted function");
        };
        assert_eq!(hoisted.identifier.symbol.value(), "__Counter_get");
    }
}
