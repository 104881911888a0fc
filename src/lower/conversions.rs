//! Implicit-conversion exposure. Everywhere the typing rules let a value of
//! one type appear where another is expected (declaration initializers,
//! assignments, call arguments, returns, binary operands, struct
//! initializer fields), the conversion becomes an explicit `as` node, and
//! declarations without an annotation gain one. Struct-to-trait-object
//! conversions materialize here as object/vtable pair construction, which
//! also makes the receiver's address-of syntactically visible before escape
//! analysis runs.

use crate::{
    ast::{self, Expression, Identifier, Statement, UnaryOperator},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::{Rewriter, bind_var_declaration, traits::{trait_object_struct_info, vtable_struct_info}},
    sema::{
        Env,
        convert::{ConversionKind, can_convert, unify_arithmetic},
        lvalue::check_lvalue,
        rvalue::check_rvalue,
        type_context::check_type_expression,
        types::Type,
    },
    source::Span,
};

pub struct ExposeImplicitConversions<'a> {
    env: &'a mut Env,
}

impl<'a> ExposeImplicitConversions<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    /// Rewrites `expr` (of type `from`) so that it evaluates to `to`,
    /// inserting whatever explicit construction the conversion requires
    fn expose(
        &mut self,
        expr: Expression,
        from: &Type,
        to: &Type,
        span: Span,
    ) -> CompileResult<Expression> {
        if from == to {
            return Ok(expr);
        }

        if !can_convert(self.env, from, to, ConversionKind::Implicit) {
            return Err(CompileError::at(
                span,
                CompileErrorKind::CannotConvert {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            ));
        }

        // Struct to trait object: build the (object, vtable) pair
        if let (Some(source), Some(target)) = (from.struct_info(), to.struct_info())
            && let Some(trait_info) = self.env.trait_object_info(target.name).cloned()
        {
            let Some(instance) = self.env.lookup_conformance(source.name, trait_info.name) else {
                return Err(CompileError::at(
                    span,
                    CompileErrorKind::CannotConvert {
                        from: from.to_string(),
                        to: to.to_string(),
                    },
                ));
            };

            let object_info = trait_object_struct_info(&trait_info);
            let vtable_info = vtable_struct_info(&trait_info);

            return Ok(Expression::StructInitializer(ast::StructInitializer {
                span,
                struct_type_expr: Box::new(Expression::primitive_type(Type::Struct(
                    object_info.clone(),
                ))),
                arguments: vec![
                    ast::StructInitializerArgument {
                        name: Identifier::new(InternedSymbol::new("object"), span),
                        expression: Expression::Bitcast(ast::Bitcast {
                            span,
                            expr: Box::new(Expression::Unary(ast::Unary {
                                span,
                                operator: UnaryOperator::AddressOf,
                                child: Box::new(expr),
                            })),
                            target_type: Type::Pointer(Box::new(Type::Void)),
                        }),
                    },
                    ast::StructInitializerArgument {
                        name: Identifier::new(InternedSymbol::new("vtable"), span),
                        expression: Expression::Bitcast(ast::Bitcast {
                            span,
                            expr: Box::new(Expression::Unary(ast::Unary {
                                span,
                                operator: UnaryOperator::AddressOf,
                                child: Box::new(Expression::Identifier(Identifier::new(
                                    instance, span,
                                ))),
                            })),
                            target_type: Type::ConstPointer(Box::new(Type::Struct(vtable_info))),
                        }),
                    },
                ],
            }));
        }

        Ok(Expression::As(ast::As {
            span,
            expr: Box::new(expr),
            target_type: Box::new(Expression::primitive_type(to.clone())),
        }))
    }

    fn check_condition(&mut self, condition: &Expression) -> CompileResult<()> {
        let ty = check_rvalue(self.env, condition)?;

        if !ty.is_bool_like() {
            return Err(CompileError::at(
                condition.span(),
                CompileErrorKind::NonBooleanCondition(ty.to_string()),
            ));
        }

        Ok(())
    }
}

impl Rewriter for ExposeImplicitConversions<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_var_declaration(&mut self, decl: &ast::VarDeclaration) -> CompileResult<Statement> {
        let expression = match &decl.expression {
            Some(expression) => Some(self.rewrite_expression(expression)?),
            None => None,
        };

        // The annotation becomes concrete here, inferred from the
        // initializer when the source omitted it
        let target = match &decl.explicit_type {
            Some(annotation) => {
                let annotation = self.rewrite_expression(annotation)?;
                let ty = check_type_expression(self.env, &annotation)?;
                if decl.is_mutable {
                    ty.corresponding_mutable()
                } else {
                    ty.corresponding_const()
                }
            }
            None => {
                let initializer = expression.as_ref().ok_or_else(|| {
                    CompileError::at(
                        decl.span,
                        CompileErrorKind::CannotInferType(decl.identifier.symbol),
                    )
                })?;
                let ty = check_rvalue(self.env, initializer)?;
                if decl.is_mutable {
                    ty.corresponding_mutable()
                } else {
                    ty.corresponding_mutable().corresponding_const()
                }
            }
        };

        let expression = match expression {
            Some(initializer) => {
                let from = check_rvalue(self.env, &initializer)?;
                // The stored value is a copy, so the conversion targets the
                // mutable form even when the binding is immutable
                Some(Box::new(self.expose(
                    initializer,
                    &from,
                    &target.corresponding_mutable(),
                    decl.span,
                )?))
            }
            None => None,
        };

        let rewritten = ast::VarDeclaration {
            decl_id: decl.decl_id,
            span: decl.span,
            identifier: decl.identifier.clone(),
            explicit_type: Some(Box::new(Expression::primitive_type(target))),
            expression,
            storage: decl.storage,
            is_mutable: decl.is_mutable,
            visibility: decl.visibility,
        };

        bind_var_declaration(self.env, &rewritten)?;

        Ok(Statement::VarDeclaration(rewritten))
    }

    fn rewrite_assignment(&mut self, e: &ast::Assignment) -> CompileResult<Expression> {
        let lexpr = self.rewrite_expression(&e.lexpr)?;
        let rexpr = self.rewrite_expression(&e.rexpr)?;

        let target = check_lvalue(self.env, &lexpr)?;

        if target.is_const() {
            return Err(CompileError::at(
                e.lexpr.span(),
                CompileErrorKind::AssignmentToImmutable(target.to_string()),
            ));
        }

        let from = check_rvalue(self.env, &rexpr)?;
        let rexpr = self.expose(rexpr, &from, &target, e.rexpr.span())?;

        Ok(Expression::Assignment(ast::Assignment {
            span: e.span,
            lexpr: Box::new(lexpr),
            rexpr: Box::new(rexpr),
        }))
    }

    fn rewrite_initial_assignment(&mut self, e: &ast::Assignment) -> CompileResult<Expression> {
        let lexpr = self.rewrite_expression(&e.lexpr)?;
        let rexpr = self.rewrite_expression(&e.rexpr)?;

        let target = check_lvalue(self.env, &lexpr)?;
        let from = check_rvalue(self.env, &rexpr)?;
        let rexpr = self.expose(rexpr, &from, &target.corresponding_mutable(), e.rexpr.span())?;

        Ok(Expression::InitialAssignment(ast::Assignment {
            span: e.span,
            lexpr: Box::new(lexpr),
            rexpr: Box::new(rexpr),
        }))
    }

    fn rewrite_call(&mut self, e: &ast::Call) -> CompileResult<Expression> {
        let callee = self.rewrite_expression(&e.callee)?;
        let callee_ty = check_rvalue(self.env, &callee)?;

        let info = match &callee_ty {
            Type::Function(info) => info.clone(),
            Type::Pointer(inner) | Type::ConstPointer(inner) => match inner.function_info() {
                Some(info) => info.clone(),
                None => {
                    return Err(CompileError::at(
                        e.callee.span(),
                        CompileErrorKind::CannotCallValue(callee_ty.to_string()),
                    ));
                }
            },
            _ => {
                return Err(CompileError::at(
                    e.callee.span(),
                    CompileErrorKind::CannotCallValue(callee_ty.to_string()),
                ));
            }
        };

        if info.arguments.len() != e.arguments.len() {
            let callee_name = match &callee {
                Expression::Identifier(identifier) => identifier.symbol,
                _ => InternedSymbol::new("(anonymous)"),
            };

            return Err(CompileError::at(
                e.span,
                CompileErrorKind::ArgumentCountMismatch {
                    callee: callee_name,
                    expected: info.arguments.len(),
                    found: e.arguments.len(),
                },
            ));
        }

        let arguments = e
            .arguments
            .iter()
            .zip(info.arguments.iter())
            .map(|(argument, expected)| {
                let argument = self.rewrite_expression(argument)?;
                let from = check_rvalue(self.env, &argument)?;
                let span = argument.span();
                self.expose(argument, &from, expected, span)
            })
            .collect::<CompileResult<Vec<_>>>()?;

        Ok(Expression::Call(ast::Call {
            span: e.span,
            callee: Box::new(callee),
            arguments,
        }))
    }

    fn rewrite_return(&mut self, statement: &ast::Return) -> CompileResult<Statement> {
        let Some((_, function)) = self.env.enclosing_function() else {
            return Err(CompileError::at(
                statement.span,
                CompileErrorKind::ReturnOutsideFunction,
            ));
        };

        let expected = function.return_type.clone();

        let expression = match &statement.expression {
            None => {
                if expected != Type::Void {
                    return Err(CompileError::at(
                        statement.span,
                        CompileErrorKind::CannotConvert {
                            from: Type::Void.to_string(),
                            to: expected.to_string(),
                        },
                    ));
                }
                None
            }
            Some(expression) => {
                if expected == Type::Void {
                    return Err(CompileError::at(
                        expression.span(),
                        CompileErrorKind::CannotConvert {
                            from: check_rvalue(self.env, expression)
                                .map(|ty| ty.to_string())
                                .unwrap_or_else(|_| "value".to_string()),
                            to: Type::Void.to_string(),
                        },
                    ));
                }

                let expression = self.rewrite_expression(expression)?;
                let from = check_rvalue(self.env, &expression)?;
                let span = expression.span();
                Some(self.expose(expression, &from, &expected, span)?)
            }
        };

        Ok(Statement::Return(ast::Return {
            span: statement.span,
            expression,
        }))
    }

    fn rewrite_if(&mut self, statement: &ast::If) -> CompileResult<Statement> {
        let rewritten = crate::lower::walk_if(self, statement)?;

        if let Statement::If(s) = &rewritten {
            self.check_condition(&s.condition)?;
        }

        Ok(rewritten)
    }

    fn rewrite_while(&mut self, statement: &ast::While) -> CompileResult<Statement> {
        let rewritten = crate::lower::walk_while(self, statement)?;

        if let Statement::While(s) = &rewritten {
            self.check_condition(&s.condition)?;
        }

        Ok(rewritten)
    }

    fn rewrite_assert(&mut self, statement: &ast::Assert) -> CompileResult<Statement> {
        let condition = self.rewrite_expression(&statement.condition)?;
        self.check_condition(&condition)?;

        Ok(Statement::Assert(ast::Assert {
            span: statement.span,
            condition,
            message: statement.message.clone(),
        }))
    }

    fn rewrite_goto_if_false(&mut self, statement: &ast::GotoIfFalse) -> CompileResult<Statement> {
        let condition = self.rewrite_expression(&statement.condition)?;
        self.check_condition(&condition)?;

        Ok(Statement::GotoIfFalse(ast::GotoIfFalse {
            span: statement.span,
            condition,
            target: statement.target,
        }))
    }

    fn rewrite_binary(&mut self, e: &ast::Binary) -> CompileResult<Expression> {
        let left = self.rewrite_expression(&e.left)?;
        let right = self.rewrite_expression(&e.right)?;

        if e.operator.is_logical() {
            return Ok(Expression::Binary(ast::Binary {
                span: e.span,
                operator: e.operator,
                left: Box::new(left),
                right: Box::new(right),
            }));
        }

        let left_ty = check_rvalue(self.env, &left)?;
        let right_ty = check_rvalue(self.env, &right)?;

        let (left, right) = if left_ty.is_arithmetic() && right_ty.is_arithmetic() {
            match unify_arithmetic(&left_ty, &right_ty) {
                Some(unified) => {
                    let left_span = left.span();
                    let right_span = right.span();
                    (
                        self.expose(left, &left_ty, &unified, left_span)?,
                        self.expose(right, &right_ty, &unified, right_span)?,
                    )
                }
                None => (left, right),
            }
        } else {
            (left, right)
        };

        let rewritten = Expression::Binary(ast::Binary {
            span: e.span,
            operator: e.operator,
            left: Box::new(left),
            right: Box::new(right),
        });

        // Re-typing the result enforces the operator rules now that both
        // sides are explicit
        check_rvalue(self.env, &rewritten)?;

        Ok(rewritten)
    }

    fn rewrite_struct_initializer(
        &mut self,
        e: &ast::StructInitializer,
    ) -> CompileResult<Expression> {
        let struct_type_expr = self.rewrite_expression(&e.struct_type_expr)?;
        let target = check_type_expression(self.env, &struct_type_expr)?;

        let Some(info) = target.struct_info().cloned() else {
            return Err(CompileError::at(
                e.struct_type_expr.span(),
                CompileErrorKind::InvalidTypeExpression,
            ));
        };

        let arguments = e
            .arguments
            .iter()
            .map(|argument| {
                let Some(expected) = info.field_type(argument.name.symbol).cloned() else {
                    return Err(CompileError::at(
                        argument.name.span,
                        CompileErrorKind::UnknownMember {
                            ty: target.to_string(),
                            member: argument.name.symbol,
                        },
                    ));
                };

                let expression = self.rewrite_expression(&argument.expression)?;
                let from = check_rvalue(self.env, &expression)?;
                let span = expression.span();

                Ok(ast::StructInitializerArgument {
                    name: argument.name.clone(),
                    expression: self.expose(expression, &from, &expected, span)?,
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let rewritten = Expression::StructInitializer(ast::StructInitializer {
            span: e.span,
            struct_type_expr: Box::new(struct_type_expr),
            arguments,
        });

        // Enforces field completeness
        check_rvalue(self.env, &rewritten)?;

        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, StorageQualifier, Visibility},
        sema::{layout::SixteenBitLayout, symbols::Symbol},
    };

    fn var(name: &str, annotation: Option<Type>, initializer: Expression) -> Statement {
        Statement::VarDeclaration(ast::VarDeclaration {
            decl_id: ast::DeclId::fresh(),
            span: Span::SYNTHESIZED,
            identifier: Identifier::synthesized(name),
            explicit_type: annotation.map(|ty| Box::new(Expression::primitive_type(ty))),
            expression: Some(Box::new(initializer)),
            storage: StorageQualifier::Automatic,
            is_mutable: true,
            visibility: Visibility::Private,
        })
    }

    #[test]
    fn declarations_gain_annotations_and_conversions() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![var("x", None, Expression::literal_int(300))],
        ));

        let mut pass = ExposeImplicitConversions::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::VarDeclaration(decl) = &block.children[0] else {
            panic!("expected declaration");
        };

        assert_eq!(
            decl.explicit_type.as_deref(),
            Some(&Expression::primitive_type(Type::U16))
        );
        assert!(matches!(decl.expression.as_deref(), Some(Expression::As(_))));
    }

    #[test]
    fn widening_assignment_becomes_explicit() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("narrow"),
            Symbol::unbacked(Type::U8, Visibility::Private, None),
        );
        env.bind(
            InternedSymbol::new("wide"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::Expression(Expression::Assignment(
                ast::Assignment {
                    span: Span::SYNTHESIZED,
                    lexpr: Box::new(Expression::identifier("wide")),
                    rexpr: Box::new(Expression::identifier("narrow")),
                },
            ))],
        ));

        let mut pass = ExposeImplicitConversions::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Expression(Expression::Assignment(assignment)) = &block.children[0] else {
            panic!("expected assignment");
        };
        let Expression::As(conversion) = assignment.rexpr.as_ref() else {
            panic!("expected exposed conversion, found {:?}", assignment.rexpr);
        };
        assert_eq!(
            *conversion.target_type,
            Expression::primitive_type(Type::U16)
        );
    }

    #[test]
    fn narrowing_initializers_are_rejected() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("wide"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![var("x", Some(Type::U8), Expression::identifier("wide"))],
        ));

        let mut pass = ExposeImplicitConversions::new(&mut env);
        let error = pass.run(Some(&root)).unwrap_err();

        assert!(matches!(error.kind, CompileErrorKind::CannotConvert { .. }));
    }

    #[test]
    fn non_boolean_conditions_are_rejected() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("n"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::While(ast::While {
                span: Span::SYNTHESIZED,
                condition: Expression::identifier("n"),
                body: Box::new(Statement::Block(Block::empty())),
            })],
        ));

        let mut pass = ExposeImplicitConversions::new(&mut env);
        let error = pass.run(Some(&root)).unwrap_err();

        assert!(matches!(
            error.kind,
            CompileErrorKind::NonBooleanCondition(_)
        ));
    }

    #[test]
    fn mixed_width_operands_are_unified() {
        let mut env = Env::new(Rc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("a"),
            Symbol::unbacked(Type::U8, Visibility::Private, None),
        );
        env.bind(
            InternedSymbol::new("b"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::Expression(Expression::Binary(ast::Binary {
                span: Span::SYNTHESIZED,
                operator: crate::ast::BinaryOperator::Add,
                left: Box::new(Expression::identifier("a")),
                right: Box::new(Expression::identifier("b")),
            }))],
        ));

        let mut pass = ExposeImplicitConversions::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Expression(Expression::Binary(binary)) = &block.children[0] else {
            panic!("expected binary");
        };

        // The narrow side is widened; the already-u16 side is untouched
        assert!(matches!(binary.left.as_ref(), Expression::As(_)));
        assert!(matches!(binary.right.as_ref(), Expression::Identifier(_)));
    }
}
