//! Structured-control-flow lowering. The last rewriting pass with real
//! semantics: `assert`, `return`, `while`, and `if` all reduce to labels
//! and gotos.
//!
//! ```text
//! while x != 0 {          .L0:
//!     x = x - 1           goto .L1 if not (x != 0)
//! }                       x = x - 1
//!                         goto .L0
//!                         .L1:
//! ```
//!
//! Returns store into a per-function `__returnValue` slot and jump to a
//! synthesized epilogue label at the end of the function body.

use crate::{
    ast::{self, Expression, Identifier, Statement, StorageQualifier, UnaryOperator, Visibility},
    diagnostics::{CompileError, CompileResult},
    intern::InternedSymbol,
    lower::{Rewriter, walk_function_declaration},
    sema::{
        Env,
        symbols::Symbol,
        type_context::check_type_expression,
        types::{FunctionTypeInfo, Type},
    },
    source::Span,
};

use std::rc::Rc;

/// Runtime routine invoked by a failed assertion
pub const PANIC_FUNCTION: &str = "__panic";

struct FunctionLowering {
    epilogue: InternedSymbol,
    return_value: Option<InternedSymbol>,
    return_type: Type,
}

pub struct LowerControlFlow<'a> {
    env: &'a mut Env,
    functions: Vec<FunctionLowering>,
}

impl<'a> LowerControlFlow<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        // The panic routine is provided by the runtime; bind it so
        // assertion lowering type checks
        env.bind_global(
            InternedSymbol::new(PANIC_FUNCTION),
            Symbol::unbacked(
                Type::Function(Rc::new(FunctionTypeInfo {
                    name: Some(InternedSymbol::new(PANIC_FUNCTION)),
                    return_type: Type::Void,
                    arguments: vec![Type::ConstDynamicArray {
                        element: Box::new(Type::U8),
                    }],
                })),
                Visibility::Public,
                None,
            ),
        );

        Self {
            env,
            functions: Vec::new(),
        }
    }
}

impl Rewriter for LowerControlFlow<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_function_declaration(
        &mut self,
        decl: &ast::FunctionDeclaration,
    ) -> CompileResult<Statement> {
        let return_type = check_type_expression(self.env, &decl.function_type.return_type)?;
        let epilogue = self.env.next_label();
        let return_value = if return_type == Type::Void {
            None
        } else {
            Some(self.env.temp_name("returnValue"))
        };

        self.functions.push(FunctionLowering {
            epilogue,
            return_value,
            return_type: return_type.clone(),
        });

        let mut rewritten = walk_function_declaration(self, decl)?;
        let lowering = self.functions.pop().expect("function stack is balanced");

        if let Some(name) = lowering.return_value {
            rewritten.body.children.insert(
                0,
                Statement::VarDeclaration(ast::VarDeclaration {
                    decl_id: ast::DeclId::fresh(),
                    span: Span::SYNTHESIZED,
                    identifier: Identifier::synthesized(name),
                    explicit_type: Some(Box::new(Expression::primitive_type(return_type))),
                    expression: None,
                    storage: StorageQualifier::Automatic,
                    is_mutable: true,
                    visibility: Visibility::Private,
                }),
            );
        }

        rewritten
            .body
            .children
            .push(Statement::LabelDeclaration(ast::LabelDeclaration {
                span: Span::SYNTHESIZED,
                identifier: lowering.epilogue,
            }));

        Ok(Statement::FunctionDeclaration(rewritten))
    }

    fn rewrite_return(&mut self, statement: &ast::Return) -> CompileResult<Statement> {
        let expression = match &statement.expression {
            Some(expression) => Some(self.rewrite_expression(expression)?),
            None => None,
        };

        let Some(lowering) = self.functions.last() else {
            return Err(CompileError::at(
                statement.span,
                crate::diagnostics::CompileErrorKind::ReturnOutsideFunction,
            ));
        };

        let goto = Statement::Goto(ast::Goto {
            span: statement.span,
            target: lowering.epilogue,
        });

        match (expression, lowering.return_value) {
            (Some(expression), Some(slot)) => Ok(Statement::Seq(ast::Seq {
                span: statement.span,
                children: vec![
                    Statement::Expression(Expression::InitialAssignment(ast::Assignment {
                        span: statement.span,
                        lexpr: Box::new(Expression::Identifier(Identifier::new(
                            slot,
                            statement.span,
                        ))),
                        rexpr: Box::new(expression),
                    })),
                    goto,
                ],
            })),
            _ => Ok(goto),
        }
    }

    fn rewrite_while(&mut self, statement: &ast::While) -> CompileResult<Statement> {
        let head = self.env.next_label();
        let exit = self.env.next_label();

        let condition = self.rewrite_expression(&statement.condition)?;
        let body = self.rewrite_statement(&statement.body)?;

        Ok(Statement::Seq(ast::Seq {
            span: statement.span,
            children: vec![
                Statement::LabelDeclaration(ast::LabelDeclaration {
                    span: statement.span,
                    identifier: head,
                }),
                Statement::GotoIfFalse(ast::GotoIfFalse {
                    span: statement.condition.span(),
                    condition,
                    target: exit,
                }),
                body,
                Statement::Goto(ast::Goto {
                    span: statement.span,
                    target: head,
                }),
                Statement::LabelDeclaration(ast::LabelDeclaration {
                    span: statement.span,
                    identifier: exit,
                }),
            ],
        }))
    }

    fn rewrite_if(&mut self, statement: &ast::If) -> CompileResult<Statement> {
        let condition = self.rewrite_expression(&statement.condition)?;
        let then_branch = self.rewrite_statement(&statement.then_branch)?;

        match &statement.else_branch {
            None => {
                let exit = self.env.next_label();

                Ok(Statement::Seq(ast::Seq {
                    span: statement.span,
                    children: vec![
                        Statement::GotoIfFalse(ast::GotoIfFalse {
                            span: statement.condition.span(),
                            condition,
                            target: exit,
                        }),
                        then_branch,
                        Statement::LabelDeclaration(ast::LabelDeclaration {
                            span: statement.span,
                            identifier: exit,
                        }),
                    ],
                }))
            }
            Some(else_branch) => {
                let else_label = self.env.next_label();
                let exit = self.env.next_label();
                let else_branch = self.rewrite_statement(else_branch)?;

                Ok(Statement::Seq(ast::Seq {
                    span: statement.span,
                    children: vec![
                        Statement::GotoIfFalse(ast::GotoIfFalse {
                            span: statement.condition.span(),
                            condition,
                            target: else_label,
                        }),
                        then_branch,
                        Statement::Goto(ast::Goto {
                            span: statement.span,
                            target: exit,
                        }),
                        Statement::LabelDeclaration(ast::LabelDeclaration {
                            span: statement.span,
                            identifier: else_label,
                        }),
                        else_branch,
                        Statement::LabelDeclaration(ast::LabelDeclaration {
                            span: statement.span,
                            identifier: exit,
                        }),
                    ],
                }))
            }
        }
    }

    fn rewrite_assert(&mut self, statement: &ast::Assert) -> CompileResult<Statement> {
        let message = Expression::As(ast::As {
            span: statement.span,
            expr: Box::new(Expression::LiteralString(ast::LiteralString {
                span: statement.span,
                value: statement.message.clone(),
            })),
            target_type: Box::new(Expression::primitive_type(Type::ConstDynamicArray {
                element: Box::new(Type::U8),
            })),
        });

        let failure = Statement::Expression(Expression::Call(ast::Call {
            span: statement.span,
            callee: Box::new(Expression::Identifier(Identifier::new(
                InternedSymbol::new(PANIC_FUNCTION),
                statement.span,
            ))),
            arguments: vec![message],
        }));

        self.rewrite_if(&ast::If {
            span: statement.span,
            condition: Expression::Unary(ast::Unary {
                span: statement.condition.span(),
                operator: UnaryOperator::Bang,
                child: Box::new(statement.condition.clone()),
            }),
            then_branch: Box::new(failure),
            else_branch: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc as StdRc;

    use super::*;
    use crate::{
        ast::{BinaryOperator, Block},
        sema::{layout::SixteenBitLayout, symbols::Symbol},
    };

    /// `while (x != 0) { x = x - 1; }` lowers to
    /// `Label L1; GotoIfFalse(x != 0, L2); x = x - 1; Goto L1; Label L2`
    #[test]
    fn while_lowers_to_the_canonical_label_goto_shape() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("x"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );

        let body = Statement::Expression(Expression::Assignment(ast::Assignment {
            span: Span::SYNTHESIZED,
            lexpr: Box::new(Expression::identifier("x")),
            rexpr: Box::new(Expression::Binary(ast::Binary {
                span: Span::SYNTHESIZED,
                operator: BinaryOperator::Subtract,
                left: Box::new(Expression::identifier("x")),
                right: Box::new(Expression::literal_int(1)),
            })),
        }));

        let condition = Expression::Binary(ast::Binary {
            span: Span::SYNTHESIZED,
            operator: BinaryOperator::NotEquals,
            left: Box::new(Expression::identifier("x")),
            right: Box::new(Expression::literal_int(0)),
        });

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::While(ast::While {
                span: Span::SYNTHESIZED,
                condition: condition.clone(),
                body: Box::new(body.clone()),
            })],
        ));

        let mut pass = LowerControlFlow::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Seq(seq) = &block.children[0] else {
            panic!("expected lowered seq");
        };

        let [head, test, lowered_body, back_edge, exit] = seq.children.as_slice() else {
            panic!("expected five statements, found {}", seq.children.len());
        };

        let Statement::LabelDeclaration(head) = head else {
            panic!("expected head label");
        };
        let Statement::GotoIfFalse(test) = test else {
            panic!("expected conditional exit");
        };
        assert_eq!(test.condition, condition);

        assert_eq!(*lowered_body, body);

        let Statement::Goto(back_edge) = back_edge else {
            panic!("expected back edge");
        };
        assert_eq!(back_edge.target, head.identifier);

        let Statement::LabelDeclaration(exit) = exit else {
            panic!("expected exit label");
        };
        assert_eq!(test.target, exit.identifier);
    }

    #[test]
    fn returns_store_and_jump_to_the_epilogue() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::FunctionDeclaration(ast::FunctionDeclaration {
                decl_id: ast::DeclId::fresh(),
                span: Span::SYNTHESIZED,
                identifier: Identifier::synthesized("f"),
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
                        expression: Some(Expression::literal_int(7)),
                    })],
                ),
                visibility: Visibility::Private,
            })],
        ));

        let mut pass = LowerControlFlow::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::FunctionDeclaration(f) = &block.children[0] else {
            panic!("expected function");
        };

        // Return slot declaration first, epilogue label last
        let Statement::VarDeclaration(slot) = &f.body.children[0] else {
            panic!("expected return slot declaration");
        };
        assert!(slot.identifier.symbol.value().starts_with("__returnValue"));

        assert!(matches!(
            f.body.children.last(),
            Some(Statement::LabelDeclaration(_))
        ));

        // The return became a store and a jump
        let Statement::Seq(return_seq) = &f.body.children[1] else {
            panic!("expected return seq, found {:?}", f.body.children[1]);
        };
        assert!(matches!(
            return_seq.children[0],
            Statement::Expression(Expression::InitialAssignment(_))
        ));
        assert!(matches!(return_seq.children[1], Statement::Goto(_)));
    }

    #[test]
    fn assert_lowers_to_a_guarded_panic_call() {
        let mut env = Env::new(StdRc::new(SixteenBitLayout));
        env.bind(
            InternedSymbol::new("ok"),
            Symbol::unbacked(Type::Bool, Visibility::Private, None),
        );

        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![Statement::Assert(ast::Assert {
                span: Span::SYNTHESIZED,
                condition: Expression::identifier("ok"),
                message: "assertion failed: ok".to_string(),
            })],
        ));

        let mut pass = LowerControlFlow::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Seq(seq) = &block.children[0] else {
            panic!("expected lowered seq");
        };

        assert!(matches!(seq.children[0], Statement::GotoIfFalse(_)));

        let Statement::Expression(Expression::Call(call)) = &seq.children[1] else {
            panic!("expected panic call, found {:?}", seq.children[1]);
        };
        let Expression::Identifier(callee) = call.callee.as_ref() else {
            panic!("expected identifier callee");
        };
        assert_eq!(callee.symbol.value(), PANIC_FUNCTION);
    }
}
