//! Method-call erasure. After this pass every call is a plain function
//! call:
//!
//!   - `c.area()` where `c: Circle` and an impl registered `area` becomes
//!     `__Circle_area(&c)` (the receiver is passed by pointer),
//!   - `p.area()` where `p: *Circle` passes the pointer through unchanged,
//!   - `s.area()` where `s` is a trait object becomes an indirect call
//!     through the vtable: `s.vtable.area(s.object)`.

use crate::{
    ast::{self, Expression, Identifier, Statement, UnaryOperator},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    lower::Rewriter,
    sema::{Env, rvalue::check_rvalue, types::Type},
};

pub struct EraseMethodCalls<'a> {
    env: &'a mut Env,
}

impl<'a> EraseMethodCalls<'a> {
    pub fn new(env: &'a mut Env) -> Self {
        Self { env }
    }

    /// Rewrites `receiver.method(args)` into a free call, if the receiver's
    /// type has a registered method of that name
    fn try_erase(
        &mut self,
        e: &ast::Call,
        get: &ast::Get,
        arguments: Vec<Expression>,
    ) -> CompileResult<Option<Expression>> {
        let receiver = self.rewrite_expression(&get.expr)?;
        let receiver_ty = match check_rvalue(self.env, &receiver) {
            Ok(ty) => ty,
            // Not typeable as a value (e.g. a module-ish name); leave it for
            // the checker to complain about in context
            Err(_) => return Ok(None),
        };

        /* Trait object dispatch */

        if let Some(info) = receiver_ty.struct_info()
            && let Some(trait_info) = self.env.trait_object_info(info.name).cloned()
        {
            if trait_info.method(get.member.symbol).is_none() {
                return Err(CompileError::at(
                    get.member.span,
                    CompileErrorKind::UnknownMember {
                        ty: receiver_ty.to_string(),
                        member: get.member.symbol,
                    },
                ));
            }

            let object = Expression::Get(ast::Get {
                span: get.span,
                expr: Box::new(receiver.clone()),
                member: Identifier::new(InternedSymbol::new("object"), get.member.span),
            });
            let slot = Expression::Get(ast::Get {
                span: get.span,
                expr: Box::new(Expression::Get(ast::Get {
                    span: get.span,
                    expr: Box::new(receiver),
                    member: Identifier::new(InternedSymbol::new("vtable"), get.member.span),
                })),
                member: get.member.clone(),
            });

            let mut all_arguments = vec![object];
            all_arguments.extend(arguments);

            return Ok(Some(Expression::Call(ast::Call {
                span: e.span,
                callee: Box::new(slot),
                arguments: all_arguments,
            })));
        }

        /* Direct dispatch on a struct or pointer-to-struct receiver */

        let (struct_name, receiver_is_pointer) = match &receiver_ty {
            Type::Struct(info) | Type::ConstStruct(info) => (info.name, false),
            Type::Pointer(pointee) | Type::ConstPointer(pointee) => match pointee.struct_info() {
                Some(info) => (info.name, true),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let Some(mangled) = self.env.lookup_method(struct_name, get.member.symbol) else {
            return Ok(None);
        };

        let self_argument = if receiver_is_pointer {
            receiver
        } else {
            Expression::Unary(ast::Unary {
                span: get.span,
                operator: UnaryOperator::AddressOf,
                child: Box::new(receiver),
            })
        };

        let mut all_arguments = vec![self_argument];
        all_arguments.extend(arguments);

        Ok(Some(Expression::Call(ast::Call {
            span: e.span,
            callee: Box::new(Expression::Identifier(Identifier::new(
                mangled,
                get.member.span,
            ))),
            arguments: all_arguments,
        })))
    }
}

impl Rewriter for EraseMethodCalls<'_> {
    fn env(&mut self) -> &mut Env {
        self.env
    }

    fn rewrite_call(&mut self, e: &ast::Call) -> CompileResult<Expression> {
        let arguments = e
            .arguments
            .iter()
            .map(|argument| self.rewrite_expression(argument))
            .collect::<CompileResult<Vec<_>>>()?;

        if let Expression::Get(get) = e.callee.as_ref()
            && let Some(erased) = self.try_erase(e, get, arguments.clone())?
        {
            return Ok(erased);
        }

        Ok(Expression::Call(ast::Call {
            span: e.span,
            callee: Box::new(self.rewrite_expression(&e.callee)?),
            arguments,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Block, Visibility},
        sema::{
            layout::SixteenBitLayout,
            symbols::Symbol,
            types::{FunctionTypeInfo, StructField, StructTypeInfo},
        },
        source::Span,
    };

    fn circle_env() -> Env {
        let mut env = Env::new(Rc::new(SixteenBitLayout));

        let circle = Rc::new(StructTypeInfo {
            name: InternedSymbol::new("Circle"),
            fields: vec![StructField {
                name: InternedSymbol::new("radius"),
                ty: Type::U16,
            }],
        });

        env.bind_type(InternedSymbol::new("Circle"), Type::Struct(circle.clone()));
        env.bind(
            InternedSymbol::new("c"),
            Symbol::unbacked(Type::Struct(circle.clone()), Visibility::Private, None),
        );
        env.bind(
            InternedSymbol::new("__Circle_area"),
            Symbol::unbacked(
                Type::Function(Rc::new(FunctionTypeInfo {
                    name: Some(InternedSymbol::new("__Circle_area")),
                    return_type: Type::U16,
                    arguments: vec![Type::Pointer(Box::new(Type::Struct(circle)))],
                })),
                Visibility::Private,
                None,
            ),
        );
        env.register_method(
            InternedSymbol::new("Circle"),
            InternedSymbol::new("area"),
            InternedSymbol::new("__Circle_area"),
        );

        env
    }

    fn method_call(receiver: &str, method: &str) -> Statement {
        Statement::Expression(Expression::Call(ast::Call {
            span: Span::SYNTHESIZED,
            callee: Box::new(Expression::Get(ast::Get {
                span: Span::SYNTHESIZED,
                expr: Box::new(Expression::identifier(receiver)),
                member: Identifier::synthesized(method),
            })),
            arguments: vec![],
        }))
    }

    #[test]
    fn struct_receiver_is_passed_by_address() {
        let mut env = circle_env();
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![method_call("c", "area")],
        ));

        let mut pass = EraseMethodCalls::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Expression(Expression::Call(call)) = &block.children[0] else {
            panic!("expected call");
        };

        let Expression::Identifier(callee) = call.callee.as_ref() else {
            panic!("expected mangled free function callee, found {:?}", call.callee);
        };
        assert_eq!(callee.symbol.value(), "__Circle_area");

        assert!(matches!(
            &call.arguments[0],
            Expression::Unary(ast::Unary {
                operator: UnaryOperator::AddressOf,
                ..
            })
        ));
    }

    #[test]
    fn unknown_methods_are_left_for_the_checker() {
        let mut env = circle_env();
        let root = Statement::Block(Block::new(
            Span::SYNTHESIZED,
            vec![method_call("c", "perimeter")],
        ));

        let mut pass = EraseMethodCalls::new(&mut env);
        let result = pass.run(Some(&root)).unwrap().unwrap();

        // No registered method: the call keeps its `Get` callee
        let Statement::Block(block) = result else {
            panic!("expected block");
        };
        let Statement::Expression(Expression::Call(call)) = &block.children[0] else {
            panic!("expected call");
        };
        assert!(matches!(call.callee.as_ref(), Expression::Get(_)));
    }
}
