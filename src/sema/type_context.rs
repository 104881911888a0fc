//! The type-annotation checker: the same dispatch as the rvalue checker but
//! identifiers resolve through the *type* namespace, and the annotation-only
//! expression forms (pointer, const, array, union, function types) are
//! meaningful here.

use std::rc::Rc;

use crate::{
    ast::Expression,
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    sema::{
        rvalue::check_rvalue,
        symbols::Env,
        types::{FunctionTypeInfo, Type, UnionTypeInfo},
    },
};

pub fn check_type_expression(env: &Env, expression: &Expression) -> CompileResult<Type> {
    match expression {
        Expression::Identifier(identifier) => env.resolve_type(identifier.symbol, identifier.span),
        Expression::PrimitiveType(e) => Ok(e.ty.clone()),
        Expression::PointerType(e) => {
            let pointee = check_type_expression(env, &e.child)?;
            Ok(Type::Pointer(Box::new(pointee)))
        }
        Expression::ConstType(e) => {
            let inner = check_type_expression(env, &e.child)?;
            Ok(inner.corresponding_const())
        }
        Expression::ArrayType(e) => {
            let element = Box::new(check_type_expression(env, &e.element)?);

            match &e.count {
                None => Ok(Type::DynamicArray { element }),
                Some(count_expr) => match check_rvalue(env, count_expr)? {
                    Type::CompTimeInt(count) if count >= 0 => Ok(Type::Array {
                        count: count as usize,
                        element,
                    }),
                    _ => Err(CompileError::at(
                        count_expr.span(),
                        CompileErrorKind::InvalidTypeExpression,
                    )),
                },
            }
        }
        Expression::UnionType(e) => {
            let members = e
                .members
                .iter()
                .map(|member| check_type_expression(env, member))
                .collect::<CompileResult<Vec<_>>>()?;

            Ok(Type::Union(Rc::new(UnionTypeInfo { members })))
        }
        Expression::FunctionType(e) => {
            let return_type = check_type_expression(env, &e.return_type)?;
            let arguments = e
                .arguments
                .iter()
                .map(|argument| check_type_expression(env, argument))
                .collect::<CompileResult<Vec<_>>>()?;

            Ok(Type::Function(Rc::new(FunctionTypeInfo {
                name: None,
                return_type,
                arguments,
            })))
        }
        Expression::TypeOf(e) => check_rvalue(env, &e.expr),
        // Generic applications in type position are rewritten away by the
        // monomorphization pass before anything else needs to type them
        Expression::GenericTypeApplication(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::CannotInferTypeArguments(e.identifier.symbol),
        )),
        other => Err(CompileError::at(
            other.span(),
            CompileErrorKind::InvalidTypeExpression,
        )),
    }
}
