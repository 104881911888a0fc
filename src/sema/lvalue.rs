//! The lvalue checker: a restriction of the expression grammar to those
//! forms that denote an addressable location. For pointer member access of
//! `pointee` the computed type is the pointee itself, which is what makes
//! `p.pointee = x` and `&p.pointee` work.

use crate::{
    ast::Expression,
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    sema::{
        rvalue::{check_rvalue, member_type, subscript_element_type},
        symbols::Env,
    },
    sema::types::Type,
};

pub fn check_lvalue(env: &Env, expression: &Expression) -> CompileResult<Type> {
    match expression {
        Expression::Identifier(identifier) => {
            Ok(env.resolve(identifier.symbol, identifier.span)?.ty)
        }
        Expression::Subscript(e) => {
            let target = check_lvalue(env, &e.subscriptable)?;
            let index = check_rvalue(env, &e.argument)?;

            if !index.is_integer_like() {
                return Err(CompileError::at(
                    e.argument.span(),
                    CompileErrorKind::InvalidSubscriptIndex(index.to_string()),
                ));
            }

            subscript_element_type(&target).ok_or_else(|| {
                CompileError::at(
                    e.subscriptable.span(),
                    CompileErrorKind::NotSubscriptable(target.to_string()),
                )
            })
        }
        Expression::Get(e) => {
            // A dereference writes through the pointer value, so the pointer
            // itself may be computed by any rvalue
            let target = if e.member.symbol == InternedSymbol::new("pointee") {
                check_rvalue(env, &e.expr)?
            } else {
                check_lvalue(env, &e.expr)?
            };

            member_type(env, &target, e.member.symbol, e.span)
        }
        // The checker runs on trees the union erasure pass has rewritten,
        // where a narrowed payload acts as a location
        Expression::Bitcast(e) => Ok(e.target_type.clone()),
        _ => Err(CompileError::at(
            expression.span(),
            CompileErrorKind::NotAnLvalue,
        )),
    }
}
