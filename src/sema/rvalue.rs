//! The general expression type checker. Computes the type a given
//! expression evaluates to in value position, enforcing operator typing,
//! convertibility, and member access rules along the way. Compile time
//! constant operands fold here: the result of `2 + 3` *is* the type
//! `integer constant 5`.

use std::rc::Rc;

use itertools::Itertools;

use crate::{
    ast::{self, BinaryOperator, Expression, UnaryOperator},
    diagnostics::{CompileError, CompileErrorKind, CompileResult},
    intern::InternedSymbol,
    sema::{
        convert::{ConversionKind, can_convert, unify_arithmetic},
        lvalue::check_lvalue,
        symbols::Env,
        type_context::check_type_expression,
        types::Type,
    },
    source::Span,
};

pub fn check_rvalue(env: &Env, expression: &Expression) -> CompileResult<Type> {
    match expression {
        Expression::LiteralInt(e) => Ok(Type::CompTimeInt(e.value)),
        Expression::LiteralBool(e) => Ok(Type::CompTimeBool(e.value)),
        Expression::LiteralString(e) => Ok(Type::ConstArray {
            count: e.value.len(),
            element: Box::new(Type::U8),
        }),
        Expression::LiteralArray(e) => check_literal_array(env, e),
        Expression::Identifier(identifier) => {
            Ok(env.resolve(identifier.symbol, identifier.span)?.ty)
        }
        Expression::Unary(e) => check_unary(env, e),
        Expression::Binary(e) => check_binary(env, e),
        Expression::Assignment(e) => check_assignment(env, e, true),
        Expression::InitialAssignment(e) => check_assignment(env, e, false),
        Expression::Call(e) => check_call(env, e),
        Expression::As(e) => check_as(env, e),
        Expression::Bitcast(e) => Ok(e.target_type.clone()),
        Expression::Is(e) => check_is(env, e),
        Expression::Subscript(e) => check_subscript(env, e),
        Expression::Get(e) => check_get(env, e),
        Expression::StructInitializer(e) => check_struct_initializer(env, e),
        Expression::PrimitiveType(e) => Ok(e.ty.clone()),
        Expression::SizeOf(e) => {
            let ty = check_rvalue(env, &e.expr)?;
            Ok(Type::CompTimeInt(env.layout().size_of(&ty) as i64))
        }
        Expression::GenericTypeApplication(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::CannotInferTypeArguments(e.identifier.symbol),
        )),
        Expression::TypeOf(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::InvalidTypeExpression,
        )),
        Expression::PointerType(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::InvalidTypeExpression,
        )),
        Expression::ConstType(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::InvalidTypeExpression,
        )),
        Expression::ArrayType(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::InvalidTypeExpression,
        )),
        Expression::UnionType(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::InvalidTypeExpression,
        )),
        Expression::FunctionType(e) => Err(CompileError::at(
            e.span,
            CompileErrorKind::InvalidTypeExpression,
        )),
    }
}

fn check_literal_array(env: &Env, e: &ast::LiteralArray) -> CompileResult<Type> {
    let annotated = check_type_expression(env, &e.array_type)?;

    let (count, element) = match &annotated {
        Type::Array { count, element } | Type::ConstArray { count, element } => {
            (*count, element.as_ref().clone())
        }
        // A literal with a dynamic annotation takes its count from the
        // element list
        Type::DynamicArray { element } | Type::ConstDynamicArray { element } => {
            (e.elements.len(), element.as_ref().clone())
        }
        other => {
            return Err(CompileError::at(
                e.span,
                CompileErrorKind::CannotConvert {
                    from: "array literal".to_string(),
                    to: other.to_string(),
                },
            ));
        }
    };

    if count != e.elements.len() {
        return Err(CompileError::at(
            e.span,
            CompileErrorKind::CannotConvert {
                from: format!("[{}]{}", e.elements.len(), element),
                to: annotated.to_string(),
            },
        ));
    }

    for element_expr in &e.elements {
        let found = check_rvalue(env, element_expr)?;

        if !can_convert(env, &found, &element, ConversionKind::Implicit) {
            return Err(CompileError::at(
                element_expr.span(),
                CompileErrorKind::CannotConvert {
                    from: found.to_string(),
                    to: element.to_string(),
                },
            ));
        }
    }

    Ok(Type::Array {
        count,
        element: Box::new(element),
    })
}

fn check_unary(env: &Env, e: &ast::Unary) -> CompileResult<Type> {
    if e.operator == UnaryOperator::AddressOf {
        let child = check_lvalue(env, &e.child)?;

        return Ok(if child.is_const() {
            Type::ConstPointer(Box::new(child.corresponding_mutable()))
        } else {
            Type::Pointer(Box::new(child))
        });
    }

    let operand = check_rvalue(env, &e.child)?;

    let invalid = || {
        CompileError::at(
            e.span,
            CompileErrorKind::InvalidUnaryOperand {
                operator: e.operator.to_string(),
                operand: operand.to_string(),
            },
        )
    };

    match e.operator {
        UnaryOperator::Negate => match operand {
            Type::CompTimeInt(value) => Ok(Type::CompTimeInt(-value)),
            ref t if t.is_integer_like() => Ok(t.corresponding_mutable()),
            _ => Err(invalid()),
        },
        UnaryOperator::Tilde => match operand {
            Type::CompTimeInt(value) => Ok(Type::CompTimeInt(!value)),
            ref t if t.is_integer_like() => Ok(t.corresponding_mutable()),
            _ => Err(invalid()),
        },
        UnaryOperator::Bang => match operand {
            Type::CompTimeBool(value) => Ok(Type::CompTimeBool(!value)),
            ref t if t.is_bool_like() => Ok(Type::Bool),
            _ => Err(invalid()),
        },
        UnaryOperator::AddressOf => unreachable!("handled above"),
    }
}

fn check_binary(env: &Env, e: &ast::Binary) -> CompileResult<Type> {
    let left = check_rvalue(env, &e.left)?;
    let right = check_rvalue(env, &e.right)?;

    let mismatch = || {
        CompileError::at(
            e.span,
            CompileErrorKind::BinaryOperandMismatch {
                operator: e.operator.to_string(),
                left: left.to_string(),
                right: right.to_string(),
            },
        )
    };

    if e.operator.is_logical() {
        if !left.is_bool_like() || !right.is_bool_like() {
            return Err(mismatch());
        }

        return Ok(match (&left, &right) {
            (Type::CompTimeBool(a), Type::CompTimeBool(b)) => match e.operator {
                BinaryOperator::LogicalAnd => Type::CompTimeBool(*a && *b),
                BinaryOperator::LogicalOr => Type::CompTimeBool(*a || *b),
                _ => unreachable!(),
            },
            _ => Type::Bool,
        });
    }

    if e.operator.is_comparison() {
        let comparable = (left.is_arithmetic() && unify_arithmetic(&left, &right).is_some())
            || (left.is_bool_like()
                && right.is_bool_like()
                && matches!(e.operator, BinaryOperator::Equals | BinaryOperator::NotEquals))
            || (left.pointee().is_some()
                && right.pointee().is_some()
                && matches!(e.operator, BinaryOperator::Equals | BinaryOperator::NotEquals));

        if !comparable {
            return Err(mismatch());
        }

        return Ok(match (&left, &right) {
            (Type::CompTimeInt(a), Type::CompTimeInt(b)) => {
                Type::CompTimeBool(fold_comparison(e.operator, *a, *b))
            }
            (Type::CompTimeBool(a), Type::CompTimeBool(b)) => match e.operator {
                BinaryOperator::Equals => Type::CompTimeBool(a == b),
                BinaryOperator::NotEquals => Type::CompTimeBool(a != b),
                _ => unreachable!(),
            },
            _ => Type::Bool,
        });
    }

    /* Arithmetic, bitwise, and shift operators */

    if let (Type::CompTimeInt(a), Type::CompTimeInt(b)) = (&left, &right) {
        return Ok(Type::CompTimeInt(fold_arithmetic(env, e, *a, *b)?));
    }

    if !left.is_arithmetic() || !right.is_arithmetic() {
        return Err(mismatch());
    }

    unify_arithmetic(&left, &right).ok_or_else(mismatch)
}

fn fold_comparison(operator: BinaryOperator, a: i64, b: i64) -> bool {
    match operator {
        BinaryOperator::Equals => a == b,
        BinaryOperator::NotEquals => a != b,
        BinaryOperator::LessThan => a < b,
        BinaryOperator::GreaterThan => a > b,
        BinaryOperator::LessThanOrEqual => a <= b,
        BinaryOperator::GreaterThanOrEqual => a >= b,
        _ => unreachable!(),
    }
}

fn fold_arithmetic(_env: &Env, e: &ast::Binary, a: i64, b: i64) -> CompileResult<i64> {
    Ok(match e.operator {
        BinaryOperator::Add => a.wrapping_add(b),
        BinaryOperator::Subtract => a.wrapping_sub(b),
        BinaryOperator::Multiply => a.wrapping_mul(b),
        BinaryOperator::Divide => {
            if b == 0 {
                return Err(CompileError::at(
                    e.span,
                    CompileErrorKind::ComptimeDivisionByZero,
                ));
            }
            a / b
        }
        BinaryOperator::Modulus => {
            if b == 0 {
                return Err(CompileError::at(
                    e.span,
                    CompileErrorKind::ComptimeDivisionByZero,
                ));
            }
            a % b
        }
        BinaryOperator::BitwiseAnd => a & b,
        BinaryOperator::BitwiseOr => a | b,
        BinaryOperator::BitwiseXor => a ^ b,
        BinaryOperator::ShiftLeft => a.wrapping_shl(b as u32),
        BinaryOperator::ShiftRight => a.wrapping_shr(b as u32),
        _ => unreachable!("comparison and logical operators are folded elsewhere"),
    })
}

fn check_assignment(env: &Env, e: &ast::Assignment, enforce_const: bool) -> CompileResult<Type> {
    let target = check_lvalue(env, &e.lexpr)?;

    if enforce_const && target.is_const() {
        return Err(CompileError::at(
            e.lexpr.span(),
            CompileErrorKind::AssignmentToImmutable(target.to_string()),
        ));
    }

    let value = check_rvalue(env, &e.rexpr)?;

    if !can_convert(env, &value, &target, ConversionKind::Implicit) {
        return Err(CompileError::at(
            e.rexpr.span(),
            CompileErrorKind::CannotConvert {
                from: value.to_string(),
                to: target.to_string(),
            },
        ));
    }

    Ok(target.corresponding_mutable())
}

fn check_call(env: &Env, e: &ast::Call) -> CompileResult<Type> {
    let callee = check_rvalue(env, &e.callee)?;

    let info = match &callee {
        Type::Function(info) => info.clone(),
        Type::Pointer(inner) | Type::ConstPointer(inner) => match inner.as_ref() {
            Type::Function(info) => info.clone(),
            _ => {
                return Err(CompileError::at(
                    e.callee.span(),
                    CompileErrorKind::CannotCallValue(callee.to_string()),
                ));
            }
        },
        Type::GenericFunction(info) => {
            return Err(CompileError::at(
                e.span,
                CompileErrorKind::CannotInferTypeArguments(
                    info.declaration.identifier.symbol,
                ),
            ));
        }
        _ => {
            return Err(CompileError::at(
                e.callee.span(),
                CompileErrorKind::CannotCallValue(callee.to_string()),
            ));
        }
    };

    if info.arguments.len() != e.arguments.len() {
        let callee_name = match e.callee.as_ref() {
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

    for (argument, expected) in e.arguments.iter().zip(info.arguments.iter()) {
        let found = check_rvalue(env, argument)?;

        if !can_convert(env, &found, expected, ConversionKind::Implicit) {
            return Err(CompileError::at(
                argument.span(),
                CompileErrorKind::CannotConvert {
                    from: found.to_string(),
                    to: expected.to_string(),
                },
            ));
        }
    }

    Ok(info.return_type.clone())
}

fn check_as(env: &Env, e: &ast::As) -> CompileResult<Type> {
    let target = check_type_expression(env, &e.target_type)?;
    let value = check_rvalue(env, &e.expr)?;

    if !can_convert(env, &value, &target, ConversionKind::Explicit) {
        return Err(CompileError::at(
            e.span,
            CompileErrorKind::CannotConvert {
                from: value.to_string(),
                to: target.to_string(),
            },
        ));
    }

    Ok(target)
}

fn check_is(env: &Env, e: &ast::Is) -> CompileResult<Type> {
    let value = check_rvalue(env, &e.expr)?;
    let test = check_type_expression(env, &e.test_type)?;

    match value.union_info() {
        // Testing a union member is a runtime tag comparison
        Some(info) if info.has_member(&test) => Ok(Type::Bool),
        Some(_) => Ok(Type::CompTimeBool(false)),
        // Everything else is decided statically
        None => Ok(Type::CompTimeBool(
            value.corresponding_mutable() == test.corresponding_mutable(),
        )),
    }
}

fn check_subscript(env: &Env, e: &ast::Subscript) -> CompileResult<Type> {
    let target = check_rvalue(env, &e.subscriptable)?;
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

pub(crate) fn subscript_element_type(target: &Type) -> Option<Type> {
    match target {
        Type::Array { element, .. } | Type::DynamicArray { element } => {
            Some(element.as_ref().clone())
        }
        Type::ConstArray { element, .. } | Type::ConstDynamicArray { element } => {
            Some(element.corresponding_const())
        }
        _ => None,
    }
}

fn check_get(env: &Env, e: &ast::Get) -> CompileResult<Type> {
    let target = check_rvalue(env, &e.expr)?;

    member_type(env, &target, e.member.symbol, e.span)
}

/// Member access rules shared by the rvalue and lvalue checkers
pub(crate) fn member_type(
    _env: &Env,
    target: &Type,
    member: InternedSymbol,
    span: Span,
) -> CompileResult<Type> {
    let pointee_member = InternedSymbol::new("pointee");
    let count_member = InternedSymbol::new("count");

    let unknown = || {
        CompileError::at(
            span,
            CompileErrorKind::UnknownMember {
                ty: target.to_string(),
                member,
            },
        )
    };

    match target {
        Type::Pointer(pointee) => {
            if member == pointee_member {
                Ok(pointee.as_ref().clone())
            } else if let Some(info) = pointee.struct_info() {
                // Member access through a pointer dereferences automatically
                info.field_type(member).cloned().ok_or_else(unknown)
            } else {
                Err(unknown())
            }
        }
        Type::ConstPointer(pointee) => {
            if member == pointee_member {
                Ok(pointee.corresponding_const())
            } else if let Some(info) = pointee.struct_info() {
                info.field_type(member)
                    .map(|ty| ty.corresponding_const())
                    .ok_or_else(unknown)
            } else {
                Err(unknown())
            }
        }
        Type::Struct(info) => info.field_type(member).cloned().ok_or_else(unknown),
        Type::ConstStruct(info) => info
            .field_type(member)
            .map(|ty| ty.corresponding_const())
            .ok_or_else(unknown),
        Type::Array { count, .. } | Type::ConstArray { count, .. } => {
            if member == count_member {
                Ok(Type::CompTimeInt(*count as i64))
            } else {
                Err(unknown())
            }
        }
        Type::DynamicArray { .. } | Type::ConstDynamicArray { .. } => {
            if member == count_member {
                Ok(Type::U16)
            } else {
                Err(unknown())
            }
        }
        _ => Err(unknown()),
    }
}

fn check_struct_initializer(env: &Env, e: &ast::StructInitializer) -> CompileResult<Type> {
    let target = check_type_expression(env, &e.struct_type_expr)?;

    let Some(info) = target.struct_info().cloned() else {
        return Err(CompileError::at(
            e.struct_type_expr.span(),
            CompileErrorKind::CannotConvert {
                from: "struct initializer".to_string(),
                to: target.to_string(),
            },
        ));
    };

    for argument in &e.arguments {
        let Some(expected) = info.field_type(argument.name.symbol) else {
            return Err(CompileError::at(
                argument.name.span,
                CompileErrorKind::UnknownMember {
                    ty: target.to_string(),
                    member: argument.name.symbol,
                },
            ));
        };

        let found = check_rvalue(env, &argument.expression)?;

        if !can_convert(env, &found, expected, ConversionKind::Implicit) {
            return Err(CompileError::at(
                argument.expression.span(),
                CompileErrorKind::CannotConvert {
                    from: found.to_string(),
                    to: expected.to_string(),
                },
            ));
        }
    }

    let missing = info
        .fields
        .iter()
        .filter(|field| {
            !e.arguments
                .iter()
                .any(|argument| argument.name.symbol == field.name)
        })
        .map(|field| field.name.to_string())
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        return Err(CompileError::at(
            e.span,
            CompileErrorKind::MissingStructFields {
                name: info.name,
                fields: missing.iter().join(", "),
            },
        ));
    }

    Ok(Type::Struct(Rc::new(info.as_ref().clone())))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        ast::{Binary, Identifier, LiteralInt, Unary, Visibility},
        sema::{
            layout::SixteenBitLayout,
            symbols::Symbol,
            types::{StructField, StructTypeInfo},
        },
    };

    fn env() -> Env {
        Env::new(Rc::new(SixteenBitLayout))
    }

    fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
        Expression::Binary(Binary {
            span: Span::SYNTHESIZED,
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    #[test]
    fn comptime_arithmetic_folds_in_the_checker() {
        let env = env();
        let e = binary(
            BinaryOperator::Add,
            Expression::literal_int(2),
            Expression::literal_int(3),
        );

        assert_eq!(check_rvalue(&env, &e).unwrap(), Type::CompTimeInt(5));
    }

    #[test]
    fn comptime_division_by_zero_is_an_error() {
        let env = env();
        let e = binary(
            BinaryOperator::Divide,
            Expression::literal_int(1),
            Expression::literal_int(0),
        );

        assert_eq!(
            check_rvalue(&env, &e).unwrap_err().kind,
            CompileErrorKind::ComptimeDivisionByZero
        );
    }

    #[test]
    fn mixed_signedness_operands_are_rejected() {
        let mut env = env();
        env.bind(
            InternedSymbol::new("a"),
            Symbol::unbacked(Type::U16, Visibility::Private, None),
        );
        env.bind(
            InternedSymbol::new("b"),
            Symbol::unbacked(Type::I16, Visibility::Private, None),
        );

        let e = binary(
            BinaryOperator::Add,
            Expression::identifier("a"),
            Expression::identifier("b"),
        );

        assert!(matches!(
            check_rvalue(&env, &e).unwrap_err().kind,
            CompileErrorKind::BinaryOperandMismatch { .. }
        ));
    }

    #[test]
    fn address_of_immutable_produces_const_pointer() {
        let mut env = env();
        env.bind(
            InternedSymbol::new("x"),
            Symbol::unbacked(Type::ConstU16, Visibility::Private, None),
        );

        let e = Expression::Unary(Unary {
            span: Span::SYNTHESIZED,
            operator: UnaryOperator::AddressOf,
            child: Box::new(Expression::identifier("x")),
        });

        assert_eq!(
            check_rvalue(&env, &e).unwrap(),
            Type::ConstPointer(Box::new(Type::U16))
        );
    }

    #[test]
    fn member_access_through_pointer_dereferences() {
        let mut env = env();
        let info = Rc::new(StructTypeInfo {
            name: InternedSymbol::new("Point"),
            fields: vec![StructField {
                name: InternedSymbol::new("x"),
                ty: Type::U16,
            }],
        });
        env.bind(
            InternedSymbol::new("p"),
            Symbol::unbacked(
                Type::Pointer(Box::new(Type::Struct(info))),
                Visibility::Private,
                None,
            ),
        );

        let e = Expression::Get(ast::Get {
            span: Span::SYNTHESIZED,
            expr: Box::new(Expression::identifier("p")),
            member: Identifier::synthesized("x"),
        });

        assert_eq!(check_rvalue(&env, &e).unwrap(), Type::U16);
    }

    #[test]
    fn assignment_to_immutable_is_rejected() {
        let mut env = env();
        env.bind(
            InternedSymbol::new("x"),
            Symbol::unbacked(Type::ConstU16, Visibility::Private, None),
        );

        let e = Expression::Assignment(ast::Assignment {
            span: Span::SYNTHESIZED,
            lexpr: Box::new(Expression::identifier("x")),
            rexpr: Box::new(Expression::LiteralInt(LiteralInt {
                span: Span::SYNTHESIZED,
                value: 1,
            })),
        });

        assert!(matches!(
            check_rvalue(&env, &e).unwrap_err().kind,
            CompileErrorKind::AssignmentToImmutable(_)
        ));
    }
}
