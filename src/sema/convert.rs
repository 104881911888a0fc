//! Convertibility rules. One predicate answers "may a value of type `from`
//! appear where a `to` is expected", parameterized over whether the
//! conversion was written out by the programmer (`as`) or merely implied by
//! context. The implicit-conversion pass uses the same predicate when it
//! rewrites implied conversions into explicit ones.

use crate::sema::{
    symbols::Env,
    types::{IntClass, Type},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    Implicit,
    Explicit,
}

pub fn can_convert(env: &Env, from: &Type, to: &Type, kind: ConversionKind) -> bool {
    if from == to {
        return true;
    }

    match (from, to) {
        /* Booleans convert freely among themselves; conversion is a copy */
        (a, b) if a.is_bool_like() && b.is_bool_like() => true,

        /* Compile time integers convert to any class that can hold the value */
        (Type::CompTimeInt(value), b) if b.int_class().is_some() => {
            b.int_class().unwrap().fits(*value)
        }

        /* Runtime integers: same class is a copy, widening within a
         * signedness is implicit, everything else requires `as` */
        (a, b) if a.int_class().is_some() && b.int_class().is_some() => {
            let from_class = a.int_class().unwrap();
            let to_class = b.int_class().unwrap();

            from_class == to_class
                || (from_class.is_signed() == to_class.is_signed()
                    && from_class.width_in_bits() < to_class.width_in_bits())
                || kind == ConversionKind::Explicit
        }

        /* Pointers may lose mutability, never gain it. Any pointer converts
         * to a pointer-to-void of compatible mutability. */
        (Type::Pointer(a), Type::Pointer(b)) => **b == Type::Void || a == b,
        (Type::Pointer(a), Type::ConstPointer(b)) | (Type::ConstPointer(a), Type::ConstPointer(b)) => {
            **b == Type::Void || a == b
        }

        /* Fixed arrays may lose element mutability or decay to a dynamic
         * array of the same element */
        (
            Type::Array { count: n, element: a } | Type::ConstArray { count: n, element: a },
            Type::ConstArray { count: m, element: b },
        ) => n == m && a == b,
        (Type::Array { count: n, element: a }, Type::Array { count: m, element: b }) => {
            n == m && a == b
        }
        (
            Type::Array { element: a, .. } | Type::ConstArray { element: a, .. },
            Type::DynamicArray { element: b } | Type::ConstDynamicArray { element: b },
        ) => a == b,
        (Type::DynamicArray { element: a }, Type::ConstDynamicArray { element: b }) => a == b,

        /* Struct copies may change mutability in either direction */
        (Type::Struct(a), Type::ConstStruct(b)) | (Type::ConstStruct(a), Type::Struct(b)) => a == b,

        /* A union member converts into the union implicitly (a compile time
         * constant counts if any member can hold it); narrowing back out
         * requires `as` */
        (a, Type::Union(info)) => {
            info.has_member(a)
                || info
                    .members
                    .iter()
                    .any(|member| can_convert(env, a, member, kind))
        }
        (Type::Union(info), b) => kind == ConversionKind::Explicit && info.has_member(b),

        /* A struct converts to a trait object when a conformance has been
         * recorded for the pair. The second arm covers the post-erasure
         * shape, where the trait has become its synthesized object struct. */
        (Type::Struct(s) | Type::ConstStruct(s), Type::Trait(t)) => {
            env.lookup_conformance(s.name, t.name).is_some()
        }
        (Type::Struct(s) | Type::ConstStruct(s), Type::Struct(o) | Type::ConstStruct(o))
            if env.trait_object_info(o.name).is_some() =>
        {
            let trait_info = env.trait_object_info(o.name).unwrap();
            env.lookup_conformance(s.name, trait_info.name).is_some()
        }

        /* A function value fills a function-pointer slot of compatible
         * shape; this is how impl methods land in vtable fields */
        (Type::Function(_), Type::Pointer(inner) | Type::ConstPointer(inner))
            if inner.function_info().is_some() =>
        {
            can_convert(env, from, inner, kind)
        }

        /* Function values are compatible when shapes line up; pointer
         * parameters are interchangeable so that a `*Self` method satisfies
         * a `*void` vtable slot */
        (Type::Function(a), Type::Function(b)) => {
            a.return_type == b.return_type
                && a.arguments.len() == b.arguments.len()
                && a.arguments.iter().zip(b.arguments.iter()).all(|(x, y)| {
                    x == y || (x.pointee().is_some() && y.pointee().is_some())
                })
        }

        _ => false,
    }
}

/// The unified operand class of a binary arithmetic operation, if one
/// exists: equal classes stay put, a compile time constant adopts its peer's
/// class when the value fits, and widening unifies to the wider class of the
/// same signedness.
pub fn unify_arithmetic(left: &Type, right: &Type) -> Option<Type> {
    match (left.int_class(), right.int_class()) {
        (Some(a), Some(b)) => {
            if a == b {
                Some(left.corresponding_mutable())
            } else if a.is_signed() == b.is_signed() {
                let class = if a.width_in_bits() >= b.width_in_bits() {
                    a
                } else {
                    b
                };
                Some(class_type(class))
            } else {
                None
            }
        }
        (None, Some(b)) => match left {
            Type::CompTimeInt(value) if b.fits(*value) => Some(class_type(b)),
            _ => None,
        },
        (Some(a), None) => match right {
            Type::CompTimeInt(value) if a.fits(*value) => Some(class_type(a)),
            _ => None,
        },
        (None, None) => match (left, right) {
            (Type::CompTimeInt(_), Type::CompTimeInt(_)) => Some(Type::U16),
            _ => None,
        },
    }
}

fn class_type(class: IntClass) -> Type {
    match class {
        IntClass::U8 => Type::U8,
        IntClass::U16 => Type::U16,
        IntClass::I8 => Type::I8,
        IntClass::I16 => Type::I16,
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::sema::{layout::SixteenBitLayout, types::UnionTypeInfo};

    fn env() -> Env {
        Env::new(Rc::new(SixteenBitLayout))
    }

    #[test]
    fn widening_is_implicit_narrowing_is_not() {
        let env = env();

        assert!(can_convert(&env, &Type::U8, &Type::U16, ConversionKind::Implicit));
        assert!(!can_convert(&env, &Type::U16, &Type::U8, ConversionKind::Implicit));
        assert!(can_convert(&env, &Type::U16, &Type::U8, ConversionKind::Explicit));
    }

    #[test]
    fn comptime_ints_respect_target_range() {
        let env = env();

        assert!(can_convert(
            &env,
            &Type::CompTimeInt(255),
            &Type::U8,
            ConversionKind::Implicit
        ));
        assert!(!can_convert(
            &env,
            &Type::CompTimeInt(256),
            &Type::U8,
            ConversionKind::Implicit
        ));
    }

    #[test]
    fn union_members_go_in_implicitly_and_out_explicitly() {
        let env = env();
        let union_ty = Type::Union(Rc::new(UnionTypeInfo {
            members: vec![Type::U16, Type::Bool],
        }));

        assert!(can_convert(&env, &Type::U16, &union_ty, ConversionKind::Implicit));
        assert!(!can_convert(&env, &union_ty, &Type::U16, ConversionKind::Implicit));
        assert!(can_convert(&env, &union_ty, &Type::U16, ConversionKind::Explicit));
    }

    #[test]
    fn pointers_never_gain_mutability() {
        let env = env();
        let p = Type::Pointer(Box::new(Type::U16));
        let cp = Type::ConstPointer(Box::new(Type::U16));

        assert!(can_convert(&env, &p, &cp, ConversionKind::Implicit));
        assert!(!can_convert(&env, &cp, &p, ConversionKind::Explicit));
    }
}
