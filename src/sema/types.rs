//! The Snap type lattice. Const qualification and compile-time-constant-ness
//! are encoded as type variants rather than side flags so that the conversion
//! and operator rules can pattern match on them directly. Equality is
//! structural everywhere; two separately computed struct types with the same
//! name and fields compare equal.

use std::rc::Rc;

use itertools::Itertools;

use crate::{ast, intern::InternedSymbol};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// A boolean whose value is known at compile time
    CompTimeBool(bool),
    Bool,
    ConstBool,
    /// An integer whose value is known at compile time. Carries the value so
    /// that constant folding and const erasure can read it straight off the
    /// type.
    CompTimeInt(i64),
    U8,
    ConstU8,
    U16,
    ConstU16,
    I8,
    ConstI8,
    I16,
    ConstI16,
    Pointer(Box<Type>),
    ConstPointer(Box<Type>),
    /// Fixed-count array
    Array { count: usize, element: Box<Type> },
    ConstArray { count: usize, element: Box<Type> },
    /// A base pointer and count pair
    DynamicArray { element: Box<Type> },
    ConstDynamicArray { element: Box<Type> },
    Struct(Rc<StructTypeInfo>),
    ConstStruct(Rc<StructTypeInfo>),
    Union(Rc<UnionTypeInfo>),
    Trait(Rc<TraitTypeInfo>),
    Function(Rc<FunctionTypeInfo>),
    GenericFunction(Rc<GenericFunctionTypeInfo>),
    GenericStruct(Rc<GenericStructTypeInfo>),
    GenericTrait(Rc<GenericTraitTypeInfo>),
    /// The target of a goto
    Label,
}

/// The integer storage classes of the target, separated from the const
/// qualification which lives on [`Type`] itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntClass {
    U8,
    U16,
    I8,
    I16,
}

impl IntClass {
    pub fn min(self) -> i64 {
        match self {
            IntClass::U8 | IntClass::U16 => 0,
            IntClass::I8 => i8::MIN as i64,
            IntClass::I16 => i16::MIN as i64,
        }
    }

    pub fn max(self) -> i64 {
        match self {
            IntClass::U8 => u8::MAX as i64,
            IntClass::U16 => u16::MAX as i64,
            IntClass::I8 => i8::MAX as i64,
            IntClass::I16 => i16::MAX as i64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntClass::I8 | IntClass::I16)
    }

    pub fn width_in_bits(self) -> usize {
        match self {
            IntClass::U8 | IntClass::I8 => 8,
            IntClass::U16 | IntClass::I16 => 16,
        }
    }

    pub fn fits(self, value: i64) -> bool {
        value >= self.min() && value <= self.max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructTypeInfo {
    pub name: InternedSymbol,
    pub fields: Vec<StructField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: InternedSymbol,
    pub ty: Type,
}

impl StructTypeInfo {
    pub fn field_type(&self, name: InternedSymbol) -> Option<&Type> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| &field.ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionTypeInfo {
    pub members: Vec<Type>,
}

impl UnionTypeInfo {
    /// The runtime tag value of a member is its declaration index. Constness
    /// is ignored when matching because narrowing a `const` union member and
    /// a mutable one store the same tag.
    pub fn tag_of(&self, ty: &Type) -> Option<usize> {
        let needle = ty.corresponding_mutable();
        self.members
            .iter()
            .position(|member| member.corresponding_mutable() == needle)
    }

    pub fn has_member(&self, ty: &Type) -> bool {
        self.tag_of(ty).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitTypeInfo {
    pub name: InternedSymbol,
    /// Method signatures with the self parameter erased to `*void`
    pub methods: Vec<TraitMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitMethod {
    pub name: InternedSymbol,
    pub ty: Rc<FunctionTypeInfo>,
}

impl TraitTypeInfo {
    pub fn method(&self, name: InternedSymbol) -> Option<&TraitMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Name of the synthesized struct holding one function pointer per method
    pub fn vtable_name(&self) -> InternedSymbol {
        InternedSymbol::new(&format!("__{}_vtable", self.name))
    }

    /// Name of the synthesized (object pointer, vtable pointer) pair struct
    pub fn object_name(&self) -> InternedSymbol {
        InternedSymbol::new(&format!("__{}_object", self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionTypeInfo {
    /// Mangled label of the function's entry point, if it has one. Synthetic
    /// function types (annotations, vtable slots) have no label.
    pub name: Option<InternedSymbol>,
    pub return_type: Type,
    pub arguments: Vec<Type>,
}

/// An uninstantiated generic function. The declaration is kept verbatim so
/// the monomorphization pass can clone and substitute it per instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericFunctionTypeInfo {
    pub declaration: ast::FunctionDeclaration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericStructTypeInfo {
    pub declaration: ast::StructDeclaration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericTraitTypeInfo {
    pub declaration: ast::TraitDeclaration,
}

impl Type {
    pub fn is_comptime(&self) -> bool {
        matches!(self, Type::CompTimeBool(_) | Type::CompTimeInt(_))
    }

    pub fn is_bool_like(&self) -> bool {
        matches!(self, Type::CompTimeBool(_) | Type::Bool | Type::ConstBool)
    }

    pub fn is_integer_like(&self) -> bool {
        matches!(self, Type::CompTimeInt(_)) || self.int_class().is_some()
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer_like()
    }

    pub fn int_class(&self) -> Option<IntClass> {
        match self {
            Type::U8 | Type::ConstU8 => Some(IntClass::U8),
            Type::U16 | Type::ConstU16 => Some(IntClass::U16),
            Type::I8 | Type::ConstI8 => Some(IntClass::I8),
            Type::I16 | Type::ConstI16 => Some(IntClass::I16),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Type::CompTimeBool(_)
                | Type::CompTimeInt(_)
                | Type::ConstBool
                | Type::ConstU8
                | Type::ConstU16
                | Type::ConstI8
                | Type::ConstI16
                | Type::ConstPointer(_)
                | Type::ConstArray { .. }
                | Type::ConstDynamicArray { .. }
                | Type::ConstStruct(_)
        )
    }

    /// The immutable counterpart of this type. Identity for types without a
    /// const form.
    pub fn corresponding_const(&self) -> Type {
        match self {
            Type::Bool => Type::ConstBool,
            Type::U8 => Type::ConstU8,
            Type::U16 => Type::ConstU16,
            Type::I8 => Type::ConstI8,
            Type::I16 => Type::ConstI16,
            Type::Pointer(pointee) => Type::ConstPointer(pointee.clone()),
            Type::Array { count, element } => Type::ConstArray {
                count: *count,
                element: element.clone(),
            },
            Type::DynamicArray { element } => Type::ConstDynamicArray {
                element: element.clone(),
            },
            Type::Struct(info) => Type::ConstStruct(info.clone()),
            other => other.clone(),
        }
    }

    /// The mutable counterpart of this type. Compile-time constants map to
    /// the narrowest runtime type that can hold them.
    pub fn corresponding_mutable(&self) -> Type {
        match self {
            Type::CompTimeBool(_) | Type::ConstBool => Type::Bool,
            Type::CompTimeInt(value) => {
                if IntClass::U8.fits(*value) {
                    Type::U8
                } else if IntClass::I8.fits(*value) {
                    Type::I8
                } else if IntClass::U16.fits(*value) {
                    Type::U16
                } else {
                    Type::I16
                }
            }
            Type::ConstU8 => Type::U8,
            Type::ConstU16 => Type::U16,
            Type::ConstI8 => Type::I8,
            Type::ConstI16 => Type::I16,
            Type::ConstPointer(pointee) => Type::Pointer(pointee.clone()),
            Type::ConstArray { count, element } => Type::Array {
                count: *count,
                element: element.clone(),
            },
            Type::ConstDynamicArray { element } => Type::DynamicArray {
                element: element.clone(),
            },
            Type::ConstStruct(info) => Type::Struct(info.clone()),
            other => other.clone(),
        }
    }

    /// Scalars that fit in one machine register and are therefore eligible
    /// for register-resident storage during escape analysis.
    pub fn is_primitive_scalar(&self) -> bool {
        self.is_bool_like()
            || self.is_integer_like()
            || matches!(self, Type::Pointer(_) | Type::ConstPointer(_))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(pointee) | Type::ConstPointer(pointee) => Some(pointee),
            _ => None,
        }
    }

    pub fn array_element(&self) -> Option<&Type> {
        match self {
            Type::Array { element, .. }
            | Type::ConstArray { element, .. }
            | Type::DynamicArray { element }
            | Type::ConstDynamicArray { element } => Some(element),
            _ => None,
        }
    }

    pub fn array_count(&self) -> Option<usize> {
        match self {
            Type::Array { count, .. } | Type::ConstArray { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub fn struct_info(&self) -> Option<&Rc<StructTypeInfo>> {
        match self {
            Type::Struct(info) | Type::ConstStruct(info) => Some(info),
            _ => None,
        }
    }

    pub fn union_info(&self) -> Option<&Rc<UnionTypeInfo>> {
        match self {
            Type::Union(info) => Some(info),
            _ => None,
        }
    }

    pub fn trait_info(&self) -> Option<&Rc<TraitTypeInfo>> {
        match self {
            Type::Trait(info) => Some(info),
            _ => None,
        }
    }

    pub fn function_info(&self) -> Option<&Rc<FunctionTypeInfo>> {
        match self {
            Type::Function(info) => Some(info),
            _ => None,
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::CompTimeBool(value) => write!(f, "boolean constant {value}"),
            Type::Bool => write!(f, "bool"),
            Type::ConstBool => write!(f, "const bool"),
            Type::CompTimeInt(value) => write!(f, "integer constant {value}"),
            Type::U8 => write!(f, "u8"),
            Type::ConstU8 => write!(f, "const u8"),
            Type::U16 => write!(f, "u16"),
            Type::ConstU16 => write!(f, "const u16"),
            Type::I8 => write!(f, "i8"),
            Type::ConstI8 => write!(f, "const i8"),
            Type::I16 => write!(f, "i16"),
            Type::ConstI16 => write!(f, "const i16"),
            Type::Pointer(pointee) => write!(f, "*{pointee}"),
            Type::ConstPointer(pointee) => write!(f, "*const {pointee}"),
            Type::Array { count, element } => write!(f, "[{count}]{element}"),
            Type::ConstArray { count, element } => write!(f, "const [{count}]{element}"),
            Type::DynamicArray { element } => write!(f, "[]{element}"),
            Type::ConstDynamicArray { element } => write!(f, "const []{element}"),
            Type::Struct(info) => write!(f, "{}", info.name),
            Type::ConstStruct(info) => write!(f, "const {}", info.name),
            Type::Union(info) => {
                write!(f, "{}", info.members.iter().map(|m| m.to_string()).join(" | "))
            }
            Type::Trait(info) => write!(f, "{}", info.name),
            Type::Function(info) => write!(
                f,
                "func ({}) -> {}",
                info.arguments.iter().map(|a| a.to_string()).join(", "),
                info.return_type
            ),
            Type::GenericFunction(info) => {
                write!(f, "func {}[..]", info.declaration.identifier.symbol)
            }
            Type::GenericStruct(info) => {
                write!(f, "struct {}[..]", info.declaration.identifier.symbol)
            }
            Type::GenericTrait(info) => {
                write!(f, "trait {}[..]", info.declaration.identifier.symbol)
            }
            Type::Label => write!(f, "label"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comptime_int_narrows_to_smallest_runtime_class() {
        assert_eq!(Type::CompTimeInt(200).corresponding_mutable(), Type::U8);
        assert_eq!(Type::CompTimeInt(-5).corresponding_mutable(), Type::I8);
        assert_eq!(Type::CompTimeInt(40_000).corresponding_mutable(), Type::U16);
        assert_eq!(Type::CompTimeInt(-300).corresponding_mutable(), Type::I16);
    }

    #[test]
    fn union_tags_ignore_constness() {
        let union_info = UnionTypeInfo {
            members: vec![Type::U16, Type::Bool],
        };

        assert_eq!(union_info.tag_of(&Type::ConstU16), Some(0));
        assert_eq!(union_info.tag_of(&Type::Bool), Some(1));
        assert_eq!(union_info.tag_of(&Type::I16), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Type::ConstPointer(Box::new(Type::U8)).to_string(), "*const u8");
        assert_eq!(
            Type::Array {
                count: 5,
                element: Box::new(Type::U16)
            }
            .to_string(),
            "[5]u16"
        );
    }
}
