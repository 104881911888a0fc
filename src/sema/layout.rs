//! Memory layout strategies. The pipeline is injected with exactly one
//! strategy at construction; every offset and size decision flows through it
//! so the whole compilation agrees on the target's data layout.

use crate::{intern::InternedSymbol, sema::types::{StructTypeInfo, Type}};

pub trait MemoryLayoutStrategy {
    /// Size of a value of this type, in addressable units
    fn size_of(&self, ty: &Type) -> usize;

    /// Size of the caller-saved register area reserved at each call site
    fn save_area_size(&self) -> usize;
}

/// Byte offset of a struct member: the sum of the sizes of the members
/// declared before it. Structs have no padding.
pub fn offset_of(
    strategy: &dyn MemoryLayoutStrategy,
    info: &StructTypeInfo,
    member: InternedSymbol,
) -> Option<usize> {
    let mut offset = 0;

    for field in &info.fields {
        if field.name == member {
            return Some(offset);
        }

        offset += strategy.size_of(&field.ty);
    }

    None
}

/// Layout of the 16-bit byte-addressed target: one byte per 8-bit value, two
/// bytes per 16-bit value and pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SixteenBitLayout;

impl SixteenBitLayout {
    pub const WORD_SIZE: usize = 2;

    /// Return address plus saved frame pointer
    pub const SAVE_AREA_SIZE: usize = 4;
}

impl MemoryLayoutStrategy for SixteenBitLayout {
    fn size_of(&self, ty: &Type) -> usize {
        match ty {
            Type::Void | Type::Label => 0,
            // Compile time constants are erased before storage is assigned
            Type::CompTimeBool(_) | Type::CompTimeInt(_) => 0,
            Type::Bool | Type::ConstBool => 1,
            Type::U8 | Type::ConstU8 | Type::I8 | Type::ConstI8 => 1,
            Type::U16 | Type::ConstU16 | Type::I16 | Type::ConstI16 => 2,
            Type::Pointer(_) | Type::ConstPointer(_) => Self::WORD_SIZE,
            Type::Array { count, element } | Type::ConstArray { count, element } => {
                count * self.size_of(element)
            }
            // Base pointer and count
            Type::DynamicArray { .. } | Type::ConstDynamicArray { .. } => Self::WORD_SIZE * 2,
            Type::Struct(info) | Type::ConstStruct(info) => info
                .fields
                .iter()
                .map(|field| self.size_of(&field.ty))
                .sum(),
            // One byte of tag plus the largest member
            Type::Union(info) => {
                1 + info
                    .members
                    .iter()
                    .map(|member| self.size_of(member))
                    .max()
                    .unwrap_or(0)
            }
            // Object pointer and vtable pointer; the trait erasure pass
            // replaces trait types with their object struct before layout
            // matters, but sizing the trait directly must agree with it.
            Type::Trait(_) => Self::WORD_SIZE * 2,
            Type::Function(_)
            | Type::GenericFunction(_)
            | Type::GenericStruct(_)
            | Type::GenericTrait(_) => 0,
        }
    }

    fn save_area_size(&self) -> usize {
        Self::SAVE_AREA_SIZE
    }
}

/// A layout for contexts that only need syntactic lowering, before the real
/// target is known. Every size is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLayout;

impl MemoryLayoutStrategy for NullLayout {
    fn size_of(&self, _ty: &Type) -> usize {
        0
    }

    fn save_area_size(&self) -> usize {
        0
    }
}
