//! Scalar IR types.
//!
//! The IR is monomorphic over a small lattice of machine scalar types.
//! Every typed entity (alloca, load, store, constant operand, function
//! return) carries one of these.

/// A scalar IR type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Ptr,
    Void,
}

impl IrType {
    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            IrType::I8 | IrType::U8 => 1,
            IrType::I16 | IrType::U16 => 2,
            IrType::I32 | IrType::U32 | IrType::F32 => 4,
            IrType::I64 | IrType::U64 | IrType::F64 | IrType::Ptr => 8,
            IrType::Void => 0,
        }
    }

    /// Whether this is an unsigned integer type.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, IrType::U8 | IrType::U16 | IrType::U32 | IrType::U64)
    }

    /// Whether this is a signed integer type.
    pub fn is_signed(&self) -> bool {
        matches!(self, IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
    }

    /// Whether this is any integer type (signed or unsigned).
    pub fn is_integer(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    /// Whether this is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    /// The textual keyword for this type (`i32`, `ptr`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            IrType::I8 => "i8",
            IrType::I16 => "i16",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::U8 => "u8",
            IrType::U16 => "u16",
            IrType::U32 => "u32",
            IrType::U64 => "u64",
            IrType::F32 => "f32",
            IrType::F64 => "f64",
            IrType::Ptr => "ptr",
            IrType::Void => "void",
        }
    }

    /// Parse a type keyword. Returns None for unknown names.
    pub fn from_name(name: &str) -> Option<IrType> {
        Some(match name {
            "i8" => IrType::I8,
            "i16" => IrType::I16,
            "i32" => IrType::I32,
            "i64" => IrType::I64,
            "u8" => IrType::U8,
            "u16" => IrType::U16,
            "u32" => IrType::U32,
            "u64" => IrType::U64,
            "f32" => IrType::F32,
            "f64" => IrType::F64,
            "ptr" => IrType::Ptr,
            "void" => IrType::Void,
            _ => return None,
        })
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
