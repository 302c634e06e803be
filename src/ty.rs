//! Type descriptors and the size/alignment algebra the rest of the compiler
//! relies on.

use crate::layout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
  pub name: String,
  pub ty: Type,
  pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  Int,
  Bool,
  Char,
  Ptr(Box<Type>),
  Array { base: Box<Type>, len: i64 },
  Struct(Vec<Member>),
  /// A struct tag referenced while its body is still being parsed.
  Incomplete(String),
  Func(Vec<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
  pub kind: TypeKind,
  pub size: i64,
  pub align: i64,
}

impl Type {
  pub fn int() -> Self {
    Self {
      kind: TypeKind::Int,
      size: 8,
      align: 8,
    }
  }

  pub fn bool() -> Self {
    Self {
      kind: TypeKind::Bool,
      size: 1,
      align: 1,
    }
  }

  pub fn char() -> Self {
    Self {
      kind: TypeKind::Char,
      size: 1,
      align: 1,
    }
  }

  /// Map a scalar type name to its descriptor.
  pub fn literal(name: &str) -> Option<Self> {
    match name {
      "int" => Some(Self::int()),
      "bool" => Some(Self::bool()),
      "char" => Some(Self::char()),
      _ => None,
    }
  }

  pub fn pointer_to(base: Type) -> Self {
    Self {
      kind: TypeKind::Ptr(Box::new(base)),
      size: 8,
      align: 8,
    }
  }

  /// `None` if the length is negative or the total size overflows.
  pub fn array_of(base: Type, len: i64) -> Option<Self> {
    if len < 0 {
      return None;
    }
    Some(Self {
      size: base.size.checked_mul(len)?,
      align: base.align,
      kind: TypeKind::Array {
        base: Box::new(base),
        len,
      },
    })
  }

  /// Lay out `fields` in declaration order and build the struct descriptor.
  /// `None` if the layout overflows.
  pub fn struct_of(fields: Vec<(String, Type)>) -> Option<Self> {
    let (members, size, align) = layout::layout_members(fields)?;
    Some(Self {
      kind: TypeKind::Struct(members),
      size,
      align,
    })
  }

  pub fn incomplete(tag: impl Into<String>) -> Self {
    Self {
      kind: TypeKind::Incomplete(tag.into()),
      size: 0,
      align: 1,
    }
  }

  pub fn func(params: Vec<Type>) -> Self {
    Self {
      kind: TypeKind::Func(params),
      size: 8,
      align: 8,
    }
  }

  pub fn is_integer(&self) -> bool {
    matches!(self.kind, TypeKind::Int | TypeKind::Char)
  }

  pub fn has_base(&self) -> bool {
    self.base().is_some()
  }

  pub fn is_array(&self) -> bool {
    matches!(self.kind, TypeKind::Array { .. })
  }

  pub fn is_struct(&self) -> bool {
    matches!(self.kind, TypeKind::Struct(_))
  }

  pub fn is_incomplete(&self) -> bool {
    matches!(self.kind, TypeKind::Incomplete(_))
  }

  pub fn is_func(&self) -> bool {
    matches!(self.kind, TypeKind::Func(_))
  }

  /// Pointee of a pointer or element of an array.
  pub fn base(&self) -> Option<&Type> {
    match &self.kind {
      TypeKind::Ptr(base) | TypeKind::Array { base, .. } => Some(base),
      _ => None,
    }
  }

  pub fn member(&self, name: &str) -> Option<&Member> {
    match &self.kind {
      TypeKind::Struct(members) => members.iter().find(|m| m.name == name),
      _ => None,
    }
  }

  /// Arrays decay to a pointer to their first element.
  pub fn decay(self) -> Type {
    match self.kind {
      TypeKind::Array { base, .. } => Type::pointer_to(*base),
      _ => self,
    }
  }
}
