//! Stack-frame and struct layout.
//!
//! Both use the same rule: advance by the object's size, round up to its own
//! alignment. Frames grow downwards from `rbp`, structs grow upwards from 0.

use crate::ast::Obj;
use crate::ty::{Member, Type};

/// Round `n` up to the nearest multiple of `align`, or `None` on overflow.
pub fn align_to(n: i64, align: i64) -> Option<i64> {
  if align <= 1 {
    return Some(n);
  }
  Some(n.checked_add(align - 1)? / align * align)
}

/// Assign frame offsets to `locals` and return the 16-byte aligned frame size.
///
/// Locals are walked in reverse declaration order so the first-declared
/// variable ends up deepest in the frame. Offsets are negative and relative
/// to the frame base. `None` if the frame does not fit in an `i64`.
pub fn assign_local_offsets(locals: &mut [Obj]) -> Option<i64> {
  let mut offset: i64 = 0;
  for local in locals.iter_mut().rev() {
    offset = align_to(offset.checked_add(local.ty.size)?, local.ty.align)?;
    local.offset = -offset;
  }
  align_to(offset, 16)
}

/// Place struct fields sequentially. Returns the members plus the struct's
/// total size and alignment, or `None` if the layout overflows.
pub fn layout_members(fields: Vec<(String, Type)>) -> Option<(Vec<Member>, i64, i64)> {
  let mut offset: i64 = 0;
  let mut align = 1;
  let mut members = Vec::with_capacity(fields.len());
  for (name, ty) in fields {
    offset = align_to(offset, ty.align)?;
    align = align.max(ty.align);
    let size = ty.size;
    members.push(Member { name, ty, offset });
    offset = offset.checked_add(size)?;
  }
  Some((members, align_to(offset, align)?, align))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn local(name: &str, ty: Type) -> Obj {
    Obj::new(name, ty)
  }

  fn offset_of(obj: &Obj) -> i64 {
    obj.offset
  }

  #[test]
  fn align_to_rounds_up() {
    assert_eq!(align_to(0, 16), Some(0));
    assert_eq!(align_to(1, 16), Some(16));
    assert_eq!(align_to(16, 16), Some(16));
    assert_eq!(align_to(17, 8), Some(24));
    assert_eq!(align_to(5, 1), Some(5));
    assert_eq!(align_to(i64::MAX, 16), None);
  }

  #[test]
  fn frame_offsets_follow_reverse_declaration_order() {
    let mut locals = vec![
      local("a", Type::int()),
      local("c", Type::char()),
      local("b", Type::int()),
    ];
    let size = assign_local_offsets(&mut locals).unwrap();
    assert_eq!(offset_of(&locals[2]), -8);
    assert_eq!(offset_of(&locals[1]), -9);
    assert_eq!(offset_of(&locals[0]), -24);
    assert_eq!(size, 32);
  }

  #[test]
  fn frame_size_is_multiple_of_sixteen_and_offsets_in_range() {
    let mut locals = vec![
      local("x", Type::array_of(Type::char(), 3).unwrap()),
      local("p", Type::pointer_to(Type::int())),
      local("y", Type::char()),
    ];
    let size = assign_local_offsets(&mut locals).unwrap();
    assert_eq!(size % 16, 0);
    for obj in &locals {
      let depth = -offset_of(obj);
      assert!(depth >= 1 && depth <= size, "{} at {depth}", obj.name);
    }
  }

  #[test]
  fn empty_frame() {
    assert_eq!(assign_local_offsets(&mut []), Some(0));
  }

  #[test]
  fn frame_overflow_is_reported() {
    let huge = Type::array_of(Type::char(), i64::MAX - 4).unwrap();
    let mut locals = vec![local("big", huge), local("n", Type::int())];
    assert_eq!(assign_local_offsets(&mut locals), None);
  }

  #[test]
  fn struct_overflow_is_reported() {
    let huge = Type::array_of(Type::char(), i64::MAX - 4).unwrap();
    let fields = vec![("n".to_string(), Type::int()), ("big".to_string(), huge)];
    assert!(layout_members(fields).is_none());
  }

  #[test]
  fn struct_members_are_padded_to_their_alignment() {
    let (members, size, align) = layout_members(vec![
      ("c".to_string(), Type::char()),
      ("n".to_string(), Type::int()),
      ("d".to_string(), Type::char()),
    ])
    .unwrap();
    let offsets: Vec<i64> = members.iter().map(|m| m.offset).collect();
    assert_eq!(offsets, [0, 8, 16]);
    assert_eq!(size, 24);
    assert_eq!(align, 8);
  }

  #[test]
  fn char_only_struct_is_byte_aligned() {
    let (_, size, align) = layout_members(vec![
      ("a".to_string(), Type::char()),
      ("b".to_string(), Type::array_of(Type::char(), 2).unwrap()),
    ])
    .unwrap();
    assert_eq!((size, align), (3, 1));
  }
}
