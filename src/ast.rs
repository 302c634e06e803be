//! Typed syntax tree.
//!
//! Every expression carries its resolved type from the moment it is built;
//! the constructors below apply the typing rules that cannot fail. Rules that
//! can reject their operands (pointer arithmetic, member lookup) live in the
//! parser where a diagnostic can be anchored to the source.

use crate::ty::{Member, Type};

/// A named storage location. Whether it is a local or a global is decided by
/// the table that owns it; see [`ObjRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obj {
  pub name: String,
  pub ty: Type,
  /// Frame-relative offset for locals, negative once laid out.
  pub offset: i64,
  /// Initial contents for globals; `None` means zero-filled.
  pub init: Option<Vec<u8>>,
}

impl Obj {
  pub fn new(name: impl Into<String>, ty: Type) -> Self {
    Self {
      name: name.into(),
      ty,
      offset: 0,
      init: None,
    }
  }
}

/// Index into either the enclosing function's locals or the program globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjRef {
  Local(usize),
  Global(usize),
}

/// Binary operators surviving into the tree. `>` and `>=` are canonicalised
/// into `<` and `<=` with swapped operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
  Num(i64),
  Var(ObjRef),
  Assign {
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Addr(Box<Expr>),
  Deref(Box<Expr>),
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Call {
    name: String,
    args: Vec<Expr>,
  },
  Member {
    base: Box<Expr>,
    member: Member,
  },
}

/// Expression node: kind, resolved type, and the byte offset of the token
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
  pub kind: ExprKind,
  pub ty: Type,
  pub loc: usize,
}

impl Expr {
  pub fn num(value: i64, loc: usize) -> Self {
    Self {
      kind: ExprKind::Num(value),
      ty: Type::int(),
      loc,
    }
  }

  pub fn var(obj: ObjRef, ty: Type, loc: usize) -> Self {
    Self {
      kind: ExprKind::Var(obj),
      ty,
      loc,
    }
  }

  /// `&child`. Taking the address of an array yields a pointer to its element.
  pub fn addr(child: Expr, loc: usize) -> Self {
    let ty = if child.ty.is_array() {
      child.ty.clone().decay()
    } else {
      Type::pointer_to(child.ty.clone())
    };
    Self {
      kind: ExprKind::Addr(Box::new(child)),
      ty,
      loc,
    }
  }

  /// `*child`. Dereferencing something without a base keeps its type, so
  /// integers may be used as untyped addresses.
  pub fn deref(child: Expr, loc: usize) -> Self {
    let ty = child.ty.base().cloned().unwrap_or_else(|| child.ty.clone());
    Self {
      kind: ExprKind::Deref(Box::new(child)),
      ty,
      loc,
    }
  }

  /// Raw arithmetic node with an already decided result type.
  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: Type, loc: usize) -> Self {
    Self {
      kind: ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      ty,
      loc,
    }
  }

  pub fn compare(op: BinaryOp, lhs: Expr, rhs: Expr, loc: usize) -> Self {
    Self::binary(op, lhs, rhs, Type::bool(), loc)
  }

  pub fn assign(lhs: Expr, rhs: Expr, loc: usize) -> Self {
    let ty = lhs.ty.clone();
    Self {
      kind: ExprKind::Assign {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      ty,
      loc,
    }
  }

  /// Calls always produce `int`; arguments are not checked against a signature.
  pub fn call(name: String, args: Vec<Expr>, loc: usize) -> Self {
    Self {
      kind: ExprKind::Call { name, args },
      ty: Type::int(),
      loc,
    }
  }

  pub fn member(base: Expr, member: Member, loc: usize) -> Self {
    let ty = member.ty.clone();
    Self {
      kind: ExprKind::Member {
        base: Box::new(base),
        member,
      },
      ty,
      loc,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  Expr(Expr),
  Return(Expr),
  If {
    cond: Expr,
    then: Box<Stmt>,
    els: Option<Box<Stmt>>,
  },
  /// Both `while` and `for`.
  Loop {
    init: Option<Expr>,
    cond: Option<Expr>,
    step: Option<Expr>,
    body: Box<Stmt>,
  },
  Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  /// Indices into `locals`, in declaration order.
  pub params: Vec<usize>,
  pub locals: Vec<Obj>,
  pub body: Stmt,
  pub stack_size: i64,
}

#[derive(Debug, Clone)]
pub struct Program {
  pub functions: Vec<Function>,
  pub globals: Vec<Obj>,
}
