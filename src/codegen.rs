//! Code generation: lower the typed AST into Intel-syntax x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a single
//! value on the stack and statements pop intermediate results as we chain
//! them. Locals live on the stack frame and are addressed relative to `rbp`.
//! Addresses and values are produced separately: [`Codegen::emit_addr`]
//! computes where an lvalue lives and [`Codegen::load`] / [`Codegen::store`]
//! move data through it.

use log::debug;

use crate::ast::{BinaryOp, Expr, ExprKind, Function, ObjRef, Program, Stmt};
use crate::error::{CompileError, CompileResult};
use crate::ty::{Type, TypeKind};

const ARG_REGS64: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const ARG_REGS8: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];

/// Emit assembly for a whole program.
pub fn generate(program: &Program, source: &str) -> CompileResult<String> {
  let mut codegen = Codegen {
    program,
    source,
    asm: String::new(),
    label_count: 0,
    depth: 0,
  };

  codegen.asm.push_str(".intel_syntax noprefix\n");
  codegen.emit_data();
  codegen.asm.push_str(".text\n");
  for func in &program.functions {
    codegen.emit_function(func)?;
  }

  debug!(
    "emitted {} functions, {} globals, {} bytes of assembly",
    program.functions.len(),
    program.globals.len(),
    codegen.asm.len()
  );
  Ok(codegen.asm)
}

struct Codegen<'a> {
  program: &'a Program,
  source: &'a str,
  asm: String,
  /// Suffix for branch labels; shared by every function so labels never clash.
  label_count: usize,
  /// Values currently pushed by the stack machine.
  depth: usize,
}

impl Codegen<'_> {
  fn emit_data(&mut self) {
    self.asm.push_str(".data\n");
    for global in &self.program.globals {
      self.asm.push_str(&format!("{}:\n", global.name));
      match &global.init {
        Some(bytes) => {
          for byte in bytes {
            self.asm.push_str(&format!("    .byte {byte}\n"));
          }
        }
        None => self.asm.push_str(&format!("    .zero {}\n", global.ty.size)),
      }
    }
  }

  fn emit_function(&mut self, func: &Function) -> CompileResult<()> {
    let name = &func.name;
    self.asm.push_str(&format!(".globl {name}\n"));
    self.asm.push_str(&format!("{name}:\n"));

    // Prologue
    self.asm.push_str("    push rbp\n");
    self.asm.push_str("    mov rbp, rsp\n");
    if func.stack_size > 0 {
      self.asm.push_str(&format!("    sub rsp, {}\n", func.stack_size));
    }

    for (i, &idx) in func.params.iter().enumerate() {
      let param = &func.locals[idx];
      let reg = if param.ty.size == 1 {
        ARG_REGS8[i]
      } else {
        ARG_REGS64[i]
      };
      self
        .asm
        .push_str(&format!("    mov [rbp{:+}], {reg}\n", param.offset));
    }

    self.depth = 0;
    self.emit_stmt(&func.body, func)?;
    debug_assert_eq!(self.depth, 0, "unbalanced stack in {name}");

    // Epilogue
    self.asm.push_str(&format!(".L.return.{name}:\n"));
    self.asm.push_str("    mov rsp, rbp\n");
    self.asm.push_str("    pop rbp\n");
    self.asm.push_str("    ret\n");
    Ok(())
  }

  fn next_label(&mut self) -> usize {
    self.label_count += 1;
    self.label_count
  }

  fn push(&mut self) {
    self.asm.push_str("    push rax\n");
    self.depth += 1;
  }

  fn pop(&mut self, reg: &str) {
    self.asm.push_str(&format!("    pop {reg}\n"));
    self.depth = self.depth.saturating_sub(1);
  }

  /// Evaluate `expr` and throw the value away.
  fn emit_discarded(&mut self, expr: &Expr, func: &Function) -> CompileResult<()> {
    self.emit_expr(expr, func)?;
    self.pop("rax");
    Ok(())
  }

  fn emit_stmt(&mut self, stmt: &Stmt, func: &Function) -> CompileResult<()> {
    match stmt {
      Stmt::Expr(expr) => self.emit_discarded(expr, func),
      Stmt::Return(expr) => {
        self.emit_expr(expr, func)?;
        self.pop("rax");
        self
          .asm
          .push_str(&format!("    jmp .L.return.{}\n", func.name));
        Ok(())
      }
      Stmt::If { cond, then, els } => {
        let c = self.next_label();
        self.emit_expr(cond, func)?;
        self.pop("rax");
        self.asm.push_str("    cmp rax, 0\n");
        self.asm.push_str(&format!("    je .L.else.{c}\n"));
        self.emit_stmt(then, func)?;
        self.asm.push_str(&format!("    jmp .L.end.{c}\n"));
        self.asm.push_str(&format!(".L.else.{c}:\n"));
        if let Some(els) = els {
          self.emit_stmt(els, func)?;
        }
        self.asm.push_str(&format!(".L.end.{c}:\n"));
        Ok(())
      }
      Stmt::Loop {
        init,
        cond,
        step,
        body,
      } => {
        let c = self.next_label();
        if let Some(init) = init {
          self.emit_discarded(init, func)?;
        }
        self.asm.push_str(&format!(".L.begin.{c}:\n"));
        if let Some(cond) = cond {
          self.emit_expr(cond, func)?;
          self.pop("rax");
          self.asm.push_str("    cmp rax, 0\n");
          self.asm.push_str(&format!("    je .L.end.{c}\n"));
        }
        self.emit_stmt(body, func)?;
        if let Some(step) = step {
          self.emit_discarded(step, func)?;
        }
        self.asm.push_str(&format!("    jmp .L.begin.{c}\n"));
        self.asm.push_str(&format!(".L.end.{c}:\n"));
        Ok(())
      }
      Stmt::Block(stmts) => {
        for stmt in stmts {
          self.emit_stmt(stmt, func)?;
        }
        Ok(())
      }
    }
  }

  /// Emit stack-based code for a single expression node.
  fn emit_expr(&mut self, expr: &Expr, func: &Function) -> CompileResult<()> {
    match &expr.kind {
      ExprKind::Num(value) => {
        self.asm.push_str(&format!("    mov rax, {value}\n"));
        self.push();
      }
      ExprKind::Var(_) | ExprKind::Member { .. } => {
        self.emit_addr(expr, func)?;
        self.load(&expr.ty);
      }
      ExprKind::Deref(child) => {
        self.emit_expr(child, func)?;
        self.load(&expr.ty);
      }
      ExprKind::Addr(child) => self.emit_addr(child, func)?,
      ExprKind::Assign { lhs, rhs } => {
        // Arrays are not lvalues even though their address is known.
        if lhs.ty.is_array() {
          return Err(CompileError::not_addressable(self.source, lhs.loc));
        }
        self.emit_addr(lhs, func)?;
        self.emit_expr(rhs, func)?;
        self.store(&lhs.ty);
      }
      ExprKind::Binary { op, lhs, rhs } => {
        self.emit_expr(lhs, func)?;
        self.emit_expr(rhs, func)?;
        self.pop("rdi");
        self.pop("rax");
        self.emit_binary(*op);
        self.push();
      }
      ExprKind::Call { name, args } => {
        for arg in args {
          self.emit_expr(arg, func)?;
        }
        for reg in ARG_REGS64[..args.len()].iter().rev() {
          self.pop(reg);
        }

        // The ABI wants rsp 16-byte aligned at the call.
        let pad = self.depth % 2 == 1;
        if pad {
          self.asm.push_str("    sub rsp, 8\n");
        }
        self.asm.push_str("    mov rax, 0\n");
        self.asm.push_str(&format!("    call {name}\n"));
        if pad {
          self.asm.push_str("    add rsp, 8\n");
        }
        self.push();
      }
    }
    Ok(())
  }

  /// Operands are in `rax` (lhs) and `rdi` (rhs); the result goes to `rax`.
  fn emit_binary(&mut self, op: BinaryOp) {
    match op {
      BinaryOp::Add => self.asm.push_str("    add rax, rdi\n"),
      BinaryOp::Sub => self.asm.push_str("    sub rax, rdi\n"),
      BinaryOp::Mul => self.asm.push_str("    imul rax, rdi\n"),
      BinaryOp::Div => {
        self.asm.push_str("    cqo\n");
        self.asm.push_str("    idiv rdi\n");
      }
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
        let set = match op {
          BinaryOp::Eq => "sete",
          BinaryOp::Ne => "setne",
          BinaryOp::Lt => "setl",
          _ => "setle",
        };
        self.asm.push_str("    cmp rax, rdi\n");
        self.asm.push_str(&format!("    {set} al\n"));
        self.asm.push_str("    movzx rax, al\n");
      }
    }
  }

  /// Push the address of an lvalue.
  fn emit_addr(&mut self, expr: &Expr, func: &Function) -> CompileResult<()> {
    match &expr.kind {
      ExprKind::Var(ObjRef::Local(idx)) => {
        let offset = func.locals[*idx].offset;
        self.asm.push_str(&format!("    lea rax, [rbp{offset:+}]\n"));
        self.push();
      }
      ExprKind::Var(ObjRef::Global(idx)) => {
        let name = &self.program.globals[*idx].name;
        self.asm.push_str(&format!("    lea rax, [rip+{name}]\n"));
        self.push();
      }
      ExprKind::Deref(child) => self.emit_expr(child, func)?,
      ExprKind::Member { base, member } => {
        self.emit_addr(base, func)?;
        self.pop("rax");
        self
          .asm
          .push_str(&format!("    add rax, {}\n", member.offset));
        self.push();
      }
      _ => return Err(CompileError::not_addressable(self.source, expr.loc)),
    }
    Ok(())
  }

  /// Replace the address on top of the stack with the value it points at.
  fn load(&mut self, ty: &Type) {
    // Aggregates are used through their address.
    if ty.is_array() || ty.is_struct() {
      return;
    }

    self.pop("rax");
    match ty.kind {
      TypeKind::Char => self.asm.push_str("    movsx rax, byte ptr [rax]\n"),
      _ if ty.size == 1 => self.asm.push_str("    movzx rax, byte ptr [rax]\n"),
      _ => self.asm.push_str("    mov rax, [rax]\n"),
    }
    self.push();
  }

  /// Pop a value and an address, write the value through the address and
  /// push the value back so assignments can be chained.
  fn store(&mut self, ty: &Type) {
    self.pop("rdi");
    self.pop("rax");

    if ty.is_struct() {
      for i in 0..ty.size {
        self.asm.push_str(&format!("    mov r8b, [rdi+{i}]\n"));
        self.asm.push_str(&format!("    mov [rax+{i}], r8b\n"));
      }
    } else if ty.size == 1 {
      self.asm.push_str("    mov [rax], dil\n");
    } else {
      self.asm.push_str("    mov [rax], rdi\n");
    }

    self.asm.push_str("    push rdi\n");
    self.depth += 1;
  }
}
