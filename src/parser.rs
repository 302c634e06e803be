//! Recursive-descent parser producing a typed AST.
//!
//! The parser mirrors the classic chibicc structure: a precedence-climbing
//! set of helpers for expressions, a thin statement layer above them, and
//! declarations on top. Identifiers are resolved and every expression is
//! typed while the tree is being built, so the result is ready for codegen
//! once the frame layout of each function has been computed.
//!
//! ```text
//! program     = (declspec (";" | function | global-vars))*
//! declspec    = "int" | "char" | "struct" ident? ("{" member* "}")?
//! declarator  = "*"* ident type-suffix
//! type-suffix = "(" params ")" | "[" num "]" type-suffix | ε
//! stmt        = "return" expr ";" | "if" ... | "while" ... | "for" ...
//!             | "{" compound | ";" | expr ";"
//! expr        = assign
//! assign      = equality ("=" assign)?
//! equality    = relational (("==" | "!=") relational)*
//! relational  = add (("<" | "<=" | ">" | ">=") add)*
//! add         = mul (("+" | "-") mul)*
//! mul         = unary (("*" | "/") unary)*
//! unary       = ("+" | "-" | "&" | "*") unary | postfix
//! postfix     = primary ("[" expr "]" | "." ident | "->" ident)*
//! primary     = "(" expr ")" | "sizeof" unary | ident ("(" args)? | str | num
//! ```

use std::collections::HashMap;

use log::debug;

use crate::ast::{BinaryOp, Expr, Function, Obj, ObjRef, Program, Stmt};
use crate::error::{CompileError, CompileResult};
use crate::layout;
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};
use crate::ty::{Type, TypeKind};

/// Registers available for passing arguments.
pub const MAX_ARGS: usize = 6;

/// Parse a whole translation unit.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  Parser::new(tokens, source).program()
}

/// Result of parsing a declarator: the declared name and its full type.
/// Function declarators also keep their parameter declarators.
#[derive(Debug)]
struct Declarator {
  name: String,
  loc: usize,
  ty: Type,
  params: Vec<Declarator>,
}

#[derive(Debug, Default)]
struct Scope {
  vars: HashMap<String, ObjRef>,
  tags: HashMap<String, Type>,
}

/// Parser state threaded through every production.
struct Parser<'a> {
  stream: TokenStream<'a>,
  source: &'a str,
  /// Innermost scope last. The first entry is the file scope, which only
  /// ever holds struct tags; global variables live in `globals`.
  scopes: Vec<Scope>,
  locals: Vec<Obj>,
  globals: Vec<Obj>,
  string_count: usize,
}

impl<'a> Parser<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      stream: TokenStream::new(tokens, source),
      source,
      scopes: vec![Scope::default()],
      locals: Vec::new(),
      globals: Vec::new(),
      string_count: 0,
    }
  }

  fn program(mut self) -> CompileResult<Program> {
    let mut functions = Vec::new();

    while !self.stream.is_eof() {
      let base = self.declspec()?;
      if self.stream.equal(";") {
        continue;
      }

      let decl = self.declarator(base.clone())?;
      if decl.ty.is_func() {
        // A prototype only announces the function; calls are not checked.
        if self.stream.equal(";") {
          continue;
        }
        functions.push(self.function(decl)?);
        continue;
      }

      self.global_variables(base, decl)?;
    }

    Ok(Program {
      functions,
      globals: self.globals,
    })
  }

  fn function(&mut self, decl: Declarator) -> CompileResult<Function> {
    self.locals.clear();
    self.enter_scope();

    let mut params = Vec::with_capacity(decl.params.len());
    for param in decl.params {
      params.push(self.new_local(param.name, param.ty));
    }

    self.stream.skip("{")?;
    let body = self.compound_stmt()?;
    self.leave_scope();

    let mut locals = std::mem::take(&mut self.locals);
    let stack_size = layout::assign_local_offsets(&mut locals).ok_or_else(|| {
      CompileError::type_error(self.source, decl.loc, "stack frame too large")
    })?;
    debug!(
      "parsed function {} ({} locals, frame {} bytes)",
      decl.name,
      locals.len(),
      stack_size
    );

    Ok(Function {
      name: decl.name,
      params,
      locals,
      body,
      stack_size,
    })
  }

  fn global_variables(&mut self, base: Type, first: Declarator) -> CompileResult<()> {
    let mut decl = first;
    loop {
      if !decl.ty.is_func() {
        self.new_global(decl.name, decl.ty, None);
      }
      if self.stream.equal(";") {
        return Ok(());
      }
      self.stream.skip(",")?;
      decl = self.declarator(base.clone())?;
    }
  }

  // ---- declarations ----

  fn declspec(&mut self) -> CompileResult<Type> {
    let loc = self.stream.loc();
    if self.stream.equal("struct") {
      return self.struct_decl();
    }

    if let Some(token) = self.stream.peek()
      && token.kind == TokenKind::TypeName
    {
      let name = token_text(token, self.source);
      if let Some(ty) = Type::literal(name) {
        self.stream.advance();
        return Ok(ty);
      }
    }

    let got = describe_token(self.stream.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      loc,
      format!("expected a type, but got \"{got}\""),
    ))
  }

  /// `struct` has already been consumed.
  fn struct_decl(&mut self) -> CompileResult<Type> {
    let tag = if self.stream.peek_kind() == Some(TokenKind::Ident) {
      Some(self.stream.get_ident()?)
    } else {
      None
    };

    if let Some((name, loc)) = &tag
      && !self.stream.at("{")
    {
      return self
        .find_tag(name)
        .cloned()
        .ok_or_else(|| CompileError::undefined(self.source, *loc, "struct tag", name.clone()));
    }

    let loc = self.stream.loc();
    self.stream.skip("{")?;

    // Members may point back at the struct being defined.
    if let Some((name, _)) = &tag
      && let Some(scope) = self.scopes.last_mut()
    {
      scope.tags.insert(name.clone(), Type::incomplete(name.clone()));
    }

    let mut fields = Vec::new();
    while !self.stream.equal("}") {
      let base = self.declspec()?;
      loop {
        let member = self.declarator(base.clone())?;
        let mut elem = &member.ty;
        while let TypeKind::Array { base: inner, .. } = &elem.kind {
          elem = inner;
        }
        if elem.is_incomplete() {
          return Err(CompileError::type_error(
            self.source,
            member.loc,
            "member has incomplete type",
          ));
        }
        fields.push((member.name, member.ty));
        if self.stream.equal(";") {
          break;
        }
        self.stream.skip(",")?;
      }
    }

    let ty = Type::struct_of(fields)
      .ok_or_else(|| CompileError::type_error(self.source, loc, "struct too large"))?;
    if let Some((name, _)) = tag
      && let Some(scope) = self.scopes.last_mut()
    {
      scope.tags.insert(name, ty.clone());
    }
    Ok(ty)
  }

  fn declarator(&mut self, mut ty: Type) -> CompileResult<Declarator> {
    while self.stream.equal("*") {
      ty = Type::pointer_to(ty);
    }
    let (name, loc) = self.stream.get_ident()?;
    let (ty, params) = self.type_suffix(ty)?;
    Ok(Declarator {
      name,
      loc,
      ty,
      params,
    })
  }

  fn type_suffix(&mut self, ty: Type) -> CompileResult<(Type, Vec<Declarator>)> {
    if self.stream.equal("(") {
      let params = self.params()?;
      let param_types = params.iter().map(|p| p.ty.clone()).collect();
      return Ok((Type::func(param_types), params));
    }

    if self.stream.equal("[") {
      let (len, loc) = self.stream.get_number()?;
      self.stream.skip("]")?;
      let (elem, _) = self.type_suffix(ty)?;
      let array = Type::array_of(elem, len)
        .ok_or_else(|| CompileError::type_error(self.source, loc, "array too large"))?;
      return Ok((array, Vec::new()));
    }

    Ok((ty, Vec::new()))
  }

  /// `(` has already been consumed.
  fn params(&mut self) -> CompileResult<Vec<Declarator>> {
    let mut params = Vec::new();
    if self.stream.equal(")") {
      return Ok(params);
    }

    loop {
      let base = self.declspec()?;
      let mut param = self.declarator(base)?;
      param.ty = param.ty.decay();
      if params.len() == MAX_ARGS {
        return Err(CompileError::type_error(
          self.source,
          param.loc,
          format!("too many parameters (at most {MAX_ARGS})"),
        ));
      }
      params.push(param);
      if self.stream.equal(")") {
        return Ok(params);
      }
      self.stream.skip(",")?;
    }
  }

  /// Local declaration inside a block. Initialisers become assignments.
  fn declaration(&mut self, body: &mut Vec<Stmt>) -> CompileResult<()> {
    let base = self.declspec()?;
    if self.stream.equal(";") {
      return Ok(());
    }

    loop {
      let decl = self.declarator(base.clone())?;
      if decl.ty.is_func() {
        return Err(CompileError::syntax(
          self.source,
          decl.loc,
          "function declarations are only allowed at file scope",
        ));
      }
      let idx = self.new_local(decl.name, decl.ty.clone());

      let loc = self.stream.loc();
      if self.stream.equal("=") {
        let lhs = Expr::var(ObjRef::Local(idx), decl.ty, decl.loc);
        let rhs = self.assign()?;
        body.push(Stmt::Expr(Expr::assign(lhs, rhs, loc)));
      }

      if self.stream.equal(";") {
        return Ok(());
      }
      self.stream.skip(",")?;
    }
  }

  // ---- statements ----

  fn stmt(&mut self) -> CompileResult<Stmt> {
    if self.stream.equal("return") {
      let expr = self.expr()?;
      self.stream.skip(";")?;
      return Ok(Stmt::Return(expr));
    }

    if self.stream.equal("if") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let then = Box::new(self.stmt()?);
      let els = if self.stream.equal("else") {
        Some(Box::new(self.stmt()?))
      } else {
        None
      };
      return Ok(Stmt::If { cond, then, els });
    }

    if self.stream.equal("while") {
      self.stream.skip("(")?;
      let cond = self.expr()?;
      self.stream.skip(")")?;
      let body = Box::new(self.stmt()?);
      return Ok(Stmt::Loop {
        init: None,
        cond: Some(cond),
        step: None,
        body,
      });
    }

    if self.stream.equal("for") {
      self.stream.skip("(")?;
      let init = self.optional_expr(";")?;
      let cond = self.optional_expr(";")?;
      let step = self.optional_expr(")")?;
      let body = Box::new(self.stmt()?);
      return Ok(Stmt::Loop {
        init,
        cond,
        step,
        body,
      });
    }

    if self.stream.equal("{") {
      return self.compound_stmt();
    }

    if self.stream.equal(";") {
      return Ok(Stmt::Block(Vec::new()));
    }

    let expr = self.expr()?;
    self.stream.skip(";")?;
    Ok(Stmt::Expr(expr))
  }

  /// Parse `expr? <terminator>`, used by the three clauses of `for`.
  fn optional_expr(&mut self, terminator: &str) -> CompileResult<Option<Expr>> {
    if self.stream.equal(terminator) {
      return Ok(None);
    }
    let expr = self.expr()?;
    self.stream.skip(terminator)?;
    Ok(Some(expr))
  }

  /// `{` has already been consumed.
  fn compound_stmt(&mut self) -> CompileResult<Stmt> {
    let mut body = Vec::new();
    self.enter_scope();

    while !self.stream.equal("}") {
      if self.stream.peek_kind() == Some(TokenKind::TypeName) {
        self.declaration(&mut body)?;
      } else {
        body.push(self.stmt()?);
      }
    }

    self.leave_scope();
    Ok(Stmt::Block(body))
  }

  // ---- expressions ----

  fn expr(&mut self) -> CompileResult<Expr> {
    self.assign()
  }

  fn assign(&mut self) -> CompileResult<Expr> {
    let node = self.equality()?;

    let loc = self.stream.loc();
    if self.stream.equal("=") {
      let rhs = self.assign()?;
      return Ok(Expr::assign(node, rhs, loc));
    }

    Ok(node)
  }

  fn equality(&mut self) -> CompileResult<Expr> {
    let mut node = self.relational()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.peek_punct() {
        Some("==") => BinaryOp::Eq,
        Some("!=") => BinaryOp::Ne,
        _ => break,
      };

      self.stream.advance();
      let rhs = self.relational()?;
      node = Expr::compare(op, node, rhs, loc);
    }

    Ok(node)
  }

  fn relational(&mut self) -> CompileResult<Expr> {
    let mut node = self.add()?;

    loop {
      let loc = self.stream.loc();
      let symbol = match self.stream.peek_punct() {
        Some(symbol @ ("<" | "<=" | ">" | ">=")) => symbol,
        _ => break,
      };

      self.stream.advance();
      let rhs = self.add()?;
      node = match symbol {
        "<" => Expr::compare(BinaryOp::Lt, node, rhs, loc),
        "<=" => Expr::compare(BinaryOp::Le, node, rhs, loc),
        ">" => Expr::compare(BinaryOp::Lt, rhs, node, loc),
        _ => Expr::compare(BinaryOp::Le, rhs, node, loc),
      };
    }

    Ok(node)
  }

  fn add(&mut self) -> CompileResult<Expr> {
    let mut node = self.mul()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.peek_punct() {
        Some("+") => BinaryOp::Add,
        Some("-") => BinaryOp::Sub,
        _ => break,
      };

      self.stream.advance();
      let rhs = self.mul()?;
      node = match op {
        BinaryOp::Add => self.new_add(node, rhs, loc)?,
        _ => self.new_sub(node, rhs, loc)?,
      };
    }

    Ok(node)
  }

  fn mul(&mut self) -> CompileResult<Expr> {
    let mut node = self.unary()?;

    loop {
      let loc = self.stream.loc();
      let op = match self.stream.peek_punct() {
        Some("*") => BinaryOp::Mul,
        Some("/") => BinaryOp::Div,
        _ => break,
      };

      self.stream.advance();
      let rhs = self.unary()?;
      node = self.new_arith(op, node, rhs, loc)?;
    }

    Ok(node)
  }

  fn unary(&mut self) -> CompileResult<Expr> {
    let loc = self.stream.loc();

    if self.stream.equal("+") {
      return self.unary();
    }

    if self.stream.equal("-") {
      let operand = self.unary()?;
      return self.new_sub(Expr::num(0, loc), operand, loc);
    }

    if self.stream.equal("&") {
      let operand = self.unary()?;
      return Ok(Expr::addr(operand, loc));
    }

    if self.stream.equal("*") {
      let operand = self.unary()?;
      return Ok(self.deref(operand, loc));
    }

    self.postfix()
  }

  fn postfix(&mut self) -> CompileResult<Expr> {
    let mut node = self.primary()?;

    loop {
      let loc = self.stream.loc();

      if self.stream.equal("[") {
        let index = self.expr()?;
        self.stream.skip("]")?;
        node = self.deref(self.new_add(node, index, loc)?, loc);
        continue;
      }

      if self.stream.equal(".") {
        node = self.struct_ref(node, loc)?;
        continue;
      }

      if self.stream.equal("->") {
        node = self.struct_ref(self.deref(node, loc), loc)?;
        continue;
      }

      return Ok(node);
    }
  }

  fn primary(&mut self) -> CompileResult<Expr> {
    let loc = self.stream.loc();

    if self.stream.equal("(") {
      let node = self.expr()?;
      self.stream.skip(")")?;
      return Ok(node);
    }

    if self.stream.equal("sizeof") {
      let operand = self.unary()?;
      return Ok(Expr::num(self.complete(operand.ty).size, loc));
    }

    match self.stream.peek_kind() {
      Some(TokenKind::Ident) => {
        let (name, loc) = self.stream.get_ident()?;
        if self.stream.equal("(") {
          return self.funcall(name, loc);
        }
        let obj = self
          .find_var(&name)
          .ok_or_else(|| CompileError::undefined(self.source, loc, "variable", name))?;
        Ok(Expr::var(obj, self.obj(obj).ty.clone(), loc))
      }
      Some(TokenKind::Str) => {
        let bytes = self.stream.get_string()?;
        self.string_literal(bytes, loc)
      }
      Some(TokenKind::Num) => {
        let (value, loc) = self.stream.get_number()?;
        Ok(Expr::num(value, loc))
      }
      _ => {
        let got = describe_token(self.stream.peek(), self.source);
        Err(CompileError::syntax(
          self.source,
          loc,
          format!("expected an expression, but got \"{got}\""),
        ))
      }
    }
  }

  /// `(` has already been consumed.
  fn funcall(&mut self, name: String, loc: usize) -> CompileResult<Expr> {
    let mut args = Vec::new();
    if !self.stream.equal(")") {
      loop {
        let arg_loc = self.stream.loc();
        if args.len() == MAX_ARGS {
          return Err(CompileError::type_error(
            self.source,
            arg_loc,
            format!("too many arguments (at most {MAX_ARGS})"),
          ));
        }
        args.push(self.assign()?);
        if self.stream.equal(")") {
          break;
        }
        self.stream.skip(",")?;
      }
    }
    Ok(Expr::call(name, args, loc))
  }

  /// `.` or `->` has already been consumed; `base` is the struct value.
  fn struct_ref(&mut self, base: Expr, loc: usize) -> CompileResult<Expr> {
    let (name, name_loc) = self.stream.get_ident()?;
    if !base.ty.is_struct() {
      return Err(CompileError::type_error(self.source, loc, "not a struct"));
    }
    let member = base
      .ty
      .member(&name)
      .cloned()
      .ok_or_else(|| CompileError::undefined(self.source, name_loc, "member", name))?;
    Ok(Expr::member(base, member, loc))
  }

  fn string_literal(&mut self, bytes: Vec<u8>, loc: usize) -> CompileResult<Expr> {
    let ty = i64::try_from(bytes.len())
      .ok()
      .and_then(|len| Type::array_of(Type::char(), len))
      .ok_or_else(|| CompileError::type_error(self.source, loc, "string literal too long"))?;
    let name = format!(".L..{}", self.string_count);
    self.string_count += 1;
    let idx = self.new_global(name, ty.clone(), Some(bytes));
    Ok(Expr::var(ObjRef::Global(idx), ty, loc))
  }

  /// `*child`, with a pointee struct resolved if it was incomplete when the
  /// pointer type was formed.
  fn deref(&self, child: Expr, loc: usize) -> Expr {
    let mut node = Expr::deref(child, loc);
    node.ty = self.complete(node.ty.clone());
    node
  }

  /// Swap an incomplete struct for its definition once the tag is complete.
  fn complete(&self, ty: Type) -> Type {
    let found = match &ty.kind {
      TypeKind::Incomplete(tag) => self
        .find_tag(tag)
        .filter(|def| !def.is_incomplete())
        .cloned(),
      _ => None,
    };
    found.unwrap_or(ty)
  }

  // ---- typing rules that can reject their operands ----

  fn invalid_operands(&self, loc: usize) -> CompileError {
    CompileError::type_error(self.source, loc, "invalid operands")
  }

  fn elem_size(&self, ptr: &Type) -> i64 {
    ptr
      .base()
      .map_or(1, |base| self.complete(base.clone()).size)
  }

  /// Multiply `index` by the size of the element `ptr` points at.
  fn scale(&self, index: Expr, ptr: &Type, loc: usize) -> Expr {
    let elem_size = self.elem_size(ptr);
    Expr::binary(BinaryOp::Mul, index, Expr::num(elem_size, loc), Type::int(), loc)
  }

  fn new_add(&self, lhs: Expr, rhs: Expr, loc: usize) -> CompileResult<Expr> {
    if lhs.ty.is_integer() && rhs.ty.is_integer() {
      let ty = lhs.ty.clone();
      return Ok(Expr::binary(BinaryOp::Add, lhs, rhs, ty, loc));
    }

    // Canonicalise `num + ptr` to `ptr + num`.
    let (lhs, rhs) = if lhs.ty.is_integer() && rhs.ty.has_base() {
      (rhs, lhs)
    } else {
      (lhs, rhs)
    };

    if lhs.ty.has_base() && rhs.ty.is_integer() {
      let rhs = self.scale(rhs, &lhs.ty, loc);
      let ty = lhs.ty.clone().decay();
      return Ok(Expr::binary(BinaryOp::Add, lhs, rhs, ty, loc));
    }

    Err(self.invalid_operands(loc))
  }

  fn new_sub(&self, lhs: Expr, rhs: Expr, loc: usize) -> CompileResult<Expr> {
    if lhs.ty.is_integer() && rhs.ty.is_integer() {
      let ty = lhs.ty.clone();
      return Ok(Expr::binary(BinaryOp::Sub, lhs, rhs, ty, loc));
    }

    if lhs.ty.has_base() && rhs.ty.is_integer() {
      let rhs = self.scale(rhs, &lhs.ty, loc);
      let ty = lhs.ty.clone().decay();
      return Ok(Expr::binary(BinaryOp::Sub, lhs, rhs, ty, loc));
    }

    // `ptr - ptr` counts the elements between the two.
    if lhs.ty.has_base() && rhs.ty.has_base() {
      let elem_size = self.elem_size(&lhs.ty);
      let bytes = Expr::binary(BinaryOp::Sub, lhs, rhs, Type::int(), loc);
      return Ok(Expr::binary(
        BinaryOp::Div,
        bytes,
        Expr::num(elem_size, loc),
        Type::int(),
        loc,
      ));
    }

    Err(self.invalid_operands(loc))
  }

  fn new_arith(&self, op: BinaryOp, lhs: Expr, rhs: Expr, loc: usize) -> CompileResult<Expr> {
    if lhs.ty.is_integer() && rhs.ty.is_integer() {
      let ty = lhs.ty.clone();
      return Ok(Expr::binary(op, lhs, rhs, ty, loc));
    }
    Err(self.invalid_operands(loc))
  }

  // ---- scopes and objects ----

  fn enter_scope(&mut self) {
    self.scopes.push(Scope::default());
  }

  fn leave_scope(&mut self) {
    self.scopes.pop();
  }

  fn find_var(&self, name: &str) -> Option<ObjRef> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.vars.get(name).copied())
      .or_else(|| {
        self
          .globals
          .iter()
          .position(|g| g.name == name)
          .map(ObjRef::Global)
      })
  }

  fn find_tag(&self, name: &str) -> Option<&Type> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.tags.get(name))
  }

  fn obj(&self, obj: ObjRef) -> &Obj {
    match obj {
      ObjRef::Local(idx) => &self.locals[idx],
      ObjRef::Global(idx) => &self.globals[idx],
    }
  }

  fn new_local(&mut self, name: String, ty: Type) -> usize {
    let idx = self.locals.len();
    if let Some(scope) = self.scopes.last_mut() {
      scope.vars.insert(name.clone(), ObjRef::Local(idx));
    }
    self.locals.push(Obj::new(name, ty));
    idx
  }

  /// Globals are unique by name; redeclaring one returns the existing entry.
  fn new_global(&mut self, name: String, ty: Type, init: Option<Vec<u8>>) -> usize {
    if let Some(idx) = self.globals.iter().position(|g| g.name == name) {
      return idx;
    }
    debug!("global {name}: {} bytes", ty.size);
    self.globals.push(Obj {
      init,
      ..Obj::new(name, ty)
    });
    self.globals.len() - 1
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self) -> Option<TokenKind> {
    self.peek().map(|token| token.kind)
  }

  /// Text of the current token if it is a punctuator.
  fn peek_punct(&self) -> Option<&'a str> {
    let source = self.source;
    self
      .peek()
      .filter(|token| token.kind == TokenKind::Punctuator)
      .map(|token| token_text(token, source))
  }

  /// Byte offset of the current token, used to anchor diagnostics.
  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  fn advance(&mut self) {
    if self.pos < self.tokens.len() {
      self.pos += 1;
    }
  }

  /// Whether the current token is the reserved word or punctuator `op`.
  fn at(&self, op: &str) -> bool {
    self.peek().is_some_and(|token| {
      matches!(
        token.kind,
        TokenKind::Punctuator | TokenKind::Keyword | TokenKind::TypeName
      ) && token.len == op.len()
        && token_text(token, self.source) == op
    })
  }

  /// Consume the current token if it is the reserved word or punctuator `op`.
  fn equal(&mut self, op: &str) -> bool {
    if self.at(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      let (loc, got) = match self.tokens.get(self.pos) {
        Some(token) => (token.loc, describe_token(Some(token), self.source)),
        None => (self.source.len(), "EOF".to_string()),
      };
      Err(CompileError::syntax(
        self.source,
        loc,
        format!("expected \"{s}\", but got \"{got}\""),
      ))
    }
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.tokens.get(self.pos)
      && token.kind == TokenKind::Num
    {
      let value = token.value.ok_or_else(|| {
        CompileError::syntax(
          self.source,
          token.loc,
          "internal error: numeric token missing value",
        )
      })?;
      let loc = token.loc;
      self.pos += 1;
      return Ok((value, loc));
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected a number, but got \"{got}\""),
    ))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.tokens.get(self.pos)
      && token.kind == TokenKind::Ident
    {
      let ident = token_text(token, self.source).to_string();
      let loc = token.loc;
      self.pos += 1;
      return Ok((ident, loc));
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected an identifier, but got \"{got}\""),
    ))
  }

  /// Take the decoded bytes of the current string literal.
  fn get_string(&mut self) -> CompileResult<Vec<u8>> {
    if let Some(token) = self.tokens.get(self.pos)
      && token.kind == TokenKind::Str
      && let Some(bytes) = &token.bytes
    {
      let bytes = bytes.clone();
      self.pos += 1;
      return Ok(bytes);
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected a string literal, but got \"{got}\""),
    ))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::ExprKind;
  use crate::tokenizer::tokenize;

  fn parse_src(src: &str) -> CompileResult<Program> {
    parse(tokenize(src)?, src)
  }

  /// Statements of the first function's body.
  fn body(program: &Program) -> &[Stmt] {
    match &program.functions[0].body {
      Stmt::Block(stmts) => stmts,
      other => panic!("expected a block, got {other:?}"),
    }
  }

  fn returned(program: &Program) -> &Expr {
    body(program)
      .iter()
      .find_map(|stmt| match stmt {
        Stmt::Return(expr) => Some(expr),
        _ => None,
      })
      .expect("function has a return statement")
  }

  #[test]
  fn parses_functions_and_params() {
    let program =
      parse_src("int add(int a, int b) { return a + b; } int main() { return add(2, 3); }").unwrap();
    assert_eq!(program.functions.len(), 2);
    let add = &program.functions[0];
    assert_eq!(add.name, "add");
    assert_eq!(add.params, [0, 1]);
    assert_eq!(add.locals[0].name, "a");
    assert_eq!(add.stack_size, 16);
  }

  #[test]
  fn greater_than_swaps_operands() {
    let gt = parse_src("int main() { int a; int b; return a > b; }").unwrap();
    let lt = parse_src("int main() { int a; int b; return b < a; }").unwrap();
    for program in [&gt, &lt] {
      let ExprKind::Binary { op, lhs, rhs } = &returned(program).kind else {
        panic!("expected a comparison");
      };
      assert_eq!(*op, BinaryOp::Lt);
      assert_eq!(lhs.kind, ExprKind::Var(ObjRef::Local(1)));
      assert_eq!(rhs.kind, ExprKind::Var(ObjRef::Local(0)));
      assert_eq!(returned(program).ty, Type::bool());
    }
  }

  #[test]
  fn assignment_is_right_associative() {
    let program = parse_src("int main() { int a; int b; a = b = 3; }").unwrap();
    let Stmt::Expr(expr) = &body(&program)[0] else {
      panic!("expected an expression statement");
    };
    let ExprKind::Assign { lhs, rhs } = &expr.kind else {
      panic!("expected an assignment");
    };
    assert_eq!(lhs.kind, ExprKind::Var(ObjRef::Local(0)));
    assert!(matches!(rhs.kind, ExprKind::Assign { .. }));
  }

  #[test]
  fn pointer_plus_int_commutes_and_scales() {
    let a = parse_src("int main() { int *p; return p + 2; }").unwrap();
    let b = parse_src("int main() { int *p; return 2 + p; }").unwrap();
    for program in [&a, &b] {
      let ExprKind::Binary { op, lhs, rhs } = &returned(program).kind else {
        panic!("expected an addition");
      };
      assert_eq!(*op, BinaryOp::Add);
      assert_eq!(lhs.kind, ExprKind::Var(ObjRef::Local(0)));
      let ExprKind::Binary { op, lhs, rhs } = &rhs.kind else {
        panic!("expected a scaled index");
      };
      assert_eq!(*op, BinaryOp::Mul);
      assert_eq!(lhs.kind, ExprKind::Num(2));
      assert_eq!(rhs.kind, ExprKind::Num(8));
    }
  }

  #[test]
  fn char_pointer_scales_by_one() {
    let program = parse_src("int main() { char *s; return *(s + 3); }").unwrap();
    let ExprKind::Deref(sum) = &returned(&program).kind else {
      panic!("expected a deref");
    };
    let ExprKind::Binary { rhs, .. } = &sum.kind else {
      panic!("expected an addition");
    };
    let ExprKind::Binary { rhs: size, .. } = &rhs.kind else {
      panic!("expected a scaled index");
    };
    assert_eq!(size.kind, ExprKind::Num(1));
    assert_eq!(returned(&program).ty, Type::char());
  }

  #[test]
  fn pointer_difference_divides_by_element_size() {
    let program = parse_src("int main() { int *p; int *q; return p - q; }").unwrap();
    let expr = returned(&program);
    assert_eq!(expr.ty, Type::int());
    let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
      panic!("expected a division");
    };
    assert_eq!(*op, BinaryOp::Div);
    assert_eq!(rhs.kind, ExprKind::Num(8));
  }

  #[test]
  fn index_desugars_to_deref_of_sum() {
    let program = parse_src("int main() { int a[2][3]; return a[1][2]; }").unwrap();
    let expr = returned(&program);
    assert_eq!(expr.ty, Type::int());
    let ExprKind::Deref(outer) = &expr.kind else {
      panic!("expected a deref");
    };
    let ExprKind::Binary { lhs: row, .. } = &outer.kind else {
      panic!("expected an addition");
    };
    assert_eq!(row.ty, Type::array_of(Type::int(), 3).unwrap());
    assert_eq!(program.functions[0].locals[0].ty.size, 48);
  }

  #[test]
  fn struct_members_and_tags() {
    let src = "struct P { char c; int y; }; int main() { struct P p; struct P *q; q = &p; return q->y + p.c; }";
    let program = parse_src(src).unwrap();
    let p = &program.functions[0].locals[0];
    assert_eq!(p.ty.size, 16);
    assert_eq!(p.ty.member("y").map(|m| m.offset), Some(8));
    assert_eq!(returned(&program).ty, Type::int());
  }

  #[test]
  fn sizeof_is_a_constant() {
    let program = parse_src("int main() { int a[4]; char c; return sizeof a + sizeof(c); }").unwrap();
    let ExprKind::Binary { lhs, rhs, .. } = &returned(&program).kind else {
      panic!("expected an addition");
    };
    assert_eq!(lhs.kind, ExprKind::Num(32));
    assert_eq!(rhs.kind, ExprKind::Num(1));
  }

  #[test]
  fn string_literals_become_anonymous_globals() {
    let program = parse_src("int main() { char *s; s = \"hi\"; s = \"yo\"; return 0; }").unwrap();
    assert_eq!(program.globals.len(), 2);
    assert_eq!(program.globals[0].name, ".L..0");
    assert_eq!(program.globals[1].name, ".L..1");
    assert_eq!(program.globals[0].ty, Type::array_of(Type::char(), 3).unwrap());
    assert_eq!(program.globals[0].init.as_deref(), Some(&b"hi\0"[..]));
  }

  #[test]
  fn globals_are_deduplicated_and_visible() {
    let program = parse_src("int x; int x, y[3]; int main() { return x + y[1]; }").unwrap();
    let names: Vec<&str> = program.globals.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, ["x", "y"]);
    assert!(program.globals.iter().all(|g| g.init.is_none()));
  }

  #[test]
  fn inner_scope_shadows_outer() {
    let program = parse_src("int main() { int x; { int x; x = 1; } return x; }").unwrap();
    assert_eq!(program.functions[0].locals.len(), 2);
    assert_eq!(returned(&program).kind, ExprKind::Var(ObjRef::Local(0)));
  }

  #[test]
  fn declaration_initializer_lowers_to_assignment() {
    let program = parse_src("int main() { int a = 3, b; return a; }").unwrap();
    assert!(matches!(
      &body(&program)[0],
      Stmt::Expr(Expr { kind: ExprKind::Assign { .. }, .. })
    ));
    assert_eq!(program.functions[0].locals.len(), 2);
  }

  #[test]
  fn while_and_for_share_the_loop_node() {
    let program = parse_src("int main() { while (1) 0; for (;;) 0; }").unwrap();
    assert!(matches!(
      &body(&program)[0],
      Stmt::Loop { init: None, cond: Some(_), step: None, .. }
    ));
    assert!(matches!(
      &body(&program)[1],
      Stmt::Loop { init: None, cond: None, step: None, .. }
    ));
  }

  #[test]
  fn prototypes_emit_nothing() {
    let program = parse_src("int f(int x); int main() { return f(1); }").unwrap();
    assert_eq!(program.functions.len(), 1);
    assert!(program.globals.is_empty());
  }

  #[test]
  fn undefined_variable_is_fatal() {
    let err = parse_src("int main() { return y; }").unwrap_err();
    assert!(matches!(err, CompileError::UndefinedSymbol { .. }));
    assert_eq!(err.to_string(), "int main() { return y; }\n                    ^ undefined variable: y");
  }

  #[test]
  fn missing_semicolon_is_a_syntax_error() {
    let err = parse_src("int main() { return 1 }").unwrap_err();
    assert!(matches!(err, CompileError::Syntax { .. }));
    assert!(err.to_string().ends_with("expected \";\", but got \"}\""));
  }

  #[test]
  fn invalid_operands_are_type_errors() {
    for src in [
      "int main() { int *p; int *q; return p + q; }",
      "int main() { int *p; return p * 2; }",
      "int main() { int *p; return 1 - p; }",
      "int main() { int a; int b; return (a < b) + 1; }",
    ] {
      let err = parse_src(src).unwrap_err();
      assert!(matches!(err, CompileError::Type { .. }), "{src}");
    }
  }

  #[test]
  fn member_access_requires_a_struct() {
    let err = parse_src("int main() { int x; return x.y; }").unwrap_err();
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn unknown_member_is_undefined() {
    let err = parse_src("struct P { int x; }; int main() { struct P p; return p.z; }").unwrap_err();
    assert!(matches!(err, CompileError::UndefinedSymbol { what: "member", .. }));
  }

  #[test]
  fn unknown_struct_tag_is_undefined() {
    let err = parse_src("int main() { struct Q q; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::UndefinedSymbol { what: "struct tag", .. }));
  }

  #[test]
  fn too_many_arguments() {
    let err = parse_src("int main() { return f(1, 2, 3, 4, 5, 6, 7); }").unwrap_err();
    assert!(matches!(err, CompileError::Type { .. }));
  }

  #[test]
  fn self_referential_struct_through_pointer() {
    let src = "struct N { struct N *next; int v; }; int main() { struct N a; struct N b; a.next = &b; b.v = 7; return a.next->v; }";
    let program = parse_src(src).unwrap();
    assert_eq!(program.functions[0].locals[0].ty.size, 16);
    assert_eq!(returned(&program).ty, Type::int());

    let program = parse_src("struct N { int v; struct N *next; }; int main() { struct N n; return sizeof *n.next; }").unwrap();
    assert_eq!(returned(&program).kind, ExprKind::Num(16));
  }

  #[test]
  fn struct_cannot_contain_itself() {
    for src in [
      "struct N { struct N self; };",
      "struct N { int v; struct N many[2]; };",
    ] {
      let err = parse_src(src).unwrap_err();
      assert!(err.to_string().ends_with("member has incomplete type"), "{src}");
    }
  }

  #[test]
  fn oversized_array_is_a_type_error() {
    let err = parse_src("int main() { int a[2000000000000000000]; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::Type { .. }));
    assert!(err.to_string().ends_with("array too large"));

    let err = parse_src("int g[1000000000000000000][1000];").unwrap_err();
    assert!(err.to_string().ends_with("array too large"));
  }

  #[test]
  fn frame_and_struct_overflow_are_type_errors() {
    let err = parse_src(
      "int main() { char a[5000000000000000000]; char b[5000000000000000000]; return 0; }",
    )
    .unwrap_err();
    assert!(err.to_string().ends_with("stack frame too large"));

    let err = parse_src("struct S { char a[5000000000000000000]; char b[5000000000000000000]; };")
      .unwrap_err();
    assert!(err.to_string().ends_with("struct too large"));
  }

  #[test]
  fn deref_of_integer_keeps_its_type() {
    let program = parse_src("int main() { int x; return *x; }").unwrap();
    assert_eq!(returned(&program).ty, Type::int());
  }
}
