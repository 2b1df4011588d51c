use super::{EnvRef, EvalError};
use internment::Intern;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

pub type Sym = Intern<String>;
pub type Exprs = VecDeque<Expr>;

pub fn sym(name: &str) -> Sym {
    Intern::new(name.to_string())
}

/// Builds an [`Exprs`] sequence from the given expressions.
#[macro_export]
macro_rules! exprs {
    ($($x:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut exprs = $crate::Exprs::new();
        $(exprs.push_back($x);)*
        exprs
    }};
}

/// A Scheme value.
///
/// Strings and lists are shared mutable handles: mutation through
/// `string-set!`, `set-car!` and `set-cdr!` is visible through every
/// holder of the same handle.
#[derive(Debug, PartialEq, Clone, Default)]
pub enum Expr {
    #[default]
    Void,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Char(char),
    Str(Rc<RefCell<String>>),
    Symbol(Sym),
    List(List),
    Procedure(Procedure),
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ListKind {
    Proper,
    Dotted,
}

#[derive(Debug, PartialEq, Clone)]
struct ListData {
    elems: Exprs,
    kind: ListKind,
}

/// Shared mutable handle to an ordered sequence of elements plus a
/// dotted-tail marker. A dotted list stores its improper tail as the
/// final element and always holds at least two elements.
#[derive(Debug, Clone)]
pub struct List(Rc<RefCell<ListData>>);

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        *self.0.borrow() == *other.0.borrow()
    }
}

impl List {
    pub fn new_proper(elems: Exprs) -> Self {
        List(Rc::new(RefCell::new(ListData {
            elems,
            kind: ListKind::Proper,
        })))
    }

    pub fn new_dotted(elems: Exprs) -> Self {
        debug_assert!(elems.len() > 1, "dotted list needs at least two elements");
        List(Rc::new(RefCell::new(ListData {
            elems,
            kind: ListKind::Dotted,
        })))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().elems.is_empty()
    }

    pub fn kind(&self) -> ListKind {
        self.0.borrow().kind
    }

    pub fn is_proper(&self) -> bool {
        matches!(self.kind(), ListKind::Proper)
    }

    pub fn is_dotted(&self) -> bool {
        matches!(self.kind(), ListKind::Dotted)
    }

    pub fn car(&self) -> Option<Expr> {
        self.0.borrow().elems.front().cloned()
    }

    pub fn nth(&self, n: usize) -> Option<Expr> {
        self.0.borrow().elems.get(n).cloned()
    }

    /// The tail of the list as a fresh value: `'()` for a one-element
    /// proper list, the bare tail expression for `(a . b)`, and a new
    /// list handle otherwise. `None` on the empty list.
    pub fn cdr(&self) -> Option<Expr> {
        let inner = self.0.borrow();
        if inner.elems.is_empty() {
            return None;
        }
        let mut rest: Exprs = inner.elems.iter().skip(1).cloned().collect();
        let tail = match (rest.len(), inner.kind) {
            (0, _) => Expr::new_empty_list(),
            (1, ListKind::Dotted) => rest.pop_front().unwrap(),
            (_, ListKind::Proper) => Expr::List(List::new_proper(rest)),
            (_, ListKind::Dotted) => Expr::List(List::new_dotted(rest)),
        };
        Some(tail)
    }

    /// Snapshot of the elements. The improper tail of a dotted list is
    /// the final element.
    pub fn snapshot(&self) -> Exprs {
        self.0.borrow().elems.clone()
    }

    pub fn set_car(&self, value: Expr) -> Result<(), ()> {
        let mut inner = self.0.borrow_mut();
        match inner.elems.front_mut() {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(()),
        }
    }

    pub fn set_cdr(&self, value: Expr) -> Result<(), ()> {
        // snapshot first: the new tail may alias this very handle
        let (tail, kind) = match value {
            Expr::List(list) => {
                let kind = list.kind();
                (list.snapshot(), kind)
            }
            other => (exprs![other], ListKind::Dotted),
        };
        let mut inner = self.0.borrow_mut();
        let Some(head) = inner.elems.front().cloned() else {
            return Err(());
        };
        let mut elems = exprs![head];
        elems.extend(tail);
        inner.elems = elems;
        inner.kind = kind;
        Ok(())
    }
}

type ExprIntoResult<T> = Result<T, Expr>;

impl Expr {
    pub fn new_empty_list() -> Self {
        Expr::List(List::new_proper(Exprs::new()))
    }

    pub fn new_proper_list(elems: Exprs) -> Self {
        Expr::List(List::new_proper(elems))
    }

    pub fn new_dotted_list(elems: Exprs) -> Self {
        Expr::List(List::new_dotted(elems))
    }

    pub fn new_string(s: String) -> Self {
        Expr::Str(Rc::new(RefCell::new(s)))
    }

    pub fn new_symbol(name: &str) -> Self {
        Expr::Symbol(sym(name))
    }

    /// Prepends elements onto an arbitrary tail, normalizing the result:
    /// a list tail is absorbed (keeping its kind), any other value
    /// becomes the improper tail of a dotted list.
    pub fn list_with_tail(mut elems: Exprs, tail: Expr) -> Self {
        match tail {
            Expr::List(list) => {
                let kind = list.kind();
                elems.extend(list.snapshot());
                match kind {
                    ListKind::Proper => Expr::new_proper_list(elems),
                    ListKind::Dotted => Expr::new_dotted_list(elems),
                }
            }
            other => {
                elems.push_back(other);
                Expr::new_dotted_list(elems)
            }
        }
    }

    /// Human-readable name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Void => "void",
            Expr::Boolean(_) => "boolean",
            Expr::Integer(_) => "integer",
            Expr::Float(_) => "float",
            Expr::Char(_) => "char",
            Expr::Str(_) => "string",
            Expr::Symbol(_) => "symbol",
            Expr::List(list) => match list.kind() {
                ListKind::Proper => "list",
                ListKind::Dotted => "dotted list",
            },
            Expr::Procedure(_) => "procedure",
        }
    }

    /// Everything except `#f` is truthy, including `'()`, `0` and `""`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Expr::Boolean(false))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Expr::Symbol(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Expr::Integer(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Expr::Str(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Expr::List(_))
    }

    pub fn is_proper_list(&self) -> bool {
        matches!(self, Expr::List(list) if list.is_proper())
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, Expr::List(list) if list.is_empty())
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Expr::Procedure(_))
    }

    pub fn as_symbol(&self) -> Option<Sym> {
        match self {
            Expr::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn into_boolean(self) -> ExprIntoResult<bool> {
        match self {
            Expr::Boolean(b) => Ok(b),
            _ => Err(self),
        }
    }

    pub fn into_integer(self) -> ExprIntoResult<i64> {
        match self {
            Expr::Integer(n) => Ok(n),
            _ => Err(self),
        }
    }

    pub fn into_float(self) -> ExprIntoResult<f64> {
        match self {
            Expr::Float(f) => Ok(f),
            _ => Err(self),
        }
    }

    pub fn into_char(self) -> ExprIntoResult<char> {
        match self {
            Expr::Char(c) => Ok(c),
            _ => Err(self),
        }
    }

    pub fn into_string(self) -> ExprIntoResult<Rc<RefCell<String>>> {
        match self {
            Expr::Str(s) => Ok(s),
            _ => Err(self),
        }
    }

    pub fn into_symbol(self) -> ExprIntoResult<Sym> {
        match self {
            Expr::Symbol(s) => Ok(s),
            _ => Err(self),
        }
    }

    pub fn into_list(self) -> ExprIntoResult<List> {
        match self {
            Expr::List(list) => Ok(list),
            _ => Err(self),
        }
    }

    pub fn into_procedure(self) -> ExprIntoResult<Procedure> {
        match self {
            Expr::Procedure(proc) => Ok(proc),
            _ => Err(self),
        }
    }

    /// Structural equality, the contract of `equal?`. Numbers compare by
    /// type and value, strings by contents, lists element-wise. Only
    /// terminates on acyclic values.
    pub fn is_equal(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Void, Expr::Void) => true,
            (Expr::Boolean(a), Expr::Boolean(b)) => a == b,
            (Expr::Integer(a), Expr::Integer(b)) => a == b,
            (Expr::Float(a), Expr::Float(b)) => a == b,
            (Expr::Char(a), Expr::Char(b)) => a == b,
            (Expr::Str(a), Expr::Str(b)) => *a.borrow() == *b.borrow(),
            (Expr::Symbol(a), Expr::Symbol(b)) => a == b,
            (Expr::List(a), Expr::List(b)) => {
                if a.kind() != b.kind() || a.len() != b.len() {
                    return false;
                }
                let left = a.snapshot();
                let right = b.snapshot();
                left.iter().zip(right.iter()).all(|(x, y)| x.is_equal(y))
            }
            (Expr::Procedure(a), Expr::Procedure(b)) => a == b,
            _ => false,
        }
    }

    /// Identity comparison, the contract of `eqv?`/`eq?`: handles for
    /// lists, strings and procedures, value and type for atoms.
    pub fn is_eqv(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Void, Expr::Void) => true,
            (Expr::Boolean(a), Expr::Boolean(b)) => a == b,
            (Expr::Integer(a), Expr::Integer(b)) => a == b,
            (Expr::Float(a), Expr::Float(b)) => a == b,
            (Expr::Char(a), Expr::Char(b)) => a == b,
            (Expr::Symbol(a), Expr::Symbol(b)) => a == b,
            (Expr::Str(a), Expr::Str(b)) => Rc::ptr_eq(a, b),
            (Expr::List(a), Expr::List(b)) => {
                a.ptr_eq(b) || (a.is_empty() && b.is_empty())
            }
            (Expr::Procedure(a), Expr::Procedure(b)) => a == b,
            _ => false,
        }
    }

    /// The human form of the printer: strings unquoted, chars unescaped.
    /// The `Display` impl is the readable `write` form.
    pub fn display_string(&self) -> String {
        let mut out = String::new();
        // writing to a String cannot fail
        let _ = write_expr(&mut out, self, Style::Display);
        out
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Integer(n)
    }
}

impl From<f64> for Expr {
    fn from(f: f64) -> Self {
        Expr::Float(f)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Boolean(b)
    }
}

impl From<char> for Expr {
    fn from(c: char) -> Self {
        Expr::Char(c)
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::new_string(s)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::new_string(s.to_string())
    }
}

impl From<()> for Expr {
    fn from(_: ()) -> Self {
        Expr::Void
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Style {
    Write,
    Display,
}

fn write_char_external(out: &mut impl fmt::Write, c: char) -> fmt::Result {
    match c {
        ' ' => write!(out, "#\\space"),
        '\n' => write!(out, "#\\newline"),
        '\t' => write!(out, "#\\tab"),
        c => write!(out, "#\\{c}"),
    }
}

fn write_expr(out: &mut impl fmt::Write, expr: &Expr, style: Style) -> fmt::Result {
    match expr {
        Expr::Void => write!(out, "#<void>"),
        Expr::Boolean(b) => write!(out, "{}", if *b { "#t" } else { "#f" }),
        Expr::Integer(n) => write!(out, "{n}"),
        Expr::Float(f) => write!(out, "{f}"),
        Expr::Char(c) => match style {
            Style::Write => write_char_external(out, *c),
            Style::Display => write!(out, "{c}"),
        },
        Expr::Str(s) => match style {
            Style::Write => write!(out, "\"{}\"", s.borrow().replace('\\', "\\\\").replace('"', "\\\"")),
            Style::Display => write!(out, "{}", s.borrow()),
        },
        Expr::Symbol(s) => write!(out, "{s}"),
        Expr::Procedure(proc) => write!(out, "{proc}"),
        Expr::List(list) => write_list(out, list, style),
    }
}

fn write_list(out: &mut impl fmt::Write, list: &List, style: Style) -> fmt::Result {
    let elems = list.snapshot();

    // print quotation calls with their reader sugar
    if list.is_proper() && elems.len() == 2 {
        if let Some(prefix) = elems[0].as_symbol().and_then(|s| match s.as_str() {
            "quote" => Some("'"),
            "quasiquote" => Some("`"),
            "unquote" => Some(","),
            "unquote-splicing" => Some(",@"),
            _ => None,
        }) {
            write!(out, "{prefix}")?;
            return write_expr(out, &elems[1], style);
        }
    }

    write!(out, "(")?;
    let dotted = list.is_dotted();
    let last = elems.len().saturating_sub(1);
    for (i, elem) in elems.iter().enumerate() {
        if i > 0 {
            write!(out, " ")?;
        }
        if dotted && i == last {
            write!(out, ". ")?;
        }
        write_expr(out, elem, style)?;
    }
    write!(out, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self, Style::Write)
    }
}

/// The result of calling a procedure: either a final value, or an
/// instruction to the evaluator loop to continue with `(expr, env)` in
/// place of the current pair. Tail calls never grow the host stack.
pub enum ProcedureReturn {
    Value(Expr),
    TailCall(Expr, EnvRef),
}

pub type ProcedureResult = Result<ProcedureReturn, EvalError>;

/// A host-implemented procedure body. Special forms receive their
/// argument forms unevaluated; value procedures receive evaluated
/// arguments.
pub type NativeFn = fn(args: Exprs, env: &mut EnvRef) -> ProcedureResult;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProcedureKind {
    /// Arguments are evaluated left-to-right before the call.
    Value,
    /// Arguments are passed as raw forms together with the caller's
    /// environment.
    SpecialForm,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn admits(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(min) => count >= min,
            Arity::Range(min, max) => count >= min && count <= max,
        }
    }

    pub fn check(&self, name: &str, count: usize) -> Result<(), EvalError> {
        if self.admits(count) {
            Ok(())
        } else {
            Err(EvalError::Arity {
                name: name.to_string(),
                expected: *self,
                got: count,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
        }
    }
}

/// Formal parameter shapes of a lambda: `(a b c)`, `args`, `(a b . rest)`.
#[derive(Debug, PartialEq, Clone)]
pub enum Params {
    Fixed(Vec<Sym>),
    Variadic(Sym),
    Mixed(Vec<Sym>, Sym),
}

impl Params {
    pub fn arity(&self) -> Arity {
        match self {
            Params::Fixed(names) => Arity::Exact(names.len()),
            Params::Variadic(_) => Arity::AtLeast(0),
            Params::Mixed(names, _) => Arity::AtLeast(names.len()),
        }
    }
}

#[derive(Debug)]
pub struct NativeProcedure {
    pub name: String,
    pub kind: ProcedureKind,
    pub arity: Arity,
    pub func: NativeFn,
}

#[derive(Debug)]
pub struct LambdaProcedure {
    pub name: Option<String>,
    pub params: Params,
    pub body: Exprs,
    pub env: EnvRef,
}

/// A procedure value. Clones share the underlying record; `eqv?`
/// compares by that identity.
#[derive(Debug, Clone)]
pub enum Procedure {
    Native(Rc<NativeProcedure>),
    Lambda(Rc<LambdaProcedure>),
}

impl Procedure {
    pub fn new_native(name: &str, kind: ProcedureKind, arity: Arity, func: NativeFn) -> Self {
        Procedure::Native(Rc::new(NativeProcedure {
            name: name.to_string(),
            kind,
            arity,
            func,
        }))
    }

    pub fn new_lambda(name: Option<String>, params: Params, body: Exprs, env: EnvRef) -> Self {
        Procedure::Lambda(Rc::new(LambdaProcedure {
            name,
            params,
            body,
            env,
        }))
    }

    pub fn is_special_form(&self) -> bool {
        matches!(self, Procedure::Native(native) if native.kind == ProcedureKind::SpecialForm)
    }

    pub fn name(&self) -> &str {
        match self {
            Procedure::Native(native) => &native.name,
            Procedure::Lambda(lambda) => lambda.name.as_deref().unwrap_or("anonymous"),
        }
    }
}

impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Procedure::Native(a), Procedure::Native(b)) => Rc::ptr_eq(a, b),
            (Procedure::Lambda(a), Procedure::Lambda(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Native(_) if self.is_special_form() => {
                write!(f, "#<special form {}>", self.name())
            }
            Procedure::Native(_) => write!(f, "#<procedure {}>", self.name()),
            Procedure::Lambda(_) => write!(f, "#<lambda {}>", self.name()),
        }
    }
}

pub type FromExprResult<T> = Result<T, Expr>;

/// Conversion from an evaluated [`Expr`] into a host type; the typed
/// projection used by [`EnvRef::get`](super::EnvRef::get).
pub trait FromExpr: Sized {
    fn from_expr(expr: Expr) -> FromExprResult<Self>;
}

impl FromExpr for Expr {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        Ok(expr)
    }
}

impl FromExpr for i64 {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        expr.into_integer()
    }
}

impl FromExpr for f64 {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        expr.into_float()
    }
}

impl FromExpr for bool {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        expr.into_boolean()
    }
}

impl FromExpr for char {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        expr.into_char()
    }
}

impl FromExpr for String {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        expr.into_string().map(|s| s.borrow().clone())
    }
}

impl FromExpr for () {
    fn from_expr(expr: Expr) -> FromExprResult<Self> {
        match expr {
            Expr::Void => Ok(()),
            other => Err(other),
        }
    }
}
