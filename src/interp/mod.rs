//! The interpreter core: shared environments, the trampolined evaluator
//! loop, and procedure application.

use log::trace;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

mod builtin;
mod expand;
mod forms;
mod value;

pub use value::{
    sym, Arity, Expr, Exprs, FromExpr, FromExprResult, LambdaProcedure, List, ListKind, NativeFn,
    NativeProcedure, Params, Procedure, ProcedureKind, ProcedureResult, ProcedureReturn, Sym,
};

/// Everything that can go wrong after parsing. Errors propagate
/// unchanged from their origin to the embedding caller; the evaluator
/// never catches and retries.
#[derive(Error, Debug, PartialEq)]
pub enum EvalError {
    #[error("unbound symbol: {0}")]
    Unbound(String),
    #[error("not applicable: {0}")]
    NotApplicable(String),
    #[error("{name}: expected {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: Arity,
        got: usize,
    },
    #[error("{op}: expected {expected}, got {got}")]
    Type {
        op: &'static str,
        expected: &'static str,
        got: String,
    },
    #[error("macro expansion failed: {0}")]
    Macro(String),
    #[error("set!: symbol '{0}' is not bound")]
    SetUnbound(String),
    #[error("bad form: {0}")]
    BadForm(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl EvalError {
    pub(crate) fn type_mismatch(op: &'static str, expected: &'static str, got: &Expr) -> Self {
        EvalError::Type {
            op,
            expected,
            got: got.kind().to_string(),
        }
    }
}

macro_rules! bad_form {
    ($($arg:tt)*) => {
        $crate::interp::EvalError::BadForm(format!($($arg)*))
    };
}
pub(crate) use bad_form;

pub type EvalResult = Result<Expr, EvalError>;

struct RootState {
    cwd: PathBuf,
    gensym_counter: u64,
}

/// A lexical frame: value bindings, the separate macro namespace, and a
/// parent reference. The root frame additionally owns the gensym
/// counter and the current working directory.
struct Env {
    bindings: FxHashMap<Sym, Expr>,
    macros: FxHashMap<Sym, Procedure>,
    parent: Option<EnvRef>,
    root: Option<RootState>,
}

/// Shared handle to an environment frame. Every closure and caller
/// holding the same handle observes the same `define`/`set!` effects.
#[derive(Clone)]
pub struct EnvRef(Rc<RefCell<Env>>);

impl PartialEq for EnvRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EnvRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvRef({:?})", Rc::as_ptr(&self.0))
    }
}

impl EnvRef {
    fn new_root() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        EnvRef(Rc::new(RefCell::new(Env {
            bindings: FxHashMap::default(),
            macros: FxHashMap::default(),
            parent: None,
            root: Some(RootState {
                cwd,
                gensym_counter: 0,
            }),
        })))
    }

    /// A fresh child frame with this environment as parent.
    pub fn extend(&self) -> Self {
        EnvRef(Rc::new(RefCell::new(Env {
            bindings: FxHashMap::default(),
            macros: FxHashMap::default(),
            parent: Some(self.clone()),
            root: None,
        })))
    }

    /// A deep copy of the whole frame chain. Mutations through the copy
    /// are invisible to the original.
    pub fn copy(&self) -> Self {
        let inner = self.0.borrow();
        EnvRef(Rc::new(RefCell::new(Env {
            bindings: inner.bindings.clone(),
            macros: inner.macros.clone(),
            parent: inner.parent.as_ref().map(EnvRef::copy),
            root: inner.root.as_ref().map(|r| RootState {
                cwd: r.cwd.clone(),
                gensym_counter: r.gensym_counter,
            }),
        })))
    }

    pub fn is_root(&self) -> bool {
        self.0.borrow().parent.is_none()
    }

    /// The root frame of the chain.
    pub fn root(&self) -> EnvRef {
        let parent = self.0.borrow().parent.clone();
        match parent {
            Some(p) => p.root(),
            None => self.clone(),
        }
    }

    pub(crate) fn lookup(&self, name: Sym) -> Option<Expr> {
        let inner = self.0.borrow();
        match inner.bindings.get(&name) {
            Some(value) => Some(value.clone()),
            None => inner.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    /// Writes to the nearest enclosing frame holding `name`.
    pub(crate) fn assign(&mut self, name: Sym, value: Expr) -> Result<(), EvalError> {
        let mut inner = self.0.borrow_mut();
        if inner.bindings.contains_key(&name) {
            inner.bindings.insert(name, value);
            Ok(())
        } else {
            match inner.parent.as_mut() {
                Some(parent) => parent.assign(name, value),
                None => Err(EvalError::SetUnbound(name.to_string())),
            }
        }
    }

    /// Binds in this frame, silently shadowing any existing binding.
    pub(crate) fn bind(&mut self, name: Sym, value: Expr) {
        self.0.borrow_mut().bindings.insert(name, value);
    }

    pub(crate) fn macro_lookup(&self, name: Sym) -> Option<Procedure> {
        let inner = self.0.borrow();
        match inner.macros.get(&name) {
            Some(transformer) => Some(transformer.clone()),
            None => inner.parent.as_ref().and_then(|p| p.macro_lookup(name)),
        }
    }

    pub(crate) fn bind_macro(&mut self, name: Sym, transformer: Procedure) {
        self.0.borrow_mut().macros.insert(name, transformer);
    }

    pub fn get_expr(&self, name: &str) -> Option<Expr> {
        self.lookup(sym(name))
    }

    /// [`get_expr`](Self::get_expr) with a typed projection.
    pub fn get<T: FromExpr>(&self, name: &str) -> Option<FromExprResult<T>> {
        Some(T::from_expr(self.get_expr(name)?))
    }

    pub fn has(&self, name: &str) -> bool {
        self.lookup(sym(name)).is_some()
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.macro_lookup(sym(name)).is_some()
    }

    pub fn define<T: Into<Expr>>(&mut self, name: &str, value: T) {
        self.bind(sym(name), value.into());
    }

    pub fn set<T: Into<Expr>>(&mut self, name: &str, value: T) -> Result<(), EvalError> {
        self.assign(sym(name), value.into())
    }

    pub fn define_native(&mut self, name: &str, kind: ProcedureKind, arity: Arity, func: NativeFn) {
        let proc = Procedure::new_native(name, kind, arity, func);
        self.bind(sym(name), Expr::Procedure(proc));
    }

    /// Current working directory, owned by the root frame; `include` and
    /// `load` resolve paths against it.
    pub fn cwd(&self) -> PathBuf {
        let inner = self.0.borrow();
        match (&inner.root, &inner.parent) {
            (Some(root), _) => root.cwd.clone(),
            (None, Some(parent)) => parent.cwd(),
            (None, None) => PathBuf::from("."),
        }
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        let root = self.root();
        let mut inner = root.0.borrow_mut();
        if let Some(state) = inner.root.as_mut() {
            state.cwd = cwd;
        }
    }

    pub(crate) fn next_gensym(&self) -> u64 {
        let root = self.root();
        let mut inner = root.0.borrow_mut();
        let state = inner.root.as_mut().expect("root frame has root state");
        state.gensym_counter += 1;
        state.gensym_counter
    }
}

/// The root environment: every special form and native procedure
/// installed, no prelude yet.
pub fn root_env() -> EnvRef {
    let mut env = EnvRef::new_root();
    for (name, arity, func) in forms::SPECIAL_FORMS {
        env.define_native(name, ProcedureKind::SpecialForm, *arity, *func);
    }
    for (name, arity, func) in builtin::PROCEDURES {
        env.define_native(name, ProcedureKind::Value, *arity, *func);
    }
    env
}

/// The evaluator: a loop over a mutable `(expr, env)` pair, re-seated by
/// `TailCall` returns from special forms and procedure application.
pub fn eval_expr(expr: Expr, env: &mut EnvRef) -> EvalResult {
    let mut expr = expr;
    let mut env = env.clone();
    loop {
        trace!("eval: {}", expr);

        // macro expansion precedes evaluation; re-expand until the head
        // is no longer a macro
        if let Some((transformer, forms)) = expand::macro_call(&expr, &env) {
            expr = expand::apply_transformer(&transformer, forms, &mut env)?;
            continue;
        }

        match expr {
            Expr::Symbol(name) => {
                return env
                    .lookup(name)
                    .ok_or_else(|| EvalError::Unbound(name.to_string()));
            }
            Expr::List(list) => {
                if list.is_empty() {
                    return Err(bad_form!("cannot evaluate the empty list"));
                }
                if list.is_dotted() {
                    return Err(bad_form!("cannot evaluate dotted list {}", Expr::List(list)));
                }
                let mut forms = list.snapshot();
                let head = forms.pop_front().expect("list checked non-empty");
                let proc = match eval_expr(head, &mut env)? {
                    Expr::Procedure(proc) => proc,
                    other => {
                        return Err(EvalError::NotApplicable(format!(
                            "{} ({})",
                            other,
                            other.kind()
                        )))
                    }
                };

                let ret = if proc.is_special_form() {
                    apply(&proc, forms, &mut env)?
                } else {
                    // arguments are evaluated strictly left-to-right
                    let mut args = Exprs::new();
                    for form in forms {
                        args.push_back(eval_expr(form, &mut env)?);
                    }
                    apply(&proc, args, &mut env)?
                };

                match ret {
                    ProcedureReturn::Value(value) => return Ok(value),
                    ProcedureReturn::TailCall(next_expr, next_env) => {
                        expr = next_expr;
                        env = next_env;
                    }
                }
            }
            // everything else is self-evaluating
            other => return Ok(other),
        }
    }
}

/// Evaluates a sequence of forms, returning the value of the last one.
pub fn eval_exprs<I: IntoIterator<Item = Expr>>(exprs: I, env: &mut EnvRef) -> EvalResult {
    exprs
        .into_iter()
        .try_fold(Expr::Void, |_, expr| eval_expr(expr, env))
}

/// Evaluates all body forms but the last, and yields the last as a tail
/// call. Every binding form and lambda body funnels through here.
pub(crate) fn eval_body_tail(mut body: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let Some(last) = body.pop_back() else {
        return Ok(ProcedureReturn::Value(Expr::Void));
    };
    for expr in body {
        eval_expr(expr, env)?;
    }
    Ok(ProcedureReturn::TailCall(last, env.clone()))
}

/// Applies a procedure to already-prepared arguments. Arity is validated
/// before any handler runs or any parameter is bound.
pub fn apply(proc: &Procedure, args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    match proc {
        Procedure::Native(native) => {
            native.arity.check(&native.name, args.len())?;
            (native.func)(args, env)
        }
        Procedure::Lambda(lambda) => apply_lambda(lambda, args),
    }
}

fn apply_lambda(lambda: &LambdaProcedure, mut args: Exprs) -> ProcedureResult {
    lambda.params.arity().check(
        lambda.name.as_deref().unwrap_or("anonymous"),
        args.len(),
    )?;

    let mut call_env = lambda.env.extend();
    match &lambda.params {
        Params::Fixed(names) => {
            for (name, arg) in names.iter().zip(args) {
                call_env.bind(*name, arg);
            }
        }
        Params::Variadic(rest) => {
            call_env.bind(*rest, Expr::new_proper_list(args));
        }
        Params::Mixed(names, rest) => {
            let rest_args = args.split_off(names.len());
            for (name, arg) in names.iter().zip(args) {
                call_env.bind(*name, arg);
            }
            call_env.bind(*rest, Expr::new_proper_list(rest_args));
        }
    }

    eval_body_tail(lambda.body.clone(), &mut call_env)
}
