//! vesper is an embeddable Scheme interpreter covering a pragmatic
//! subset of R7RS: lexically scoped closures with proper tail calls,
//! `define-macro` style macros with quasiquotation, and a Scheme-written
//! prelude loaded at engine construction.
//!
//! ```
//! use vesper::{Engine, Expr};
//! let mut engine = Engine::new();
//! let result = engine.eval("(+ 1 2)").unwrap();
//! assert_eq!(result, Expr::Integer(3));
//! ```

mod interp;
pub mod parser;

pub use interp::{
    Arity, EnvRef, EvalError, Expr, Exprs, FromExpr, FromExprResult, List, ListKind, NativeFn,
    Procedure, ProcedureKind, ProcedureResult, ProcedureReturn, Sym,
};
pub use parser::ParseError;

use log::debug;
use std::path::PathBuf;
use thiserror::Error;

const PRELUDE: &str = include_str!("./prelude.scm");

/// All the ways evaluation of a source text can fail.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("eval error: {0}")]
    Eval(#[from] EvalError),
}

/// The interpreter engine: owns the root environment and drives
/// parse-then-evaluate over source texts.
///
/// ```
/// use vesper::{Engine, Arity, Expr, Exprs, EnvRef, ProcedureKind, ProcedureResult, ProcedureReturn};
///
/// fn double(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
///     match args.pop_front() {
///         Some(Expr::Integer(n)) => Ok(ProcedureReturn::Value(Expr::Integer(n * 2))),
///         _ => Err(vesper::EvalError::BadForm("double: expected an integer".into())),
///     }
/// }
///
/// let mut engine = Engine::new();
/// engine.register_fn("double", ProcedureKind::Value, Arity::Exact(1), double);
/// assert_eq!(engine.eval("(double 21)").unwrap(), Expr::Integer(42));
/// ```
pub struct Engine {
    root_env: EnvRef,
}

impl Engine {
    /// A fresh engine with the bundled prelude evaluated into the root
    /// environment.
    pub fn new() -> Self {
        let mut engine = Self::new_without_prelude();
        engine.load_prelude();
        engine
    }

    /// A fresh engine with only the native special forms and
    /// procedures; derived forms like `when` and the lazy-stream layer
    /// are absent.
    pub fn new_without_prelude() -> Self {
        Engine {
            root_env: interp::root_env(),
        }
    }

    fn load_prelude(&mut self) {
        debug!("loading prelude");
        self.eval(PRELUDE).expect("the bundled prelude must evaluate");
    }

    /// Parses `source` and evaluates its forms in order against the
    /// root environment, returning the value of the last one.
    pub fn eval(&mut self, source: &str) -> Result<Expr, Error> {
        let forms = parser::parse(source)?;
        let mut env = self.root_env.clone();
        let value = interp::eval_exprs(forms, &mut env)?;
        Ok(value)
    }

    /// Installs a native procedure or special form into the root
    /// environment.
    pub fn register_fn(&mut self, name: &str, kind: ProcedureKind, arity: Arity, func: NativeFn) {
        self.root_env.define_native(name, kind, arity, func);
    }

    /// A handle to the root environment.
    pub fn env(&self) -> EnvRef {
        self.root_env.clone()
    }

    /// Sets the working directory that `include` and `load` resolve
    /// paths against.
    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.root_env.set_cwd(cwd);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_evaluates_last_form() {
        let mut engine = Engine::new();
        assert_eq!(engine.eval("1 2 3").unwrap(), Expr::Integer(3));
    }

    #[test]
    fn test_empty_source_is_void() {
        let mut engine = Engine::new();
        assert_eq!(engine.eval("").unwrap(), Expr::Void);
    }

    #[test]
    fn test_parse_errors_are_surfaced() {
        let mut engine = Engine::new();
        assert!(matches!(engine.eval("(+ 1"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_state_persists_between_eval_calls() {
        let mut engine = Engine::new();
        engine.eval("(define x 10)").unwrap();
        assert_eq!(engine.eval("(* x x)").unwrap(), Expr::Integer(100));
    }

    #[test]
    fn test_without_prelude_lacks_derived_forms() {
        let engine = Engine::new_without_prelude();
        assert!(!engine.env().has("length"));
        assert!(!engine.env().has_macro("when"));
        assert!(engine.env().has("car"));
    }

    #[test]
    fn test_env_typed_projection() {
        let mut engine = Engine::new();
        engine.eval("(define x 1) (define s \"hey\")").unwrap();
        assert_eq!(engine.env().get::<i64>("x"), Some(Ok(1)));
        assert_eq!(engine.env().get::<String>("s"), Some(Ok("hey".to_string())));
        assert_eq!(engine.env().get::<i64>("missing"), None);
        assert!(engine.env().get::<bool>("x").unwrap().is_err());
    }

    #[test]
    fn test_host_defined_bindings_are_visible() {
        let mut engine = Engine::new();
        let mut env = engine.env();
        env.define("answer", 42);
        assert_eq!(engine.eval("answer").unwrap(), Expr::Integer(42));
    }
}
