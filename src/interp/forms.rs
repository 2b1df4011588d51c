//! Special-form handlers. All of them are registered as first-class
//! `SpecialForm` procedures in the root environment and receive their
//! argument forms unevaluated.
//!
//! Arity is validated by the apply path before a handler runs, so the
//! leading `pop_front().expect(..)` calls cannot fail.

use super::{
    bad_form, eval_body_tail, eval_expr, expand, Arity, EnvRef, EvalError, EvalResult, Expr, Exprs,
    ListKind, NativeFn, Params, Procedure, ProcedureResult, ProcedureReturn, Sym,
};
use crate::parser;
use std::fs;

pub const SPECIAL_FORMS: &[(&str, Arity, NativeFn)] = &[
    ("quote", Arity::Exact(1), quote_form),
    ("if", Arity::Range(2, 3), if_form),
    ("define", Arity::AtLeast(2), define_form),
    ("set!", Arity::Exact(2), set_form),
    ("lambda", Arity::AtLeast(2), lambda_form),
    ("let", Arity::AtLeast(1), let_form),
    ("letrec", Arity::AtLeast(1), letrec_form),
    ("letrec*", Arity::AtLeast(1), letrec_star_form),
    ("begin", Arity::AtLeast(0), begin_form),
    ("cond", Arity::AtLeast(1), cond_form),
    ("and", Arity::AtLeast(0), and_form),
    ("or", Arity::AtLeast(0), or_form),
    ("quasiquote", Arity::Exact(1), quasiquote_form),
    ("unquote", Arity::AtLeast(0), unquote_form),
    ("unquote-splicing", Arity::AtLeast(0), unquote_splicing_form),
    ("define-macro", Arity::AtLeast(2), define_macro_form),
    ("include", Arity::AtLeast(1), include_form),
    ("do", Arity::AtLeast(2), do_form),
];

fn quote_form(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    Ok(ProcedureReturn::Value(args.pop_front().expect("arity")))
}

fn if_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let test = args.pop_front().expect("arity");
    let then_branch = args.pop_front().expect("arity");
    let else_branch = args.pop_front();

    match eval_expr(test, env)? {
        Expr::Void => Err(bad_form!("if: test expression evaluated to the unspecified value")),
        value if value.is_truthy() => Ok(ProcedureReturn::TailCall(then_branch, env.clone())),
        _ => match else_branch {
            Some(branch) => Ok(ProcedureReturn::TailCall(branch, env.clone())),
            None => Ok(ProcedureReturn::Value(Expr::Void)),
        },
    }
}

/// Turns the element/kind split of a formals list into [`Params`].
/// A dotted remainder of one element is the bare rest parameter left
/// over after `define` strips the procedure name.
fn params_from_parts(elems: Exprs, kind: ListKind) -> Result<Params, EvalError> {
    let mut names = Vec::with_capacity(elems.len());
    for expr in elems {
        match expr.as_symbol() {
            Some(name) => names.push(name),
            None => {
                return Err(bad_form!(
                    "expected symbols in formals list, got {}",
                    expr.kind()
                ))
            }
        }
    }
    match kind {
        ListKind::Proper => Ok(Params::Fixed(names)),
        ListKind::Dotted => {
            let rest = names.pop().expect("dotted list is non-empty");
            if names.is_empty() {
                Ok(Params::Variadic(rest))
            } else {
                Ok(Params::Mixed(names, rest))
            }
        }
    }
}

fn parse_params(expr: Expr) -> Result<Params, EvalError> {
    match expr {
        Expr::Symbol(rest) => Ok(Params::Variadic(rest)),
        Expr::List(list) => {
            let kind = list.kind();
            params_from_parts(list.snapshot(), kind)
        }
        other => Err(bad_form!(
            "expected a formals list or rest symbol, got {}",
            other.kind()
        )),
    }
}

fn make_lambda(
    name: Option<String>,
    params_expr: Expr,
    body: Exprs,
    env: &EnvRef,
) -> Result<Procedure, EvalError> {
    let params = parse_params(params_expr)?;
    Ok(Procedure::new_lambda(name, params, body, env.clone()))
}

fn lambda_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let params_expr = args.pop_front().expect("arity");
    let lambda = make_lambda(None, params_expr, args, env)?;
    Ok(ProcedureReturn::Value(Expr::Procedure(lambda)))
}

/// Splits `(name arg ...)` or `(name . rest)` into the name and a
/// formals [`Params`]; shared by `define` and `define-macro` sugar.
fn split_signature(signature: Expr) -> Result<(Sym, Params), EvalError> {
    let list = signature
        .into_list()
        .map_err(|expr| bad_form!("expected a signature list, got {}", expr.kind()))?;
    let kind = list.kind();
    let mut elems = list.snapshot();
    let name = elems
        .pop_front()
        .ok_or_else(|| bad_form!("signature list must not be empty"))?
        .as_symbol()
        .ok_or_else(|| bad_form!("expected a symbol naming the procedure"))?;
    let params = params_from_parts(elems, kind)?;
    Ok((name, params))
}

fn define_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let target = args.pop_front().expect("arity");
    match target {
        Expr::Symbol(name) => {
            let value_expr = args.pop_front().expect("arity");
            if !args.is_empty() {
                return Err(bad_form!("define: a variable takes a single value form"));
            }
            let value = eval_expr(value_expr, env)?;
            env.bind(name, value);
            Ok(ProcedureReturn::Value(Expr::Void))
        }
        signature @ Expr::List(_) => {
            let (name, params) = split_signature(signature)?;
            let lambda = Procedure::new_lambda(Some(name.to_string()), params, args, env.clone());
            env.bind(name, Expr::Procedure(lambda));
            Ok(ProcedureReturn::Value(Expr::Void))
        }
        other => Err(bad_form!(
            "define: expected symbol or signature list, got {}",
            other.kind()
        )),
    }
}

fn set_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let name = args
        .pop_front()
        .expect("arity")
        .as_symbol()
        .ok_or_else(|| bad_form!("set!: first argument must be a symbol"))?;
    let value = eval_expr(args.pop_front().expect("arity"), env)?;
    env.assign(name, value)?;
    Ok(ProcedureReturn::Value(Expr::Void))
}

fn parse_bindings(expr: Expr) -> Result<Vec<(Sym, Expr)>, EvalError> {
    let list = expr
        .into_list()
        .map_err(|e| bad_form!("expected a bindings list, got {}", e.kind()))?;
    if !list.is_proper() {
        return Err(bad_form!("bindings must form a proper list"));
    }
    let mut bindings = Vec::with_capacity(list.len());
    for binding in list.snapshot() {
        let pair = binding
            .into_list()
            .map_err(|e| bad_form!("expected a (name value) binding, got {}", e.kind()))?;
        if !pair.is_proper() || pair.len() != 2 {
            return Err(bad_form!("each binding must be a two-element list"));
        }
        let name = pair
            .car()
            .expect("length checked")
            .as_symbol()
            .ok_or_else(|| bad_form!("binding name must be a symbol"))?;
        bindings.push((name, pair.nth(1).expect("length checked")));
    }
    Ok(bindings)
}

fn let_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let first = args.pop_front().expect("arity");

    // named let: (let loop ((x e) ...) body ...)
    if let Some(name) = first.as_symbol() {
        let bindings_expr = args
            .pop_front()
            .ok_or_else(|| bad_form!("named let needs a bindings list"))?;
        let bindings = parse_bindings(bindings_expr)?;
        let mut loop_env = env.extend();
        let params = Params::Fixed(bindings.iter().map(|(n, _)| *n).collect());
        let lambda = Procedure::new_lambda(Some(name.to_string()), params, args, loop_env.clone());
        loop_env.bind(name, Expr::Procedure(lambda.clone()));

        let mut call_args = Exprs::new();
        for (_, init) in bindings {
            call_args.push_back(eval_expr(init, env)?);
        }
        return super::apply(&lambda, call_args, env);
    }

    let bindings = parse_bindings(first)?;
    let mut values = Vec::with_capacity(bindings.len());
    for (name, init) in bindings {
        // inits see the enclosing environment, not each other
        values.push((name, eval_expr(init, env)?));
    }
    let mut child = env.extend();
    for (name, value) in values {
        child.bind(name, value);
    }
    eval_body_tail(args, &mut child)
}

fn letrec_common(mut args: Exprs, env: &mut EnvRef, sequential: bool) -> ProcedureResult {
    let bindings = parse_bindings(args.pop_front().expect("arity"))?;
    let mut child = env.extend();

    if sequential {
        for (name, init) in bindings {
            let value = eval_expr(init, &mut child)?;
            child.bind(name, value);
        }
    } else {
        // all inits evaluate before any binding lands; an init that
        // observes a sibling fails with the ordinary unbound error
        let mut values = Vec::with_capacity(bindings.len());
        for (name, init) in bindings {
            values.push((name, eval_expr(init, &mut child)?));
        }
        for (name, value) in values {
            child.bind(name, value);
        }
    }

    eval_body_tail(args, &mut child)
}

fn letrec_form(args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    letrec_common(args, env, false)
}

fn letrec_star_form(args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    letrec_common(args, env, true)
}

fn begin_form(args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    eval_body_tail(args, env)
}

fn cond_form(args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    for clause in args {
        let clause = clause
            .into_list()
            .map_err(|e| bad_form!("cond: expected a clause list, got {}", e.kind()))?;
        if !clause.is_proper() || clause.is_empty() {
            return Err(bad_form!("cond: each clause must be a non-empty proper list"));
        }
        let mut elems = clause.snapshot();
        let test = elems.pop_front().expect("clause is non-empty");

        if test.as_symbol().is_some_and(|s| s.as_str() == "else") {
            return eval_body_tail(elems, env);
        }

        let value = eval_expr(test, env)?;
        if !value.is_truthy() {
            continue;
        }
        if elems.is_empty() {
            return Ok(ProcedureReturn::Value(value));
        }
        if elems[0].as_symbol().is_some_and(|s| s.as_str() == "=>") {
            if elems.len() != 2 {
                return Err(bad_form!("cond: `=>` takes a single receiver expression"));
            }
            let receiver = eval_expr(elems[1].clone(), env)?
                .into_procedure()
                .map_err(|e| EvalError::NotApplicable(format!("{} ({})", e, e.kind())))?;
            return super::apply(&receiver, crate::exprs![value], env);
        }
        return eval_body_tail(elems, env);
    }
    Ok(ProcedureReturn::Value(Expr::Void))
}

fn and_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let Some(last) = args.pop_back() else {
        return Ok(ProcedureReturn::Value(Expr::Boolean(true)));
    };
    for arg in args {
        if !eval_expr(arg, env)?.is_truthy() {
            return Ok(ProcedureReturn::Value(Expr::Boolean(false)));
        }
    }
    Ok(ProcedureReturn::TailCall(last, env.clone()))
}

fn or_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let Some(last) = args.pop_back() else {
        return Ok(ProcedureReturn::Value(Expr::Boolean(false)));
    };
    for arg in args {
        let value = eval_expr(arg, env)?;
        if value.is_truthy() {
            return Ok(ProcedureReturn::Value(value));
        }
    }
    Ok(ProcedureReturn::TailCall(last, env.clone()))
}

fn quasiquote_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    expand::quasiquote(args.pop_front().expect("arity"), env).map(ProcedureReturn::Value)
}

fn unquote_form(_: Exprs, _: &mut EnvRef) -> ProcedureResult {
    Err(bad_form!("unquote outside of quasiquote"))
}

fn unquote_splicing_form(_: Exprs, _: &mut EnvRef) -> ProcedureResult {
    Err(bad_form!("unquote-splicing outside of quasiquote"))
}

fn define_macro_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let target = args.pop_front().expect("arity");
    match target {
        // (define-macro (name . params) body ...)
        signature @ Expr::List(_) => {
            let (name, params) = split_signature(signature)?;
            let transformer =
                Procedure::new_lambda(Some(name.to_string()), params, args, env.clone());
            env.bind_macro(name, transformer);
        }
        // (define-macro name transformer-expr)
        Expr::Symbol(name) => {
            let transformer_expr = args.pop_front().expect("arity");
            if !args.is_empty() {
                return Err(bad_form!("define-macro: a name takes a single transformer"));
            }
            let transformer = eval_expr(transformer_expr, env)?
                .into_procedure()
                .map_err(|e| bad_form!("define-macro: transformer must be a procedure, got {}", e.kind()))?;
            env.bind_macro(name, transformer);
        }
        other => {
            return Err(bad_form!(
                "define-macro: expected signature list or symbol, got {}",
                other.kind()
            ))
        }
    }
    Ok(ProcedureReturn::Value(Expr::Void))
}

/// Reads a Scheme file relative to the environment's working directory
/// and evaluates its forms in `env`, as if spliced into a `begin`.
pub(super) fn eval_file(path_fragment: &str, env: &mut EnvRef) -> EvalResult {
    let path = env.cwd().join(path_fragment);
    let source = fs::read_to_string(&path)
        .map_err(|err| EvalError::Io(format!("failed to read {}: {}", path.display(), err)))?;
    let exprs = parser::parse(&source)
        .map_err(|err| EvalError::Io(format!("failed to parse {}: {}", path.display(), err)))?;
    super::eval_exprs(exprs, env)
}

fn include_form(args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let mut last = Expr::Void;
    for arg in args {
        let path = arg
            .into_string()
            .map_err(|e| bad_form!("include: expected string literals, got {}", e.kind()))?;
        let path = path.borrow().clone();
        last = eval_file(&path, env)?;
    }
    Ok(ProcedureReturn::Value(last))
}

fn do_form(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    // (do ((var init step) ...) (test result ...) command ...)
    let spec_list = args
        .pop_front()
        .expect("arity")
        .into_list()
        .map_err(|e| bad_form!("do: expected a bindings list, got {}", e.kind()))?;
    let mut specs = Vec::with_capacity(spec_list.len());
    for spec in spec_list.snapshot() {
        let spec = spec
            .into_list()
            .map_err(|e| bad_form!("do: expected a (var init step) binding, got {}", e.kind()))?;
        if !spec.is_proper() || spec.is_empty() || spec.len() > 3 {
            return Err(bad_form!("do: bindings take the shape (var init) or (var init step)"));
        }
        let name = spec
            .car()
            .expect("length checked")
            .as_symbol()
            .ok_or_else(|| bad_form!("do: binding name must be a symbol"))?;
        let init = spec.nth(1).unwrap_or(Expr::Void);
        specs.push((name, init, spec.nth(2)));
    }

    let exit = args
        .pop_front()
        .expect("arity")
        .into_list()
        .map_err(|e| bad_form!("do: expected a (test result ...) clause, got {}", e.kind()))?;
    if !exit.is_proper() || exit.is_empty() {
        return Err(bad_form!("do: the exit clause needs a test expression"));
    }
    let mut results = exit.snapshot();
    let test = results.pop_front().expect("checked non-empty");
    let commands = args;

    let mut loop_env = env.extend();
    for (name, init, _) in &specs {
        let value = eval_expr(init.clone(), env)?;
        loop_env.bind(*name, value);
    }

    loop {
        if eval_expr(test.clone(), &mut loop_env)?.is_truthy() {
            return eval_body_tail(results, &mut loop_env);
        }
        for command in &commands {
            eval_expr(command.clone(), &mut loop_env)?;
        }
        // steps all observe the current iteration, then a fresh frame
        // binds the next one
        let mut stepped = Vec::with_capacity(specs.len());
        for (name, _, step) in &specs {
            let value = match step {
                Some(step) => eval_expr(step.clone(), &mut loop_env)?,
                None => loop_env
                    .lookup(*name)
                    .expect("do variable bound by this loop"),
            };
            stepped.push((*name, value));
        }
        let mut next_env = env.extend();
        for (name, value) in stepped {
            next_env.bind(name, value);
        }
        loop_env = next_env;
    }
}
