//! Native value procedures installed into the root environment.
//!
//! Handlers receive their arguments already evaluated; arity is
//! validated by the apply path, so leading `pop_front().expect(..)`
//! calls cannot fail.

use super::{
    Arity, EnvRef, EvalError, EvalResult, Expr, Exprs, NativeFn, ProcedureResult, ProcedureReturn,
};
use crate::exprs;
use std::cmp::Ordering;
use std::io::BufRead;

pub const PROCEDURES: &[(&str, Arity, NativeFn)] = &[
    // arithmetic
    ("+", Arity::AtLeast(0), builtin_add),
    ("-", Arity::AtLeast(1), builtin_sub),
    ("*", Arity::AtLeast(0), builtin_mul),
    ("/", Arity::AtLeast(1), builtin_div),
    ("quotient", Arity::Exact(2), builtin_quotient),
    ("remainder", Arity::Exact(2), builtin_remainder),
    ("modulo", Arity::Exact(2), builtin_modulo),
    ("abs", Arity::Exact(1), builtin_abs),
    ("min", Arity::AtLeast(1), builtin_min),
    ("max", Arity::AtLeast(1), builtin_max),
    // comparison
    ("<", Arity::AtLeast(2), builtin_lt),
    (">", Arity::AtLeast(2), builtin_gt),
    ("<=", Arity::AtLeast(2), builtin_leq),
    (">=", Arity::AtLeast(2), builtin_geq),
    ("=", Arity::AtLeast(2), builtin_numeq),
    // equivalence
    ("eq?", Arity::Exact(2), builtin_iseqv),
    ("eqv?", Arity::Exact(2), builtin_iseqv),
    ("equal?", Arity::Exact(2), builtin_isequal),
    ("not", Arity::Exact(1), builtin_not),
    // type predicates
    ("null?", Arity::Exact(1), builtin_isnull),
    ("pair?", Arity::Exact(1), builtin_ispair),
    ("list?", Arity::Exact(1), builtin_islist),
    ("number?", Arity::Exact(1), builtin_isnumber),
    ("integer?", Arity::Exact(1), builtin_isinteger),
    ("float?", Arity::Exact(1), builtin_isfloat),
    ("symbol?", Arity::Exact(1), builtin_issymbol),
    ("string?", Arity::Exact(1), builtin_isstring),
    ("char?", Arity::Exact(1), builtin_ischar),
    ("boolean?", Arity::Exact(1), builtin_isboolean),
    ("procedure?", Arity::Exact(1), builtin_isprocedure),
    ("zero?", Arity::Exact(1), builtin_iszero),
    ("positive?", Arity::Exact(1), builtin_ispositive),
    ("negative?", Arity::Exact(1), builtin_isnegative),
    ("even?", Arity::Exact(1), builtin_iseven),
    ("odd?", Arity::Exact(1), builtin_isodd),
    // lists
    ("cons", Arity::Exact(2), builtin_cons),
    ("car", Arity::Exact(1), builtin_car),
    ("cdr", Arity::Exact(1), builtin_cdr),
    ("list", Arity::AtLeast(0), builtin_list),
    ("set-car!", Arity::Exact(2), builtin_setcar),
    ("set-cdr!", Arity::Exact(2), builtin_setcdr),
    ("list-ref", Arity::Exact(2), builtin_listref),
    ("list-tail", Arity::Exact(2), builtin_listtail),
    ("make-list", Arity::Range(1, 2), builtin_makelist),
    // control
    ("apply", Arity::AtLeast(2), builtin_apply),
    ("eval", Arity::Exact(1), builtin_eval),
    // strings
    ("make-string", Arity::Range(1, 2), builtin_makestring),
    ("string", Arity::AtLeast(0), builtin_string),
    ("string-length", Arity::Exact(1), builtin_stringlength),
    ("string-ref", Arity::Exact(2), builtin_stringref),
    ("string-set!", Arity::Exact(3), builtin_stringset),
    ("substring", Arity::Exact(3), builtin_substring),
    ("string-append", Arity::AtLeast(0), builtin_stringappend),
    ("string-copy", Arity::Range(1, 3), builtin_stringcopy),
    ("string=?", Arity::Exact(2), builtin_stringeq),
    ("string<?", Arity::Exact(2), builtin_stringlt),
    ("string>?", Arity::Exact(2), builtin_stringgt),
    ("string<=?", Arity::Exact(2), builtin_stringle),
    ("string>=?", Arity::Exact(2), builtin_stringge),
    ("string-upcase", Arity::Exact(1), builtin_stringupcase),
    ("string-downcase", Arity::Exact(1), builtin_stringdowncase),
    ("string->symbol", Arity::Exact(1), builtin_stringtosymbol),
    ("symbol->string", Arity::Exact(1), builtin_symboltostring),
    ("string->number", Arity::Exact(1), builtin_stringtonumber),
    ("number->string", Arity::Exact(1), builtin_numbertostring),
    ("string->list", Arity::Exact(1), builtin_stringtolist),
    ("list->string", Arity::Exact(1), builtin_listtostring),
    // chars
    ("char->integer", Arity::Exact(1), builtin_chartointeger),
    ("integer->char", Arity::Exact(1), builtin_integertochar),
    // i/o
    ("display", Arity::Exact(1), builtin_display),
    ("write", Arity::Exact(1), builtin_write),
    ("newline", Arity::Exact(0), builtin_newline),
    ("read-line", Arity::Exact(0), builtin_readline),
    // system
    ("exit", Arity::Range(0, 1), builtin_exit),
    ("load", Arity::Exact(1), builtin_load),
    ("gensym", Arity::Exact(0), builtin_gensym),
];

fn value(expr: Expr) -> ProcedureResult {
    Ok(ProcedureReturn::Value(expr))
}

// ---------------------------------------------------------------------
// arithmetic
// ---------------------------------------------------------------------

fn num_combine(
    op: &'static str,
    lhs: Expr,
    rhs: Expr,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult {
    match (lhs, rhs) {
        (Expr::Integer(a), Expr::Integer(b)) => int_op(a, b)
            .map(Expr::Integer)
            .ok_or_else(|| EvalError::Arithmetic(format!("{op}: integer overflow"))),
        (Expr::Integer(a), Expr::Float(b)) => Ok(Expr::Float(float_op(a as f64, b))),
        (Expr::Float(a), Expr::Integer(b)) => Ok(Expr::Float(float_op(a, b as f64))),
        (Expr::Float(a), Expr::Float(b)) => Ok(Expr::Float(float_op(a, b))),
        (a, b) => Err(EvalError::Type {
            op,
            expected: "numbers",
            got: format!("{} and {}", a.kind(), b.kind()),
        }),
    }
}

fn builtin_add(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let sum = args.into_iter().try_fold(Expr::Integer(0), |acc, arg| {
        num_combine("+", acc, arg, i64::checked_add, |a, b| a + b)
    })?;
    value(sum)
}

fn builtin_mul(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let product = args.into_iter().try_fold(Expr::Integer(1), |acc, arg| {
        num_combine("*", acc, arg, i64::checked_mul, |a, b| a * b)
    })?;
    value(product)
}

fn builtin_sub(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let first = args.pop_front().expect("arity");
    if args.is_empty() {
        return value(num_combine("-", Expr::Integer(0), first, i64::checked_sub, |a, b| a - b)?);
    }
    let difference = args.into_iter().try_fold(first, |acc, arg| {
        num_combine("-", acc, arg, i64::checked_sub, |a, b| a - b)
    })?;
    value(difference)
}

fn checked_int_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        None
    } else {
        a.checked_div(b)
    }
}

fn builtin_div(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let first = args.pop_front().expect("arity");
    let div = |acc, arg| {
        num_combine("/", acc, arg, checked_int_div, |a, b| a / b).map_err(|err| match err {
            EvalError::Arithmetic(_) => EvalError::Arithmetic("/: division by zero".to_string()),
            other => other,
        })
    };
    if args.is_empty() {
        return value(div(Expr::Integer(1), first)?);
    }
    let quotient = args.into_iter().try_fold(first, div)?;
    value(quotient)
}

fn int_pair(op: &'static str, mut args: Exprs) -> Result<(i64, i64), EvalError> {
    let a = args.pop_front().expect("arity");
    let b = args.pop_front().expect("arity");
    match (a, b) {
        (Expr::Integer(a), Expr::Integer(b)) => Ok((a, b)),
        (a, b) => Err(EvalError::Type {
            op,
            expected: "integers",
            got: format!("{} and {}", a.kind(), b.kind()),
        }),
    }
}

fn builtin_quotient(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let (a, b) = int_pair("quotient", args)?;
    if b == 0 {
        return Err(EvalError::Arithmetic("quotient: division by zero".to_string()));
    }
    value(Expr::Integer(a / b))
}

fn builtin_remainder(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let (a, b) = int_pair("remainder", args)?;
    if b == 0 {
        return Err(EvalError::Arithmetic("remainder: division by zero".to_string()));
    }
    value(Expr::Integer(a % b))
}

fn builtin_modulo(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let (a, b) = int_pair("modulo", args)?;
    if b == 0 {
        return Err(EvalError::Arithmetic("modulo: division by zero".to_string()));
    }
    // result takes the sign of the divisor
    value(Expr::Integer(((a % b) + b) % b))
}

fn builtin_abs(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    match args.pop_front().expect("arity") {
        Expr::Integer(n) => value(Expr::Integer(n.abs())),
        Expr::Float(f) => value(Expr::Float(f.abs())),
        other => Err(EvalError::type_mismatch("abs", "a number", &other)),
    }
}

fn num_cmp(op: &'static str, a: &Expr, b: &Expr) -> Result<Ordering, EvalError> {
    let order = match (a, b) {
        (Expr::Integer(x), Expr::Integer(y)) => Some(x.cmp(y)),
        (Expr::Integer(x), Expr::Float(y)) => (*x as f64).partial_cmp(y),
        (Expr::Float(x), Expr::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Expr::Float(x), Expr::Float(y)) => x.partial_cmp(y),
        _ => {
            return Err(EvalError::Type {
                op,
                expected: "numbers",
                got: format!("{} and {}", a.kind(), b.kind()),
            })
        }
    };
    order.ok_or_else(|| EvalError::Arithmetic(format!("{op}: numbers are not comparable")))
}

fn builtin_chain(
    op: &'static str,
    args: Exprs,
    admits: fn(Ordering) -> bool,
) -> ProcedureResult {
    for (a, b) in args.iter().zip(args.iter().skip(1)) {
        if !admits(num_cmp(op, a, b)?) {
            return value(Expr::Boolean(false));
        }
    }
    value(Expr::Boolean(true))
}

fn builtin_lt(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    builtin_chain("<", args, Ordering::is_lt)
}

fn builtin_gt(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    builtin_chain(">", args, Ordering::is_gt)
}

fn builtin_leq(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    builtin_chain("<=", args, Ordering::is_le)
}

fn builtin_geq(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    builtin_chain(">=", args, Ordering::is_ge)
}

fn builtin_numeq(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    builtin_chain("=", args, Ordering::is_eq)
}

fn pick(args: Exprs, op: &'static str, keep: fn(Ordering) -> bool) -> ProcedureResult {
    let mut iter = args.into_iter();
    let mut best = iter.next().expect("arity");
    if !matches!(best, Expr::Integer(_) | Expr::Float(_)) {
        return Err(EvalError::type_mismatch(op, "numbers", &best));
    }
    for arg in iter {
        if keep(num_cmp(op, &arg, &best)?) {
            best = arg;
        }
    }
    value(best)
}

fn builtin_min(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    pick(args, "min", Ordering::is_lt)
}

fn builtin_max(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    pick(args, "max", Ordering::is_gt)
}

// ---------------------------------------------------------------------
// equivalence and predicates
// ---------------------------------------------------------------------

fn builtin_iseqv(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let a = args.pop_front().expect("arity");
    let b = args.pop_front().expect("arity");
    value(Expr::Boolean(a.is_eqv(&b)))
}

fn builtin_isequal(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let a = args.pop_front().expect("arity");
    let b = args.pop_front().expect("arity");
    value(Expr::Boolean(a.is_equal(&b)))
}

fn builtin_not(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    value(Expr::Boolean(!args.pop_front().expect("arity").is_truthy()))
}

fn predicate(mut args: Exprs, test: fn(&Expr) -> bool) -> ProcedureResult {
    value(Expr::Boolean(test(&args.pop_front().expect("arity"))))
}

fn builtin_isnull(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, Expr::is_empty_list)
}

fn builtin_ispair(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::List(list) if !list.is_empty()))
}

fn builtin_islist(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, Expr::is_proper_list)
}

fn builtin_isnumber(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::Integer(_) | Expr::Float(_)))
}

fn builtin_isinteger(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::Integer(_)))
}

fn builtin_isfloat(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::Float(_)))
}

fn builtin_issymbol(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, Expr::is_symbol)
}

fn builtin_isstring(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::Str(_)))
}

fn builtin_ischar(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::Char(_)))
}

fn builtin_isboolean(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, |e| matches!(e, Expr::Boolean(_)))
}

fn builtin_isprocedure(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    predicate(args, Expr::is_procedure)
}

fn numeric_predicate(
    mut args: Exprs,
    op: &'static str,
    int_test: fn(i64) -> bool,
    float_test: fn(f64) -> bool,
) -> ProcedureResult {
    match args.pop_front().expect("arity") {
        Expr::Integer(n) => value(Expr::Boolean(int_test(n))),
        Expr::Float(f) => value(Expr::Boolean(float_test(f))),
        other => Err(EvalError::type_mismatch(op, "a number", &other)),
    }
}

fn builtin_iszero(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    numeric_predicate(args, "zero?", |n| n == 0, |f| f == 0.0)
}

fn builtin_ispositive(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    numeric_predicate(args, "positive?", |n| n > 0, |f| f > 0.0)
}

fn builtin_isnegative(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    numeric_predicate(args, "negative?", |n| n < 0, |f| f < 0.0)
}

fn int_predicate(
    mut args: Exprs,
    op: &'static str,
    test: fn(i64) -> bool,
) -> ProcedureResult {
    match args.pop_front().expect("arity") {
        Expr::Integer(n) => value(Expr::Boolean(test(n))),
        other => Err(EvalError::type_mismatch(op, "an integer", &other)),
    }
}

fn builtin_iseven(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    int_predicate(args, "even?", |n| n % 2 == 0)
}

fn builtin_isodd(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    int_predicate(args, "odd?", |n| n % 2 != 0)
}

// ---------------------------------------------------------------------
// lists
// ---------------------------------------------------------------------

fn builtin_cons(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let head = args.pop_front().expect("arity");
    let tail = args.pop_front().expect("arity");
    value(Expr::list_with_tail(exprs![head], tail))
}

fn builtin_car(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let list = args
        .pop_front()
        .expect("arity")
        .into_list()
        .map_err(|e| EvalError::type_mismatch("car", "a pair", &e))?;
    match list.car() {
        Some(head) => value(head),
        None => Err(EvalError::type_mismatch("car", "a pair", &Expr::List(list))),
    }
}

fn builtin_cdr(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let list = args
        .pop_front()
        .expect("arity")
        .into_list()
        .map_err(|e| EvalError::type_mismatch("cdr", "a pair", &e))?;
    match list.cdr() {
        Some(tail) => value(tail),
        None => Err(EvalError::type_mismatch("cdr", "a pair", &Expr::List(list))),
    }
}

fn builtin_list(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    value(Expr::new_proper_list(args))
}

fn builtin_setcar(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let target = args.pop_front().expect("arity");
    let new_car = args.pop_front().expect("arity");
    match &target {
        Expr::List(list) if !list.is_empty() => {
            list.set_car(new_car).expect("pair checked non-empty");
            value(Expr::Void)
        }
        _ => Err(EvalError::type_mismatch("set-car!", "a pair", &target)),
    }
}

fn builtin_setcdr(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let target = args.pop_front().expect("arity");
    let new_cdr = args.pop_front().expect("arity");
    match &target {
        Expr::List(list) if !list.is_empty() => {
            list.set_cdr(new_cdr).expect("pair checked non-empty");
            value(Expr::Void)
        }
        _ => Err(EvalError::type_mismatch("set-cdr!", "a pair", &target)),
    }
}

fn proper_list_arg(op: &'static str, args: &mut Exprs) -> Result<super::List, EvalError> {
    let arg = args.pop_front().expect("arity");
    match arg {
        Expr::List(list) if list.is_proper() => Ok(list),
        other => Err(EvalError::type_mismatch(op, "a proper list", &other)),
    }
}

fn index_arg(op: &'static str, args: &mut Exprs) -> Result<usize, EvalError> {
    let arg = args.pop_front().expect("arity");
    match arg {
        Expr::Integer(n) if n >= 0 => Ok(n as usize),
        other => Err(EvalError::type_mismatch(op, "a non-negative integer", &other)),
    }
}

fn builtin_listref(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let list = proper_list_arg("list-ref", &mut args)?;
    let index = index_arg("list-ref", &mut args)?;
    match list.nth(index) {
        Some(elem) => value(elem),
        None => Err(EvalError::Arithmetic(format!(
            "list-ref: index {index} out of bounds for a list of {}",
            list.len()
        ))),
    }
}

fn builtin_listtail(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let list = proper_list_arg("list-tail", &mut args)?;
    let count = index_arg("list-tail", &mut args)?;
    if count > list.len() {
        return Err(EvalError::Arithmetic(format!(
            "list-tail: cannot drop {count} elements from a list of {}",
            list.len()
        )));
    }
    let rest: Exprs = list.snapshot().into_iter().skip(count).collect();
    value(Expr::new_proper_list(rest))
}

fn builtin_makelist(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let count = index_arg("make-list", &mut args)?;
    let fill = args.pop_front().unwrap_or(Expr::Void);
    value(Expr::new_proper_list(
        std::iter::repeat(fill).take(count).collect(),
    ))
}

// ---------------------------------------------------------------------
// control
// ---------------------------------------------------------------------

fn builtin_apply(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let proc = args
        .pop_front()
        .expect("arity")
        .into_procedure()
        .map_err(|e| EvalError::type_mismatch("apply", "a procedure", &e))?;
    let spread = args.pop_back().expect("arity");
    let spread = match spread {
        Expr::List(list) if list.is_proper() => list.snapshot(),
        other => return Err(EvalError::type_mismatch("apply", "a proper list", &other)),
    };
    args.extend(spread);
    super::apply(&proc, args, env)
}

fn builtin_eval(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    Ok(ProcedureReturn::TailCall(
        args.pop_front().expect("arity"),
        env.clone(),
    ))
}

// ---------------------------------------------------------------------
// strings
// ---------------------------------------------------------------------

fn string_arg(
    op: &'static str,
    args: &mut Exprs,
) -> Result<std::rc::Rc<std::cell::RefCell<String>>, EvalError> {
    args.pop_front()
        .expect("arity")
        .into_string()
        .map_err(|e| EvalError::type_mismatch(op, "a string", &e))
}

fn char_arg(op: &'static str, args: &mut Exprs) -> Result<char, EvalError> {
    args.pop_front()
        .expect("arity")
        .into_char()
        .map_err(|e| EvalError::type_mismatch(op, "a character", &e))
}

fn builtin_makestring(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let len = index_arg("make-string", &mut args)?;
    let fill = if args.is_empty() {
        ' '
    } else {
        char_arg("make-string", &mut args)?
    };
    value(Expr::new_string(std::iter::repeat(fill).take(len).collect()))
}

fn builtin_string(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let mut out = String::new();
    for arg in args {
        match arg {
            Expr::Char(c) => out.push(c),
            other => return Err(EvalError::type_mismatch("string", "characters", &other)),
        }
    }
    value(Expr::new_string(out))
}

fn builtin_stringlength(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string-length", &mut args)?;
    let len = s.borrow().chars().count();
    value(Expr::Integer(len as i64))
}

fn builtin_stringref(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string-ref", &mut args)?;
    let index = index_arg("string-ref", &mut args)?;
    let c = s.borrow().chars().nth(index);
    match c {
        Some(c) => value(Expr::Char(c)),
        None => Err(EvalError::Arithmetic(format!(
            "string-ref: index {index} out of bounds"
        ))),
    }
}

fn builtin_stringset(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string-set!", &mut args)?;
    let index = index_arg("string-set!", &mut args)?;
    let c = char_arg("string-set!", &mut args)?;

    let mut chars: Vec<char> = s.borrow().chars().collect();
    match chars.get_mut(index) {
        Some(slot) => *slot = c,
        None => {
            return Err(EvalError::Arithmetic(format!(
                "string-set!: index {index} out of bounds"
            )))
        }
    }
    *s.borrow_mut() = chars.into_iter().collect();
    value(Expr::Void)
}

fn builtin_substring(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("substring", &mut args)?;
    let start = index_arg("substring", &mut args)?;
    let end = index_arg("substring", &mut args)?;
    let chars: Vec<char> = s.borrow().chars().collect();
    if start > end || end > chars.len() {
        return Err(EvalError::Arithmetic(format!(
            "substring: indices {start}..{end} out of bounds"
        )));
    }
    value(Expr::new_string(chars[start..end].iter().collect()))
}

fn builtin_stringappend(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let mut out = String::new();
    for arg in args {
        match arg {
            Expr::Str(s) => out.push_str(&s.borrow()),
            other => return Err(EvalError::type_mismatch("string-append", "strings", &other)),
        }
    }
    value(Expr::new_string(out))
}

fn builtin_stringcopy(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string-copy", &mut args)?;
    let chars: Vec<char> = s.borrow().chars().collect();
    let start = if args.is_empty() {
        0
    } else {
        index_arg("string-copy", &mut args)?
    };
    let end = if args.is_empty() {
        chars.len()
    } else {
        index_arg("string-copy", &mut args)?
    };
    if start > end || end > chars.len() {
        return Err(EvalError::Arithmetic(format!(
            "string-copy: indices {start}..{end} out of bounds"
        )));
    }
    value(Expr::new_string(chars[start..end].iter().collect()))
}

fn string_compare(
    op: &'static str,
    mut args: Exprs,
    admits: fn(Ordering) -> bool,
) -> ProcedureResult {
    let a = string_arg(op, &mut args)?;
    let b = string_arg(op, &mut args)?;
    let order = a.borrow().cmp(&b.borrow());
    value(Expr::Boolean(admits(order)))
}

fn builtin_stringeq(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    string_compare("string=?", args, Ordering::is_eq)
}

fn builtin_stringlt(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    string_compare("string<?", args, Ordering::is_lt)
}

fn builtin_stringgt(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    string_compare("string>?", args, Ordering::is_gt)
}

fn builtin_stringle(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    string_compare("string<=?", args, Ordering::is_le)
}

fn builtin_stringge(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    string_compare("string>=?", args, Ordering::is_ge)
}

fn builtin_stringupcase(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string-upcase", &mut args)?;
    let upper = s.borrow().to_uppercase();
    value(Expr::new_string(upper))
}

fn builtin_stringdowncase(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string-downcase", &mut args)?;
    let lower = s.borrow().to_lowercase();
    value(Expr::new_string(lower))
}

fn builtin_stringtosymbol(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string->symbol", &mut args)?;
    let name = s.borrow().clone();
    value(Expr::new_symbol(&name))
}

fn builtin_symboltostring(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let name = args
        .pop_front()
        .expect("arity")
        .into_symbol()
        .map_err(|e| EvalError::type_mismatch("symbol->string", "a symbol", &e))?;
    value(Expr::new_string(name.to_string()))
}

fn builtin_stringtonumber(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string->number", &mut args)?;
    let text = s.borrow().clone();
    if let Ok(n) = text.parse::<i64>() {
        return value(Expr::Integer(n));
    }
    if let Ok(f) = text.parse::<f64>() {
        return value(Expr::Float(f));
    }
    value(Expr::Boolean(false))
}

fn builtin_numbertostring(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    match args.pop_front().expect("arity") {
        n @ (Expr::Integer(_) | Expr::Float(_)) => value(Expr::new_string(n.to_string())),
        other => Err(EvalError::type_mismatch("number->string", "a number", &other)),
    }
}

fn builtin_stringtolist(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let s = string_arg("string->list", &mut args)?;
    let chars: Exprs = s.borrow().chars().map(Expr::Char).collect();
    value(Expr::new_proper_list(chars))
}

fn builtin_listtostring(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let list = proper_list_arg("list->string", &mut args)?;
    let mut out = String::new();
    for elem in list.snapshot() {
        match elem {
            Expr::Char(c) => out.push(c),
            other => {
                return Err(EvalError::type_mismatch(
                    "list->string",
                    "a list of characters",
                    &other,
                ))
            }
        }
    }
    value(Expr::new_string(out))
}

// ---------------------------------------------------------------------
// chars
// ---------------------------------------------------------------------

fn builtin_chartointeger(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let c = char_arg("char->integer", &mut args)?;
    value(Expr::Integer(c as i64))
}

fn builtin_integertochar(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let n = args
        .pop_front()
        .expect("arity")
        .into_integer()
        .map_err(|e| EvalError::type_mismatch("integer->char", "an integer", &e))?;
    u32::try_from(n)
        .ok()
        .and_then(char::from_u32)
        .map(|c| ProcedureReturn::Value(Expr::Char(c)))
        .ok_or_else(|| EvalError::Arithmetic(format!("integer->char: {n} is not a scalar value")))
}

// ---------------------------------------------------------------------
// i/o and system
// ---------------------------------------------------------------------

fn builtin_display(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    print!("{}", args.pop_front().expect("arity").display_string());
    value(Expr::Void)
}

fn builtin_write(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    print!("{}", args.pop_front().expect("arity"));
    value(Expr::Void)
}

fn builtin_newline(_: Exprs, _: &mut EnvRef) -> ProcedureResult {
    println!();
    value(Expr::Void)
}

fn builtin_readline(_: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| EvalError::Io(format!("could not read input: {err}")))?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    value(Expr::new_string(line))
}

fn builtin_exit(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
    let code = match args.pop_front() {
        None => 0,
        Some(Expr::Integer(n)) => n as i32,
        Some(other) => return Err(EvalError::type_mismatch("exit", "an integer", &other)),
    };
    std::process::exit(code);
}

fn builtin_load(mut args: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let path = string_arg("load", &mut args)?;
    let path = path.borrow().clone();
    // load always targets the root environment
    let mut root = env.root();
    super::forms::eval_file(&path, &mut root).map(ProcedureReturn::Value)
}

fn builtin_gensym(_: Exprs, env: &mut EnvRef) -> ProcedureResult {
    let n = env.next_gensym();
    value(Expr::new_symbol(&format!("#:gensym-{n}")))
}
