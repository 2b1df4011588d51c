//! The pre-evaluation rewriter: user macros and quasiquotation.
//!
//! Macros are ordinary lambdas living in the environment's macro
//! namespace. The evaluator hands the raw argument forms to the
//! transformer through the normal apply path; the returned form
//! replaces the original and is re-expanded until its head no longer
//! names a macro.

use super::{eval_expr, EnvRef, EvalError, EvalResult, Expr, Exprs, ListKind, Procedure};
use crate::exprs;
use log::debug;

/// If `expr` is a proper non-empty list whose head symbol resolves in
/// the macro namespace, yields the transformer and the raw argument
/// forms.
pub(super) fn macro_call(expr: &Expr, env: &EnvRef) -> Option<(Procedure, Exprs)> {
    let Expr::List(list) = expr else {
        return None;
    };
    if !list.is_proper() || list.is_empty() {
        return None;
    }
    let name = list.car()?.as_symbol()?;
    let transformer = env.macro_lookup(name)?;
    let mut forms = list.snapshot();
    forms.pop_front();
    Some((transformer, forms))
}

/// Runs a transformer on raw argument forms; its return value is the
/// replacement form. Transformer failures surface as macro-expansion
/// errors.
pub(super) fn apply_transformer(
    transformer: &Procedure,
    forms: Exprs,
    env: &mut EnvRef,
) -> EvalResult {
    debug!("expanding macro {}", transformer.name());
    let expanded = match super::apply(transformer, forms, env)
        .map_err(|err| EvalError::Macro(err.to_string()))?
    {
        super::ProcedureReturn::Value(expr) => expr,
        super::ProcedureReturn::TailCall(expr, mut tail_env) => eval_expr(expr, &mut tail_env)
            .map_err(|err| EvalError::Macro(err.to_string()))?,
    };
    Ok(expanded)
}

/// Expands a `quasiquote` template. Substitution only happens at depth
/// zero; nested quasiquotes preserve their unquote forms as data.
pub(super) fn quasiquote(template: Expr, env: &mut EnvRef) -> EvalResult {
    qq_expand(template, 1, env)
}

fn quotation_head(list: &super::List) -> Option<(&'static str, usize)> {
    let head = list.car()?.as_symbol()?;
    let tag = match head.as_str() {
        "unquote" => "unquote",
        "unquote-splicing" => "unquote-splicing",
        "quasiquote" => "quasiquote",
        _ => return None,
    };
    Some((tag, list.len()))
}

fn tagged(tag: &str, inner: Expr) -> Expr {
    Expr::new_proper_list(exprs![Expr::new_symbol(tag), inner])
}

fn qq_expand(expr: Expr, depth: usize, env: &mut EnvRef) -> EvalResult {
    let Expr::List(list) = &expr else {
        return Ok(expr);
    };
    if list.is_empty() {
        return Ok(expr);
    }

    if list.is_proper() {
        if let Some((tag, len)) = quotation_head(list) {
            if len != 2 {
                return Err(EvalError::Macro(format!("{tag} takes a single argument")));
            }
            let inner = list.nth(1).expect("length checked");
            match (tag, depth) {
                ("unquote", 1) => return eval_expr(inner, env),
                ("unquote", _) => return Ok(tagged(tag, qq_expand(inner, depth - 1, env)?)),
                ("unquote-splicing", _) => {
                    return Err(EvalError::Macro(
                        "unquote-splicing is only valid inside a list template".to_string(),
                    ))
                }
                ("quasiquote", _) => return Ok(tagged(tag, qq_expand(inner, depth + 1, env)?)),
                _ => unreachable!("quotation_head yields known tags"),
            }
        }
    }

    let kind = list.kind();
    let mut elems = list.snapshot();
    let mut total = elems.len();

    // `(a b . ,x)` reads in as `(a b unquote x)`; the trailing unquote
    // is a tail substitution, not an element
    let mut unquoted_tail = None;
    if matches!(kind, ListKind::Proper)
        && total >= 3
        && elems[total - 2]
            .as_symbol()
            .is_some_and(|s| s.as_str() == "unquote")
    {
        let tail_form = elems.pop_back().expect("length checked");
        elems.pop_back();
        total -= 2;
        unquoted_tail = Some(tail_form);
    }

    let mut out = Exprs::new();
    for (index, elem) in elems.into_iter().enumerate() {
        let in_tail_slot = matches!(kind, ListKind::Dotted) && index + 1 == total;

        // element-level splicing
        if !in_tail_slot {
            if let Expr::List(inner) = &elem {
                if inner.is_proper() {
                    if let Some(("unquote-splicing", len)) = quotation_head(inner) {
                        if len != 2 {
                            return Err(EvalError::Macro(
                                "unquote-splicing takes a single argument".to_string(),
                            ));
                        }
                        let arg = inner.nth(1).expect("length checked");
                        if depth == 1 {
                            let value = eval_expr(arg, env)?;
                            match value {
                                Expr::List(spliced) if spliced.is_proper() => {
                                    out.extend(spliced.snapshot());
                                }
                                other => {
                                    return Err(EvalError::Macro(format!(
                                        "unquote-splicing expects a proper list, got {}",
                                        other.kind()
                                    )))
                                }
                            }
                        } else {
                            out.push_back(tagged(
                                "unquote-splicing",
                                qq_expand(arg, depth - 1, env)?,
                            ));
                        }
                        continue;
                    }
                }
            }
            out.push_back(qq_expand(elem, depth, env)?);
        } else {
            // the improper tail: substitute, then normalize so a list
            // value is absorbed rather than nested
            let tail = qq_expand(elem, depth, env)?;
            return Ok(Expr::list_with_tail(out, tail));
        }
    }

    match unquoted_tail {
        Some(tail_form) if depth == 1 => {
            let tail = eval_expr(tail_form, env)?;
            Ok(Expr::list_with_tail(out, tail))
        }
        Some(tail_form) => {
            out.push_back(Expr::new_symbol("unquote"));
            out.push_back(qq_expand(tail_form, depth - 1, env)?);
            Ok(Expr::new_proper_list(out))
        }
        None => Ok(Expr::new_proper_list(out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{eval_exprs, root_env};
    use crate::parser::parse;

    fn eval_str(source: &str, env: &mut EnvRef) -> EvalResult {
        eval_exprs(parse(source).expect("test source must parse"), env)
    }

    fn check(source: &str, printed: &str) {
        let mut env = root_env();
        let result = eval_str(source, &mut env).expect(source);
        assert_eq!(result.to_string(), printed, "source: {source}");
    }

    #[test]
    fn test_quasiquote_is_quote_without_unquote() {
        check("`(lambda (x) (* x x))", "(lambda (x) (* x x))");
        check("`x", "x");
        check("`5", "5");
    }

    #[test]
    fn test_unquote_substitutes_at_depth_zero() {
        check("`(+ 1 ,(+ 2 3))", "(+ 1 5)");
        check("(define b 7) `(a ,b c)", "(a 7 c)");
    }

    #[test]
    fn test_unquote_splicing_inlines_elements() {
        check("`(+ 1 ,@(list 2 3))", "(+ 1 2 3)");
        check("`(1 ,@'() 2)", "(1 2)");
        check("`(,@(list 1 2) ,@(list 3))", "(1 2 3)");
    }

    #[test]
    fn test_nested_quasiquote_preserves_unquote() {
        check("``(a ,b)", "`(a ,b)");
        check("(define b 7) `(a `(b ,(c ,b)))", "(a `(b ,(c 7)))");
    }

    #[test]
    fn test_quasiquote_dotted_tail() {
        check("(define b 2) `(1 . ,b)", "(1 . 2)");
        check("`(1 . ,(list 2 3))", "(1 2 3)");
    }

    #[test]
    fn test_splicing_non_list_is_an_error() {
        let mut env = root_env();
        assert!(matches!(
            eval_str("`(1 ,@2)", &mut env),
            Err(EvalError::Macro(_))
        ));
    }

    #[test]
    fn test_bare_unquote_is_an_error() {
        let mut env = root_env();
        assert!(matches!(
            eval_str(",x", &mut env),
            Err(EvalError::BadForm(_))
        ));
    }

    #[test]
    fn test_transformer_error_becomes_macro_error() {
        let mut env = root_env();
        eval_str("(define-macro (boom) (car '()))", &mut env).unwrap();
        assert!(matches!(
            eval_str("(boom)", &mut env),
            Err(EvalError::Macro(_))
        ));
    }

    #[test]
    fn test_macro_expansion_reexpands_heads() {
        let mut env = root_env();
        eval_str("(define-macro (one) '(two))", &mut env).unwrap();
        eval_str("(define-macro (two) 42)", &mut env).unwrap();
        assert_eq!(eval_str("(one)", &mut env), Ok(Expr::Integer(42)));
    }

    #[test]
    fn test_gensym_hygiene_pattern() {
        let mut env = root_env();
        let source = "
            (define-macro (swap! a b)
              (let ((t (gensym)))
                `(let ((,t ,a)) (set! ,a ,b) (set! ,b ,t))))
            (define x 1)
            (define y 2)
            (swap! x y)
            (list x y)
        ";
        let result = eval_str(source, &mut env).unwrap();
        assert_eq!(result.to_string(), "(2 1)");
    }
}
