use vesper::{Engine, Expr};

fn run(source: &str) -> Expr {
    let mut engine = Engine::new();
    engine.eval(source).expect(source)
}

fn validate(steps: Vec<(&str, &str)>) {
    let mut engine = Engine::new();
    for (code, expected) in steps {
        let value = engine.eval(code).expect(code);
        let printed = match value {
            Expr::Void => String::new(),
            value => value.display_string(),
        };
        assert_eq!(printed, expected, "we are testing that {code} gives {expected}");
    }
}

#[test]
fn test_arithmetic_scenario() {
    assert_eq!(run("(+ 1 2 3)"), Expr::Integer(6));
}

#[test]
fn test_factorial_scenario() {
    let value = run("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 20)");
    assert_eq!(value, Expr::Integer(2_432_902_008_176_640_000));
}

#[test]
fn test_tail_recursion_scenario() {
    let value = run("(define (loop n) (if (= n 0) 'ok (loop (- n 1)))) (loop 1000000)");
    assert_eq!(value, Expr::new_symbol("ok"));
}

#[test]
fn test_closure_counter_scenario() {
    let value = run("(define (mk) (let ((c 0)) (lambda () (set! c (+ c 1)) c)))
                     (define f (mk))
                     (f) (f) (f)");
    assert_eq!(value, Expr::Integer(3));
}

#[test]
fn test_swap_macro_scenario() {
    let value = run("(define-macro (swap! a b)
                       (let ((t (gensym)))
                         `(let ((,t ,a)) (set! ,a ,b) (set! ,b ,t))))
                     (define x 1)
                     (define y 2)
                     (swap! x y)
                     (list x y)");
    assert_eq!(value.display_string(), "(2 1)");
}

#[test]
fn test_lazy_stream_scenario() {
    let value = run("(define (ints n) (lazy-cons n (ints (+ n 1))))
                     (head (lazy-map (lambda (x) (* x x)) (ints 1)) 4)");
    assert_eq!(value.display_string(), "(1 4 9 16)");
}

#[test]
fn test_write_read_eval_roundtrip() {
    let mut engine = Engine::new();
    let samples = vec![
        Expr::Integer(42),
        Expr::Integer(-7),
        Expr::Boolean(true),
        Expr::Boolean(false),
        Expr::Char('q'),
        Expr::Char(' '),
        Expr::new_string("hello \"there\"".to_string()),
    ];
    for value in samples {
        let written = value.to_string();
        let reread = engine.eval(&written).expect(&written);
        assert!(value.is_equal(&reread), "roundtrip failed for {written}");
    }
}

#[test]
fn test_define_then_set_visibility() {
    validate(vec![
        ("(define s 1)", ""),
        ("s", "1"),
        ("(set! s 2)", ""),
        ("s", "2"),
    ]);
}

#[test]
fn test_reverse_involution() {
    validate(vec![
        ("(define xs '(1 2 3 4 5))", ""),
        ("(= (length (reverse xs)) (length xs))", "#t"),
        ("(equal? (reverse (reverse xs)) xs)", "#t"),
        ("(reverse '())", "()"),
    ]);
}

#[test]
fn test_macro_matches_procedure_application() {
    // a macro call must equal the transformer applied to the quoted
    // argument forms
    validate(vec![
        ("(define (t a b) (list 'begin a b))", ""),
        ("(define-macro m t)", ""),
        ("(define by-macro (m (+ 1 2) (* 3 4)))", ""),
        ("(define by-hand (eval (t '(+ 1 2) '(* 3 4))))", ""),
        ("(equal? by-macro by-hand)", "#t"),
    ]);
}

#[test]
fn test_quasiquote_laws() {
    validate(vec![
        ("(define b 5)", ""),
        ("(define xs '(10 20))", ""),
        ("(equal? `(a ,b c) (list 'a b 'c))", "#t"),
        ("(equal? `(a ,@xs b) (append (list 'a) xs (list 'b)))", "#t"),
    ]);
}

#[test]
fn test_prelude_list_utilities() {
    validate(vec![
        ("(length '())", "0"),
        ("(length '(4 5 6))", "3"),
        ("(append '(1 2) '(3) '() '(4))", "(1 2 3 4)"),
        ("(map (lambda (x) (* 2 x)) '(1 2 3))", "(2 4 6)"),
        ("(filter odd? '(1 2 3 4 5))", "(1 3 5)"),
        ("(member 2 '(1 2 3))", "(2 3)"),
        ("(member 9 '(1 2 3))", "#f"),
        ("(assoc 'b '((a 1) (b 2)))", "(b 2)"),
        ("(assq 'c '((a 1) (b 2)))", "#f"),
        ("(memv 2 '(1 2 3))", "(2 3)"),
        ("(caddr '(1 2 3))", "3"),
        ("(cadddr '(1 2 3 4))", "4"),
        ("(last-pair '(1 2 3))", "(3)"),
        ("(fold-right cons '() '(1 2 3))", "(1 2 3)"),
    ]);
}

#[test]
fn test_prelude_caar_fails_on_short_lists() {
    let mut engine = Engine::new();
    assert!(engine.eval("(caar '(1))").is_err());
    assert!(engine.eval("(cadr '(1))").is_err());
}

#[test]
fn test_prelude_derived_forms() {
    validate(vec![
        ("(define a 42)", ""),
        ("(when (> 1 0) (set! a 44))", ""),
        ("a", "44"),
        ("(when (> 0 1) (set! a 43))", ""),
        ("a", "44"),
        ("(unless (> 1 0) (set! a 41))", ""),
        ("a", "44"),
        ("(let* ((x 1) (y (+ x 1)) (z (* y 2))) (list x y z))", "(1 2 4)"),
        ("(case (* 2 3) ((2 3 5 7) 'prime) ((1 4 6 8 9) 'composite) (else 'unknown))", "composite"),
        ("(case 'z ((a b) 1) (else 'fallthrough))", "fallthrough"),
    ]);
}

#[test]
fn test_prelude_match() {
    validate(vec![
        ("(match 5 (1 'one) (5 'five) (else 'other))", "five"),
        ("(match '(1 2) ((a b) (+ a b)) (else 'no))", "3"),
        ("(match '(1 2 3) ((x . rest) rest) (else 'no))", "(2 3)"),
        ("(match 'sym ('sym 'quoted) (else 'no))", "quoted"),
        ("(match '(9) (_ 'wild))", "wild"),
        ("(match '(1 2) ((a b c) 'three) (else 'fallthrough))", "fallthrough"),
    ]);
}

#[test]
fn test_delay_force_memoizes() {
    validate(vec![
        ("(define n 0)", ""),
        ("(define p (delay (begin (set! n (+ n 1)) n)))", ""),
        ("(force p)", "1"),
        ("(force p)", "1"),
        ("n", "1"),
    ]);
}

#[test]
fn test_lazy_filter_and_ref() {
    validate(vec![
        ("(define (ints n) (lazy-cons n (ints (+ n 1))))", ""),
        ("(head (lazy-filter even? (ints 1)) 3)", "(2 4 6)"),
        ("(lazy-ref (ints 0) 5)", "5"),
    ]);
}

#[test]
fn test_do_loop_through_engine() {
    validate(vec![(
        "(do ((i 0 (+ i 1)) (acc '() (cons i acc))) ((= i 4) (reverse acc)))",
        "(0 1 2 3)",
    )]);
}

#[test]
fn test_named_let_builds_lists() {
    validate(vec![(
        "(let loop ((i 0) (acc '()))
           (if (= i 3) (reverse acc) (loop (+ i 1) (cons i acc))))",
        "(0 1 2)",
    )]);
}

#[test]
fn test_string_sharing_through_engine() {
    validate(vec![
        ("(define s (make-string 3 #\\x))", ""),
        ("(define alias s)", ""),
        ("(string-set! s 0 #\\y)", ""),
        ("alias", "yxx"),
    ]);
}

#[test]
fn test_shared_list_mutation_through_engine() {
    validate(vec![
        ("(define xs (list 1 2 3))", ""),
        ("(define ys xs)", ""),
        ("(set-car! xs 99)", ""),
        ("ys", "(99 2 3)"),
        // car/cdr produce fresh lists, so mutating the original does
        // not retroactively change an earlier cdr
        ("(define tail (cdr xs))", ""),
        ("(set-car! xs 1)", ""),
        ("tail", "(2 3)"),
    ]);
}

#[test]
fn test_error_does_not_poison_engine() {
    let mut engine = Engine::new();
    assert!(engine.eval("(car '())").is_err());
    assert_eq!(engine.eval("(+ 1 1)").unwrap(), Expr::Integer(2));
}

#[test]
fn test_deep_non_tail_recursion_still_works() {
    // non-tail recursion uses the host stack, but a reasonable depth
    // must not overflow
    let value = run("(define (sum n) (if (= n 0) 0 (+ n (sum (- n 1))))) (sum 1000)");
    assert_eq!(value, Expr::Integer(500_500));
}

#[test]
fn test_register_fn_roundtrip() {
    use vesper::{Arity, EnvRef, Exprs, ProcedureKind, ProcedureResult, ProcedureReturn};

    fn sum3(args: Exprs, _: &mut EnvRef) -> ProcedureResult {
        let mut sum = 0;
        for arg in args {
            match arg {
                Expr::Integer(n) => sum += n,
                other => {
                    return Err(vesper::EvalError::Type {
                        op: "sum3",
                        expected: "integers",
                        got: other.kind().to_string(),
                    })
                }
            }
        }
        Ok(ProcedureReturn::Value(Expr::Integer(sum)))
    }

    let mut engine = Engine::new();
    engine.register_fn("sum3", ProcedureKind::Value, Arity::Exact(3), sum3);
    assert!(engine.env().has("sum3"));
    assert_eq!(engine.eval("(sum3 1 2 3)").unwrap(), Expr::Integer(6));
    assert!(engine.eval("(sum3 1 2)").is_err());
}

#[test]
fn test_register_special_form_sees_raw_forms() {
    use vesper::{Arity, EnvRef, Exprs, ProcedureKind, ProcedureResult, ProcedureReturn};

    // returns its first argument unevaluated, like quote
    fn first_form(mut args: Exprs, _: &mut EnvRef) -> ProcedureResult {
        Ok(ProcedureReturn::Value(args.pop_front().expect("arity")))
    }

    let mut engine = Engine::new();
    engine.register_fn(
        "first-form",
        ProcedureKind::SpecialForm,
        Arity::Exact(1),
        first_form,
    );
    let value = engine.eval("(first-form (+ 1 2))").unwrap();
    assert_eq!(value.to_string(), "(+ 1 2)");
}

#[test]
fn test_load_resolves_against_cwd() {
    use std::io::Write;

    let dir = std::env::temp_dir().join(format!("vesper-load-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("lib.scm");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "(define from-file 99)").unwrap();
    drop(file);

    let mut engine = Engine::new();
    engine.set_cwd(dir.clone());
    engine.eval("(load \"lib.scm\")").unwrap();
    assert_eq!(engine.eval("from-file").unwrap(), Expr::Integer(99));

    let mut engine = Engine::new();
    engine.set_cwd(dir.clone());
    engine.eval("(include \"lib.scm\")").unwrap();
    assert_eq!(engine.eval("from-file").unwrap(), Expr::Integer(99));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_quicksort_program() {
    let value = run("
        (define (quicksort lst)
          (if (null? lst)
              '()
              (let ((pivot (car lst))
                    (rest (cdr lst)))
                (append
                  (quicksort (filter (lambda (x) (< x pivot)) rest))
                  (list pivot)
                  (quicksort (filter (lambda (x) (>= x pivot)) rest))))))
        (quicksort '(34 7 23 32 5 62 32 2 1 6 45 78 99 3))
    ");
    assert_eq!(
        value.display_string(),
        "(1 2 3 5 6 7 23 32 32 34 45 62 78 99)"
    );
}

#[test]
fn test_ackermann_program() {
    let value = run("
        (define (ackermann m n)
          (cond
            ((= m 0) (+ n 1))
            ((= n 0) (ackermann (- m 1) 1))
            (else (ackermann (- m 1) (ackermann m (- n 1))))))
        (ackermann 2 3)
    ");
    assert_eq!(value, Expr::Integer(9));
}
