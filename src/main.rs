use argh::FromArgs;
use rustyline::error::ReadlineError;
use rustyline::highlight::MatchingBracketHighlighter;
use rustyline::history::MemHistory;
use rustyline::validate::MatchingBracketValidator;
use rustyline::{Completer, CompletionType, Editor, Helper, Highlighter, Hinter, Validator};
use std::path::PathBuf;
use std::process::ExitCode;
use vesper::{Engine, Expr};

#[derive(FromArgs)]
/// A pragmatic R7RS-subset Scheme interpreter. Runs FILE when given,
/// otherwise starts the interactive REPL.
struct Args {
    /// evaluate the given expression and print its result
    #[argh(option, short = 'e')]
    eval: Option<String>,

    /// script file to run
    #[argh(positional)]
    file: Option<PathBuf>,
}

#[derive(Default, Validator, Helper, Completer, Hinter, Highlighter)]
struct InputValidator {
    #[rustyline(Validator)]
    brackets: MatchingBracketValidator,
    #[rustyline(Highlighter)]
    highlighter: MatchingBracketHighlighter,
}

fn repl(mut engine: Engine) -> ExitCode {
    println!("vesper {}", env!("CARGO_PKG_VERSION"));
    println!("Use (exit), or Ctrl-D to leave the REPL");

    let config = rustyline::config::Config::builder()
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .build();
    let mut editor = match Editor::with_history(config, MemHistory::default()) {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("failed to start the line editor: {err}");
            return ExitCode::FAILURE;
        }
    };
    editor.set_helper(Some(InputValidator::default()));

    loop {
        match editor.readline("> ") {
            Ok(input) => {
                if input.trim().is_empty() {
                    continue;
                }
                // errors end the current form, never the session
                match engine.eval(&input) {
                    Ok(Expr::Void) => {}
                    Ok(value) => println!("{}", value.display_string()),
                    Err(err) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("read error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Args = argh::from_env();
    let mut engine = Engine::new();

    if let Some(source) = args.eval {
        return match engine.eval(&source) {
            Ok(value) => {
                println!("{}", value.display_string());
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    if let Some(file) = args.file {
        let source = match std::fs::read_to_string(&file) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("failed to read {}: {}", file.display(), err);
                return ExitCode::FAILURE;
            }
        };
        if let Some(dir) = file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            engine.set_cwd(dir.to_path_buf());
        }
        return match engine.eval(&source) {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    repl(engine)
}
