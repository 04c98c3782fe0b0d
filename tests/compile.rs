//! Escenarios de compilación de extremo a extremo.

use std::{fs, io::Cursor};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

use rat24s::{lex::Lexer, parse::Parser, semantic::DEFAULT_BASE_ADDRESS, source};

type Symbols = Vec<(String, u32, String)>;

fn compile(input: &str) -> Result<(Symbols, String), String> {
    let (start, stream) = source::read(Cursor::new(input), "test");
    let tokens = Lexer::new(start.clone(), stream)
        .tokenize()
        .map_err(|error| error.val().to_string())?;

    let mut parser =
        Parser::new(start, tokens.into_iter()).with_code_generation(DEFAULT_BASE_ADDRESS);

    parser.parse().map_err(|error| error.val().to_string())?;

    let (_, tables) = parser.finish();
    let (symbols, instructions) = tables.expect("code generation was enabled");

    let symbols = symbols
        .entries()
        .map(|entry| {
            (
                entry.identifier.to_string(),
                entry.address,
                entry.data_type.to_string(),
            )
        })
        .collect();

    Ok((symbols, instructions.raw_listing()))
}

#[test]
fn counting_loop_program() {
    let source = "
        $
        $
        integer i, sum;
        $
        sum = 0;
        i = 1;
        while (i <= 10)
        {
            sum = sum + i;
            i = i + 1;
        }
        endwhile
        print(sum);
        $
    ";

    let (symbols, listing) = compile(source).unwrap();

    assert_eq!(
        symbols,
        vec![
            ("i".to_string(), 5000, "INTEGER".to_string()),
            ("sum".to_string(), 5001, "INTEGER".to_string()),
        ]
    );

    assert_eq!(
        listing,
        "PUSHI 0\nPOPM 5001\nPUSHI 1\nPOPM 5000\nLABEL\nPUSHM 5000\nPUSHI 10\nLEQ\n\
         JUMP0 19\nPUSHM 5001\nPUSHM 5000\nA\nPOPM 5001\nPUSHM 5000\nPUSHI 1\nA\n\
         POPM 5000\nJUMP 5\nPUSHM 5001\nSOUT\n"
    );
}

#[test]
fn deeply_nested_conditionals() {
    let source = "
        $
        $
        integer a, b, c, d;
        $
        if (a == b)
            if (a => b)
                if (a <= b) {
                    a = b + 1;
                    if (a != b)
                        print(c);
                    else
                        print(d);
                    endif
                }
                else {
                    b = b + 3;
                    a = a * b;
                }
                endif
            endif
        endif
        $
    ";

    let (_, listing) = compile(source).unwrap();

    assert_eq!(
        listing,
        "PUSHM 5000\nPUSHM 5001\nEQU\nJUMP0 38\nPUSHM 5000\nPUSHM 5001\nGEQ\nJUMP0 37\n\
         PUSHM 5000\nPUSHM 5001\nLEQ\nJUMP0 28\nPUSHM 5001\nPUSHI 1\nA\nPOPM 5000\n\
         PUSHM 5000\nPUSHM 5001\nNEQ\nJUMP0 24\nPUSHM 5002\nSOUT\nJUMP 26\nPUSHM 5003\n\
         SOUT\nLABEL\nJUMP 36\nPUSHM 5001\nPUSHI 3\nA\nPOPM 5001\nPUSHM 5000\n\
         PUSHM 5001\nM\nPOPM 5000\nLABEL\nLABEL\nLABEL\n"
    );
}

#[test]
fn mixed_types_and_comments() {
    let source = "
        $
        $
        [* contadores *]
        integer red, green;
        boolean done;
        $
        scan(red, green);
        done = false;
        if (red > green) done = true; endif
        $
    ";

    let (symbols, listing) = compile(source).unwrap();

    assert_eq!(
        symbols,
        vec![
            ("red".to_string(), 5000, "INTEGER".to_string()),
            ("green".to_string(), 5001, "INTEGER".to_string()),
            ("done".to_string(), 5002, "BOOLEAN".to_string()),
        ]
    );

    assert_eq!(
        listing,
        "SIN\nPOPM 5000\nSIN\nPOPM 5001\nPUSHI 0\nPOPM 5002\nPUSHM 5000\nPUSHM 5001\n\
         GRT\nJUMP0 13\nPUSHI 1\nPOPM 5002\nLABEL\n"
    );
}

#[test]
fn semantic_failures_report_their_messages() {
    let error = compile("$ $ integer a; boolean b; $ a = b; $").unwrap_err();
    assert!(error.contains("Data types do not match"));

    let error = compile("$ $ real x; $ x = 1; $").unwrap_err();
    assert_eq!(error, "Real data type is not allowed");

    let error = compile("$ $ $ total = 1; $").unwrap_err();
    assert_eq!(error, "Identifier `total` not found");
}

#[test]
fn binary_compiles_to_an_output_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.rat");
    let output = dir.path().join("sample.asm");

    fs::write(&input, "$ $ integer a, b, c; $ a = b + c; $").unwrap();

    Command::cargo_bin("rat24s")
        .unwrap()
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Compilation successful"));

    let written = fs::read_to_string(&output).unwrap();
    assert!(written.starts_with("PUSHM 5001\nPUSHM 5002\nA\nPOPM 5000\n"));
    assert!(written.contains("Symbol Table:"));
    assert!(written.contains("Identifier"));
    assert!(written.contains("5000"));
}

#[test]
fn binary_reports_syntax_mode_verdicts() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.rat");
    let log = dir.path().join("derivations.txt");

    fs::write(&input, "$ function f(x integer) { return; } $ $ y = x; $").unwrap();

    Command::cargo_bin("rat24s")
        .unwrap()
        .arg(&input)
        .arg("--syntax")
        .arg("--output")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Syntax is correct"));

    let written = fs::read_to_string(&log).unwrap();
    assert!(written.contains("<Rat24S> -> <Opt Function Definitions>"));

    fs::write(&input, "$ $ $ a = ; $").unwrap();

    Command::cargo_bin("rat24s")
        .unwrap()
        .arg(&input)
        .arg("--syntax")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Error: Syntax is incorrect"));
}

#[test]
fn binary_writes_the_token_table() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.rat");
    let output = dir.path().join("tokens.txt");

    fs::write(&input, "$ $ integer a; $ a = 3.5; $").unwrap();

    Command::cargo_bin("rat24s")
        .unwrap()
        .arg(&input)
        .arg("--tokens")
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let written = fs::read_to_string(&output).unwrap();
    let mut lines = written.lines();

    assert_eq!(lines.next().unwrap().trim_end(), "token                lexeme");
    assert_eq!(lines.next().unwrap(), "-".repeat(31));
    assert!(written.contains("separator            $"));
    assert!(written.contains("keyword              integer"));
    assert!(written.contains("identifier           a"));
    assert!(written.contains("real                 3.5"));
}

#[test]
fn binary_fails_on_semantic_errors() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sample.rat");
    let output = dir.path().join("sample.asm");

    fs::write(&input, "$ $ real x; $ x = 1; $").unwrap();

    Command::cargo_bin("rat24s")
        .unwrap()
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Compilation failed"))
        .stderr(predicate::str::contains("Real data type is not allowed"));

    // Ninguna salida parcial queda en disco
    assert!(!output.exists());
}

#[test]
fn binary_rejects_missing_files() {
    Command::cargo_bin("rat24s")
        .unwrap()
        .arg("no-such-file.rat")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ERROR: File Not Found"));
}
