//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI con tres modos: extracción de tokens,
//! verificación de sintaxis y generación de código ensamblador, que
//! es el modo por defecto.

use anyhow::Context;
use clap::{crate_version, App, Arg};
use colored::Colorize;

use rat24s::{
    error::Report,
    ir::InstructionTable,
    lex::{Lexer, LexerError, Token},
    parse::{DebugSink, Parser},
    semantic::{SymbolTable, DEFAULT_BASE_ADDRESS},
    source::{self, Located, Location},
};

use std::{
    error::Error,
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::Path,
    process,
};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = App::new("rat24s")
        .version(crate_version!())
        .about("Compile a Rat24S source file")
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("FILE")
                .help("Input file path"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("PATH")
                .help("Output file path"),
        )
        .arg(
            Arg::new("tokens")
                .short('t')
                .long("tokens")
                .help("Extract tokens only, but don't do anything beyond that"),
        )
        .arg(
            Arg::new("syntax")
                .short('s')
                .long("syntax")
                .help("Check the code for syntax errors, but don't do anything beyond that"),
        )
        .arg(
            Arg::new("assembly")
                .short('a')
                .long("assembly")
                .help("Generate assembly code"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose mode"),
        )
        .get_matches();

    let input = args.value_of("input").unwrap();
    let output = args.value_of("output");
    let verbose = args.is_present("verbose");

    if verbose {
        simple_logger::init_with_level(log::Level::Debug)
            .context("Failed to initialize logging")?;
    }

    if !Path::new(input).exists() {
        eprintln!("{}", "ERROR: File Not Found".red());
        eprintln!("{}", format!("The file {} was not found.", input).red());
        process::exit(1);
    }

    let success = if args.is_present("tokens") {
        tokens_mode(input, output, verbose)?
    } else if args.is_present("syntax") {
        syntax_mode(input, output, verbose)?
    } else {
        assembly_mode(input, output, verbose)?
    };

    if !success {
        process::exit(1);
    }

    Ok(())
}

/// Ejecuta el análisis léxico sobre un archivo completo.
#[allow(clippy::type_complexity)]
fn scan(
    input: &str,
) -> anyhow::Result<(Location, Result<Vec<Located<Token>>, Located<LexerError>>)> {
    let file =
        File::open(input).with_context(|| format!("Failed to open for reading: {}", input))?;

    let (start, stream) = source::read(BufReader::new(file), input);
    let tokens = Lexer::new(start.clone(), stream).tokenize();

    Ok((start, tokens))
}

/// Modo `--tokens`: solo análisis léxico.
fn tokens_mode(input: &str, output: Option<&str>, verbose: bool) -> anyhow::Result<bool> {
    let (_, tokens) = scan(input)?;
    let tokens = match tokens {
        Ok(tokens) => tokens,
        Err(error) => return Ok(compilation_failed(Report::from(error))),
    };

    if verbose {
        for token in &tokens {
            println!(
                "{:<20} {}",
                token.val().kind().to_string(),
                token.val().lexeme()
            );
        }
    }

    if let Some(path) = output {
        write_token_table(&tokens, path)
            .with_context(|| format!("Failed to write to file: {}", path))?;
    }

    Ok(true)
}

/// Modo `--syntax`: análisis sintáctico sin generación de código.
fn syntax_mode(input: &str, output: Option<&str>, verbose: bool) -> anyhow::Result<bool> {
    let (start, tokens) = scan(input)?;
    let tokens = match tokens {
        Ok(tokens) => tokens,
        Err(error) => {
            eprint!("{}", Report::from(error));
            println!("{}", "Error: Syntax is incorrect".red());
            return Ok(false);
        }
    };

    let token_count = tokens.len();
    let mut parser = Parser::new(start, tokens.into_iter());
    let result = parser.parse();

    let (derivations, _) = parser.finish();

    if verbose {
        for line in derivations.lines() {
            println!("{}", line);
        }
    }

    // La bitácora se escribe aun cuando el análisis falla
    if let Some(path) = output {
        let mut file = BufWriter::new(
            File::create(path).with_context(|| format!("Failed to write to file: {}", path))?,
        );

        for line in derivations.lines() {
            writeln!(file, "{}", line)?;
        }

        file.flush()?;
    }

    println!("{}", "-".repeat(50));
    println!("Filename: {}", input);
    println!("Number of Tokens: {}", token_count);

    let success = match result {
        Ok(()) => {
            println!("{}", "Syntax is correct".green());
            true
        }

        Err(error) => {
            eprint!("{}", Report::from(error));
            println!("{}", "Error: Syntax is incorrect".red());
            false
        }
    };

    println!("{}", "-".repeat(50));
    Ok(success)
}

/// Modo por defecto: generación de código ensamblador.
fn assembly_mode(input: &str, output: Option<&str>, verbose: bool) -> anyhow::Result<bool> {
    let (start, tokens) = scan(input)?;
    let tokens = match tokens {
        Ok(tokens) => tokens,
        Err(error) => return Ok(compilation_failed(Report::from(error))),
    };

    let mut parser = Parser::with_sink(start, tokens.into_iter(), DebugSink::default())
        .with_code_generation(DEFAULT_BASE_ADDRESS);

    let result = parser.parse();
    let (_, tables) = parser.finish();
    let (symbols, instructions) = tables.expect("code generation was enabled");

    if let Err(error) = result {
        // No se persiste salida parcial alguna
        return Ok(compilation_failed(Report::from(error)));
    }

    if let Some(path) = output {
        write_assembly(&symbols, &instructions, path)
            .with_context(|| format!("Failed to write to file: {}", path))?;
    }

    if verbose {
        print_tables(&symbols, &instructions)?;
    }

    println!("{}", "*".repeat(50));
    println!("Filename: {}", input);
    println!("{}", "Compilation successful".green());
    println!("{}", "*".repeat(50));

    Ok(true)
}

fn compilation_failed<E: Error>(report: Report<E>) -> bool {
    eprint!("{}", report);
    println!("{}", "*".repeat(50));
    println!("{}", "Compilation failed".red());
    println!("{}", "*".repeat(50));

    false
}

fn write_token_table(tokens: &[Located<Token>], path: &str) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "{:<20} {:<10}", "token", "lexeme")?;
    writeln!(file, "{}", "-".repeat(31))?;

    for token in tokens {
        writeln!(
            file,
            "{:<20} {}",
            token.val().kind().to_string(),
            token.val().lexeme()
        )?;
    }

    file.flush()
}

fn write_assembly(
    symbols: &SymbolTable,
    instructions: &InstructionTable,
    path: &str,
) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);

    file.write_all(instructions.raw_listing().as_bytes())?;

    writeln!(file)?;
    writeln!(file)?;
    writeln!(file, "Symbol Table:")?;
    writeln!(file, "{:<15}{:<10}{:<15}", "Identifier", "Address", "Type")?;
    writeln!(file, "{}", "-".repeat(40))?;

    for entry in symbols.entries() {
        writeln!(
            file,
            "{:<15}{:<10}{:<15}",
            entry.identifier.to_string(),
            entry.address,
            entry.data_type.to_string()
        )?;
    }

    file.flush()
}

fn print_tables(symbols: &SymbolTable, instructions: &InstructionTable) -> io::Result<()> {
    println!("{:<15}{:<10}{:<15}", "Identifier", "Address", "Type");
    println!("{}", "-".repeat(40));

    for entry in symbols.entries() {
        println!(
            "{:<15}{:<10}{:<15}",
            entry.identifier.to_string(),
            entry.address,
            entry.data_type.to_string()
        );
    }

    println!();
    instructions.write_table(&mut io::stdout())
}
