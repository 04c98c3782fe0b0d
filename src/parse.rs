//! Análisis sintáctico.
//!
//! El parser es de descenso recursivo con un token de anticipación,
//! sobre la gramática de Rat24S transformada a LL: la recursión por la
//! izquierda de expresiones, términos, listas de sentencias, listas de
//! identificadores, declaraciones, parámetros y definiciones de función
//! se factorizó en producciones "prime". Cada producción registra su
//! derivación en una bitácora consultable tras el análisis.
//!
//! La generación de código está embebida como esquema de traducción:
//! cuando se encuentra habilitada, las producciones insertan símbolos,
//! emiten instrucciones de máquina de pila y resuelven saltos hacia
//! adelante mediante back-patching, todo en la misma pasada. El primer
//! error sintáctico o semántico termina el análisis.

use std::iter::Peekable;

use thiserror::Error;

use crate::{
    ir::{Address, CodeGenError, InstructionTable, Opcode},
    lex::{Identifier, Keyword, Operator, Separator, Token},
    semantic::{self, DataType, SemanticError, SymbolTable, TypeSet},
    source::{Located, Location},
};

/// Un flujo de tokens con ubicaciones.
pub trait TokenStream: Iterator<Item = Located<Token>> {}

impl<I: Iterator<Item = Located<Token>>> TokenStream for I {}

/// Error de análisis sintáctico.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("The input is empty")]
    EmptyInput,

    #[error("Expected {expected}, found {found}")]
    Expected { expected: Token, found: Token },

    #[error("Encountered End of File unexpectedly")]
    UnexpectedEof,

    #[error("Expected End Of File, but found {0}")]
    ExpectedEof(Token),

    #[error("Expected an Identifier, but found {0}")]
    ExpectedIdentifier(Token),

    #[error("Qualifier is missing. Expected `integer`, `real`, or `boolean`, but found {0}")]
    MissingQualifier(Token),

    #[error("Statement is missing. Expected a statement, but found {0}")]
    MissingStatement(Token),

    #[error("Assignment operator is missing. Expected `=`, but found {0}")]
    MissingAssign(Token),

    #[error("A keyword is missing. Expected `else` or `endif`, but found {0}")]
    MissingElseOrEndif(Token),

    #[error("Relational operator is missing. Expected `==`, `!=`, `>`, `<`, `<=`, or `=>`, but found {0}")]
    MissingRelop(Token),

    #[error("Expected an identifier, a literal, or a parenthesized expression, but found {0}")]
    ExpectedPrimary(Token),

    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
}

/// Destino de la bitácora de derivaciones.
pub trait LogSink {
    fn log(&mut self, line: &str);
}

/// Sink por defecto: acumula las líneas en memoria, en orden.
#[derive(Default)]
pub struct Derivations {
    lines: Vec<String>,
}

impl Derivations {
    /// Líneas registradas hasta el momento.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Toma ownership de las líneas registradas.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl LogSink for Derivations {
    fn log(&mut self, line: &str) {
        self.lines.push(line.to_owned());
    }
}

/// Sink que reenvía cada línea al log global con nivel debug.
#[derive(Default)]
pub struct DebugSink;

impl LogSink for DebugSink {
    fn log(&mut self, line: &str) {
        log::debug!("{}", line);
    }
}

/// Estado de generación de código del parser.
struct CodeGen {
    symbols: SymbolTable,
    instructions: InstructionTable,
}

type Parse<T> = Result<T, Located<ParserError>>;

fn lift(error: Located<SemanticError>) -> Located<ParserError> {
    error.map(ParserError::Semantic)
}

/// El analizador sintáctico.
pub struct Parser<I: TokenStream, L: LogSink = Derivations> {
    tokens: Peekable<I>,
    last_known: Location,
    sink: L,
    codegen: Option<CodeGen>,
}

impl<I: TokenStream> Parser<I, Derivations> {
    /// Crea un parser que solo valida sintaxis.
    pub fn new(start: Location, tokens: I) -> Self {
        Parser::with_sink(start, tokens, Derivations::default())
    }
}

impl<I: TokenStream, L: LogSink> Parser<I, L> {
    /// Crea un parser con un sink de bitácora arbitrario.
    pub fn with_sink(start: Location, tokens: I, sink: L) -> Self {
        Parser {
            tokens: tokens.peekable(),
            last_known: start,
            sink,
            codegen: None,
        }
    }

    /// Habilita la generación de código con la base de memoria dada.
    pub fn with_code_generation(mut self, base: u32) -> Self {
        self.codegen = Some(CodeGen {
            symbols: SymbolTable::new(base),
            instructions: InstructionTable::new(),
        });

        self
    }

    /// Analiza la entrada completa.
    ///
    /// En caso de error, la bitácora retiene las derivaciones hasta el
    /// punto de falla junto con el mensaje de error.
    pub fn parse(&mut self) -> Parse<()> {
        let result = self.program();

        if let Err(error) = &result {
            let rule = "-".repeat(50);
            let message = format!("Error: {}", error.val());

            self.log(&rule);
            self.log(&message);
            self.log("Parsing failed");
        }

        result
    }

    /// Bitácora de derivaciones.
    pub fn sink(&self) -> &L {
        &self.sink
    }

    /// Entrega la bitácora y, si la generación de código estaba
    /// habilitada, las tablas de símbolos e instrucciones.
    pub fn finish(self) -> (L, Option<(SymbolTable, InstructionTable)>) {
        let tables = self
            .codegen
            .map(|codegen| (codegen.symbols, codegen.instructions));

        (self.sink, tables)
    }

    fn program(&mut self) -> Parse<()> {
        if self.tokens.peek().is_none() {
            return self.fail(ParserError::EmptyInput);
        }

        self.rat24s()?;

        if let Some(extra) = self.tokens.peek() {
            let found = extra.val().clone();
            return self.fail(ParserError::ExpectedEof(found));
        }

        Ok(())
    }

    /// `<Rat24S> -> $ <Opt Function Definitions> $ <Opt Declaration List>
    /// $ <Statement List> $`
    fn rat24s(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.separator(Separator::Dollar)?;

        self.log("<Rat24S> -> <Opt Function Definitions>");
        self.opt_function_definitions()?;

        self.log_current_token()?;
        self.separator(Separator::Dollar)?;

        self.log("<Rat24S> -> <Opt Declaration List>");
        self.opt_declaration_list()?;

        self.log_current_token()?;
        self.separator(Separator::Dollar)?;

        self.statement_list()?;

        self.log_current_token()?;
        self.separator(Separator::Dollar)
    }

    /// `<Opt Function Definitions> -> <Function Definitions> | ε`
    fn opt_function_definitions(&mut self) -> Parse<()> {
        if self.next_is_keyword(Keyword::Function) {
            self.log("<Opt Function Definitions> -> <Function Definitions>");
            self.function_definitions()
        } else {
            self.log("<Opt Function Definitions> -> ε");
            Ok(())
        }
    }

    /// `<Function Definitions> -> <Function> <Function Definitions Prime>`
    fn function_definitions(&mut self) -> Parse<()> {
        self.log("<Function Definitions> -> <Function> <Function Definitions Prime>");
        self.function()?;
        self.function_definitions_prime()
    }

    /// `<Function Definitions Prime> -> <Function Definitions> | ε`
    fn function_definitions_prime(&mut self) -> Parse<()> {
        if self.next_is_keyword(Keyword::Function) {
            self.log("<Function Definitions Prime> -> <Function Definitions>");
            self.function_definitions()
        } else {
            self.log("<Function Definitions Prime> -> ε");
            Ok(())
        }
    }

    /// `<Function> -> function <Identifier> ( <Opt Parameter List> )
    /// <Opt Declaration List> <Body>`
    fn function(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.keyword(Keyword::Function)?;

        self.log("<Function> -> function <Identifier> ( <Opt Parameter List> ) <Opt Declaration List> <Body>");
        self.identifier()?;

        self.log_current_token()?;
        self.separator(Separator::OpenParen)?;
        self.opt_parameter_list()?;
        self.log_current_token()?;
        self.separator(Separator::CloseParen)?;

        self.opt_declaration_list()?;
        self.body()
    }

    /// `<Opt Parameter List> -> <Parameter List> | ε`
    fn opt_parameter_list(&mut self) -> Parse<()> {
        if matches!(self.tokens.peek().map(Located::val), Some(Token::Id(_))) {
            self.log("<Opt Parameter List> -> <Parameter List>");
            self.parameter_list()
        } else {
            self.log("<Opt Parameter List> -> ε");
            Ok(())
        }
    }

    /// `<Parameter List> -> <Parameter> <Parameter Prime>`
    fn parameter_list(&mut self) -> Parse<()> {
        self.log("<Parameter List> -> <Parameter> <Parameter Prime>");
        self.parameter()?;
        self.parameter_prime()
    }

    /// `<Parameter Prime> -> , <Parameter List> | ε`
    fn parameter_prime(&mut self) -> Parse<()> {
        if self.next_is_separator(Separator::Comma) {
            self.log_current_token()?;
            self.log("<Parameter Prime> -> , <Parameter List>");
            self.advance()?;
            self.parameter_list()
        } else {
            self.log("<Parameter Prime> -> ε");
            Ok(())
        }
    }

    /// `<Parameter> -> <IDs> <Qualifier>`
    fn parameter(&mut self) -> Parse<()> {
        self.log("<Parameter> -> <IDs> <Qualifier>");
        self.ids()?;
        self.qualifier()?;
        Ok(())
    }

    /// `<Qualifier> -> integer | boolean | real`
    fn qualifier(&mut self) -> Parse<Located<Keyword>> {
        self.log_current_token()?;

        let qualifier = match self.peek()?.val() {
            Token::Keyword(
                keyword @ (Keyword::Integer | Keyword::Boolean | Keyword::Real),
            ) => *keyword,

            other => {
                let found = other.clone();
                return self.fail(ParserError::MissingQualifier(found));
            }
        };

        self.log(&format!("<Qualifier> -> {}", qualifier));
        let (location, _) = self.advance()?.split();

        Ok(Located::at(qualifier, location))
    }

    /// `<Body> -> { <Statement List> }`
    fn body(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.separator(Separator::OpenCurly)?;

        self.log("<Body> -> { <Statement List> }");
        self.statement_list()?;

        self.log_current_token()?;
        self.separator(Separator::CloseCurly)
    }

    /// `<Opt Declaration List> -> <Declaration List> | ε`
    fn opt_declaration_list(&mut self) -> Parse<()> {
        if self.next_is_qualifier() {
            self.log("<Opt Declaration List> -> <Declaration List>");
            self.declaration_list()
        } else {
            self.log("<Opt Declaration List> -> ε");
            Ok(())
        }
    }

    /// `<Declaration List> -> <Declaration> ; <Declaration List Prime>`
    fn declaration_list(&mut self) -> Parse<()> {
        self.log("<Declaration List> -> <Declaration> ;");
        self.declaration()?;

        self.log_current_token()?;
        self.separator(Separator::Semicolon)?;

        self.declaration_list_prime()
    }

    /// `<Declaration List Prime> -> <Declaration List> | ε`
    fn declaration_list_prime(&mut self) -> Parse<()> {
        if self.next_is_qualifier() {
            self.log("<Declaration List Prime> -> <Declaration List>");
            self.declaration_list()
        } else {
            self.log("<Declaration List Prime> -> ε");
            Ok(())
        }
    }

    /// `<Declaration> -> <Qualifier> <IDs>`
    ///
    /// Con generación de código habilitada, cada identificador se
    /// inserta en la tabla de símbolos con el tipo del calificador.
    fn declaration(&mut self) -> Parse<()> {
        self.log("<Declaration> -> <Qualifier> <IDs>");

        let qualifier = self.qualifier()?;
        let ids = self.ids()?;

        if let Some(codegen) = &mut self.codegen {
            let data_type = match qualifier.val() {
                Keyword::Integer => DataType::Integer,
                Keyword::Boolean => DataType::Boolean,

                // La máquina de pila objetivo carece de opcodes reales
                _ => {
                    return Err(Located::at(
                        ParserError::Semantic(SemanticError::RealDeclaration),
                        qualifier.location().clone(),
                    ))
                }
            };

            for id in &ids {
                codegen.symbols.add(id, data_type).map_err(lift)?;
            }
        }

        Ok(())
    }

    /// `<IDs> -> <Identifier> <IDs Prime>`
    fn ids(&mut self) -> Parse<Vec<Located<Identifier>>> {
        self.log_current_token()?;

        if !matches!(self.peek()?.val(), Token::Id(_)) {
            let found = self.peek()?.val().clone();
            return self.fail(ParserError::ExpectedIdentifier(found));
        }

        self.log("<IDs> -> <Identifier> <IDs Prime>");
        let first = self.identifier()?;

        let mut ids = vec![first];
        ids.extend(self.ids_prime()?);

        Ok(ids)
    }

    /// `<IDs Prime> -> , <IDs> | ε`
    fn ids_prime(&mut self) -> Parse<Vec<Located<Identifier>>> {
        if self.next_is_separator(Separator::Comma) {
            self.log_current_token()?;
            self.log("<IDs Prime> -> , <IDs>");
            self.advance()?;
            self.ids()
        } else {
            self.log("<IDs Prime> -> ε");
            Ok(Vec::new())
        }
    }

    /// `<Statement List> -> <Statement> <Statement List Prime>`
    fn statement_list(&mut self) -> Parse<()> {
        self.log("<Statement List> -> <Statement> <Statement List Prime>");
        self.statement()?;
        self.statement_list_prime()
    }

    /// `<Statement List Prime> -> <Statement List> | ε`
    fn statement_list_prime(&mut self) -> Parse<()> {
        if self.next_starts_statement() {
            self.log("<Statement List Prime> -> <Statement List>");
            self.statement_list()
        } else {
            self.log("<Statement List Prime> -> ε");
            Ok(())
        }
    }

    /// `<Statement> -> <Compound> | <Assign> | <If> | <Return> |
    /// <Print> | <Scan> | <While>`
    fn statement(&mut self) -> Parse<()> {
        match self.peek()?.val() {
            Token::Separator(Separator::OpenCurly) => self.compound(),
            Token::Id(_) => self.assign(),
            Token::Keyword(Keyword::If) => self.if_statement(),
            Token::Keyword(Keyword::Return) => self.return_statement(),
            Token::Keyword(Keyword::Print) => self.print_statement(),
            Token::Keyword(Keyword::Scan) => self.scan_statement(),
            Token::Keyword(Keyword::While) => self.while_statement(),

            other => {
                let found = other.clone();
                self.fail(ParserError::MissingStatement(found))
            }
        }
    }

    /// `<Compound> -> { <Statement List> }`
    fn compound(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.log("<Statement> -> <Compound>");
        self.separator(Separator::OpenCurly)?;

        self.log("<Compound> -> { <Statement List> }");
        self.statement_list()?;

        self.log_current_token()?;
        self.separator(Separator::CloseCurly)
    }

    /// `<Assign> -> <Identifier> = <Expression> ;`
    ///
    /// El tipo declarado del lado izquierdo debe aparecer entre los
    /// tipos de las hojas de la expresión; la instrucción final es un
    /// `POPM` hacia la dirección del lado izquierdo.
    fn assign(&mut self) -> Parse<()> {
        let lhs = self.peek()?.clone();

        self.log_current_token()?;
        self.log("<Statement> -> <Assign>");
        self.advance()?;
        self.log("<Assign> -> <Identifier> = <Expression> ;");

        if !matches!(self.peek()?.val(), Token::Operator(Operator::Assign)) {
            let found = self.peek()?.val().clone();
            return self.fail(ParserError::MissingAssign(found));
        }

        self.log_current_token()?;
        self.advance()?;

        let types = self.expression()?;

        if let Some(codegen) = &mut self.codegen {
            let lhs_type = semantic::operand_type(&codegen.symbols, &lhs).map_err(lift)?;
            if !types.contains(&lhs_type) {
                let found = types
                    .iter()
                    .map(DataType::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");

                return Err(Located::at(
                    ParserError::Semantic(SemanticError::AssignMismatch {
                        expected: lhs_type,
                        found,
                    }),
                    lhs.location().clone(),
                ));
            }

            let id = match lhs.val() {
                Token::Id(id) => Located::at(id.clone(), lhs.location().clone()),
                _ => unreachable!("assignment dispatched on a non-identifier"),
            };

            let (address, _) = codegen.symbols.lookup(&id).map_err(lift)?;
            codegen.instructions.emit(Opcode::PopMemory(address));
        }

        self.log_current_token()?;
        self.separator(Separator::Semicolon)
    }

    /// `<If> -> if ( <Condition> ) <Statement> <If Prime>`
    fn if_statement(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.log("<Statement> -> <If>");
        self.keyword(Keyword::If)?;

        self.log("<If> -> if ( <Condition> ) <Statement> <If Prime>");
        self.log_current_token()?;
        self.separator(Separator::OpenParen)?;
        self.condition()?;
        self.log_current_token()?;
        self.separator(Separator::CloseParen)?;

        self.statement()?;
        self.if_prime()
    }

    /// `<If Prime> -> endif | else <Statement> endif`
    ///
    /// En `endif` sin `else`, el `JUMP0` de la condición se parcha al
    /// `LABEL` emitido aquí. Con `else`, la rama verdadera termina en
    /// un `JUMP` que salta la rama falsa: el `JUMP0` de la condición
    /// se parcha a la instrucción que sigue al `JUMP` y el `JUMP`
    /// queda pendiente hasta el `LABEL` del `endif`.
    fn if_prime(&mut self) -> Parse<()> {
        match self.peek()?.val() {
            Token::Keyword(Keyword::Endif) => {
                self.log_current_token()?;
                self.log("<If Prime> -> endif");
                self.advance()?;

                if let Some(label) = self.emit(Opcode::Label) {
                    self.patch(label)?;
                }

                Ok(())
            }

            Token::Keyword(Keyword::Else) => {
                self.log_current_token()?;
                self.log("<If Prime> -> else <Statement> endif");
                self.advance()?;

                if let Some(jump) = self.emit(Opcode::Jump(None)) {
                    self.patch(jump + 1)?;
                    self.push_pending(jump);
                }

                self.statement()?;

                self.log_current_token()?;
                self.keyword(Keyword::Endif)?;

                if let Some(label) = self.emit(Opcode::Label) {
                    self.patch(label)?;
                }

                Ok(())
            }

            other => {
                let found = other.clone();
                self.fail(ParserError::MissingElseOrEndif(found))
            }
        }
    }

    /// `<Return> -> return <Return Prime>`
    fn return_statement(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.log("<Statement> -> <Return>");
        self.keyword(Keyword::Return)?;

        self.log("<Return> -> return <Return Prime>");
        self.return_prime()
    }

    /// `<Return Prime> -> ; | <Expression> ;`
    fn return_prime(&mut self) -> Parse<()> {
        if self.next_is_separator(Separator::Semicolon) {
            self.log_current_token()?;
            self.log("<Return Prime> -> ;");
            self.advance()?;
            Ok(())
        } else {
            self.log("<Return Prime> -> <Expression> ;");
            self.expression()?;
            self.log_current_token()?;
            self.separator(Separator::Semicolon)
        }
    }

    /// `<Print> -> print ( <Expression> ) ;`
    fn print_statement(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.log("<Statement> -> <Print>");
        self.keyword(Keyword::Print)?;

        self.log("<Print> -> print ( <Expression> ) ;");
        self.log_current_token()?;
        self.separator(Separator::OpenParen)?;

        self.expression()?;
        self.emit(Opcode::StdOut);

        self.log_current_token()?;
        self.separator(Separator::CloseParen)?;
        self.log_current_token()?;
        self.separator(Separator::Semicolon)
    }

    /// `<Scan> -> scan ( <IDs> ) ;`
    ///
    /// Por cada identificador se emite `SIN` seguido de `POPM` hacia
    /// su dirección.
    fn scan_statement(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.log("<Statement> -> <Scan>");
        self.keyword(Keyword::Scan)?;

        self.log("<Scan> -> scan ( <IDs> ) ;");
        self.log_current_token()?;
        self.separator(Separator::OpenParen)?;

        let ids = self.ids()?;

        if let Some(codegen) = &mut self.codegen {
            for id in &ids {
                let (address, _) = codegen.symbols.lookup(id).map_err(lift)?;
                codegen.instructions.emit(Opcode::StdIn);
                codegen.instructions.emit(Opcode::PopMemory(address));
            }
        }

        self.log_current_token()?;
        self.separator(Separator::CloseParen)?;
        self.log_current_token()?;
        self.separator(Separator::Semicolon)
    }

    /// `<While> -> while ( <Condition> ) <Statement> endwhile`
    ///
    /// El tope del ciclo es un `LABEL`; tras el cuerpo se emite un
    /// `JUMP` de regreso a él y el `JUMP0` de la condición se parcha
    /// a la instrucción que sigue a ese `JUMP`.
    fn while_statement(&mut self) -> Parse<()> {
        self.log_current_token()?;
        self.log("<Statement> -> <While>");
        self.keyword(Keyword::While)?;

        self.log("<While> -> while ( <Condition> ) <Statement> endwhile");
        let top = self.emit(Opcode::Label);

        self.log_current_token()?;
        self.separator(Separator::OpenParen)?;
        self.condition()?;
        self.log_current_token()?;
        self.separator(Separator::CloseParen)?;

        self.statement()?;

        if let Some(jump) = self.emit(Opcode::Jump(top)) {
            self.patch(jump + 1)?;
        }

        self.log_current_token()?;
        self.keyword(Keyword::Endwhile)
    }

    /// `<Condition> -> <Expression> <Relop> <Expression>`
    ///
    /// Tras los operandos se emite el opcode relacional y un `JUMP0`
    /// con operando pendiente, cuya dirección queda en la pila de
    /// saltos.
    fn condition(&mut self) -> Parse<()> {
        self.log("<Condition> -> <Expression> <Relop> <Expression>");

        self.expression()?;
        let relop = self.relop()?;
        self.expression()?;

        self.emit(relop);
        if let Some(jump) = self.emit(Opcode::JumpIfZero(None)) {
            self.push_pending(jump);
        }

        Ok(())
    }

    /// `<Relop> -> == | != | > | < | <= | =>`
    fn relop(&mut self) -> Parse<Opcode> {
        use Operator::*;

        let opcode = match self.peek()?.val() {
            Token::Operator(Less) => Opcode::Less,
            Token::Operator(Greater) => Opcode::Greater,
            Token::Operator(Equal) => Opcode::Equal,
            Token::Operator(NotEqual) => Opcode::NotEqual,
            Token::Operator(LessOrEqual) => Opcode::LessOrEqual,
            Token::Operator(GreaterOrEqual) => Opcode::GreaterOrEqual,

            other => {
                let found = other.clone();
                return self.fail(ParserError::MissingRelop(found));
            }
        };

        self.log_current_token()?;
        let token = self.advance()?;
        self.log(&format!("<Relop> -> {}", token.val().lexeme()));

        Ok(opcode)
    }

    /// `<Expression> -> <Term> <Expression Prime>`
    ///
    /// Retorna el conjunto de tipos de dato que aparecen en las hojas
    /// de la expresión, vacío cuando la generación de código está
    /// deshabilitada.
    fn expression(&mut self) -> Parse<TypeSet> {
        if !self.next_is_separator(Separator::OpenParen) {
            self.log_current_token()?;
        }

        self.log("<Expression> -> <Term> <Expression Prime>");

        let term = self.term()?;
        let mut types = term.clone();
        types.extend(self.expression_prime(term)?);

        Ok(types)
    }

    /// `<Expression Prime> -> + <Term> <Expression Prime> |
    /// - <Term> <Expression Prime> | ε`
    fn expression_prime(&mut self, previous: TypeSet) -> Parse<TypeSet> {
        let opcode = match self.peek()?.val() {
            Token::Operator(Operator::Plus) => Opcode::Add,
            Token::Operator(Operator::Minus) => Opcode::Subtract,

            _ => {
                self.log("<Expression Prime> -> ε");
                return Ok(TypeSet::new());
            }
        };

        self.log_current_token()?;
        let token = self.advance()?;
        self.log(&format!(
            "<Expression Prime> -> {} <Term> <Expression Prime>",
            token.val().lexeme()
        ));
        let (at, _) = token.split();

        if !self.next_is_separator(Separator::OpenParen) {
            self.log_current_token()?;
        }

        let term = self.term()?;

        if self.codegen.is_some() {
            semantic::validate_arithmetic(&previous, &term, &at).map_err(lift)?;
            self.emit(opcode);
        }

        let mut types = term.clone();
        types.extend(self.expression_prime(term)?);

        Ok(types)
    }

    /// `<Term> -> <Factor> <Term Prime>`
    fn term(&mut self) -> Parse<TypeSet> {
        self.log("<Term> -> <Factor> <Term Prime>");

        let factor = self.factor()?;
        let mut types = factor.clone();
        types.extend(self.term_prime(factor)?);

        Ok(types)
    }

    /// `<Term Prime> -> * <Factor> <Term Prime> |
    /// / <Factor> <Term Prime> | ε`
    fn term_prime(&mut self, previous: TypeSet) -> Parse<TypeSet> {
        let opcode = match self.peek()?.val() {
            Token::Operator(Operator::Times) => Opcode::Multiply,
            Token::Operator(Operator::Divide) => Opcode::Divide,

            _ => {
                self.log("<Term Prime> -> ε");
                return Ok(TypeSet::new());
            }
        };

        self.log_current_token()?;
        let token = self.advance()?;
        self.log(&format!(
            "<Term Prime> -> {} <Factor> <Term Prime>",
            token.val().lexeme()
        ));
        let (at, _) = token.split();

        if !self.next_is_separator(Separator::OpenParen) {
            self.log_current_token()?;
        }

        let factor = self.factor()?;

        if self.codegen.is_some() {
            semantic::validate_arithmetic(&previous, &factor, &at).map_err(lift)?;
            self.emit(opcode);
        }

        let mut types = factor.clone();
        types.extend(self.term_prime(factor)?);

        Ok(types)
    }

    /// `<Factor> -> - <Primary> | <Primary>`
    ///
    /// El signo negativo solo se materializa sobre literales enteros;
    /// sobre cualquier otro operando el prefijo se consume sin
    /// reflejarse en el código generado.
    fn factor(&mut self) -> Parse<TypeSet> {
        let negated = matches!(self.peek()?.val(), Token::Operator(Operator::Minus));

        if negated {
            self.advance()?;
            self.log("<Factor> -> - <Primary>");

            if !self.next_is_separator(Separator::OpenParen) {
                self.log_current_token()?;
            }
        } else {
            self.log("<Factor> -> <Primary>");
        }

        self.primary(negated)
    }

    /// `<Primary> -> <Identifier> <Primary Prime> | <Integer> |
    /// ( <Expression> ) | <Real> | true | false`
    ///
    /// Los literales reales se aceptan sintácticamente pero son un
    /// error bajo generación de código.
    fn primary(&mut self, negated: bool) -> Parse<TypeSet> {
        let token = self.peek()?.clone();
        let mut types = TypeSet::new();

        match token.val() {
            Token::Id(id) => {
                let id = Located::at(id.clone(), token.location().clone());

                let mut resolved = None;
                if let Some(codegen) = &self.codegen {
                    let (address, data_type) = codegen.symbols.lookup(&id).map_err(lift)?;
                    types.insert(data_type);
                    resolved = Some(address);
                }

                self.advance()?;
                let call = self.primary_prime()?;
                self.log(if call {
                    "<Primary> -> <Identifier> ( <IDs> )"
                } else {
                    "<Primary> -> <Identifier>"
                });

                if let Some(address) = resolved {
                    self.emit(Opcode::PushMemory(address));
                }
            }

            Token::Integer(value) => {
                let value = *value;
                self.log("<Primary> -> <Integer>");
                self.advance()?;

                types.insert(DataType::Integer);
                self.emit(Opcode::PushImmediate(if negated { -value } else { value }));
            }

            Token::Real(_) => {
                if self.codegen.is_some() {
                    return Err(Located::at(
                        ParserError::Semantic(SemanticError::RealLiteral),
                        token.location().clone(),
                    ));
                }

                self.log("<Primary> -> <Real>");
                self.advance()?;
            }

            Token::Keyword(keyword @ (Keyword::True | Keyword::False)) => {
                let value = matches!(keyword, Keyword::True);
                self.log(if value {
                    "<Primary> -> true"
                } else {
                    "<Primary> -> false"
                });
                let (at, _) = self.advance()?.split();

                // La palabra clave se reconstruye como literal booleano
                let literal = Located::at(Token::Boolean(value), at);

                if let Some(codegen) = &self.codegen {
                    let data_type =
                        semantic::operand_type(&codegen.symbols, &literal).map_err(lift)?;
                    types.insert(data_type);
                }

                self.emit(Opcode::PushImmediate(value as i64));
            }

            Token::Separator(Separator::OpenParen) => {
                self.log("<Primary> -> ( <Expression> )");
                self.log_current_token()?;
                self.advance()?;

                types.extend(self.expression()?);

                self.log_current_token()?;
                self.separator(Separator::CloseParen)?;
            }

            other => {
                let found = other.clone();
                return self.fail(ParserError::ExpectedPrimary(found));
            }
        }

        Ok(types)
    }

    /// `<Primary Prime> -> ( <IDs> ) | ε`
    fn primary_prime(&mut self) -> Parse<bool> {
        if !self.next_is_separator(Separator::OpenParen) {
            return Ok(false);
        }

        self.log_current_token()?;
        self.separator(Separator::OpenParen)?;
        self.ids()?;
        self.log_current_token()?;
        self.separator(Separator::CloseParen)?;

        Ok(true)
    }

    fn identifier(&mut self) -> Parse<Located<Identifier>> {
        match self.peek()?.val() {
            Token::Id(_) => {
                let token = self.advance()?;
                Ok(token.map(|token| match token {
                    Token::Id(id) => id,
                    _ => unreachable!(),
                }))
            }

            other => {
                let found = other.clone();
                self.fail(ParserError::ExpectedIdentifier(found))
            }
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn separator(&mut self, separator: Separator) -> Parse<()> {
        self.expect(Token::Separator(separator))
    }

    fn expect(&mut self, expected: Token) -> Parse<()> {
        let found = self.peek()?.val().clone();
        if found == expected {
            self.advance()?;
            Ok(())
        } else {
            self.fail(ParserError::Expected { expected, found })
        }
    }

    fn peek(&mut self) -> Parse<&Located<Token>> {
        match self.tokens.peek() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token)
            }

            None => Err(Located::at(
                ParserError::UnexpectedEof,
                self.last_known.clone(),
            )),
        }
    }

    fn advance(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token)
            }

            None => Err(Located::at(
                ParserError::UnexpectedEof,
                self.last_known.clone(),
            )),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }

    fn next_is_separator(&mut self, separator: Separator) -> bool {
        matches!(
            self.tokens.peek().map(Located::val),
            Some(Token::Separator(found)) if *found == separator
        )
    }

    fn next_is_keyword(&mut self, keyword: Keyword) -> bool {
        matches!(
            self.tokens.peek().map(Located::val),
            Some(Token::Keyword(found)) if *found == keyword
        )
    }

    fn next_is_qualifier(&mut self) -> bool {
        matches!(
            self.tokens.peek().map(Located::val),
            Some(Token::Keyword(
                Keyword::Integer | Keyword::Boolean | Keyword::Real
            ))
        )
    }

    fn next_starts_statement(&mut self) -> bool {
        matches!(
            self.tokens.peek().map(Located::val),
            Some(
                Token::Id(_)
                    | Token::Separator(Separator::OpenCurly)
                    | Token::Keyword(
                        Keyword::If
                            | Keyword::Return
                            | Keyword::Print
                            | Keyword::Scan
                            | Keyword::While
                    )
            )
        )
    }

    fn emit(&mut self, opcode: Opcode) -> Option<Address> {
        self.codegen
            .as_mut()
            .map(|codegen| codegen.instructions.emit(opcode))
    }

    fn push_pending(&mut self, address: Address) {
        if let Some(codegen) = &mut self.codegen {
            codegen.instructions.push_pending(address);
        }
    }

    fn patch(&mut self, target: Address) -> Parse<()> {
        let at = self.last_known.clone();

        if let Some(codegen) = &mut self.codegen {
            codegen
                .instructions
                .back_patch(target)
                .map_err(|error| Located::at(ParserError::CodeGen(error), at))?;
        }

        Ok(())
    }

    fn log(&mut self, text: &str) {
        self.sink.log(&format!("  {}", text));
    }

    fn log_current_token(&mut self) -> Parse<()> {
        let line = {
            let token = self.peek()?;
            format!(
                "Token: {:<20} Lexeme: {}",
                token.val().kind().title(),
                token.val().lexeme()
            )
        };

        self.sink.log(&line);
        Ok(())
    }
}
