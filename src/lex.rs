//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los
//! espacios en blanco y los comentarios `[* ... *]` se descartan durante
//! esta operación. Cada token emitido está asociado a una ubicación en
//! el código fuente original, lo cual permite rastrear errores tanto en
//! los mismos como en constructos más elevados de fases posteriores.
//!
//! # Reconocimiento por autómatas
//! Las dos clases léxicas no triviales se delegan a los autómatas
//! tabulares de [`crate::fsm`]: constantes numéricas (enteras o reales)
//! e identificadores. El driver de este módulo clasifica el primer
//! carácter de cada token y decide a cuál autómata entregar el resto.
//! Una traza que no termina en estado de aceptación produce un token
//! [`Token::Unknown`] con el lexema completo; el análisis sintáctico
//! es quien rechaza esos tokens, no esta fase.
//!
//! # Operadores y separadores
//! Los operadores compuestos (`==`, `!=`, `<=`, `=>`) se reconocen con
//! un carácter de anticipación que se devuelve al flujo cuando el par
//! no forma un operador. Nótese que mayor-o-igual se escribe `=>` en
//! este lenguaje; `>=` no es un operador.

use crate::{
    fsm,
    source::{InputStream, Located, Location, Pushback},
};
use std::{
    fmt::{self, Display},
    io,
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S originado por el [`InputStream`].
    #[error("I/O error")]
    Input(#[from] io::Error),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal `{0}` does not fit in 64 bits")]
    IntOverflow(String),
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<String>);

impl Identifier {
    fn new(lexeme: String) -> Self {
        Identifier(Rc::new(lexeme))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(fmt)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir
/// completamente a una entidad léxica en el programa fuente. Los
/// literales `true` y `false` se emiten como palabras clave; es el
/// análisis sintáctico quien los interpreta como constantes booleanas
/// dentro de una expresión.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    Integer(i64),

    /// Literal de real.
    Real(f64),

    /// Literal booleano.
    ///
    /// El lexer nunca produce esta variante: `true` y `false` se
    /// emiten como palabras clave y es el análisis sintáctico quien
    /// construye el literal al reconocerlas dentro de una expresión.
    Boolean(bool),

    /// Operador, simple o compuesto.
    Operator(Operator),

    /// Separador de un carácter.
    Separator(Separator),

    /// Secuencia que ninguna regla léxica reconoce.
    Unknown(String),
}

impl Token {
    /// Clase léxica, tal como aparece en la tabla de tokens.
    pub fn kind(&self) -> Kind {
        match self {
            Token::Id(_) => Kind::Identifier,
            Token::Keyword(_) => Kind::Keyword,
            Token::Integer(_) => Kind::Integer,
            Token::Real(_) => Kind::Real,
            Token::Boolean(_) => Kind::Boolean,
            Token::Operator(_) => Kind::Operator,
            Token::Separator(_) => Kind::Separator,
            Token::Unknown(_) => Kind::Unknown,
        }
    }

    /// Texto original del token.
    pub fn lexeme(&self) -> String {
        match self {
            Token::Id(id) => id.to_string(),
            Token::Keyword(keyword) => keyword.to_string(),
            Token::Integer(integer) => integer.to_string(),
            Token::Real(real) => format!("{:?}", real),
            Token::Boolean(boolean) => boolean.to_string(),
            Token::Operator(operator) => operator.to_string(),
            Token::Separator(separator) => separator.to_string(),
            Token::Unknown(lexeme) => lexeme.clone(),
        }
    }
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Id(id) => write!(fmt, "identifier `{}`", id),
            Token::Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            Token::Integer(integer) => write!(fmt, "literal `{}`", integer),
            Token::Real(real) => write!(fmt, "literal `{:?}`", real),
            Token::Boolean(boolean) => write!(fmt, "literal `{}`", boolean),
            Token::Operator(operator) => write!(fmt, "`{}`", operator),
            Token::Separator(separator) => write!(fmt, "`{}`", separator),
            Token::Unknown(lexeme) => write!(fmt, "unknown `{}`", lexeme),
        }
    }
}

/// Clase léxica de un token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Keyword,
    Identifier,
    Integer,
    Real,
    Boolean,
    Operator,
    Separator,
    Unknown,
}

impl Kind {
    /// Nombre capitalizado, como aparece en el log de derivaciones.
    pub fn title(&self) -> &'static str {
        match self {
            Kind::Keyword => "Keyword",
            Kind::Identifier => "Identifier",
            Kind::Integer => "Integer",
            Kind::Real => "Real",
            Kind::Boolean => "Boolean",
            Kind::Operator => "Operator",
            Kind::Separator => "Separator",
            Kind::Unknown => "Unknown",
        }
    }
}

impl Display for Kind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Keyword => fmt.write_str("keyword"),
            Kind::Identifier => fmt.write_str("identifier"),
            Kind::Integer => fmt.write_str("integer"),
            Kind::Real => fmt.write_str("real"),
            Kind::Boolean => fmt.write_str("boolean"),
            Kind::Operator => fmt.write_str("operator"),
            Kind::Separator => fmt.write_str("separator"),
            Kind::Unknown => fmt.write_str("unknown"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Function,
    Integer,
    Real,
    Boolean,
    If,
    Endif,
    Else,
    Return,
    Print,
    Scan,
    While,
    Endwhile,
    True,
    False,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            Function => "function",
            Integer => "integer",
            Real => "real",
            Boolean => "boolean",
            If => "if",
            Endif => "endif",
            Else => "else",
            Return => "return",
            Print => "print",
            Scan => "scan",
            While => "while",
            Endwhile => "endwhile",
            True => "true",
            False => "false",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(&str, Keyword)] = &[
            ("function", Function),
            ("integer", Integer),
            ("real", Real),
            ("boolean", Boolean),
            ("if", If),
            ("endif", Endif),
            ("else", Else),
            ("return", Return),
            ("print", Print),
            ("scan", Scan),
            ("while", While),
            ("endwhile", Endwhile),
            ("true", True),
            ("false", False),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Un operador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Divide,

    /// `=`
    Assign,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `>`
    Greater,

    /// `<=`
    LessOrEqual,

    /// `=>`
    GreaterOrEqual,
}

impl Display for Operator {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Operator::*;
        let string = match self {
            Plus => "+",
            Minus => "-",
            Times => "*",
            Divide => "/",
            Assign => "=",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            Greater => ">",
            LessOrEqual => "<=",
            GreaterOrEqual => "=>",
        };

        fmt.write_str(string)
    }
}

/// Un separador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Separator {
    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `,`
    Comma,

    /// `;`
    Semicolon,

    /// `$`
    Dollar,
}

impl Display for Separator {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Separator::*;
        let string = match self {
            OpenParen => "(",
            CloseParen => ")",
            OpenCurly => "{",
            CloseCurly => "}",
            Comma => ",",
            Semicolon => ";",
            Dollar => "$",
        };

        fmt.write_str(string)
    }
}

/// Caracteres que terminan una traza de autómata.
///
/// Separadores, primeros caracteres de operadores, espacios en blanco
/// y el inicio de un comentario.
const STOP_CHARS: &[char] = &[
    '(', ')', '{', '}', ',', ';', '$', '+', '-', '*', '/', '=', '!', '<', '>', ' ', '\n', '\t',
    '\r', '[',
];

fn separator(c: char) -> Option<Separator> {
    use Separator::*;

    match c {
        '(' => Some(OpenParen),
        ')' => Some(CloseParen),
        '{' => Some(OpenCurly),
        '}' => Some(CloseCurly),
        ',' => Some(Comma),
        ';' => Some(Semicolon),
        '$' => Some(Dollar),
        _ => None,
    }
}

fn simple_operator(c: char) -> Option<Operator> {
    use Operator::*;

    match c {
        '+' => Some(Plus),
        '-' => Some(Minus),
        '*' => Some(Times),
        '/' => Some(Divide),
        '=' => Some(Assign),
        '<' => Some(Less),
        '>' => Some(Greater),
        _ => None,
    }
}

fn compound_operator(first: char, second: char) -> Option<Operator> {
    use Operator::*;

    match (first, second) {
        ('=', '=') => Some(Equal),
        ('!', '=') => Some(NotEqual),
        ('<', '=') => Some(LessOrEqual),
        ('=', '>') => Some(GreaterOrEqual),
        _ => None,
    }
}

/// Determina si un carácter puede comenzar un operador.
fn is_operator_start(c: char) -> bool {
    simple_operator(c).is_some() || c == '!'
}

/// El analizador léxico.
///
/// Implementa [`Iterator`]; cada elemento es un token con ubicación o
/// el primer error fatal de escaneo, tras el cual el iterador queda
/// agotado. Los lexemas desconocidos no son errores de esta fase.
pub struct Lexer<S: InputStream> {
    source: Pushback<S>,
    last_known: Location,
    done: bool,
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(start: Location, stream: S) -> Self {
        Lexer {
            source: Pushback::new(stream),
            last_known: start,
            done: false,
        }
    }

    /// Reduce la entrada completa a una secuencia de tokens.
    ///
    /// El primer error de escaneo descarta los tokens acumulados y
    /// termina el proceso.
    pub fn tokenize(self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        self.collect()
    }

    fn read(&mut self) -> Result<Option<(char, Location)>, Located<LexerError>> {
        match self.source.next_char() {
            Ok(Some((c, at))) => {
                self.last_known = at.clone();
                Ok(Some((c, at)))
            }

            Ok(None) => Ok(None),
            Err(error) => Err(Located::at(error.into(), self.last_known.clone())),
        }
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<Located<Token>>, Located<LexerError>> {
        loop {
            let (c, at) = match self.read()? {
                None => return Ok(None),
                Some(next) => next,
            };

            let token = match c {
                // Espacios en blanco
                ' ' | '\n' | '\t' | '\r' => continue,

                // Posible inicio de comentario
                '[' => match self.skip_comment(at)? {
                    None => continue,
                    Some(unknown) => unknown,
                },

                // Constantes numéricas
                c if c.is_ascii_digit() || c == '.' => self.number(c, at)?,

                // Identificadores y palabras clave
                c if c.is_ascii_alphabetic() => self.word(c, at)?,

                // Separadores, de un carácter de ancho
                c if separator(c).is_some() => {
                    let separator = separator(c).unwrap();
                    Located::at(Token::Separator(separator), at)
                }

                // Operadores simples y compuestos
                c if is_operator_start(c) => self.operator(c, at)?,

                // Cualquier otra cosa es una secuencia desconocida
                _ => self.unknown_run(c, at, STOP_CHARS)?,
            };

            return Ok(Some(token));
        }
    }

    /// Descarta un comentario `[* ... *]`.
    ///
    /// Si el `[` no está seguido de `*`, no hay comentario y el `[`
    /// se emite como token desconocido. Un comentario sin terminar
    /// consume silenciosamente el resto de la entrada.
    fn skip_comment(
        &mut self,
        open: Location,
    ) -> Result<Option<Located<Token>>, Located<LexerError>> {
        match self.read()? {
            Some(('*', _)) => (),
            Some((c, at)) => {
                self.source.unread(c, at);
                return Ok(Some(Located::at(Token::Unknown(String::from("[")), open)));
            }

            None => return Ok(Some(Located::at(Token::Unknown(String::from("[")), open))),
        }

        while let Some((c, _)) = self.read()? {
            if c != '*' {
                continue;
            }

            match self.read()? {
                Some((']', _)) => return Ok(None),
                Some((c, at)) => self.source.unread(c, at),
                None => break,
            }
        }

        Ok(None)
    }

    /// Reconoce una constante entera o real con el autómata numérico.
    fn number(&mut self, first: char, at: Location) -> Result<Located<Token>, Located<LexerError>> {
        let trace = self.trace(&fsm::INT_REAL, first, STOP_CHARS)?;
        let location = self.span(at, &trace.last);

        let token = if !trace.accepted {
            Token::Unknown(trace.lexeme)
        } else if trace.state == fsm::INT_ACCEPT {
            match trace.lexeme.parse() {
                Ok(integer) => Token::Integer(integer),
                Err(_) => {
                    return Err(Located::at(
                        LexerError::IntOverflow(trace.lexeme),
                        location,
                    ))
                }
            }
        } else {
            // El autómata garantiza la forma d+.d+
            Token::Real(trace.lexeme.parse().unwrap())
        };

        Ok(Located::at(token, location))
    }

    /// Reconoce un identificador o palabra clave.
    fn word(&mut self, first: char, at: Location) -> Result<Located<Token>, Located<LexerError>> {
        let trace = self.trace(&fsm::IDENTIFIER, first, STOP_CHARS)?;
        let location = self.span(at, &trace.last);

        let token = if !trace.accepted {
            Token::Unknown(trace.lexeme)
        } else if let Ok(keyword) = Keyword::from_str(&trace.lexeme) {
            Token::Keyword(keyword)
        } else {
            Token::Id(Identifier::new(trace.lexeme))
        };

        Ok(Located::at(token, location))
    }

    /// Despacha un carácter que puede comenzar un operador.
    fn operator(&mut self, first: char, at: Location) -> Result<Located<Token>, Located<LexerError>> {
        let next = self.read()?;

        if let Some((second, second_at)) = next {
            if let Some(operator) = compound_operator(first, second) {
                let location = Location::span(at, &second_at);
                return Ok(Located::at(Token::Operator(operator), location));
            }

            self.source.unread(second, second_at);
        }

        if let Some(operator) = simple_operator(first) {
            return Ok(Located::at(Token::Operator(operator), at));
        }

        // Un inicio de operador que no forma operador alguno, como un
        // `!` suelto, se consume como secuencia desconocida junto con
        // lo que le siga; el propio carácter deja de ser paro para
        // que la traza pueda avanzar.
        let stops: Vec<char> = STOP_CHARS.iter().copied().filter(|&c| c != first).collect();
        self.unknown_run(first, at, &stops)
    }

    /// Consume una secuencia desconocida con el autómata de
    /// identificadores, cuyo estado trampa avanza hasta el siguiente
    /// carácter de paro.
    fn unknown_run(
        &mut self,
        first: char,
        at: Location,
        stops: &[char],
    ) -> Result<Located<Token>, Located<LexerError>> {
        let trace = self.trace(&fsm::IDENTIFIER, first, stops)?;
        let location = self.span(at, &trace.last);

        Ok(Located::at(Token::Unknown(trace.lexeme), location))
    }

    fn trace(
        &mut self,
        fsm: &fsm::Fsm,
        first: char,
        stops: &[char],
    ) -> Result<fsm::Trace, Located<LexerError>> {
        let trace = fsm
            .trace(first, &mut self.source, stops)
            .map_err(|error| Located::at(error.into(), self.last_known.clone()))?;

        if let Some(last) = &trace.last {
            self.last_known = last.clone();
        }

        Ok(trace)
    }

    fn span(&self, start: Location, last: &Option<Location>) -> Location {
        match last {
            Some(last) => Location::span(start, last),
            None => start,
        }
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.lex() {
            Ok(None) => {
                self.done = true;
                None
            }

            Ok(Some(token)) => Some(Ok(token)),
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
