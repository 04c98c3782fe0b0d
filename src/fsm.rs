//! Motor de autómatas finitos deterministas.
//!
//! Las reglas léxicas de números e identificadores se expresan como
//! tablas de transición explícitas en vez de código ad hoc, lo cual
//! las hace auditables y verificables de forma independiente del
//! driver del lexer. Un autómata se ejecuta sobre el flujo de entrada
//! hasta encontrar un carácter de paro, el cual se devuelve al flujo.

use crate::source::{InputStream, Location, Pushback};
use std::io;

/// Índice de estado dentro de la tabla de transiciones.
pub type State = usize;

/// Estado inicial de todo autómata de este módulo.
const INITIAL: State = 0;

/// Estado que acepta una constante entera en [`INT_REAL`].
pub const INT_ACCEPT: State = 1;

/// Estado que acepta una constante real en [`INT_REAL`].
pub const REAL_ACCEPT: State = 3;

/// Un autómata finito determinista tabular.
///
/// El mapeo de caracteres a símbolos del alfabeto es una función; un
/// carácter sin símbolo asociado selecciona la fila del estado trampa.
/// Los descriptores son datos estáticos compartidos por todas las
/// instancias del lexer.
pub struct Fsm {
    symbols: fn(char) -> Option<usize>,
    transitions: &'static [&'static [State]],
    accepting: &'static [State],
    trap: State,
}

/// Resultado de una traza.
pub struct Trace {
    /// Caracteres consumidos, incluyendo el primero.
    pub lexeme: String,

    /// Estado en el que terminó la traza.
    pub state: State,

    /// Si el estado final pertenece al conjunto de aceptación.
    pub accepted: bool,

    /// Ubicación del último carácter consumido, si hubo alguno
    /// además del primero.
    pub last: Option<Location>,
}

impl Fsm {
    /// Ejecuta el autómata sobre el flujo hasta un carácter de paro.
    ///
    /// `first` ya fue consumido por el llamador y se aplica como
    /// primera transición. El carácter de paro que termina la traza
    /// se devuelve al flujo; el fin de la entrada también termina la
    /// traza. El estado trampa es absorbente: una traza que cae en él
    /// sigue consumiendo hasta el siguiente carácter de paro, por lo
    /// que un lexema desconocido abarca su corrida completa.
    pub fn trace<S: InputStream>(
        &self,
        first: char,
        stream: &mut Pushback<S>,
        stops: &[char],
    ) -> io::Result<Trace> {
        let mut state = self.step(INITIAL, first);
        let mut lexeme = String::new();
        let mut last = None;

        lexeme.push(first);

        while let Some((c, at)) = stream.next_char()? {
            if stops.contains(&c) {
                stream.unread(c, at);
                break;
            }

            state = self.step(state, c);
            lexeme.push(c);
            last = Some(at);
        }

        Ok(Trace {
            lexeme,
            state,
            accepted: self.accepting.contains(&state),
            last,
        })
    }

    fn step(&self, state: State, c: char) -> State {
        match (self.symbols)(c) {
            Some(symbol) => self.transitions[state][symbol],
            None => self.trap,
        }
    }
}

/// Autómata de constantes enteras y reales.
///
/// Expresión regular: `d+ | d+.d+`. Estados: A inicial, B acepta
/// entero, C punto decimal sin dígitos aún, D acepta real, E trampa.
pub static INT_REAL: Fsm = Fsm {
    symbols: int_real_symbol,
    //           d  .
    transitions: &[
        &[1, 4], // A
        &[1, 2], // B
        &[3, 4], // C
        &[3, 4], // D
        &[4, 4], // E
    ],
    accepting: &[INT_ACCEPT, REAL_ACCEPT],
    trap: 4,
};

/// Autómata de identificadores.
///
/// Expresión regular: `l(l|d|_)*`. Estados: A inicial, B a E de
/// aceptación, F trampa.
pub static IDENTIFIER: Fsm = Fsm {
    symbols: identifier_symbol,
    //           l  d  _
    transitions: &[
        &[1, 5, 5], // A
        &[2, 3, 4], // B
        &[2, 3, 4], // C
        &[2, 3, 4], // D
        &[2, 3, 4], // E
        &[5, 5, 5], // F
    ],
    accepting: &[1, 2, 3, 4],
    trap: 5,
};

fn int_real_symbol(c: char) -> Option<usize> {
    match c {
        c if c.is_ascii_digit() => Some(0),
        '.' => Some(1),
        _ => None,
    }
}

fn identifier_symbol(c: char) -> Option<usize> {
    match c {
        c if c.is_ascii_alphabetic() => Some(0),
        c if c.is_ascii_digit() => Some(1),
        '_' => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use std::io::Cursor;

    const STOPS: &[char] = &[' ', '\n', ';', '+'];

    fn trace(fsm: &Fsm, source: &str) -> Trace {
        let (_, stream) = source::read(Cursor::new(&source[1..]), "test");
        let mut stream = Pushback::new(stream);
        let first = source.chars().next().unwrap();

        fsm.trace(first, &mut stream, STOPS).unwrap()
    }

    #[test]
    fn integers_accept_at_the_integer_state() {
        let result = trace(&INT_REAL, "123");
        assert!(result.accepted);
        assert_eq!(result.state, INT_ACCEPT);
        assert_eq!(result.lexeme, "123");
    }

    #[test]
    fn reals_accept_at_the_real_state() {
        let result = trace(&INT_REAL, "3.14");
        assert!(result.accepted);
        assert_eq!(result.state, REAL_ACCEPT);
        assert_eq!(result.lexeme, "3.14");
    }

    #[test]
    fn dangling_decimal_point_is_rejected() {
        assert!(!trace(&INT_REAL, "5.").accepted);
        assert!(!trace(&INT_REAL, ".5").accepted);
        assert!(!trace(&INT_REAL, "1.2.3").accepted);
    }

    #[test]
    fn identifiers_accept_letters_digits_and_underscores() {
        let result = trace(&IDENTIFIER, "ab1_c");
        assert!(result.accepted);
        assert_eq!(result.lexeme, "ab1_c");
    }

    #[test]
    fn identifiers_must_begin_with_a_letter() {
        assert!(!trace(&IDENTIFIER, "1ab").accepted);
        assert!(!trace(&IDENTIFIER, "_ab").accepted);
    }

    #[test]
    fn unmapped_characters_fall_into_the_trap_state() {
        let result = trace(&IDENTIFIER, "a#b");
        assert!(!result.accepted);
        assert_eq!(result.lexeme, "a#b");
    }

    #[test]
    fn the_stop_character_is_pushed_back() {
        let (_, stream) = source::read(Cursor::new("12+34"), "test");
        let mut stream = Pushback::new(stream);

        let (first, _) = stream.next_char().unwrap().unwrap();
        let result = INT_REAL.trace(first, &mut stream, STOPS).unwrap();
        assert_eq!(result.lexeme, "12");

        // El carácter de paro sigue disponible, exactamente una vez
        let (stop, _) = stream.next_char().unwrap().unwrap();
        assert_eq!(stop, '+');

        let (next, _) = stream.next_char().unwrap().unwrap();
        let result = INT_REAL.trace(next, &mut stream, STOPS).unwrap();
        assert_eq!(result.lexeme, "34");
    }
}
