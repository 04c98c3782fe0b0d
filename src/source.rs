//! Rastreo de ubicaciones originales y flujo de caracteres.
//!
//! Los objetos que el compilador construye llevan cuenta de posiciones
//! o rangos de ubicaciones en el código fuente original, lo cual permite
//! señalar un punto exacto o aproximado donde ocurre un error de
//! abstracción arbitraria. Este módulo también implementa la conversión
//! de un lector estándar a un flujo carácter por carácter con un búfer
//! de retroceso de exactamente un carácter, que es todo lo que el
//! análisis léxico requiere.

use std::{
    cell::RefCell,
    fmt::{self, Debug, Display, Formatter},
    io::{self, BufRead},
    ops::Range,
    rc::Rc,
};

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Un flujo de entrada, carácter por carácter.
pub trait InputStream: Iterator<Item = io::Result<(char, Location)>> {}

impl<I: Iterator<Item = io::Result<(char, Location)>>> InputStream for I {}

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    position: Range<Position>,
}

impl Location {
    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            from: from.from,
            position: from.position.start..to.position.end,
        }
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.position.start
    }

    /// Obtiene la posición de fin.
    pub fn end(&self) -> Position {
        self.position.end
    }

    /// Origen del cual proviene esta ubicación.
    pub fn source(&self) -> &Rc<Source> {
        &self.from
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name)?;

        let Range { start, end } = self.position;
        if end == start.advance() {
            // Solo se señala una columna en específico
            write!(formatter, "{}", start)
        } else {
            write!(formatter, "[{}-{}]", start, end.back())
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Incrementa el número de columna.
    pub fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    /// Decrementa el número de columna.
    pub fn back(self) -> Position {
        Position {
            line: self.line,
            column: self.column.saturating_sub(1),
        }
    }

    /// Incrementa el número de línea y retorna a la columna 1.
    pub fn newline(self) -> Position {
        Position {
            line: self.line + 1,
            column: 1,
        }
    }

    /// Ajusta la posición a la siguiente columna de tabulador.
    pub fn tab(self) -> Position {
        let column = 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP;
        Position {
            line: self.line,
            column,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Nombre de origen e histórico interior de líneas.
pub struct Source {
    name: String,
    lines: RefCell<Vec<String>>,
}

impl Source {
    /// Nombre del origen, usualmente una ruta de archivo.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aplica una operación sobre una línea ya consumida, si existe.
    pub fn with_line<F, R>(&self, line: u32, operation: F) -> Option<R>
    where
        F: FnOnce(&str) -> R,
    {
        let lines = self.lines.borrow();
        lines.get(line as usize - 1).map(|line| operation(line))
    }
}

/// Transforma un lector estándar en un flujo que itera por carácter.
///
/// Cada carácter emitido incluye su propia ubicación. Las líneas se
/// normalizan a `'\n'` sin importar la terminación original, y cada
/// línea consumida queda retenida por el [`Source`] compartido para
/// poder citarla después en reportes de error. La ubicación que se
/// encuentra en la tupla de retorno es la que le corresponde al primer
/// carácter del flujo.
pub fn read<R, S>(reader: R, name: S) -> (Location, impl InputStream)
where
    R: BufRead,
    S: Into<String>,
{
    let source = Rc::new(Source {
        name: name.into(),
        lines: Default::default(),
    });

    let start = Location {
        from: Rc::clone(&source),
        position: Position::default()..Position::default().advance(),
    };

    let stream = Characters {
        reader,
        source,
        line: Vec::new(),
        index: 0,
        position: Position::default(),
        failed: false,
    };

    (start, stream)
}

/// Iterador de caracteres sobre un lector con búfer.
///
/// Lee línea por línea y reparte los caracteres uno a uno, cada uno
/// con su ubicación. Un error de E/S se emite una única vez y termina
/// el flujo.
struct Characters<R: BufRead> {
    reader: R,
    source: Rc<Source>,
    line: Vec<char>,
    index: usize,
    position: Position,
    failed: bool,
}

impl<R: BufRead> Characters<R> {
    fn refill(&mut self) -> io::Result<bool> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(false);
        }

        // Terminaciones de línea arbitrarias se normalizan a '\n'
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        self.line = line.chars().chain(std::iter::once('\n')).collect();
        self.index = 0;
        self.source.lines.borrow_mut().push(line);

        Ok(true)
    }
}

impl<R: BufRead> Iterator for Characters<R> {
    type Item = io::Result<(char, Location)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while self.index >= self.line.len() {
            match self.refill() {
                Ok(true) => (),
                Ok(false) => return None,
                Err(error) => {
                    self.failed = true;
                    return Some(Err(error));
                }
            }
        }

        let c = self.line[self.index];
        self.index += 1;

        let here = self.position;
        self.position = match c {
            '\n' => here.newline(),
            '\t' => here.tab(),
            _ => here.advance(),
        };

        let location = Location {
            from: Rc::clone(&self.source),
            position: here..here.advance(),
        };

        Some(Ok((c, location)))
    }
}

/// Envoltura de retroceso de un carácter sobre un flujo de entrada.
///
/// El análisis léxico requiere devolver al flujo exactamente un
/// carácter: el carácter de paro que termina una traza de autómata o
/// el segundo carácter de un operador compuesto fallido. Un solo
/// espacio de almacenamiento opcional es suficiente.
pub struct Pushback<S: InputStream> {
    stream: S,
    slot: Option<(char, Location)>,
}

impl<S: InputStream> Pushback<S> {
    /// Envuelve un flujo sin carácter retrocedido.
    pub fn new(stream: S) -> Self {
        Pushback { stream, slot: None }
    }

    /// Obtiene el siguiente carácter, sea retrocedido o del flujo.
    pub fn next_char(&mut self) -> io::Result<Option<(char, Location)>> {
        if let Some(pending) = self.slot.take() {
            return Ok(Some(pending));
        }

        self.stream.next().transpose()
    }

    /// Devuelve un carácter al flujo.
    ///
    /// El espacio de retroceso debe estar vacío; devolver dos
    /// caracteres sin un consumo intermedio es un error de lógica.
    pub fn unread(&mut self, c: char, at: Location) {
        debug_assert!(self.slot.is_none(), "pushback slot is occupied");
        self.slot = Some((c, at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(source: &str) -> Vec<(char, String)> {
        let (_, stream) = read(Cursor::new(source), "test");
        stream
            .map(|item| {
                let (c, at) = item.unwrap();
                (c, at.to_string())
            })
            .collect()
    }

    #[test]
    fn positions_follow_lines_and_columns() {
        let chars = collect("ab\nc");
        assert_eq!(chars[0], ('a', "test:1:1".to_string()));
        assert_eq!(chars[1], ('b', "test:1:2".to_string()));
        assert_eq!(chars[2], ('\n', "test:1:3".to_string()));
        assert_eq!(chars[3], ('c', "test:2:1".to_string()));
    }

    #[test]
    fn crlf_is_normalized() {
        let chars: Vec<char> = collect("a\r\nb").into_iter().map(|(c, _)| c).collect();
        assert_eq!(chars, ['a', '\n', 'b', '\n']);
    }

    #[test]
    fn lines_are_retained_for_reports() {
        let (start, stream) = read(Cursor::new("x = 1;\ny = 2;"), "test");
        let _ = stream.collect::<io::Result<Vec<_>>>().unwrap();

        let quoted = start.source().with_line(2, str::to_owned);
        assert_eq!(quoted.as_deref(), Some("y = 2;"));
    }

    #[test]
    fn unread_restores_the_stream() {
        let (_, stream) = read(Cursor::new("xy"), "test");
        let mut stream = Pushback::new(stream);

        let (first, at) = stream.next_char().unwrap().unwrap();
        assert_eq!(first, 'x');

        stream.unread(first, at);
        let (again, _) = stream.next_char().unwrap().unwrap();
        assert_eq!(again, 'x');

        let (second, _) = stream.next_char().unwrap().unwrap();
        assert_eq!(second, 'y');
    }
}
