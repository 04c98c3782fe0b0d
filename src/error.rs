use crate::source::Located;
use std::{
    error::Error,
    fmt::{self, Display},
};

/// Reporte imprimible de un error con su contexto de código fuente.
///
/// La salida sigue el formato `error: mensaje`, la ubicación, la o
/// las líneas citadas y un subrayado de carets bajo el rango señalado.
pub struct Report<E>(Located<E>);

impl<E: Error> From<Located<E>> for Report<E> {
    fn from(error: Located<E>) -> Self {
        Report(error)
    }
}

impl<E: Error> Display for Report<E> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let error = self.0.val();
        let location = self.0.location();

        writeln!(fmt, "error: {}", error)?;
        writeln!(fmt, " --> {}", location)?;

        let digits = location.end().line().to_string().chars().count();
        writeln!(fmt, "{:digits$} |", "")?;

        for line_number in location.start().line()..=location.end().line() {
            location
                .source()
                .with_line(line_number, |line| {
                    writeln!(fmt, "{:>digits$} | {}", line_number, line)
                })
                .unwrap_or(Ok(()))?;
        }

        // El subrayado solo tiene sentido dentro de una misma línea
        if location.start().line() == location.end().line() {
            let from = location.start().column();
            let to = location.end().column().saturating_sub(1);

            let min = from.min(to).max(1);
            let max = from.max(to);

            let skip = (min - 1) as usize;
            let width = (max - min + 1) as usize;

            writeln!(fmt, "{:digits$} | {:skip$}{:^<width$}", "", "", "")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse::Parser, source};
    use std::io::Cursor;

    #[test]
    fn reports_quote_the_offending_line() {
        let (start, stream) = source::read(Cursor::new("$ $ $ a = ; $"), "sample.rat");
        let tokens = Lexer::new(start.clone(), stream).tokenize().unwrap();

        let mut parser = Parser::new(start, tokens.into_iter());
        let error = parser.parse().unwrap_err();

        let report = Report::from(error).to_string();
        assert!(report.starts_with("error: "));
        assert!(report.contains(" --> sample.rat:1:"));
        assert!(report.contains("| $ $ $ a = ; $"));
        assert!(report.contains('^'));
    }
}
