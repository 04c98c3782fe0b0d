//! Tabla de símbolos y comprobaciones semánticas.
//!
//! La tabla de símbolos asocia cada identificador declarado con una
//! dirección de memoria y un tipo de dato. Las direcciones se asignan
//! de forma monotónica a partir de una base configurable, en orden de
//! declaración. Las comprobaciones semánticas son consultas sin estado
//! sobre la tabla: resolución del tipo de un operando y compatibilidad
//! de operaciones aritméticas.

use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};
use std::{
    collections::BTreeSet,
    fmt::{self, Display},
};

/// Dirección de memoria base por defecto.
pub const DEFAULT_BASE_ADDRESS: u32 = 5000;

/// Error semántico.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    /// El identificador ya fue declarado.
    #[error("Duplicate identifier `{0}`")]
    Duplicate(Identifier),

    /// El identificador se usa sin haber sido declarado.
    #[error("Identifier `{0}` not found")]
    Undeclared(Identifier),

    /// Los tipos de una asignación no concuerdan.
    #[error("Data types do not match; cannot assign {found} to a {expected} variable")]
    AssignMismatch { expected: DataType, found: String },

    /// Un operando aritmético no es entero.
    #[error("Cannot perform arithmetic on non-integer operand of type {0}")]
    NonIntegerArithmetic(DataType),

    /// Se declaró una variable de tipo real bajo generación de código.
    #[error("Real data type is not allowed")]
    RealDeclaration,

    /// Apareció un literal real bajo generación de código.
    #[error("Real number is not allowed")]
    RealLiteral,
}

/// Tipo de dato de una variable o expresión.
///
/// `real` es un calificador válido para el análisis sintáctico, pero
/// la máquina de pila objetivo carece de opcodes de números reales,
/// por lo cual el tipo nunca llega a esta tabla.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    Integer,
    Boolean,
}

impl Display for DataType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => fmt.write_str("INTEGER"),
            DataType::Boolean => fmt.write_str("BOOLEAN"),
        }
    }
}

/// Conjunto de tipos que aparecen en las hojas de una expresión.
pub type TypeSet = BTreeSet<DataType>;

/// Una entrada de la tabla de símbolos.
#[derive(Clone, Debug)]
pub struct Entry {
    pub identifier: Identifier,
    pub address: u32,
    pub data_type: DataType,
}

/// Tabla de símbolos de inserción única.
///
/// Los identificadores son únicos; un duplicado es un error. La
/// iteración preserva el orden de declaración.
#[derive(Debug)]
pub struct SymbolTable {
    base: u32,
    symbols: IndexMap<Identifier, (u32, DataType)>,
}

impl SymbolTable {
    /// Crea una tabla vacía con la dirección base dada.
    pub fn new(base: u32) -> Self {
        SymbolTable {
            base,
            symbols: IndexMap::new(),
        }
    }

    /// Declara un identificador, asignándole la siguiente dirección.
    pub fn add(
        &mut self,
        id: &Located<Identifier>,
        data_type: DataType,
    ) -> Result<(), Located<SemanticError>> {
        if self.symbols.contains_key(id.val()) {
            return Err(Located::at(
                SemanticError::Duplicate(id.val().clone()),
                id.location().clone(),
            ));
        }

        let address = self.base + self.symbols.len() as u32;
        self.symbols.insert(id.val().clone(), (address, data_type));

        Ok(())
    }

    /// Busca un identificador, fallando si no fue declarado.
    pub fn lookup(&self, id: &Located<Identifier>) -> Result<(u32, DataType), Located<SemanticError>> {
        self.symbols.get(id.val()).copied().ok_or_else(|| {
            Located::at(
                SemanticError::Undeclared(id.val().clone()),
                id.location().clone(),
            )
        })
    }

    /// Dirección de memoria de un identificador ya declarado.
    pub fn address(&self, id: &Identifier) -> Option<u32> {
        self.symbols.get(id).map(|&(address, _)| address)
    }

    /// Tipo de dato de un identificador ya declarado.
    pub fn data_type(&self, id: &Identifier) -> Option<DataType> {
        self.symbols.get(id).map(|&(_, data_type)| data_type)
    }

    /// Entradas en orden de declaración.
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.symbols
            .iter()
            .map(|(identifier, &(address, data_type))| Entry {
                identifier: identifier.clone(),
                address,
                data_type,
            })
    }

    /// Cantidad de identificadores declarados.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Si la tabla se encuentra vacía.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new(DEFAULT_BASE_ADDRESS)
    }
}

/// Resuelve el tipo de dato de un token hoja de expresión.
///
/// Un identificador resuelve a su tipo declarado; un literal entero a
/// [`DataType::Integer`]; `true` y `false` a [`DataType::Boolean`],
/// sea que lleguen aún como palabras clave o ya reconstruidos como
/// literales booleanos.
pub fn operand_type(
    symbols: &SymbolTable,
    token: &Located<Token>,
) -> Result<DataType, Located<SemanticError>> {
    match token.val() {
        Token::Id(id) => {
            let id = Located::at(id.clone(), token.location().clone());
            symbols.lookup(&id).map(|(_, data_type)| data_type)
        }

        Token::Integer(_) => Ok(DataType::Integer),
        Token::Boolean(_) => Ok(DataType::Boolean),
        Token::Keyword(Keyword::True) | Token::Keyword(Keyword::False) => Ok(DataType::Boolean),

        other => unreachable!("no data type for non-operand token {}", other),
    }
}

/// Verifica que ambos operandos de una operación aritmética resuelvan
/// a entero.
pub fn validate_arithmetic(
    lhs: &TypeSet,
    rhs: &TypeSet,
    at: &Location,
) -> Result<(), Located<SemanticError>> {
    for &data_type in lhs.iter().chain(rhs) {
        if data_type != DataType::Integer {
            return Err(Located::at(
                SemanticError::NonIntegerArithmetic(data_type),
                at.clone(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use std::io::Cursor;

    fn id(name: &str) -> Located<Identifier> {
        let (start, stream) = source::read(Cursor::new(name), "test");
        let token = crate::lex::Lexer::new(start, stream)
            .tokenize()
            .unwrap()
            .remove(0);

        token.map(|token| match token {
            Token::Id(id) => id,
            other => panic!("not an identifier: {}", other),
        })
    }

    #[test]
    fn addresses_are_assigned_in_declaration_order() {
        let mut symbols = SymbolTable::new(5000);
        symbols.add(&id("a"), DataType::Integer).unwrap();
        symbols.add(&id("b"), DataType::Integer).unwrap();
        symbols.add(&id("c"), DataType::Boolean).unwrap();

        let entries: Vec<_> = symbols.entries().collect();
        assert_eq!(entries.len(), 3);

        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(entry.address, 5000 + index as u32);
        }

        assert_eq!(entries[2].identifier.as_ref(), "c");
        assert_eq!(entries[2].data_type, DataType::Boolean);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut symbols = SymbolTable::default();
        symbols.add(&id("a"), DataType::Integer).unwrap();

        let error = symbols.add(&id("a"), DataType::Boolean).unwrap_err();
        assert!(matches!(error.val(), SemanticError::Duplicate(_)));
    }

    #[test]
    fn undeclared_identifiers_are_rejected() {
        let symbols = SymbolTable::default();
        let error = symbols.lookup(&id("ghost")).unwrap_err();

        assert!(matches!(error.val(), SemanticError::Undeclared(_)));
    }

    #[test]
    fn operand_types_resolve_through_the_table() {
        let mut symbols = SymbolTable::default();
        symbols.add(&id("flag"), DataType::Boolean).unwrap();

        let token = id("flag").map(Token::Id);
        assert_eq!(
            operand_type(&symbols, &token).unwrap(),
            DataType::Boolean
        );

        let at = token.location().clone();
        let literal = Located::at(Token::Integer(7), at.clone());
        assert_eq!(operand_type(&symbols, &literal).unwrap(), DataType::Integer);

        let literal = Located::at(Token::Keyword(Keyword::True), at.clone());
        assert_eq!(operand_type(&symbols, &literal).unwrap(), DataType::Boolean);

        let literal = Located::at(Token::Boolean(false), at);
        assert_eq!(operand_type(&symbols, &literal).unwrap(), DataType::Boolean);
    }

    #[test]
    fn arithmetic_requires_integers() {
        let integers: TypeSet = [DataType::Integer].into_iter().collect();
        let booleans: TypeSet = [DataType::Boolean].into_iter().collect();
        let at = id("x").location().clone();

        assert!(validate_arithmetic(&integers, &integers, &at).is_ok());

        let error = validate_arithmetic(&integers, &booleans, &at).unwrap_err();
        assert!(matches!(
            error.val(),
            SemanticError::NonIntegerArithmetic(DataType::Boolean)
        ));
    }
}
