//! Tabla de instrucciones de la máquina de pila objetivo.
//!
//! La salida del compilador es un listado textual de instrucciones
//! para una máquina de pila abstracta: los operandos se empujan a una
//! pila implícita y cada opcode desapila, computa y vuelve a apilar.
//! Las instrucciones se emiten en línea con el análisis sintáctico y
//! sus direcciones son contiguas a partir de 1.
//!
//! # Back-patching
//! Un salto hacia adelante se emite con operando pendiente y su
//! dirección se apila en la pila de saltos. Cuando el destino se
//! vuelve conocido, [`InstructionTable::back_patch`] desapila la
//! dirección y escribe el destino en el operando de aquella
//! instrucción. Solo el operando muta; la posición de toda
//! instrucción emitida es estable. La disciplina LIFO es lo que
//! permite anidar condicionales y ciclos arbitrariamente.

use std::{
    fmt::{self, Display},
    io::{self, Write},
};

use thiserror::Error;

/// Dirección de una instrucción, con base 1.
pub type Address = u32;

/// Error interno de generación de código.
///
/// Estas condiciones señalan una violación del protocolo de
/// back-patching, no un defecto del programa fuente.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodeGenError {
    /// Se solicitó un back-patch sin saltos pendientes.
    #[error("Back-patch requested with no pending jump")]
    EmptyJumpStack,

    /// La instrucción desapilada no es un salto.
    #[error("Instruction at address {0} cannot be patched")]
    NotPatchable(Address),
}

/// Una instrucción de la máquina de pila.
///
/// Los saltos llevan su destino embebido; `None` es el operando
/// pendiente de un salto aún no parchado.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// `PUSHI`: empuja una constante entera.
    PushImmediate(i64),

    /// `PUSHM`: empuja el contenido de una dirección de memoria.
    PushMemory(Address),

    /// `POPM`: desapila hacia una dirección de memoria.
    PopMemory(Address),

    /// `SIN`: empuja un valor leído de la entrada estándar.
    StdIn,

    /// `SOUT`: desapila e imprime.
    StdOut,

    /// `A`: suma.
    Add,

    /// `S`: resta.
    Subtract,

    /// `M`: multiplicación.
    Multiply,

    /// `D`: división.
    Divide,

    /// `GRT`
    Greater,

    /// `LES`
    Less,

    /// `EQU`
    Equal,

    /// `NEQ`
    NotEqual,

    /// `LEQ`
    LessOrEqual,

    /// `GEQ`
    GreaterOrEqual,

    /// `JUMP`: salto incondicional.
    Jump(Option<Address>),

    /// `JUMP0`: salta si el tope de la pila es cero.
    JumpIfZero(Option<Address>),

    /// `LABEL`: no realiza acción alguna; sirve de destino de salto.
    Label,
}

impl Display for Opcode {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Opcode::*;

        match self {
            PushImmediate(value) => write!(fmt, "PUSHI {}", value),
            PushMemory(address) => write!(fmt, "PUSHM {}", address),
            PopMemory(address) => write!(fmt, "POPM {}", address),
            StdIn => fmt.write_str("SIN"),
            StdOut => fmt.write_str("SOUT"),
            Add => fmt.write_str("A"),
            Subtract => fmt.write_str("S"),
            Multiply => fmt.write_str("M"),
            Divide => fmt.write_str("D"),
            Greater => fmt.write_str("GRT"),
            Less => fmt.write_str("LES"),
            Equal => fmt.write_str("EQU"),
            NotEqual => fmt.write_str("NEQ"),
            LessOrEqual => fmt.write_str("LEQ"),
            GreaterOrEqual => fmt.write_str("GEQ"),
            Jump(Some(target)) => write!(fmt, "JUMP {}", target),
            Jump(None) => fmt.write_str("JUMP"),
            JumpIfZero(Some(target)) => write!(fmt, "JUMP0 {}", target),
            JumpIfZero(None) => fmt.write_str("JUMP0"),
            Label => fmt.write_str("LABEL"),
        }
    }
}

/// Secuencia ordenada de instrucciones más la pila de saltos.
#[derive(Default, Debug)]
pub struct InstructionTable {
    instructions: Vec<Opcode>,
    pending: Vec<Address>,
}

impl InstructionTable {
    /// Crea una tabla vacía.
    pub fn new() -> Self {
        InstructionTable::default()
    }

    /// Anexa una instrucción y retorna la dirección que recibió.
    pub fn emit(&mut self, opcode: Opcode) -> Address {
        self.instructions.push(opcode);
        self.instructions.len() as Address
    }

    /// Apila una dirección de salto pendiente de parche.
    pub fn push_pending(&mut self, address: Address) {
        self.pending.push(address);
    }

    /// Desapila el salto pendiente más reciente y escribe su destino.
    pub fn back_patch(&mut self, target: Address) -> Result<(), CodeGenError> {
        let address = self.pending.pop().ok_or(CodeGenError::EmptyJumpStack)?;
        let instruction = (address as usize)
            .checked_sub(1)
            .and_then(|index| self.instructions.get_mut(index))
            .ok_or(CodeGenError::NotPatchable(address))?;

        match instruction {
            Opcode::Jump(operand) | Opcode::JumpIfZero(operand) => {
                *operand = Some(target);
                Ok(())
            }

            _ => Err(CodeGenError::NotPatchable(address)),
        }
    }

    /// Cantidad de saltos aún pendientes de parche.
    pub fn pending_jumps(&self) -> usize {
        self.pending.len()
    }

    /// Dirección que recibirá la siguiente instrucción emitida.
    pub fn next_address(&self) -> Address {
        self.instructions.len() as Address + 1
    }

    /// Cantidad de instrucciones emitidas.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Si no se ha emitido instrucción alguna.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Itera las instrucciones junto a sus direcciones.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &Opcode)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(index, opcode)| (index as Address + 1, opcode))
    }

    /// Listado crudo: una instrucción por línea, sin direcciones.
    pub fn raw_listing(&self) -> String {
        let mut listing = String::new();
        for opcode in &self.instructions {
            listing.push_str(&opcode.to_string());
            listing.push('\n');
        }

        listing
    }

    /// Escribe el listado tabulado con prefijo de dirección.
    pub fn write_table(&self, output: &mut dyn Write) -> io::Result<()> {
        for (address, opcode) in self.iter() {
            writeln!(output, "{:<8}{}", address, opcode)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_match_emission_order() {
        let mut table = InstructionTable::new();

        assert_eq!(table.emit(Opcode::PushImmediate(1)), 1);
        assert_eq!(table.emit(Opcode::PushImmediate(2)), 2);
        assert_eq!(table.emit(Opcode::Add), 3);
        assert_eq!(table.next_address(), 4);

        for (index, (address, _)) in table.iter().enumerate() {
            assert_eq!(address, index as Address + 1);
        }
    }

    #[test]
    fn back_patch_fills_the_pending_operand() {
        let mut table = InstructionTable::new();

        let jump = table.emit(Opcode::JumpIfZero(None));
        table.push_pending(jump);
        table.emit(Opcode::PushImmediate(0));
        let label = table.emit(Opcode::Label);

        table.back_patch(label).unwrap();

        let patched = table.iter().next().unwrap().1;
        assert_eq!(*patched, Opcode::JumpIfZero(Some(label)));
        assert_eq!(table.pending_jumps(), 0);
    }

    #[test]
    fn patches_resolve_in_lifo_order() {
        let mut table = InstructionTable::new();

        let outer = table.emit(Opcode::JumpIfZero(None));
        table.push_pending(outer);
        let inner = table.emit(Opcode::JumpIfZero(None));
        table.push_pending(inner);

        table.back_patch(7).unwrap();
        table.back_patch(9).unwrap();

        let opcodes: Vec<_> = table.iter().map(|(_, opcode)| opcode.clone()).collect();
        assert_eq!(opcodes[inner as usize - 1], Opcode::JumpIfZero(Some(7)));
        assert_eq!(opcodes[outer as usize - 1], Opcode::JumpIfZero(Some(9)));
    }

    #[test]
    fn back_patch_without_pending_jumps_fails() {
        let mut table = InstructionTable::new();
        assert!(matches!(
            table.back_patch(1),
            Err(CodeGenError::EmptyJumpStack)
        ));
    }

    #[test]
    fn only_jumps_can_be_patched() {
        let mut table = InstructionTable::new();

        let label = table.emit(Opcode::Label);
        table.push_pending(label);

        assert!(matches!(
            table.back_patch(2),
            Err(CodeGenError::NotPatchable(1))
        ));
    }

    #[test]
    fn raw_listing_renders_the_contract_format() {
        let mut table = InstructionTable::new();
        table.emit(Opcode::PushMemory(5000));
        table.emit(Opcode::PushImmediate(1));
        table.emit(Opcode::Add);
        table.emit(Opcode::PopMemory(5000));

        assert_eq!(table.raw_listing(), "PUSHM 5000\nPUSHI 1\nA\nPOPM 5000\n");
    }
}
