//! The symbolic/taint analysis engine consumed by the pipeline.

use crate::instruction::Instruction;
use crate::Error;

/// An opaque symbolic analysis service.
///
/// The pipeline hands it instructions whose opcode bytes, address, thread
/// id and captured memory operands reflect the concrete state observed by
/// the host, with every operand marked trusted. Whatever IR, taint or
/// expression state the engine keeps is its own business; the pipeline
/// only sequences the calls.
pub trait SymbolicEngine {
    /// Decode the instruction in place, populating its operand list.
    fn disassemble(&mut self, instruction: &mut Instruction) -> Result<(), Error>;

    /// Build IR semantics and propagate taint from the instruction's
    /// trusted concrete state. Captured memory accesses are consumed here;
    /// the pipeline clears them once this returns.
    fn build_semantics(&mut self, instruction: &mut Instruction) -> Result<(), Error>;
}
