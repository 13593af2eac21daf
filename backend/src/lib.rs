extern crate frontend;
pub mod codegen;
pub mod emitter;
pub mod error;

pub use codegen::{generate_code, CodeGenerator, GenOptions, Generation, ProcState};
pub use error::{ContractViolation, GenError};
