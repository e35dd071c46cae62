//! Source-to-bytecode compiler: lexer → recursive-descent parser → AST →
//! register-based codegen.

pub mod ast;
mod codegen;
mod func_state;
pub mod proto;

mod parser;

pub use codegen::compile;
pub use proto::Proto;
