//! Global Register Allocator - CFG and Expression Tree Model
//!
//! The allocator consumes a method as a control flow graph of blocks holding
//! expression trees over a symbol table. This crate is that model.
//!
//! ## Architecture
//!
//! The crate is structured as follows:
//! - `opcode` - Tree opcodes and their classification predicates
//! - `node` - Expression nodes in an index-addressed arena
//! - `symbol` - Symbols with alias sets and live-local indices
//! - `cfg` - Blocks, edges, loops and extended-block chaining
//! - `method` - The method container and whole-method queries
//! - `builder` - Programmatic construction with derived reference counts

pub use self::builder::MethodBuilder;
pub use self::cfg::{Block, Cfg, Loop, END, START};
pub use self::method::Method;
pub use self::node::Node;
pub use self::opcode::Opcode;
pub use self::symbol::{Symbol, SymbolKind};

// Internal modules
mod builder;
mod cfg;
mod method;
mod node;
mod opcode;
mod symbol;
