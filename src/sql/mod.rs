//! Command-language front end: hand-written lexer and recursive parser.
//!
//! The pipeline is `&str` → [`lexer::scan`] → tokens → [`parser::parse`] →
//! one [`crate::engine::request::Statement`]. Both stages abandon the
//! statement on the first violation; the parser surfaces it as an error
//! Request that the caller reports and never executes.

pub mod lexer;
pub mod parser;

pub use lexer::{Token, TokenBuffer, TokenConsumer, TokenKind, TokenProducer, scan};
pub use parser::parse;
