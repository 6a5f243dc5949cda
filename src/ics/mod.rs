//! ICS parsing and generation for calendar objects.

mod generate;
mod parse;

pub use generate::generate_object;
pub use parse::parse_object;
