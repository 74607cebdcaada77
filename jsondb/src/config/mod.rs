mod parser;
mod types;

pub use parser::{parse_options, parse_options_str};
pub use types::{IdStrategy, Options};
