#[macro_use]
mod macros;

/// Resolution of tag-guarded `.sby` configuration text
mod sby;
pub use sby::{extract_tasks, files_section, resolve, Error, ResolvedConfig, SbyConfig, TaskDecls};

/// Reader for the structured result document
pub mod junit;

pub(crate) mod prelude {
    pub use combine::parser::char::{char, string};
    pub use combine::*;
}
