// #![warn(missing_docs)]

pub mod aabb;
pub mod anim;
pub mod emitter;
mod error;
pub mod io;
pub mod lex;
mod parse;
pub mod scene;
pub mod smoothgroup;
pub mod txi;
mod types;
mod write;

pub use error::{Error, Parsed, Result, Warning, WarningKind};
pub use io::{ExportOptions, ExportSet, ImportOptions};
pub use parse::{parse_model, parse_walkmesh, Parser};
pub use scene::{export_model, import_model, ArenaScene, SceneBuilder, SceneSource};
pub use txi::Txi;
pub use types::*;
pub use write::{fmt_float, fmt_signed, fmt_tuple};
