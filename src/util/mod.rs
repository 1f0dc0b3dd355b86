//! Text helpers shared by the content parser and message rendering.

mod text;

pub use text::{collapse_whitespace, emojify, normalize_rendered};
