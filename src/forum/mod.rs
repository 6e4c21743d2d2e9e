//! Thread page parsing.

mod extractor;
mod post_id;

pub use extractor::{
    ExtractError, Extractor, ImageFilter, MarkupClasses, Post, Selectors, PARAGRAPH_SEPARATOR,
};
pub use post_id::{InvalidPostId, PostId};
