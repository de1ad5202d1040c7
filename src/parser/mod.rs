pub mod assemble;
pub mod groups;
pub mod words;

use anyhow::Result;

use crate::db::{TagRow, WordRow};
use crate::lookup::IngredientLookup;
use assemble::RecipeDraft;

/// Two-pass reconstruction: tagged words → grouped runs → recipe draft.
/// (Tokenization runs once at import time; see `words::tokenize_document`.)
pub fn reconstruct(
    words: &[WordRow],
    tags: &[TagRow],
    lookup: &dyn IngredientLookup,
) -> Result<RecipeDraft> {
    let segments = groups::group_words(words, tags);
    assemble::assemble_recipe(&segments, lookup)
}
