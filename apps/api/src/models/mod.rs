pub mod document;
pub mod evaluation;
pub mod rubric;
