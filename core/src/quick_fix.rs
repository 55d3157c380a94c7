//! Editor bridges that turn diagnostics and selections into chat prompts.

use serde::Deserialize;

use crate::errors::OlaError;

const COMMENT_INSTRUCTIONS: &str = "Write review comments for the code below. \
A good comment states the intent behind the code without repeating what the code already says: \
explain why it exists, any magic values and any behaviour that is not obvious. \
Use the comment syntax of the language the code is written in. \
Only add function level comments; do not comment between statements, and avoid unnecessary comments.";

#[derive(Debug, Clone, Deserialize)]
pub struct QuickFixRequest {
    pub diagnostic: String,
    pub document: String,
}

impl QuickFixRequest {
    pub fn into_prompt(self) -> Result<String, OlaError> {
        if self.diagnostic.trim().is_empty() {
            return Err(OlaError::InvalidInput("diagnostic message is empty".into()));
        }
        Ok(format!("{} \n {}", self.diagnostic.trim(), self.document))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentRequest {
    pub selection: String,
}

impl CommentRequest {
    pub fn into_prompt(self) -> Result<String, OlaError> {
        if self.selection.trim().is_empty() {
            return Err(OlaError::InvalidInput("Select a text in your editor".into()));
        }
        Ok(format!("{COMMENT_INSTRUCTIONS}\n\n{}", self.selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_fix_puts_diagnostic_before_document() {
        let prompt = QuickFixRequest {
            diagnostic: "cannot borrow `x` as mutable ".into(),
            document: "fn main() {}".into(),
        }
        .into_prompt()
        .unwrap();
        assert_eq!(prompt, "cannot borrow `x` as mutable \n fn main() {}");
    }

    #[test]
    fn empty_selection_is_rejected() {
        let err = CommentRequest { selection: "  \n".into() }.into_prompt().unwrap_err();
        assert_eq!(err.code(), "INP-1001");
    }

    #[test]
    fn comment_prompt_ends_with_the_selection() {
        let prompt = CommentRequest { selection: "fn add(a: i32, b: i32) -> i32 { a + b }".into() }
            .into_prompt()
            .unwrap();
        assert!(prompt.starts_with(COMMENT_INSTRUCTIONS));
        assert!(prompt.ends_with("{ a + b }"));
    }
}
