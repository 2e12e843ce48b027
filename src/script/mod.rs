//! Script templates: tokenization and `$NAME` substitution.
//!
//! A script template is free text, one command per line. Tokenizing turns
//! each non-blank line into raw tokens; substitution then produces the plain
//! argument vector that becomes one exec task in the build stage.

pub mod substitute;
pub mod tokenizer;

pub use substitute::{Environment, substitute_line};
pub use tokenizer::{tokenize_line, tokenize_script};

/// Tokenize and substitute a whole script into executable commands.
pub fn render_commands(script: &str, env: &Environment) -> Vec<Vec<String>> {
    tokenize_script(script)
        .map(|line| substitute_line(&line, env))
        .collect()
}
