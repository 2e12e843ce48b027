//! `$NAME` substitution over tokenized lines.

use std::collections::BTreeMap;

/// Run-specific variables for one branch. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard `{BRANCH, PORT}` environment.
    pub fn for_branch(branch: &str, port: u16) -> Self {
        let mut env = Self::new();
        env.set("BRANCH", branch);
        env.set("PORT", port.to_string());
        env
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Substitute one tokenized line.
///
/// Tokens that reference at least one variable have every `$NAME` replaced
/// and all `'`/`"` characters stripped. Tokens that reference none are passed
/// through untouched, quotes included.
pub fn substitute_line(tokens: &[String], env: &Environment) -> Vec<String> {
    tokens
        .iter()
        .map(|token| substitute_token(token, env))
        .collect()
}

fn substitute_token(token: &str, env: &Environment) -> String {
    let mut out = token.to_string();
    let mut substituted = false;
    for (name, value) in env.iter() {
        let placeholder = format!("${name}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
            substituted = true;
        }
    }
    if substituted {
        out.retain(|c| c != '\'' && c != '"');
    }
    out
}
