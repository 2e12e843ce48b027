//! Reverse-proxy routing document.
//!
//! One nginx `server` block with a `location /{branch}/` rule per route.
//! Output depends only on the route set and upstream host; routes are
//! ordered by `(branch, port)` so identical ledgers render byte-identical
//! documents.
//!
//! Git allows `;`, braces, quotes and `#` in branch names. Such prefixes are
//! written as quoted nginx strings so they cannot end the directive early.

pub mod publish;

use std::fmt::Write;

use crate::ledger::ProxyRoute;

pub use publish::{ProxyPublisher, resolve_upstream_host};

/// Render the proxy configuration for `routes`, forwarding to `upstream_host`.
pub fn render(routes: &[ProxyRoute], upstream_host: &str) -> String {
    let mut sorted: Vec<&ProxyRoute> = routes.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut doc = String::new();
    doc.push_str("server {\n");
    doc.push_str("    listen 80 default_server;\n");
    doc.push_str("    listen [::]:80 default_server;\n");
    doc.push_str("    root /var/www/html;\n");
    doc.push_str("    index index.html index.htm index.nginx-debian.html;\n");
    doc.push_str("    server_name _;\n");
    for route in sorted {
        if route.branch.chars().any(char::is_control) {
            tracing::warn!(
                branch = %route.branch.escape_debug(),
                "skipping proxy route for unrepresentable branch name"
            );
            continue;
        }
        // Writing to a String cannot fail.
        let _ = write!(
            doc,
            "\n    location {prefix} {{\n\
             \x20       proxy_set_header Host $host;\n\
             \x20       proxy_set_header X-Real-IP $remote_addr;\n\
             \x20       proxy_pass http://{host}:{port}/;\n\
             \x20   }}\n",
            prefix = location_prefix(&route.branch),
            host = upstream_host,
            port = route.port,
        );
    }
    doc.push_str("}\n");
    doc
}

/// `/{branch}/`, quoted and escaped when the branch has characters outside
/// the plain URL-path set.
fn location_prefix(branch: &str) -> String {
    let path = format!("/{}/", branch);
    if path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/-_.@+~%,=:".contains(c))
    {
        return path;
    }
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
