//! Demo pages rendered from the identity view.
//!
//! `/` shows the logged-in identity; `/admin` lists the administrators.
//! Both sit behind the access gate, see [`crate::app`].

use axum::{extract::State, response::Html};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::auth::{AuthServer, AuthView};
use crate::error::escape_html;

fn layout(server: &AuthServer, title: &str, content: &str) -> Html<String> {
    let logout = server
        .paths()
        .map(|paths| {
            format!(
                r#"<p><a href="{}">Sign out</a></p>"#,
                escape_html(paths.logout())
            )
        })
        .unwrap_or_default();
    Html(format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"/><title>{title}</title></head>\
         <body><h1>{title}</h1>{content}{logout}</body></html>",
        title = escape_html(title),
    ))
}

fn identity_summary(view: &AuthView) -> String {
    let email = view.email();
    if email.is_empty() {
        return "<p>No email address on record.</p>".to_string();
    }
    format!(
        "<p>Signed in as <strong>{}</strong>{}.</p>",
        escape_html(&email),
        if view.is_admin() { " (administrator)" } else { "" }
    )
}

/// Home page: the current identity and its userinfo.
pub async fn home(State(server): State<Arc<AuthServer>>, view: AuthView) -> Html<String> {
    let mut content = String::new();
    match view.data() {
        Some(userinfo) => {
            content.push_str(&identity_summary(&view));
            content.push_str("<dl>");
            for (key, value) in userinfo.iter() {
                let value = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                let _ = write!(
                    content,
                    "<dt>{}</dt><dd>{}</dd>",
                    escape_html(key),
                    escape_html(&value)
                );
            }
            content.push_str("</dl>");
        }
        None => content.push_str("<p>Authentication is disabled.</p>"),
    }
    layout(&server, "Home", &content)
}

/// Admin page: the configured administrators.
pub async fn admin(State(server): State<Arc<AuthServer>>, view: AuthView) -> Html<String> {
    let admins = server.admins();
    let mut content = identity_summary(&view);
    if admins.is_empty() {
        content.push_str("<p>No administrators configured; every user is an administrator.</p>");
    } else {
        content.push_str("<ul>");
        for email in &admins {
            let _ = write!(content, "<li>{}</li>", escape_html(email));
        }
        content.push_str("</ul>");
    }
    tracing::debug!(admins = admins.len(), "rendered admin page");
    layout(&server, "Administrators", &content)
}
