//! The landing page served at `/`.
//!
//! Rendered server-side from a fixed template. Every interpolated value is
//! HTML-escaped.

use passgate_store::UserRecord;

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Passgate</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; justify-content: center; margin: 0; padding: 4rem 1rem; }
  main { display: flex; flex-direction: column; align-items: center; gap: 1.5rem; }
  .error { color: #b91c1c; font-size: 0.9rem; }
  .card { display: flex; align-items: center; gap: 1rem; border: 1px solid #d1d5db; border-radius: 0.5rem; padding: 1rem; }
  .card img { width: 48px; height: 48px; border-radius: 50%; }
  .count { color: #6b7280; font-size: 0.9rem; }
  a.button { border-radius: 9999px; background: #171717; color: #fff; padding: 0.6rem 1.2rem; text-decoration: none; }
</style>
</head>
<body>
<main>
<h1>Passgate</h1>
"#;

const PAGE_TAIL: &str = "</main>\n</body>\n</html>\n";

/// Human-readable explanation for a callback error code.
pub fn error_message(code: &str) -> &'static str {
    match code {
        "invalid_state" => {
            "State verification failed. The sign-in request may have been forged (CSRF)."
        }
        "code_verifier_not_found" => {
            "No PKCE code verifier was found for this sign-in. The request may have been forged or replayed."
        }
        "token_fetch_failed" => {
            "Could not obtain tokens from the identity provider. The authorization code may have been injected."
        }
        "invalid_id_token" => "ID token verification failed. The token may have been tampered with.",
        "invalid_nonce" => "Nonce verification failed. The ID token may have been replayed.",
        _ => "An unknown error occurred.",
    }
}

/// Render the landing page for `user` (or a guest), with an optional error.
pub fn render(user: Option<&UserRecord>, error: Option<&str>) -> String {
    let mut html = String::from(PAGE_HEAD);

    if let Some(code) = error {
        html.push_str(&format!(
            "<p class=\"error\">{}</p>\n",
            escape_html(error_message(code))
        ));
    }

    match user {
        Some(user) => {
            let name = escape_html(&user.name);
            html.push_str(&format!("<p>Welcome, {name}.</p>\n<div class=\"card\">\n"));
            if !user.picture_url.is_empty() {
                html.push_str(&format!(
                    "<img src=\"{}\" alt=\"User icon\">\n",
                    escape_html(&user.picture_url)
                ));
            }
            html.push_str(&format!(
                "<h2>{name}</h2>\n<p class=\"count\">Login count: {}</p>\n</div>\n",
                user.login_count
            ));
            html.push_str("<a class=\"button\" href=\"/auth/logout\">Log out</a>\n");
        }
        None => {
            html.push_str("<p>Hello, guest.</p>\n");
            html.push_str("<a class=\"button\" href=\"/auth/login\">Log in</a>\n");
        }
    }

    html.push_str(PAGE_TAIL);
    html
}

/// Escape text for use in HTML content and double-quoted attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
