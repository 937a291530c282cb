// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use rand::Rng;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static RNDN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[rndn_(\d+)\]").unwrap());
static RNDA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[rnda_(\d+)\]").unwrap());

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Replace `{{name}}` placeholders with recipient variables.
///
/// Tokens without a matching variable are left in place, so a typo in
/// a template is visible in the delivered mail instead of silently
/// vanishing.
pub fn substitute_variables(text: &str, variables: &AHashMap<String, String>) -> String {
    let mut result = text.to_string();
    for (key, value) in variables {
        let placeholder = format!("{{{{{key}}}}}");
        result = result.replace(&placeholder, value);
    }
    result
}

/// Coerce structured template content to a plain string.
///
/// Rich editors hand over deltas as arrays or objects; sequences are
/// joined by newlines, anything else structured is serialized to its
/// canonical JSON form.
pub fn coerce_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Inputs for `[tag]` macro expansion in a full-custom header block.
#[derive(Clone, Debug)]
pub struct HeaderTagContext {
    pub recipient_email: String,
    pub sender_name: String,
    pub subject: String,
    pub smtp_username: String,
    pub domain: Option<String>,
    pub now: DateTime<Utc>,
}

/// Expand the `[tag]` macros of a full-custom header block.
///
/// `[rndn_N]` / `[rnda_N]` draw fresh randomness per occurrence, so two
/// messages rendered from the same block never share generated ids.
pub fn process_header_tags(header_text: &str, ctx: &HeaderTagContext) -> String {
    let domain = ctx
        .domain
        .clone()
        .or_else(|| ctx.smtp_username.split('@').nth(1).map(|d| d.to_string()))
        .unwrap_or_default();

    let mut result = header_text.to_string();
    result = result.replace("[to]", &ctx.recipient_email);
    result = result.replace("[from]", &ctx.sender_name);
    result = result.replace("[subject]", &ctx.subject);
    result = result.replace("[smtp]", &ctx.smtp_username);
    result = result.replace("[date]", &ctx.now.to_rfc2822());
    result = result.replace("[domain]", &domain);

    let result = RNDN_RE.replace_all(&result, |caps: &Captures| {
        let n: usize = caps[1].parse().unwrap_or(0);
        random_digits(n)
    });
    let result = RNDA_RE.replace_all(&result, |caps: &Captures| {
        let n: usize = caps[1].parse().unwrap_or(0);
        random_alphanumerics(n)
    });
    result.into_owned()
}

fn random_digits(n: usize) -> String {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

fn random_alphanumerics(n: usize) -> String {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| char::from(ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())]))
        .collect()
}

/// Derive a presentable display name from a principal's local part,
/// for full-custom sends that carry no explicit from-name.
pub fn derive_display_name(principal: &str) -> String {
    let local = principal.split('@').next().unwrap_or(principal);
    let words: Vec<String> = local
        .split(['.', '_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        local.to_string()
    } else {
        words.join(" ")
    }
}
