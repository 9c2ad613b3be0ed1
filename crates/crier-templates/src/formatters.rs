//! Channel post-processing applied after variable substitution.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hard cap on an SMS body, in characters.
pub const SMS_MAX_LEN: usize = 160;

/// Push notification title cap, in characters.
pub const PUSH_TITLE_LEN: usize = 50;

/// Push notification body cap, in characters.
pub const PUSH_BODY_LEN: usize = 100;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

/// Drop markup tags and collapse runs of whitespace into single spaces.
pub fn strip_markup(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    WHITESPACE_RE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// Plain text becomes simple HTML: blank lines separate paragraphs, single
/// newlines become `<br>`. Content that already opens with a tag is passed
/// through untouched.
pub fn format_for_email(body: &str) -> String {
    if body.trim_start().starts_with('<') {
        return body.to_string();
    }
    body.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| format!("<p>{}</p>", paragraph.replace('\n', "<br>")))
        .collect()
}

/// Strip markup and keep the body within [`SMS_MAX_LEN`] characters. When a
/// truncation happens the last character is an ellipsis, so the result stays
/// one character under the cap plus the marker.
pub fn format_for_sms(body: &str) -> String {
    let plain = strip_markup(body);
    if plain.chars().count() <= SMS_MAX_LEN {
        return plain;
    }
    let mut truncated: String = plain.chars().take(SMS_MAX_LEN - 1).collect();
    truncated.push('…');
    truncated
}

/// Push payloads carry a short title and body, both stripped of markup.
pub fn format_for_push(title: &str, body: &str) -> (String, String) {
    let title = strip_markup(title).chars().take(PUSH_TITLE_LEN).collect();
    let body = strip_markup(body).chars().take(PUSH_BODY_LEN).collect();
    (title, body)
}

/// In-app bodies keep plain text up to the configured limit.
pub fn format_for_in_app(body: &str, limit: usize) -> String {
    strip_markup(body).chars().take(limit).collect()
}

/// Number of SMS segments a body occupies. Empty bodies still consume one.
pub fn sms_estimated_parts(body: &str) -> u32 {
    let chars = body.chars().count();
    (chars.div_ceil(SMS_MAX_LEN)).max(1) as u32
}
