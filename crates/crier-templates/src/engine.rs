//! Placeholder rendering for campaign content.
//!
//! Variables are `{{ name }}` references. A reference may carry `.attr`
//! paths into structured context values and `|filter` suffixes; filters are
//! accepted for compatibility with imported templates but not applied.
//! Rendering never fails: an unresolvable reference becomes the empty string
//! and is logged as a warning.

use chrono::{DateTime, Datelike, Utc};
use crier_entities::{templates, users, CommsChannel};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use utoipa::ToSchema;

use crate::formatters;

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("variable pattern compiles"));

/// Context names that are always available to a template, on top of its
/// declared variables.
pub const AMBIENT_VARIABLES: [&str; 7] = [
    "school_name",
    "current_date",
    "current_time",
    "academic_year",
    "term",
    "user",
    "user_name",
];

/// Values a template renders against. Keys map to `{{ name }}` roots;
/// structured values are reachable through `.attr` paths.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: Map<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Attach the recipient: `user` as a structured value, `user_name` as
    /// the display name.
    pub fn with_user(mut self, user: &users::Model) -> Self {
        match serde_json::to_value(user) {
            Ok(value) => self.insert("user", value),
            Err(e) => warn!("Could not serialize user into render context: {}", e),
        }
        self.insert("user_name", Value::String(user.full_name()));
        self
    }

    /// Merge the top-level keys of a JSON object, e.g. a stored
    /// `template_context` column.
    pub fn merge_object(&mut self, object: &Value) {
        if let Value::Object(map) = object {
            for (key, value) in map {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Subject/body pair after substitution and channel post-processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Outcome of checking a template's references against its declared
/// variables and the ambient set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidationReport {
    pub ok: bool,
    /// Required variables never referenced by the template.
    pub missing: Vec<String>,
    /// Referenced variables that are neither declared nor ambient.
    pub unknown: Vec<String>,
    /// Every root variable the template references.
    pub variables: Vec<String>,
}

/// Extract root variable names, in order of first appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    for caps in VARIABLE_RE.captures_iter(template) {
        let root = reference_root(&caps[1]);
        if !root.is_empty() && !variables.iter().any(|v| v == &root) {
            variables.push(root);
        }
    }
    variables
}

fn reference_root(reference: &str) -> String {
    reference
        .split('|')
        .next()
        .unwrap_or("")
        .split('.')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Substitute every `{{ ... }}` reference from the context.
pub fn render_string(template: &str, context: &RenderContext) -> String {
    VARIABLE_RE
        .replace_all(template, |caps: &regex::Captures| {
            resolve_reference(caps[1].trim(), context)
        })
        .into_owned()
}

fn resolve_reference(reference: &str, context: &RenderContext) -> String {
    let path = reference.split('|').next().unwrap_or("").trim();
    let mut segments = path.split('.');
    let root = segments.next().unwrap_or("").trim();

    let Some(mut value) = context.get(root) else {
        warn!(variable = root, "Template variable missing from context");
        return String::new();
    };

    for segment in segments {
        match value.get(segment.trim()) {
            Some(next) => value = next,
            None => {
                warn!(
                    variable = path,
                    attribute = segment,
                    "Template attribute missing from context"
                );
                return String::new();
            }
        }
    }

    value_to_string(value, path)
}

fn value_to_string(value: &Value, path: &str) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => {
            warn!(
                variable = path,
                "Template variable resolves to a composite value"
            );
            String::new()
        }
    }
}

/// Check referenced variables against declared + ambient, and optionally a
/// required set.
pub fn validate(
    subject_template: &str,
    content_template: &str,
    declared: &[String],
    required: Option<&[String]>,
) -> ValidationReport {
    let mut variables = extract_variables(subject_template);
    for v in extract_variables(content_template) {
        if !variables.contains(&v) {
            variables.push(v);
        }
    }

    let missing: Vec<String> = required
        .map(|req| {
            req.iter()
                .filter(|r| !variables.contains(r))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let unknown: Vec<String> = variables
        .iter()
        .filter(|v| !declared.contains(v) && !AMBIENT_VARIABLES.contains(&v.as_str()))
        .cloned()
        .collect();

    ValidationReport {
        ok: missing.is_empty() && unknown.is_empty(),
        missing,
        unknown,
        variables,
    }
}

/// Renders templates against a context and applies per-channel formatting.
pub struct TemplateEngine {
    school_name: String,
    in_app_body_limit: usize,
}

impl TemplateEngine {
    pub fn new(school_name: String, in_app_body_limit: usize) -> Self {
        Self {
            school_name,
            in_app_body_limit,
        }
    }

    /// Ambient values every render sees; recipient values come via
    /// [`RenderContext::with_user`].
    pub fn ambient_context(&self, now: DateTime<Utc>) -> RenderContext {
        let mut context = RenderContext::new();
        context.insert("school_name", Value::String(self.school_name.clone()));
        context.insert(
            "current_date",
            Value::String(now.format("%Y-%m-%d").to_string()),
        );
        context.insert(
            "current_time",
            Value::String(now.format("%H:%M").to_string()),
        );
        context.insert("academic_year", Value::String(academic_year(now)));
        context.insert("term", Value::String(term_name(now).to_string()));
        context
    }

    pub fn render(
        &self,
        template: &templates::Model,
        channel: CommsChannel,
        context: &RenderContext,
    ) -> RenderedMessage {
        self.render_parts(
            &template.subject_template,
            &template.content_template,
            channel,
            context,
        )
    }

    /// Render free-standing subject/content strings, e.g. a campaign whose
    /// author typed the text directly instead of picking a template.
    pub fn render_parts(
        &self,
        subject_template: &str,
        content_template: &str,
        channel: CommsChannel,
        context: &RenderContext,
    ) -> RenderedMessage {
        let subject = render_string(subject_template, context);
        let body = render_string(content_template, context);

        match channel {
            CommsChannel::Email => RenderedMessage {
                subject,
                body: formatters::format_for_email(&body),
            },
            CommsChannel::Sms => RenderedMessage {
                subject,
                body: formatters::format_for_sms(&body),
            },
            CommsChannel::Push => {
                let (title, body) = formatters::format_for_push(&subject, &body);
                RenderedMessage {
                    subject: title,
                    body,
                }
            }
            CommsChannel::InApp => RenderedMessage {
                subject,
                body: formatters::format_for_in_app(&body, self.in_app_body_limit),
            },
        }
    }
}

/// August starts the new school year.
fn academic_year(now: DateTime<Utc>) -> String {
    let year = now.year();
    if now.month() >= 8 {
        format!("{}-{}", year, year + 1)
    } else {
        format!("{}-{}", year - 1, year)
    }
}

fn term_name(now: DateTime<Utc>) -> &'static str {
    match now.month() {
        8..=11 => "First Term",
        12 | 1..=3 => "Second Term",
        _ => "Third Term",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> TemplateEngine {
        TemplateEngine::new("Hillside Academy".to_string(), 500)
    }

    fn context_with(pairs: &[(&str, &str)]) -> RenderContext {
        let mut context = RenderContext::new();
        for (k, v) in pairs {
            context.insert(k, Value::String(v.to_string()));
        }
        context
    }

    #[test]
    fn extraction_reduces_attrs_and_filters_to_roots() {
        let variables = extract_variables(
            "Dear {{ user.first_name }}, {{ fee_amount|floatformat:2 }} is due on {{ due_date }}. \
             Regards, {{ user.last_name }}",
        );
        assert_eq!(variables, vec!["user", "fee_amount", "due_date"]);
    }

    #[test]
    fn extraction_on_plain_text_is_empty() {
        assert!(extract_variables("No placeholders here").is_empty());
    }

    #[test]
    fn missing_variable_renders_as_empty_string() {
        let rendered = render_string("Hello {{ nobody }}!", &RenderContext::new());
        assert_eq!(rendered, "Hello !");
    }

    #[test]
    fn missing_attribute_renders_as_empty_string() {
        let mut context = RenderContext::new();
        context.insert("user", serde_json::json!({"first_name": "Asha"}));
        let rendered = render_string("{{ user.first_name }}{{ user.middle_name }}", &context);
        assert_eq!(rendered, "Asha");
    }

    #[test]
    fn attr_paths_walk_structured_values() {
        let mut context = RenderContext::new();
        context.insert(
            "user",
            serde_json::json!({"first_name": "Asha", "profile": {"grade": 5}}),
        );
        let rendered = render_string(
            "{{ user.first_name }} is in grade {{ user.profile.grade }}",
            &context,
        );
        assert_eq!(rendered, "Asha is in grade 5");
    }

    #[test]
    fn filters_are_stripped_not_applied() {
        let context = context_with(&[("name", "asha")]);
        assert_eq!(render_string("{{ name|upper }}", &context), "asha");
    }

    #[test]
    fn render_is_deterministic_and_sms_fits_160_chars() {
        let engine = engine();
        let long_body = "Reminder: ".repeat(40);
        let context = RenderContext::new();

        let first = engine.render_parts("Fees", &long_body, CommsChannel::Sms, &context);
        let second = engine.render_parts("Fees", &long_body, CommsChannel::Sms, &context);

        assert_eq!(first, second);
        assert!(first.body.chars().count() <= 160);
        assert!(first.body.ends_with('…'));
    }

    #[test]
    fn short_sms_is_not_truncated() {
        let engine = engine();
        let rendered = engine.render_parts("", "<b>Exam</b> tomorrow  at   9", CommsChannel::Sms, &RenderContext::new());
        assert_eq!(rendered.body, "Exam tomorrow at 9");
    }

    #[test]
    fn email_bodies_are_wrapped_into_paragraphs() {
        let engine = engine();
        let rendered = engine.render_parts(
            "Subject",
            "First line\nsecond line\n\nNew paragraph",
            CommsChannel::Email,
            &RenderContext::new(),
        );
        assert_eq!(
            rendered.body,
            "<p>First line<br>second line</p><p>New paragraph</p>"
        );

        let markup = engine.render_parts(
            "Subject",
            "<h1>Already HTML</h1>",
            CommsChannel::Email,
            &RenderContext::new(),
        );
        assert_eq!(markup.body, "<h1>Already HTML</h1>");
    }

    #[test]
    fn push_truncates_title_and_body() {
        let engine = engine();
        let rendered = engine.render_parts(
            &"T".repeat(80),
            &"b".repeat(200),
            CommsChannel::Push,
            &RenderContext::new(),
        );
        assert_eq!(rendered.subject.chars().count(), 50);
        assert_eq!(rendered.body.chars().count(), 100);
    }

    #[test]
    fn in_app_respects_the_configured_limit() {
        let engine = TemplateEngine::new("School".to_string(), 10);
        let rendered = engine.render_parts(
            "Subject",
            "0123456789ABCDEF",
            CommsChannel::InApp,
            &RenderContext::new(),
        );
        assert_eq!(rendered.body, "0123456789");
    }

    #[test]
    fn ambient_context_fills_school_calendar_values() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2025, 9, 10, 7, 45, 0).unwrap();
        let context = engine.ambient_context(now);

        let rendered = render_string(
            "{{ school_name }} | {{ current_date }} {{ current_time }} | {{ academic_year }} {{ term }}",
            &context,
        );
        assert_eq!(
            rendered,
            "Hillside Academy | 2025-09-10 07:45 | 2025-2026 First Term"
        );

        // Spring dates belong to the prior academic year
        let spring = engine.ambient_context(Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap());
        assert_eq!(render_string("{{ academic_year }}", &spring), "2025-2026");
        assert_eq!(render_string("{{ term }}", &spring), "Second Term");
    }

    #[test]
    fn validation_classifies_missing_and_unknown() {
        let declared = vec!["due_date".to_string()];
        let report = validate(
            "Fees due {{ due_date }}",
            "Dear {{ user_name }}, {{ amount }} is due.",
            &declared,
            Some(&["due_date".to_string(), "late_fee".to_string()]),
        );

        assert!(!report.ok);
        assert_eq!(report.missing, vec!["late_fee"]);
        assert_eq!(report.unknown, vec!["amount"]);
        assert_eq!(report.variables, vec!["due_date", "user_name", "amount"]);

        let clean = validate(
            "Welcome to {{ school_name }}",
            "Hi {{ user_name }}",
            &[],
            None,
        );
        assert!(clean.ok);
    }
}
