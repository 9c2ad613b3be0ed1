//! Message templates: placeholder extraction, validation, rendering, and
//! per-channel formatting.

pub mod engine;
pub mod formatters;
pub mod handlers;
pub mod plugin;
pub mod service;

pub use engine::{
    extract_variables, render_string, validate, RenderContext, RenderedMessage, TemplateEngine,
    ValidationReport, AMBIENT_VARIABLES,
};
pub use formatters::{
    format_for_email, format_for_in_app, format_for_push, format_for_sms, sms_estimated_parts,
    strip_markup, PUSH_BODY_LEN, PUSH_TITLE_LEN, SMS_MAX_LEN,
};
pub use handlers::{configure_routes, TemplateResponse, TemplatesApiDoc, TemplatesState};
pub use plugin::TemplatePlugin;
pub use service::{
    CreateTemplateRequest, TemplateError, TemplatePreview, TemplateService, UpdateTemplateRequest,
};
