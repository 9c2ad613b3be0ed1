use std::sync::Arc;

use crier_database::DbConnection;
use crier_entities::{templates, ChannelList, CommsChannel, MessageCategory, StringList};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::engine::{self, RenderContext, TemplateEngine, ValidationReport};

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Template {id} not found")]
    NotFound { id: i32 },
    #[error("A template named '{name}' already exists")]
    DuplicateName { name: String },
    #[error("Invalid template: {details}")]
    Invalid { details: String },
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub template_type: MessageCategory,
    #[serde(default)]
    pub subject_template: String,
    pub content_template: String,
    pub supported_channels: ChannelList,
    #[serde(default)]
    pub declared_variables: StringList,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub template_type: Option<MessageCategory>,
    pub subject_template: Option<String>,
    pub content_template: Option<String>,
    pub supported_channels: Option<ChannelList>,
    pub declared_variables: Option<StringList>,
    pub is_active: Option<bool>,
}

/// Rendered sample output for a single channel.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplatePreview {
    pub channel: CommsChannel,
    pub subject: String,
    pub body: String,
    /// Root variables the template references.
    pub variables: Vec<String>,
}

/// CRUD over message templates. Placeholder references are checked against
/// the declared variables at save time, so a stored template never renders
/// an unknown root.
pub struct TemplateService {
    db: Arc<DbConnection>,
    engine: Arc<TemplateEngine>,
}

impl TemplateService {
    pub fn new(db: Arc<DbConnection>, engine: Arc<TemplateEngine>) -> Self {
        Self { db, engine }
    }

    pub async fn create_template(
        &self,
        request: CreateTemplateRequest,
    ) -> Result<templates::Model, TemplateError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(TemplateError::Invalid {
                details: "template name cannot be empty".to_string(),
            });
        }
        if request.content_template.trim().is_empty() {
            return Err(TemplateError::Invalid {
                details: "content template cannot be empty".to_string(),
            });
        }
        if request.supported_channels.is_empty() {
            return Err(TemplateError::Invalid {
                details: "a template must support at least one channel".to_string(),
            });
        }
        check_references(
            &request.subject_template,
            &request.content_template,
            &request.declared_variables,
        )?;
        self.ensure_name_free(&name, None).await?;

        let template = templates::ActiveModel {
            name: Set(name),
            template_type: Set(request.template_type),
            subject_template: Set(request.subject_template),
            content_template: Set(request.content_template),
            supported_channels: Set(request.supported_channels),
            declared_variables: Set(request.declared_variables),
            is_active: Set(request.is_active.unwrap_or(true)),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(template_id = template.id, name = %template.name, "Created template");
        Ok(template)
    }

    pub async fn update_template(
        &self,
        id: i32,
        request: UpdateTemplateRequest,
    ) -> Result<templates::Model, TemplateError> {
        let existing = self.get_template(id).await?;

        let name = match request.name {
            Some(name) => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(TemplateError::Invalid {
                        details: "template name cannot be empty".to_string(),
                    });
                }
                if name != existing.name {
                    self.ensure_name_free(&name, Some(id)).await?;
                }
                name
            }
            None => existing.name.clone(),
        };

        let subject = request
            .subject_template
            .unwrap_or_else(|| existing.subject_template.clone());
        let content = request
            .content_template
            .unwrap_or_else(|| existing.content_template.clone());
        if content.trim().is_empty() {
            return Err(TemplateError::Invalid {
                details: "content template cannot be empty".to_string(),
            });
        }
        let channels = request
            .supported_channels
            .unwrap_or_else(|| existing.supported_channels.clone());
        if channels.is_empty() {
            return Err(TemplateError::Invalid {
                details: "a template must support at least one channel".to_string(),
            });
        }
        let declared = request
            .declared_variables
            .unwrap_or_else(|| existing.declared_variables.clone());
        check_references(&subject, &content, &declared)?;

        let mut active: templates::ActiveModel = existing.into();
        active.name = Set(name);
        if let Some(template_type) = request.template_type {
            active.template_type = Set(template_type);
        }
        active.subject_template = Set(subject);
        active.content_template = Set(content);
        active.supported_channels = Set(channels);
        active.declared_variables = Set(declared);
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }

        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn get_template(&self, id: i32) -> Result<templates::Model, TemplateError> {
        templates::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(TemplateError::NotFound { id })
    }

    pub async fn list_templates(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<templates::Model>, TemplateError> {
        let mut query = templates::Entity::find().order_by_asc(templates::Column::Name);
        if !include_inactive {
            query = query.filter(templates::Column::IsActive.eq(true));
        }
        Ok(query.all(self.db.as_ref()).await?)
    }

    /// Hard delete. Campaigns that used the template keep their rendered
    /// content; their template reference is cleared by the schema.
    pub async fn delete_template(&self, id: i32) -> Result<(), TemplateError> {
        let template = self.get_template(id).await?;
        template.delete(self.db.as_ref()).await?;
        tracing::info!(template_id = id, "Deleted template");
        Ok(())
    }

    /// Run a stored template against sample values. Declared variables render
    /// as `[name]` markers so an author can see where each one lands.
    pub async fn render_preview(
        &self,
        id: i32,
        channel: Option<CommsChannel>,
    ) -> Result<TemplatePreview, TemplateError> {
        let template = self.get_template(id).await?;
        let channel = channel
            .or_else(|| template.supported_channels.iter().next().copied())
            .unwrap_or(CommsChannel::Email);

        let context = self.sample_context(&template.declared_variables);
        let rendered = self.engine.render(&template, channel, &context);
        let report = self.validate_template(&template);

        Ok(TemplatePreview {
            channel,
            subject: rendered.subject,
            body: rendered.body,
            variables: report.variables,
        })
    }

    pub fn validate_template(&self, template: &templates::Model) -> ValidationReport {
        engine::validate(
            &template.subject_template,
            &template.content_template,
            &template.declared_variables.0,
            None,
        )
    }

    fn sample_context(&self, declared: &StringList) -> RenderContext {
        let mut context = self.engine.ambient_context(chrono::Utc::now());
        context.insert(
            "user",
            serde_json::json!({
                "first_name": "Jordan",
                "last_name": "Sample",
                "email": "jordan.sample@school.example",
                "phone": "+15550100",
            }),
        );
        context.insert("user_name", Value::String("Jordan Sample".to_string()));
        for name in &declared.0 {
            context.insert(name, Value::String(format!("[{}]", name)));
        }
        context
    }

    async fn ensure_name_free(
        &self,
        name: &str,
        exclude_id: Option<i32>,
    ) -> Result<(), TemplateError> {
        let mut query = templates::Entity::find().filter(templates::Column::Name.eq(name));
        if let Some(id) = exclude_id {
            query = query.filter(templates::Column::Id.ne(id));
        }
        if query.one(self.db.as_ref()).await?.is_some() {
            return Err(TemplateError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

fn check_references(
    subject: &str,
    content: &str,
    declared: &StringList,
) -> Result<(), TemplateError> {
    let report = engine::validate(subject, content, &declared.0, None);
    if report.unknown.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::Invalid {
            details: format!(
                "template references undeclared variables: {}",
                report.unknown.join(", ")
            ),
        })
    }
}
