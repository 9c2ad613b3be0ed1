//! OpenAPI schema utilities for merging per-plugin API documentation

use utoipa::openapi::OpenApi;

/// Merges multiple OpenAPI schemas into a single schema.
///
/// Each plugin contributes its own `OpenApi` document; the plugin manager
/// folds them into one document behind a single Swagger UI. Paths,
/// components, tags, servers, and security requirements are combined;
/// duplicate keys are overwritten by later schemas.
pub fn merge_openapi_schemas(mut base: OpenApi, schemas: Vec<OpenApi>) -> OpenApi {
    for schema in schemas {
        base.paths.paths.extend(schema.paths.paths);

        if let Some(components) = schema.components {
            let base_components = base.components.get_or_insert_with(Default::default);
            base_components.schemas.extend(components.schemas);
            base_components.responses.extend(components.responses);
            base_components
                .security_schemes
                .extend(components.security_schemes);
        }

        if let Some(tags) = schema.tags {
            let base_tags = base.tags.get_or_insert_with(Vec::new);
            base_tags.extend(tags);
        }

        if let Some(servers) = schema.servers {
            let base_servers = base.servers.get_or_insert_with(Vec::new);
            base_servers.extend(servers);
        }

        if let Some(security) = schema.security {
            let base_security = base.security.get_or_insert_with(Vec::new);
            base_security.extend(security);
        }

        if schema.external_docs.is_some() && base.external_docs.is_none() {
            base.external_docs = schema.external_docs;
        }
    }

    base
}
