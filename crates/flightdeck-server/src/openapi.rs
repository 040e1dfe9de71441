use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Flightdeck API",
        version = "0.1.0",
        description = "Pilot job aggregator: source registry, scrape runs and normalized postings."
    ),
    paths(
        crate::routes::stats,
        crate::routes::list_sources,
        crate::routes::get_source,
        crate::routes::list_runs,
        crate::routes::scrape_source,
        crate::routes::start_batch,
        crate::routes::list_postings,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::SourceResponse,
        crate::dto::SourceListResponse,
        crate::dto::StatsResponse,
        crate::dto::RunResponse,
        crate::dto::RunListResponse,
        crate::dto::ScrapeResponse,
        crate::dto::BatchAcceptedResponse,
        crate::dto::PostingResponse,
        crate::dto::PostingListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "sources", description = "Source registry and run history"),
        (name = "scraping", description = "On-demand scrapes and batches"),
        (name = "postings", description = "Normalized job postings"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the bearer scheme used by the write endpoints.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Admin token. Set via FLIGHTDECK_ADMIN_TOKEN environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
