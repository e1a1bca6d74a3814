use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use super::api::elements::{ElementSetSummary, SubmitElementsResponse, SubmitOutcome};
use super::api::error::ErrorResponse;
use super::api::passes::{NextPassResponse, PassesResponse};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::passes::list_passes,
        super::api::passes::next_pass,
        super::api::elements::current_elements,
        super::api::elements::submit_elements,
        super::api::notifications::list_notifications,
    ),
    components(
        schemas(
            PassesResponse,
            NextPassResponse,
            ElementSetSummary,
            SubmitElementsResponse,
            SubmitOutcome,
            ErrorResponse,
            crate::predict::Pass,
            crate::predict::ElementSetId,
            crate::predict::GroundStation,
            crate::scheduler::NotificationRecord,
            crate::scheduler::NotificationState,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Pass-O-Mat API",
        description = "Satellite pass predictions and reminder state",
        version = "0.1.0"
    ),
    tags(
        (name = "passes", description = "Pass predictions"),
        (name = "elements", description = "Orbital element set"),
        (name = "notifications", description = "Reminder state")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
