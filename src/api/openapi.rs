use super::handlers::{auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login))
        .routes(routes!(auth::refresh))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::google_login));

    let mut gardi_tag = Tag::new("gardi");
    gardi_tag.description = Some("Session and token lifecycle API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, token rotation and logout".to_string());

    router.get_openapi_mut().tags = Some(vec![gardi_tag, auth_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    // First Cargo author, in "Name <email>" form.
    if let Some((name, email)) = env!("CARGO_PKG_AUTHORS")
        .split(';')
        .next()
        .and_then(|author| author.trim().split_once('<'))
    {
        let mut contact = Contact::new();
        contact.name = Some(name.trim().to_string());
        contact.email = Some(email.trim_end_matches('>').trim().to_string());
        info.contact = Some(contact);
    }

    let identifier = env!("CARGO_PKG_LICENSE");
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    info.license = Some(license);

    OpenApiBuilder::new().info(info).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Gardi"));
            assert_eq!(contact.email.as_deref(), Some("team@gardi.dev"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "gardi"));
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        assert!(spec.paths.paths.contains_key("/v1/auth/login"));
        assert!(spec.paths.paths.contains_key("/v1/auth/refresh"));
        assert!(spec.paths.paths.contains_key("/v1/auth/logout"));
        assert!(spec.paths.paths.contains_key("/v1/auth/google"));
        assert!(spec.paths.paths.contains_key("/health"));
    }
}
