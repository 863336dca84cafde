//! Catalog resources.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::catalog::images::ImageFetcher;
use crate::catalog::store::Store;
use crate::mcp::error::{HandlerError, RegistryError};
use crate::mcp::resources::{ResourceBody, ResourceDescriptor, ResourceParams, ResourceRegistry};
use crate::mcp::schema::Schema;

/// URI of the catalog statistics resource.
pub const STATS_URI: &str = "movies://database/stats";

/// What resource producers read from.
#[derive(Clone)]
pub struct Catalog {
    /// Movie and actor records.
    pub store: Arc<dyn Store>,
    /// Poster images; `None` when no poster directory is configured.
    pub images: Option<Arc<dyn ImageFetcher>>,
}

/// Response schema of the statistics resource.
#[must_use]
pub fn stats_schema() -> Schema {
    let count = || Schema::integer().minimum(0.0);
    Schema::object()
        .property("total_movies", count())
        .property("total_actors", count())
        .property("total_cast_links", count())
        .property("average_rating", Schema::number().minimum(0.0).maximum(10.0))
        .property("earliest_year", Schema::integer())
        .property("latest_year", Schema::integer())
        .property("movies_by_genre", Schema::object())
        .require([
            "total_movies",
            "total_actors",
            "total_cast_links",
            "movies_by_genre",
        ])
}

fn id_params() -> Schema {
    Schema::object()
        .property("id", Schema::integer().minimum(1.0))
        .require(["id"])
}

fn movie_schema() -> Schema {
    Schema::object()
        .property("id", Schema::integer())
        .property("title", Schema::string())
        .property("year", Schema::integer())
        .property("cast", Schema::array(Schema::object()))
        .require(["id", "title", "year", "cast"])
}

fn actor_schema() -> Schema {
    Schema::object()
        .property("id", Schema::integer())
        .property("name", Schema::string())
        .property("movies", Schema::array(Schema::object()))
        .require(["id", "name", "movies"])
}

/// Reads the already coerced and validated `id` parameter.
fn id_param(params: &ResourceParams) -> Result<i64, HandlerError> {
    params
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| HandlerError::InvalidArguments("id must be an integer".to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<ResourceBody, HandlerError> {
    serde_json::to_value(value)
        .map(ResourceBody::Json)
        .map_err(|e| HandlerError::Internal(e.to_string()))
}

fn register<F, Fut>(
    registry: &mut ResourceRegistry,
    catalog: &Catalog,
    descriptor: ResourceDescriptor,
    producer: F,
) -> Result<(), RegistryError>
where
    F: Fn(Catalog, ResourceParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResourceBody, HandlerError>> + Send + 'static,
{
    let catalog = catalog.clone();
    registry.register(descriptor, move |params: ResourceParams| {
        producer(catalog.clone(), params)
    })
}

/// Registers every catalog resource.
///
/// # Errors
///
/// Returns an error if a resource URI or template is already registered.
pub fn register_resources(
    registry: &mut ResourceRegistry,
    catalog: &Catalog,
) -> Result<(), RegistryError> {
    register(
        registry,
        catalog,
        ResourceDescriptor::exact(
            STATS_URI,
            "Catalog statistics",
            "Movie, actor and cast counts with rating and genre summaries",
        )
        .with_response_schema(stats_schema()),
        read_stats,
    )?;
    register(
        registry,
        catalog,
        ResourceDescriptor::template("movies://movies/{id}", "Movie", "A movie and its cast")
            .with_param_schema(id_params())
            .with_response_schema(movie_schema()),
        read_movie,
    )?;
    register(
        registry,
        catalog,
        ResourceDescriptor::template(
            "movies://actors/{id}",
            "Actor",
            "An actor and the movies they appear in",
        )
        .with_param_schema(id_params())
        .with_response_schema(actor_schema()),
        read_actor,
    )?;
    register(
        registry,
        catalog,
        ResourceDescriptor::template("movies://posters/{id}", "Poster", "A movie's poster image")
            .with_mime_type("application/octet-stream")
            .with_param_schema(id_params()),
        read_poster,
    )?;
    Ok(())
}

async fn read_stats(catalog: Catalog, _params: ResourceParams) -> Result<ResourceBody, HandlerError> {
    let stats = catalog.store.stats().await?;
    to_json(&stats)
}

async fn read_movie(catalog: Catalog, params: ResourceParams) -> Result<ResourceBody, HandlerError> {
    let details = catalog.store.get_movie(id_param(&params)?).await?;
    to_json(&details)
}

async fn read_actor(catalog: Catalog, params: ResourceParams) -> Result<ResourceBody, HandlerError> {
    let details = catalog.store.get_actor(id_param(&params)?).await?;
    to_json(&details)
}

async fn read_poster(catalog: Catalog, params: ResourceParams) -> Result<ResourceBody, HandlerError> {
    let id = id_param(&params)?;
    let details = catalog.store.get_movie(id).await?;
    let no_poster = || HandlerError::NotFound {
        entity: "poster",
        key: id.to_string(),
    };

    let location = details.movie.poster.ok_or_else(no_poster)?;
    let Some(images) = &catalog.images else {
        tracing::debug!(id, "No poster directory configured");
        return Err(no_poster());
    };

    let image = images.fetch(&location).await?;
    Ok(ResourceBody::Blob {
        bytes: image.bytes,
        mime_type: image.mime_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::images::FsImageFetcher;
    use crate::catalog::model::NewMovie;
    use crate::catalog::store::MemoryStore;
    use crate::mcp::error::DispatchError;
    use crate::mcp::protocol::ErrorCode;
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

    async fn catalog(images: Option<Arc<dyn ImageFetcher>>) -> (Catalog, ResourceRegistry) {
        let store = MemoryStore::new();
        store
            .create_movie(NewMovie {
                title: "Heat".to_string(),
                year: 1995,
                rating: Some(8.3),
                poster: Some("heat.png".to_string()),
                ..NewMovie::default()
            })
            .await
            .unwrap();
        let catalog = Catalog {
            store: Arc::new(store),
            images,
        };
        let mut registry = ResourceRegistry::new();
        register_resources(&mut registry, &catalog).unwrap();
        (catalog, registry)
    }

    #[tokio::test]
    async fn lists_exact_and_templated_resources() {
        let (_, registry) = catalog(None).await;
        let exact: Vec<_> = registry.list().iter().map(|r| r.key().to_string()).collect();
        assert_eq!(exact, vec![STATS_URI]);
        let templates: Vec<_> = registry.templates().iter().map(|r| r.key().to_string()).collect();
        assert_eq!(
            templates,
            vec![
                "movies://movies/{id}",
                "movies://actors/{id}",
                "movies://posters/{id}"
            ]
        );
    }

    #[tokio::test]
    async fn stats_have_required_fields() {
        let (_, registry) = catalog(None).await;
        let result = registry.read(STATS_URI).await.unwrap();
        let text = result.contents[0].text.as_deref().unwrap();
        let stats: Value = serde_json::from_str(text).unwrap();
        assert_eq!(stats["total_movies"], 1);
        assert_eq!(stats["total_actors"], 0);
        assert!(stats["movies_by_genre"].is_object());
    }

    #[tokio::test]
    async fn movie_by_id_and_bad_ids() {
        let (_, registry) = catalog(None).await;
        let result = registry.read("movies://movies/1").await.unwrap();
        assert!(result.contents[0].text.as_deref().unwrap().contains("Heat"));

        let err = registry.read("movies://movies/abc").await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation { .. }));

        let err = registry.read("movies://movies/99").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParams);

        let err = registry.read("movies://unknown/1").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn poster_is_base64_blob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("heat.png"), b"fake png").unwrap();
        let images: Arc<dyn ImageFetcher> = Arc::new(FsImageFetcher::new(dir.path()));
        let (_, registry) = catalog(Some(images)).await;

        let result = registry.read("movies://posters/1").await.unwrap();
        let contents = &result.contents[0];
        assert_eq!(contents.mime_type, "image/png");
        assert_eq!(contents.blob.as_deref(), Some(BASE64_STANDARD.encode(b"fake png").as_str()));
        assert!(contents.text.is_none());
    }

    #[tokio::test]
    async fn poster_without_directory_is_not_found() {
        let (_, registry) = catalog(None).await;
        let err = registry.read("movies://posters/1").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Handler(HandlerError::NotFound { entity: "poster", .. })
        ));
    }
}
