//! Catalog tools.
//!
//! Each tool pairs an input schema with an async handler over the shared
//! [`Store`]. Arguments reach the handlers already validated, so decoding them into the
//! model types only fails for values the schema language cannot express
//! (such as a whole number written as `1999.0`).

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::model::{MovieFilter, MovieUpdate, NewActor, NewMovie};
use crate::catalog::store::Store;
use crate::mcp::error::{HandlerError, RegistryError};
use crate::mcp::schema::Schema;
use crate::mcp::tools::{ToolCallResult, ToolDescriptor, ToolRegistry};

/// Earliest year accepted for a movie.
pub const MIN_YEAR: i32 = 1888;
/// Latest year accepted for a movie.
pub const MAX_YEAR: i32 = 2100;

fn id_schema(description: &str) -> Schema {
    Schema::integer().minimum(1.0).describe(description)
}

fn year_schema() -> Schema {
    Schema::integer()
        .minimum(f64::from(MIN_YEAR))
        .maximum(f64::from(MAX_YEAR))
        .describe("Release year")
}

fn rating_schema() -> Schema {
    Schema::number()
        .minimum(0.0)
        .maximum(10.0)
        .describe("Rating from 0 to 10")
}

fn movie_fields(schema: Schema) -> Schema {
    schema
        .property(
            "title",
            Schema::string().min_length(1).max_length(500).describe("Movie title"),
        )
        .property("year", year_schema())
        .property("rating", rating_schema())
        .property("genre", Schema::string().describe("Genre, e.g. Drama"))
        .property("director", Schema::string().describe("Director's name"))
        .property(
            "poster",
            Schema::string().describe("Poster file, relative to the poster directory"),
        )
}

/// Input schema of `add_movie`.
#[must_use]
pub fn add_movie_schema() -> Schema {
    movie_fields(Schema::object()).require(["title", "year"])
}

fn update_movie_schema() -> Schema {
    movie_fields(Schema::object().property("id", id_schema("Movie id"))).require(["id"])
}

fn id_only_schema(description: &str) -> Schema {
    Schema::object()
        .property("id", id_schema(description))
        .require(["id"])
}

fn search_schema() -> Schema {
    Schema::object()
        .property("query", Schema::string().describe("Substring of the title"))
        .property("genre", Schema::string())
        .property("director", Schema::string().describe("Substring of the director's name"))
        .property("year_from", year_schema())
        .property("year_to", year_schema())
        .property("min_rating", rating_schema())
        .property(
            "limit",
            Schema::integer().minimum(1.0).maximum(100.0).describe("Maximum results"),
        )
}

fn decade_schema() -> Schema {
    Schema::object()
        .property(
            "decade",
            Schema::integer()
                .minimum(1880.0)
                .maximum(f64::from(MAX_YEAR))
                .describe("First year of the decade, e.g. 1990"),
        )
        .require(["decade"])
}

fn add_actor_schema() -> Schema {
    Schema::object()
        .property(
            "name",
            Schema::string().min_length(1).max_length(200).describe("Actor's full name"),
        )
        .property(
            "birth_year",
            Schema::integer().minimum(1800.0).maximum(f64::from(MAX_YEAR)),
        )
        .require(["name"])
}

fn cast_schema() -> Schema {
    Schema::object()
        .property("movie_id", id_schema("Movie id"))
        .property("actor_id", id_schema("Actor id"))
        .property("role", Schema::string().describe("Character played"))
        .require(["movie_id", "actor_id"])
}

/// Decodes validated arguments into a typed value.
fn decode<T: DeserializeOwned>(arguments: Value) -> Result<T, HandlerError> {
    serde_json::from_value(arguments).map_err(|e| HandlerError::InvalidArguments(e.to_string()))
}

#[derive(Deserialize)]
struct IdArgs {
    id: i64,
}

#[derive(Deserialize)]
struct UpdateArgs {
    id: i64,
    #[serde(flatten)]
    update: MovieUpdate,
}

#[derive(Deserialize)]
struct DecadeArgs {
    decade: i32,
}

#[derive(Deserialize)]
struct CastArgs {
    movie_id: i64,
    actor_id: i64,
    #[serde(default)]
    role: Option<String>,
}

/// Registers a tool whose handler gets its own handle on the store.
fn register<F, Fut>(
    registry: &mut ToolRegistry,
    store: &Arc<dyn Store>,
    descriptor: ToolDescriptor,
    handler: F,
) -> Result<(), RegistryError>
where
    F: Fn(Arc<dyn Store>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolCallResult, HandlerError>> + Send + 'static,
{
    let store = Arc::clone(store);
    registry.register(descriptor, move |arguments: Value| {
        handler(Arc::clone(&store), arguments)
    })
}

/// Registers every catalog tool.
///
/// # Errors
///
/// Returns an error if a tool with the same name is already registered.
pub fn register_tools(registry: &mut ToolRegistry, store: &Arc<dyn Store>) -> Result<(), RegistryError> {
    register(
        registry,
        store,
        ToolDescriptor::new("add_movie", "Add a movie to the catalog", add_movie_schema()),
        add_movie,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new(
            "get_movie",
            "Get a movie and its cast by id",
            id_only_schema("Movie id"),
        ),
        get_movie,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new(
            "update_movie",
            "Change some fields of an existing movie",
            update_movie_schema(),
        ),
        update_movie,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new(
            "delete_movie",
            "Remove a movie and its cast list",
            id_only_schema("Movie id"),
        ),
        delete_movie,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new(
            "search_movies",
            "Find movies by title, genre, director, year range or rating",
            search_schema(),
        ),
        search_movies,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new(
            "movies_by_decade",
            "List the movies released in a decade",
            decade_schema(),
        ),
        movies_by_decade,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new("add_actor", "Add an actor to the catalog", add_actor_schema()),
        add_actor,
    )?;
    register(
        registry,
        store,
        ToolDescriptor::new(
            "add_actor_to_movie",
            "Add an actor to a movie's cast",
            cast_schema(),
        ),
        add_actor_to_movie,
    )?;

    Ok(())
}

async fn add_movie(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let movie: NewMovie = decode(arguments)?;
    let created = store.create_movie(movie).await?;
    tracing::info!(id = created.id, title = %created.title, "Movie added");
    Ok(ToolCallResult::json(&created))
}

async fn get_movie(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let IdArgs { id } = decode(arguments)?;
    let details = store.get_movie(id).await?;
    Ok(ToolCallResult::json(&details))
}

async fn update_movie(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let UpdateArgs { id, update } = decode(arguments)?;
    if update.is_empty() {
        return Err(HandlerError::InvalidArguments(
            "at least one field besides id must be given".to_string(),
        ));
    }
    let updated = store.update_movie(id, update).await?;
    tracing::info!(id, "Movie updated");
    Ok(ToolCallResult::json(&updated))
}

async fn delete_movie(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let IdArgs { id } = decode(arguments)?;
    let removed = store.delete_movie(id).await?;
    tracing::info!(id, title = %removed.title, "Movie deleted");
    Ok(ToolCallResult::text(format!(
        "Deleted movie {id}: {} ({})",
        removed.title, removed.year
    )))
}

async fn search_movies(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let filter: MovieFilter = decode(arguments)?;
    if let (Some(from), Some(to)) = (filter.year_from, filter.year_to) {
        if from > to {
            return Err(HandlerError::InvalidArguments(format!(
                "year_from ({from}) is after year_to ({to})"
            )));
        }
    }
    let movies = store.search_movies(&filter).await?;
    Ok(ToolCallResult::json(&json!({
        "count": movies.len(),
        "movies": movies,
    })))
}

async fn movies_by_decade(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let DecadeArgs { decade } = decode(arguments)?;
    if decade % 10 != 0 {
        return Err(HandlerError::InvalidArguments(format!(
            "decade must be a multiple of 10, got {decade}"
        )));
    }
    let movies = store.search_movies(&MovieFilter::decade(decade)).await?;
    Ok(ToolCallResult::json(&json!({
        "decade": format!("{decade}s"),
        "count": movies.len(),
        "movies": movies,
    })))
}

async fn add_actor(store: Arc<dyn Store>, arguments: Value) -> Result<ToolCallResult, HandlerError> {
    let actor: NewActor = decode(arguments)?;
    let created = store.create_actor(actor).await?;
    tracing::info!(id = created.id, name = %created.name, "Actor added");
    Ok(ToolCallResult::json(&created))
}

async fn add_actor_to_movie(
    store: Arc<dyn Store>,
    arguments: Value,
) -> Result<ToolCallResult, HandlerError> {
    let CastArgs {
        movie_id,
        actor_id,
        role,
    } = decode(arguments)?;
    let link = store.add_actor_to_movie(movie_id, actor_id, role).await?;
    Ok(ToolCallResult::json(&link))
}
