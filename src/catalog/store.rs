//! Catalog storage.
//!
//! Handlers only ever see the [`Store`] trait. [`MemoryStore`] keeps every
//! table in memory and, when given a data file, rewrites a JSON snapshot of
//! the whole catalog after each mutation.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::catalog::model::{
    Actor, ActorDetails, CastEntry, CastLink, DatabaseStats, Movie, MovieDetails, MovieFilter,
    MovieUpdate, NewActor, NewMovie,
};
use crate::mcp::error::HandlerError;

/// Errors raised by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with that id.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// "movie" or "actor".
        entity: &'static str,
        /// The id that was looked up.
        id: i64,
    },

    /// The change would duplicate an existing record.
    #[error("{0}")]
    Conflict(String),

    /// The data file could not be read or written.
    #[error("failed to access data file: {path}")]
    Io {
        /// Path to the data file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The data file is not a valid snapshot.
    #[error("invalid data file: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity,
                key: id.to_string(),
            },
            StoreError::Conflict(message) => Self::Conflict(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Create/read/update/delete/search over movies and actors.
#[async_trait]
pub trait Store: Send + Sync {
    /// Adds a movie. Title and year together must be unique.
    async fn create_movie(&self, movie: NewMovie) -> Result<Movie, StoreError>;

    /// A movie with its cast.
    async fn get_movie(&self, id: i64) -> Result<MovieDetails, StoreError>;

    /// Changes the fields set in `update`.
    async fn update_movie(&self, id: i64, update: MovieUpdate) -> Result<Movie, StoreError>;

    /// Removes a movie and its cast links.
    async fn delete_movie(&self, id: i64) -> Result<Movie, StoreError>;

    /// Movies matching `filter`, ordered by year then title.
    async fn search_movies(&self, filter: &MovieFilter) -> Result<Vec<Movie>, StoreError>;

    /// Adds an actor.
    async fn create_actor(&self, actor: NewActor) -> Result<Actor, StoreError>;

    /// An actor with their movies.
    async fn get_actor(&self, id: i64) -> Result<ActorDetails, StoreError>;

    /// Records that an actor appears in a movie.
    async fn add_actor_to_movie(
        &self,
        movie_id: i64,
        actor_id: i64,
        role: Option<String>,
    ) -> Result<CastLink, StoreError>;

    /// Aggregate counts.
    async fn stats(&self) -> Result<DatabaseStats, StoreError>;
}


#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    movies: Vec<Movie>,
    actors: Vec<Actor>,
    cast: Vec<CastLink>,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    movies: IndexMap<i64, Movie>,
    actors: IndexMap<i64, Actor>,
    cast: Vec<CastLink>,
    next_movie_id: i64,
    next_actor_id: i64,
}

impl Tables {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let next_movie_id = snapshot.movies.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        let next_actor_id = snapshot.actors.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        Self {
            movies: snapshot.movies.into_iter().map(|m| (m.id, m)).collect(),
            actors: snapshot.actors.into_iter().map(|a| (a.id, a)).collect(),
            cast: snapshot.cast,
            next_movie_id,
            next_actor_id,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            movies: self.movies.values().cloned().collect(),
            actors: self.actors.values().cloned().collect(),
            cast: self.cast.clone(),
        }
    }

    fn movie(&self, id: i64) -> Result<&Movie, StoreError> {
        self.movies
            .get(&id)
            .ok_or(StoreError::NotFound { entity: "movie", id })
    }

    fn actor(&self, id: i64) -> Result<&Actor, StoreError> {
        self.actors
            .get(&id)
            .ok_or(StoreError::NotFound { entity: "actor", id })
    }

    fn ensure_unique(&self, title: &str, year: i32, except: Option<i64>) -> Result<(), StoreError> {
        let clash = self.movies.values().any(|m| {
            Some(m.id) != except && m.year == year && m.title.eq_ignore_ascii_case(title)
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "a movie titled '{title}' from {year} already exists"
            )));
        }
        Ok(())
    }

    fn details(&self, movie: &Movie) -> MovieDetails {
        let cast = self
            .cast
            .iter()
            .filter(|link| link.movie_id == movie.id)
            .filter_map(|link| {
                self.actors.get(&link.actor_id).map(|actor| CastEntry {
                    actor: actor.clone(),
                    role: link.role.clone(),
                })
            })
            .collect();
        MovieDetails {
            movie: movie.clone(),
            cast,
        }
    }
}

/// In-memory [`Store`] with optional JSON snapshot persistence.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    data_file: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty store that is never persisted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::from_snapshot(Snapshot::default())),
            data_file: None,
        }
    }

    /// Opens a store backed by `data_file`, loading it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(data_file: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_file = data_file.into();
        let snapshot = match tokio::fs::read_to_string(&data_file).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %data_file.display(), "Data file not found, starting empty");
                Snapshot::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: data_file,
                    source,
                })
            }
        };

        let tables = Tables::from_snapshot(snapshot);
        tracing::info!(
            path = %data_file.display(),
            movies = tables.movies.len(),
            actors = tables.actors.len(),
            "Catalog loaded"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            data_file: Some(data_file),
        })
    }

    /// Applies `change` under the write lock. With a data file, the change is
    /// made to a copy that becomes current only once it has been saved, so a
    /// failed save leaves the catalog as it was.
    async fn commit<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Tables) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let mut tables = self.tables.write().await;
        if self.data_file.is_none() {
            return change(&mut *tables);
        }

        let mut staged = tables.clone();
        let out = change(&mut staged)?;
        self.persist(&staged).await?;
        *tables = staged;
        Ok(out)
    }

    /// Writes the snapshot. Called with the write lock held so snapshots
    /// land in mutation order.
    async fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&tables.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        tracing::debug!(path = %path.display(), "Catalog saved");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_movie(&self, movie: NewMovie) -> Result<Movie, StoreError> {
        self.commit(|tables| {
            tables.ensure_unique(&movie.title, movie.year, None)?;

            let now = Utc::now();
            let id = tables.next_movie_id;
            let created = Movie {
                id,
                title: movie.title,
                year: movie.year,
                genre: movie.genre,
                director: movie.director,
                rating: movie.rating,
                poster: movie.poster,
                created_at: now,
                updated_at: now,
            };
            tables.next_movie_id += 1;
            tables.movies.insert(id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn get_movie(&self, id: i64) -> Result<MovieDetails, StoreError> {
        let tables = self.tables.read().await;
        let movie = tables.movie(id)?;
        Ok(tables.details(movie))
    }

    async fn update_movie(&self, id: i64, update: MovieUpdate) -> Result<Movie, StoreError> {
        self.commit(|tables| {
            let mut movie = tables.movie(id)?.clone();
            update.apply(&mut movie);
            tables.ensure_unique(&movie.title, movie.year, Some(id))?;
            movie.updated_at = Utc::now();
            tables.movies.insert(id, movie.clone());
            Ok(movie)
        })
        .await
    }

    async fn delete_movie(&self, id: i64) -> Result<Movie, StoreError> {
        self.commit(|tables| {
            let removed = tables
                .movies
                .shift_remove(&id)
                .ok_or(StoreError::NotFound { entity: "movie", id })?;
            tables.cast.retain(|link| link.movie_id != id);
            Ok(removed)
        })
        .await
    }

    async fn search_movies(&self, filter: &MovieFilter) -> Result<Vec<Movie>, StoreError> {
        let tables = self.tables.read().await;
        let mut found: Vec<Movie> = tables
            .movies
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.title.cmp(&b.title)));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn create_actor(&self, actor: NewActor) -> Result<Actor, StoreError> {
        self.commit(|tables| {
            let id = tables.next_actor_id;
            let created = Actor {
                id,
                name: actor.name,
                birth_year: actor.birth_year,
                created_at: Utc::now(),
            };
            tables.next_actor_id += 1;
            tables.actors.insert(id, created.clone());
            Ok(created)
        })
        .await
    }

    async fn get_actor(&self, id: i64) -> Result<ActorDetails, StoreError> {
        let tables = self.tables.read().await;
        let actor = tables.actor(id)?.clone();
        let mut movies: Vec<Movie> = tables
            .cast
            .iter()
            .filter(|link| link.actor_id == id)
            .filter_map(|link| tables.movies.get(&link.movie_id).cloned())
            .collect();
        movies.sort_by_key(|m| m.year);
        Ok(ActorDetails { actor, movies })
    }

    async fn add_actor_to_movie(
        &self,
        movie_id: i64,
        actor_id: i64,
        role: Option<String>,
    ) -> Result<CastLink, StoreError> {
        self.commit(|tables| {
            tables.movie(movie_id)?;
            tables.actor(actor_id)?;
            if tables
                .cast
                .iter()
                .any(|link| link.movie_id == movie_id && link.actor_id == actor_id)
            {
                return Err(StoreError::Conflict(format!(
                    "actor {actor_id} is already in the cast of movie {movie_id}"
                )));
            }

            let link = CastLink {
                movie_id,
                actor_id,
                role,
            };
            tables.cast.push(link.clone());
            Ok(link)
        })
        .await
    }

    async fn stats(&self) -> Result<DatabaseStats, StoreError> {
        let tables = self.tables.read().await;

        let ratings: Vec<f64> = tables.movies.values().filter_map(|m| m.rating).collect();
        #[allow(clippy::cast_precision_loss)] // counts are far below 2^52
        let average_rating =
            (!ratings.is_empty()).then(|| ratings.iter().sum::<f64>() / ratings.len() as f64);

        let mut movies_by_genre: IndexMap<String, usize> = IndexMap::new();
        for genre in tables.movies.values().filter_map(|m| m.genre.as_deref()) {
            *movies_by_genre.entry(genre.to_string()).or_default() += 1;
        }
        movies_by_genre.sort_by(|ka, va, kb, vb| vb.cmp(va).then_with(|| ka.cmp(kb)));

        Ok(DatabaseStats {
            total_movies: tables.movies.len(),
            total_actors: tables.actors.len(),
            total_cast_links: tables.cast.len(),
            average_rating,
            earliest_year: tables.movies.values().map(|m| m.year).min(),
            latest_year: tables.movies.values().map(|m| m.year).max(),
            movies_by_genre,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_movie(title: &str, year: i32) -> NewMovie {
        NewMovie {
            title: title.to_string(),
            year,
            genre: Some("Drama".to_string()),
            rating: Some(8.0),
            ..NewMovie::default()
        }
    }

    #[tokio::test]
    async fn create_and_fetch_movie() {
        let store = MemoryStore::new();
        let movie = store.create_movie(new_movie("Heat", 1995)).await.unwrap();
        assert_eq!(movie.id, 1);

        let details = store.get_movie(movie.id).await.unwrap();
        assert_eq!(details.movie.title, "Heat");
        assert!(details.cast.is_empty());
    }

    #[tokio::test]
    async fn duplicate_title_and_year_conflicts() {
        let store = MemoryStore::new();
        store.create_movie(new_movie("Heat", 1995)).await.unwrap();
        let err = store.create_movie(new_movie("heat", 1995)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same title, different year is fine.
        store.create_movie(new_movie("Heat", 1986)).await.unwrap();
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_movie(42).await,
            Err(StoreError::NotFound { entity: "movie", id: 42 })
        ));
        assert!(matches!(
            store.delete_movie(42).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_actor(7).await,
            Err(StoreError::NotFound { entity: "actor", id: 7 })
        ));
    }

    #[tokio::test]
    async fn cast_links_and_deletion() {
        let store = MemoryStore::new();
        let movie = store.create_movie(new_movie("Heat", 1995)).await.unwrap();
        let actor = store
            .create_actor(NewActor {
                name: "Al Pacino".to_string(),
                birth_year: Some(1940),
            })
            .await
            .unwrap();

        store
            .add_actor_to_movie(movie.id, actor.id, Some("Vincent Hanna".to_string()))
            .await
            .unwrap();
        let err = store
            .add_actor_to_movie(movie.id, actor.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let details = store.get_movie(movie.id).await.unwrap();
        assert_eq!(details.cast.len(), 1);
        assert_eq!(details.cast[0].role.as_deref(), Some("Vincent Hanna"));

        let filmography = store.get_actor(actor.id).await.unwrap();
        assert_eq!(filmography.movies.len(), 1);

        store.delete_movie(movie.id).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_cast_links, 0);
    }

    #[tokio::test]
    async fn search_orders_and_limits() {
        let store = MemoryStore::new();
        store.create_movie(new_movie("Zodiac", 2007)).await.unwrap();
        store.create_movie(new_movie("Alien", 1979)).await.unwrap();
        store.create_movie(new_movie("Aliens", 1986)).await.unwrap();

        let all = store.search_movies(&MovieFilter::default()).await.unwrap();
        let years: Vec<i32> = all.iter().map(|m| m.year).collect();
        assert_eq!(years, vec![1979, 1986, 2007]);

        let filter = MovieFilter {
            query: Some("alien".to_string()),
            limit: Some(1),
            ..MovieFilter::default()
        };
        let found = store.search_movies(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Alien");
    }

    #[tokio::test]
    async fn stats_summarise_catalog() {
        let store = MemoryStore::new();
        let empty = store.stats().await.unwrap();
        assert_eq!(empty.total_movies, 0);
        assert!(empty.average_rating.is_none());

        store.create_movie(new_movie("Heat", 1995)).await.unwrap();
        let mut unrated = new_movie("Ronin", 1998);
        unrated.rating = None;
        unrated.genre = Some("Action".to_string());
        store.create_movie(unrated).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_movies, 2);
        assert_eq!(stats.average_rating, Some(8.0));
        assert_eq!(stats.earliest_year, Some(1995));
        assert_eq!(stats.latest_year, Some(1998));
        assert_eq!(stats.movies_by_genre.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.create_movie(new_movie("Heat", 1995)).await.unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.total_movies, 1);

        // Ids continue after the highest loaded id.
        let next = reopened.create_movie(new_movie("Ronin", 1998)).await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn failed_save_leaves_catalog_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir(&data_dir).unwrap();
        let store = MemoryStore::open(data_dir.join("catalog.json")).await.unwrap();
        let heat = store.create_movie(new_movie("Heat", 1995)).await.unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();

        let err = store.create_movie(new_movie("Ronin", 1998)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(matches!(
            store.get_movie(heat.id + 1).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_movie(heat.id).await,
            Err(StoreError::Io { .. })
        ));
        assert_eq!(store.get_movie(heat.id).await.unwrap().movie.title, "Heat");
        assert_eq!(store.stats().await.unwrap().total_movies, 1);

        // Once saving works again, the retry succeeds and reuses the id.
        std::fs::create_dir(&data_dir).unwrap();
        let ronin = store.create_movie(new_movie("Ronin", 1998)).await.unwrap();
        assert_eq!(ronin.id, heat.id + 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            MemoryStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn store_errors_map_to_handler_errors() {
        let err: HandlerError = StoreError::NotFound { entity: "movie", id: 3 }.into();
        assert_eq!(err.to_string(), "movie not found: 3");
        let err: HandlerError = StoreError::Conflict("dup".to_string()).into();
        assert!(matches!(err, HandlerError::Conflict(_)));
    }
}
