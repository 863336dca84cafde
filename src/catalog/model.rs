//! Movie catalog records.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A movie in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    /// Store-assigned identifier.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Genre, free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Director's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    /// Rating from 0 to 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    /// Poster location, relative to the poster directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    /// When the movie was added.
    pub created_at: DateTime<Utc>,
    /// When the movie was last changed.
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new movie.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub poster: Option<String>,
}

/// A partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub poster: Option<String>,
}

impl MovieUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.year.is_none()
            && self.genre.is_none()
            && self.director.is_none()
            && self.rating.is_none()
            && self.poster.is_none()
    }

    /// Applies the update to `movie`.
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if self.genre.is_some() {
            movie.genre = self.genre;
        }
        if self.director.is_some() {
            movie.director = self.director;
        }
        if self.rating.is_some() {
            movie.rating = self.rating;
        }
        if self.poster.is_some() {
            movie.poster = self.poster;
        }
    }
}

/// Search criteria. Every set field must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovieFilter {
    /// Case-insensitive substring of the title.
    #[serde(default)]
    pub query: Option<String>,
    /// Case-insensitive genre.
    #[serde(default)]
    pub genre: Option<String>,
    /// Case-insensitive substring of the director's name.
    #[serde(default)]
    pub director: Option<String>,
    /// Earliest year, inclusive.
    #[serde(default)]
    pub year_from: Option<i32>,
    /// Latest year, inclusive.
    #[serde(default)]
    pub year_to: Option<i32>,
    /// Lowest rating, inclusive.
    #[serde(default)]
    pub min_rating: Option<f64>,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl MovieFilter {
    /// Movies released in the ten years starting at `decade`.
    #[must_use]
    pub fn decade(decade: i32) -> Self {
        Self {
            year_from: Some(decade),
            year_to: Some(decade + 9),
            ..Self::default()
        }
    }

    /// Whether `movie` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, movie: &Movie) -> bool {
        let contains = |haystack: Option<&str>, needle: &str| {
            haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        };

        if let Some(query) = &self.query {
            if !contains(Some(&movie.title), query) {
                return false;
            }
        }
        if let Some(genre) = &self.genre {
            if !movie
                .genre
                .as_deref()
                .is_some_and(|g| g.eq_ignore_ascii_case(genre))
            {
                return false;
            }
        }
        if let Some(director) = &self.director {
            if !contains(movie.director.as_deref(), director) {
                return false;
            }
        }
        if self.year_from.is_some_and(|from| movie.year < from) {
            return false;
        }
        if self.year_to.is_some_and(|to| movie.year > to) {
            return false;
        }
        if let Some(min) = self.min_rating {
            if !movie.rating.is_some_and(|r| r >= min) {
                return false;
            }
        }
        true
    }
}

/// An actor in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Store-assigned identifier.
    pub id: i64,
    /// Full name.
    pub name: String,
    /// Year of birth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<i32>,
    /// When the actor was added.
    pub created_at: DateTime<Utc>,
}

/// Fields for a new actor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewActor {
    pub name: String,
    #[serde(default)]
    pub birth_year: Option<i32>,
}

/// An actor's appearance in a movie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastLink {
    pub movie_id: i64,
    pub actor_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// One line of a movie's cast list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastEntry {
    #[serde(flatten)]
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A movie together with its cast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieDetails {
    #[serde(flatten)]
    pub movie: Movie,
    pub cast: Vec<CastEntry>,
}

/// An actor together with the movies they appear in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorDetails {
    #[serde(flatten)]
    pub actor: Actor,
    pub movies: Vec<Movie>,
}

/// Aggregate counts over the whole catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_movies: usize,
    pub total_actors: usize,
    pub total_cast_links: usize,
    /// Mean over rated movies; absent when nothing is rated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_year: Option<i32>,
    /// Movie count per genre, most common first.
    pub movies_by_genre: IndexMap<String, usize>,
}
