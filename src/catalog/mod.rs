//! The movie catalog exposed through MCP.
//!
//! This module supplies the tools and resources the server registers at
//! startup, together with the two capabilities they consume:
//!
//! - [`Store`]: movie and actor records ([`MemoryStore`] keeps them in memory
//!   with optional JSON snapshot persistence)
//! - [`ImageFetcher`]: poster bytes ([`FsImageFetcher`] reads them from a
//!   directory)

pub mod images;
pub mod model;
pub mod resources;
pub mod store;
pub mod tools;

pub use images::{FsImageFetcher, ImageError, ImageFetcher};
pub use resources::{register_resources, Catalog, STATS_URI};
pub use store::{MemoryStore, Store, StoreError};
pub use tools::register_tools;

use crate::mcp::error::RegistryError;
use crate::mcp::resources::ResourceRegistry;
use crate::mcp::tools::ToolRegistry;

/// Usage hints returned to clients by `initialize`.
pub const INSTRUCTIONS: &str = "Movie catalog. Use search_movies or movies_by_decade to find \
movies, get_movie for details and cast, and add_movie/add_actor/add_actor_to_movie to extend \
the catalog. Read movies://database/stats for an overview.";

/// Builds the tool and resource registries for `catalog`.
///
/// # Errors
///
/// Returns an error if any registration invariant is violated.
pub fn registries(catalog: &Catalog) -> Result<(ToolRegistry, ResourceRegistry), RegistryError> {
    let mut tools = ToolRegistry::new();
    register_tools(&mut tools, &catalog.store)?;

    let mut resources = ResourceRegistry::new();
    register_resources(&mut resources, catalog)?;

    tracing::debug!(
        tools = tools.len(),
        resources = resources.len(),
        "Catalog registered"
    );
    Ok((tools, resources))
}
