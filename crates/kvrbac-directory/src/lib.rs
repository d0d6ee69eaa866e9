pub mod azure;
pub mod directory;
pub mod error;
pub mod memory;

pub use azure::{AzureDirectory, AzureDirectoryConfig};
pub use directory::{Directory, LookupAttribute, ObjectQuery};
pub use error::DirectoryError;
pub use memory::{DirectoryObject, InMemoryDirectory};
