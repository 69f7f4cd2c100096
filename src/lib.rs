pub mod format;
pub mod error;
pub mod metadata;
pub mod stream;
pub mod directory;
pub mod container;

pub use container::{Container, ContainerOptions};
pub use directory::{Directory, DirectoryEntry};
pub use error::{ContainerError, Field, Result};
pub use format::{ContentType, EncodingId};
pub use metadata::Metadata;
pub use stream::{ChunkedRead, StreamDescriptor, StreamSource};
