//! Remote collaborators: the object store and the configuration API.

pub mod config_api;
pub mod object_store;

pub use config_api::{ConfigApi, RestConfigClient};
pub use object_store::{BucketClient, ObjectStore, StoredObject};
