//! Artifact upload: the gate deciding what to publish and the stores it publishes to

pub mod gate;
pub mod store;

pub use gate::UploadGate;
pub use store::{
    store_from_config, ArtifactIdentity, ArtifactStore, CommandStore, DirectoryStore, UploadError,
};
