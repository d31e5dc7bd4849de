pub mod primitive;
pub mod cache;
pub mod signature;
pub mod attributes;
pub mod well_known;
pub mod surface;
pub mod resource;
pub mod engine;

pub use engine::{HashOptions, SurfaceHasher};
