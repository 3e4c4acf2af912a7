mod admin;
mod blobs;

pub use admin::{compact, group_status, health, metrics};
pub use blobs::{blob_exists, copy_blob, create_blob, delete_blob, get_blob, undelete_blob};
