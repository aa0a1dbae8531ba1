//! Discovery of deploy keys from directories, archives and repository tags

pub mod archive;
pub mod coordinator;
pub mod detector;
pub mod directory;
pub mod repository;
pub mod version;
