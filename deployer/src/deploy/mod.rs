//! Controllers, their policies and the container that owns them

pub mod container;
pub mod controller;
pub mod environment;
pub mod events;
pub mod extract;
pub mod fileset;
pub mod generator;
pub mod instance;
pub mod lifecycle;
pub mod mode;
pub mod strategy;
pub mod tag;
