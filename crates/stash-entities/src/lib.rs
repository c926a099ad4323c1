//! SeaORM entities for the Stash metadata store

pub mod files;
