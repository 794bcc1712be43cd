pub mod context;
pub mod engine;
mod file;
mod folder;
pub mod hash;
pub mod index;
pub mod paths;
pub mod retry;
