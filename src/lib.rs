pub mod data;
pub mod dataset;
pub mod evaluation;
pub mod gallery;
pub mod inference;
pub mod logging;
pub mod model;
pub mod persist;
pub mod show;
pub mod training;
