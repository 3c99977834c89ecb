// Fetch Simulator Library

pub mod generator;
pub mod input;
pub mod models;
pub mod origin;
pub mod runner;
pub mod stats;
