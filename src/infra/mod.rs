pub mod docker;
pub mod file;
pub mod web;
