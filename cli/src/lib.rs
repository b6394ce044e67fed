//! CNAB OCI CLI - push and pull CNAB bundles as OCI images.

pub mod commands;
pub mod logging;
pub mod output;
