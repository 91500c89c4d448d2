pub mod capture;
pub mod cli;
pub mod models;
pub mod scanner;
pub mod verifier;

/// Report rendering
pub mod reporting;
