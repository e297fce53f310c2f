//! Integration tests for imgvault libraries

mod claims;
mod cli;
mod library_lifecycle;
mod recovery;
