pub mod account;
pub mod chain;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod entry_point;
pub mod error;
pub mod modules;

#[cfg(test)]
pub mod test_support;
