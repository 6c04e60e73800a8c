pub mod config;
pub mod decoder;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod protocol;

#[cfg(test)]
mod test_support;
