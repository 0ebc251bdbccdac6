pub mod aggregate;
pub mod chrome;
pub mod dashboard;
pub mod fetch;
pub mod map;
pub mod output;
pub mod panel;
pub mod parser;
pub mod probe;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod testing;
