#![warn(clippy::missing_docs_in_private_items)]

/// Message-intake adapter: translates wire messages into state changes.
pub mod adapter;
/// Thin node handle wrapping the reducer entry point.
pub mod manager;
/// Simplified wire message types consumed by the adapter.
pub mod messages;

#[cfg(test)]
mod tests;
