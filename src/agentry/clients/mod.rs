//! Provider specific [`CompletionClient`](crate::client_wrapper::CompletionClient)
//! implementations.

pub mod openai;
