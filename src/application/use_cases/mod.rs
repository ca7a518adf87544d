//! Use case implementations.

mod request_creator;

pub use request_creator::RequestCreator;
