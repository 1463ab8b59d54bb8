pub mod decoding;
pub mod encoder;
pub mod error;
pub mod ingest;
pub mod player;
pub mod resolve;
pub mod session;
pub mod store;
pub mod terminal;
