pub mod conflict;
pub mod dialogue_flow;
pub mod extractor;
pub mod resolver;
pub mod session_store;
pub mod snapshot_cache;
