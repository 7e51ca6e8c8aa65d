pub mod chunk_store;
pub mod composer;
pub mod dispatch;
pub mod engine;
pub mod vector_index;
