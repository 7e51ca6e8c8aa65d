pub mod chunk;
pub mod profile;
pub mod query;
pub mod vector;

pub use chunk::{Chunk, ChunkRecord, Metadata};
pub use profile::{ChatHistory, Conversation, Message, PastTrip, TravelPreferences, UserProfile};
pub use query::{Degradation, QueryPath, QueryResult, RetrievedChunk};
pub use vector::{IndexDatapoint, Restrict, SearchHit};
