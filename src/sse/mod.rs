pub mod models;

mod events_sse;

pub use events_sse::events_sse;
