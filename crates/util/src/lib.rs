pub mod date_handling;
pub mod text_processing;

pub use date_handling::{ValueCodec, format_fallback, format_offset};
pub use text_processing::{ApproximateOptions, approximate_score, normalize_search_text};
