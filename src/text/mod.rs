//! Outbound text layout

mod paginator;

pub use paginator::{FixedAdvance, Packet, Pagination, TextMeasurer, TextPaginator};
