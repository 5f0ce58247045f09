pub mod claim;
pub mod market;
pub mod price;

pub use claim::{ClaimKind, Entity, ParsedClaim, TimeWindow};
pub use market::{CacheEntry, Embedding, Market, QueryLogEntry, RealtimePrice};
pub use price::{PriceQuote, PriceSourceTag};
