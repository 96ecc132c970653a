//! ShellForge retrieval layer
//!
//! Fans a query out to independent search channels (keyword, semantic,
//! graph), caches what they return and fuses the ranked lists with
//! query-type-adaptive reciprocal rank fusion.

pub mod retrieval;

pub use retrieval::{
    Channel, FusedResult, HybridRetriever, QueryType, RankFuser, RankedList, RankedResult,
    ResultPayload, RetrievalOutcome, SearchProvider,
};
