// Pipeline processing: validation, normalization, enrichment and deduplication

pub mod dedupe;
pub mod enrich;
pub mod normalize;
pub mod validate;
