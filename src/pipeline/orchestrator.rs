use tracing::{debug, info, instrument, warn};

use crate::domain::{CanonicalRecord, RawBatch, RawEntry, SourceMetadata};
use crate::error::{ConfigError, PipelineError, SourceError};
use crate::observability::metrics;
use crate::pipeline::clock::{Clock, RunClock, SystemClock};
use crate::pipeline::processing::dedupe::{Deduplicator, IdentityKey, KeyDeduplicator};
use crate::pipeline::processing::enrich::{EnrichRuleSpec, Enricher, EnrichmentRuleSet, RuleEnricher};
use crate::pipeline::processing::normalize::{Normalizer, RuleNormalizer};
use crate::pipeline::processing::validate::{
    CaseRule, FieldRuleSet, FieldRuleSpec, RejectionReason, RuleValidator, ValidationOutcome, Validator,
};
use crate::pipeline::stats::{RunStatistics, StatsCollector};

/// Canonical records of one run together with its statistics
#[derive(Debug, Clone)]
pub struct RunReport {
    pub records: Vec<CanonicalRecord>,
    pub stats: RunStatistics,
}

/// Validate, normalize, enrich and deduplicate one batch at a time.
///
/// A `Pipeline` holds no per-run state, so the same instance can process
/// independent batches concurrently.
pub struct Pipeline {
    domain: String,
    validator: Box<dyn Validator + Send + Sync>,
    normalizer: Box<dyn Normalizer + Send + Sync>,
    enricher: Box<dyn Enricher + Send + Sync>,
    deduplicator: Box<dyn Deduplicator + Send + Sync>,
    primary_key: Option<IdentityKey>,
    clock: Box<dyn Clock>,
}

impl Pipeline {
    pub fn builder(domain: &str) -> PipelineBuilder {
        PipelineBuilder::new(domain)
    }

    /// Assemble a pipeline from custom stages
    pub fn new(
        domain: &str,
        validator: Box<dyn Validator + Send + Sync>,
        normalizer: Box<dyn Normalizer + Send + Sync>,
        enricher: Box<dyn Enricher + Send + Sync>,
        deduplicator: Box<dyn Deduplicator + Send + Sync>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            validator,
            normalizer,
            enricher,
            deduplicator,
            primary_key: None,
            clock: Box::new(SystemClock),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The key persistence adapters upsert on
    pub fn primary_key(&self) -> Option<&IdentityKey> {
        self.primary_key.as_ref()
    }

    /// Begin a run that is fed one entry at a time
    pub fn start(&self, source: SourceMetadata) -> Run<'_> {
        let mut clock = RunClock::new(self.clock.as_ref());
        let collector = StatsCollector::new(&self.domain, &source.origin, clock.tick());
        Run {
            pipeline: self,
            source,
            clock,
            collector,
            records: Vec::new(),
        }
    }

    /// Process a whole batch
    #[instrument(
        skip(self, batch),
        fields(domain = %self.domain, origin = %batch.source.origin, entries = batch.len())
    )]
    pub fn run(&self, batch: RawBatch) -> Result<RunReport, PipelineError> {
        if batch.is_empty() {
            warn!("Batch from '{}' has no entries", batch.source.origin);
            metrics::pipeline::run_failed(&self.domain);
            return Err(SourceError::Empty {
                origin: batch.source.origin,
            }
            .into());
        }

        let RawBatch { source, entries } = batch;
        let mut run = self.start(source);
        for entry in entries {
            run.feed(entry);
        }
        Ok(run.finish())
    }
}

/// One in-progress run. Dropping it abandons the run; [`Run::snapshot`]
/// still gives consistent partial counters beforehand.
pub struct Run<'p> {
    pipeline: &'p Pipeline,
    source: SourceMetadata,
    clock: RunClock<'p>,
    collector: StatsCollector,
    records: Vec<CanonicalRecord>,
}

impl<'p> Run<'p> {
    pub fn feed(&mut self, entry: RawEntry) {
        let outcome = match entry {
            RawEntry::Record(raw) => self.pipeline.validator.validate(&raw),
            RawEntry::Malformed(bad) => {
                debug!(position = bad.position, detail = %bad.detail, "Malformed entry");
                ValidationOutcome::Rejected(RejectionReason::MalformedInput)
            }
        };
        self.collector.observe(&outcome);
        metrics::validate::record_outcome(&outcome);

        match outcome {
            ValidationOutcome::Rejected(reason) => {
                debug!(reason = %reason, "Record rejected");
            }
            accepted => {
                if let Some(record) = accepted.into_record() {
                    let normalized = self.pipeline.normalizer.normalize(record);
                    let processed_at = self.clock.tick();
                    let canonical = self.pipeline.enricher.enrich(normalized, &self.source, processed_at);
                    metrics::enrich::record_enriched();
                    self.records.push(canonical);
                }
            }
        }
    }

    pub fn snapshot(&self) -> RunStatistics {
        self.collector.snapshot()
    }

    /// Deduplicate everything accepted so far and freeze the statistics
    pub fn finish(mut self) -> RunReport {
        let outcome = self.pipeline.deduplicator.dedupe(self.records);
        self.collector.record_dedupe(outcome.removed, outcome.records.len());
        metrics::dedupe::duplicates_removed(outcome.removed);

        let stats = self.collector.finish(self.clock.tick());
        let elapsed = (stats.completed_at.unwrap_or(stats.started_at) - stats.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        metrics::pipeline::run_completed(&stats.domain, elapsed);

        info!(
            run_id = %stats.run_id,
            total = stats.total,
            accepted = stats.accepted,
            accepted_with_default = stats.accepted_with_default,
            rejected = stats.rejected,
            duplicates_removed = stats.duplicates_removed,
            output = stats.output,
            "Run complete for domain '{}'",
            stats.domain
        );

        RunReport {
            records: outcome.records,
            stats,
        }
    }
}

/// Compiles field rules, enrichment rules and identity keys into a
/// [`Pipeline`]. All configuration errors surface from [`build`](Self::build).
pub struct PipelineBuilder {
    domain: String,
    fields: Vec<FieldRuleSpec>,
    enrich: Vec<EnrichRuleSpec>,
    identity: Vec<Vec<String>>,
    passthrough_case: CaseRule,
    clock: Box<dyn Clock>,
}

impl PipelineBuilder {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            fields: Vec::new(),
            enrich: Vec::new(),
            identity: Vec::new(),
            passthrough_case: CaseRule::Lower,
            clock: Box::new(SystemClock),
        }
    }

    pub fn fields(mut self, fields: Vec<FieldRuleSpec>) -> Self {
        self.fields = fields;
        self
    }

    pub fn enrich(mut self, rules: Vec<EnrichRuleSpec>) -> Self {
        self.enrich = rules;
        self
    }

    /// Add an identity key. The first one added is the primary key.
    pub fn identity(mut self, fields: &[&str]) -> Self {
        self.identity.push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn identity_keys(mut self, keys: Vec<Vec<String>>) -> Self {
        self.identity = keys;
        self
    }

    pub fn passthrough_case(mut self, case: CaseRule) -> Self {
        self.passthrough_case = case;
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let field_rules = FieldRuleSet::compile(&self.fields)?;
        let enrichment = EnrichmentRuleSet::compile(&self.enrich, &field_rules)?;
        let keys = self
            .identity
            .iter()
            .map(|fields| IdentityKey::compile(fields, &field_rules))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            domain = %self.domain,
            fields = field_rules.rules().len(),
            enrichments = enrichment.rules().len(),
            identity_keys = keys.len(),
            "Pipeline compiled"
        );

        let normalizer = RuleNormalizer::new(&field_rules).with_passthrough_case(self.passthrough_case);
        let deduplicator = KeyDeduplicator::new(keys);
        let primary_key = deduplicator.primary().cloned();

        Ok(Pipeline {
            domain: self.domain,
            validator: Box::new(RuleValidator::new(field_rules)),
            normalizer: Box::new(normalizer),
            enricher: Box::new(RuleEnricher::new(enrichment)),
            deduplicator: Box::new(deduplicator),
            primary_key,
            clock: self.clock,
        })
    }
}
