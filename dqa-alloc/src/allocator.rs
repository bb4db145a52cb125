//! Allocation request orchestration
//!
//! One request runs: routing config → keep items → filters → leases →
//! coverage weights → stratified selection → routing gate and double-pass
//! router → gold injection → lease writes → manifest. Every external call
//! has a degraded path; [`Allocator::allocate`] always yields a manifest.

use dqa_common::RoutingConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{AllocConfig, PrefillColumns};
use crate::coverage::{CoverageCell, CoverageLoader};
use crate::gold::GoldInjector;
use crate::lease::LeaseTracker;
use crate::manifest::{Diagnostics, Manifest, ManifestItem, MediaResolver, Prefill};
use crate::model::ItemRow;
use crate::routing::{gate, AnnotatorLedger, CellHealth, DoublePassRouter, Gate, ItemRoutingState, RouteDecision};
use crate::sampler::{stratified_select, Selection, SelectionOrigin};
use crate::store::{RoutingConfigSource, StoreError, Stores};
use crate::weights::compute_allocator_weights;

/// Largest manifest a single request may ask for
pub const MAX_LIMIT: usize = 200;

/// Manifest size when the request names none
pub const DEFAULT_LIMIT: usize = 10;

/// Parameters of one allocation request
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub stage: u8,
    pub annotator_id: String,
    pub limit: usize,
    /// 1-indexed window over the filtered pool
    pub page: Option<usize>,
    /// Window size; also overrides `limit`
    pub page_size: Option<usize>,
    pub seed_fallback: bool,
    pub use_seed: bool,
    pub require_prefill: bool,
    pub search: Option<String>,
    /// Seeds the RNG for a reproducible manifest
    pub seed: Option<u64>,
}

impl Default for AllocationRequest {
    fn default() -> Self {
        Self {
            stage: 2,
            annotator_id: "anonymous".to_string(),
            limit: DEFAULT_LIMIT,
            page: None,
            page_size: None,
            seed_fallback: true,
            use_seed: false,
            require_prefill: false,
            search: None,
            seed: None,
        }
    }
}

impl AllocationRequest {
    /// Requested manifest size, clamped to `[1, MAX_LIMIT]`
    pub fn effective_limit(&self) -> usize {
        self.page_size.unwrap_or(self.limit).clamp(1, MAX_LIMIT)
    }
}

// ============================================================================
// Routing config cache
// ============================================================================

/// Where the routing config in use came from
pub mod config_source {
    pub const STORE: &str = "store";
    pub const CACHE: &str = "cache";
    pub const DEFAULT: &str = "default";
}

/// Routing config cache with an explicit TTL
///
/// A zero TTL re-reads the source on every request. Only successful reads
/// are cached.
#[derive(Debug)]
pub struct RoutingConfigCache {
    ttl: Duration,
    entry: RwLock<Option<(Instant, RoutingConfig)>>,
}

impl RoutingConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// Current config and the label of its source
    pub async fn get(&self, source: &dyn RoutingConfigSource) -> (RoutingConfig, &'static str) {
        if !self.ttl.is_zero() {
            if let Some((loaded_at, config)) = *self.entry.read().await {
                if loaded_at.elapsed() < self.ttl {
                    return (config, config_source::CACHE);
                }
            }
        }

        match source.fetch_routing_config().await {
            Ok(Some(record)) => {
                let config = RoutingConfig::from_json(&record);
                if !self.ttl.is_zero() {
                    *self.entry.write().await = Some((Instant::now(), config));
                }
                (config, config_source::STORE)
            }
            Ok(None) => {
                debug!("No routing config record, using defaults");
                (RoutingConfig::default(), config_source::DEFAULT)
            }
            Err(e) => {
                warn!("Routing config read failed, using defaults: {}", e);
                (RoutingConfig::default(), config_source::DEFAULT)
            }
        }
    }

    /// Drop the cached entry so the next request re-reads the source
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// Selection that passed the routing gate
struct Gated {
    selection: Selection,
    state: ItemRoutingState,
    second_pass: bool,
}

/// Item offered to the annotator
#[derive(Debug, Clone)]
struct Offer {
    row: ItemRow,
    cell: String,
    pass_number: u8,
    double_pass: bool,
    previous_annotators: Vec<String>,
}

enum Slot<T> {
    Item(T),
    Gold(String),
}

/// Allocation engine bound to its configuration and stores
pub struct Allocator {
    config: AllocConfig,
    stores: Option<Stores>,
    coverage: CoverageLoader,
    media: MediaResolver,
    routing_cache: RoutingConfigCache,
}

impl Allocator {
    /// `stores` is `None` when store credentials are not configured
    pub fn new(config: AllocConfig, stores: Option<Stores>, http: reqwest::Client) -> Self {
        let coverage = CoverageLoader::new(
            http,
            config.coverage.endpoint.clone(),
            config.coverage.snapshot_paths.clone(),
            config.coverage.timeout,
        );
        let media = MediaResolver::new(config.media.clone(), config.items.audio_column.clone());
        let routing_cache = RoutingConfigCache::new(config.routing.cache_ttl);
        Self {
            config,
            stores,
            coverage,
            media,
            routing_cache,
        }
    }

    pub fn config(&self) -> &AllocConfig {
        &self.config
    }

    pub fn routing_cache(&self) -> &RoutingConfigCache {
        &self.routing_cache
    }

    /// Serve one request
    pub async fn allocate(&self, request: &AllocationRequest) -> Manifest {
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut diagnostics = Diagnostics {
            table: Some(self.config.items.table.clone()),
            routing_config_source: config_source::DEFAULT,
            ..Default::default()
        };

        if request.use_seed {
            debug!(annotator = %request.annotator_id, "Seed item requested");
            return self.finish(request, Vec::new(), diagnostics, true);
        }

        let Some(stores) = &self.stores else {
            let error = StoreError::NotConfigured("store url and key are not configured".to_string());
            warn!("{}, serving fallback manifest", error);
            diagnostics.error = Some(error.to_string());
            return self.finish(request, Vec::new(), diagnostics, request.seed_fallback);
        };

        let (routing, source) = self.routing_cache.get(stores.routing_config.as_ref()).await;
        diagnostics.routing_config_source = source;

        // Keep items
        diagnostics.contacted_store = true;
        let page = match stores.items.fetch_keep_items().await {
            Ok(page) => page,
            Err(e) => {
                warn!(table = %self.config.items.table, "Keep item query failed: {}", e);
                diagnostics.error_type = e.error_type();
                diagnostics.error = Some(e.to_string());
                if let StoreError::MissingColumns(columns) = &e {
                    diagnostics.missing_columns = columns.clone();
                }
                return self.finish(request, Vec::new(), diagnostics, request.seed_fallback);
            }
        };
        diagnostics.keep_rows = page.total;

        let limit = request.effective_limit();
        let pool = self.filter_pool(page.rows, request, &mut diagnostics);

        // Leases
        let now = dqa_common::time::now();
        let records = match stores.assignments.fetch_assignments().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Assignment read failed, treating as no leases: {}", e);
                Vec::new()
            }
        };
        let mut tracker = LeaseTracker::new(
            &records,
            dqa_common::time::hours(self.config.assignments.active_hours),
            now,
        );
        let available = tracker.available(&pool);
        diagnostics.available = available.len();
        diagnostics.leased = tracker.leased_count();

        // Coverage weighting
        let snapshot = self.coverage.load().await;
        diagnostics.coverage_loaded = snapshot.is_some();
        let weights = snapshot.as_ref().map(|(s, _)| compute_allocator_weights(s));
        let coverage_index = snapshot.map(|(s, _)| s.index()).unwrap_or_default();

        let selections = stratified_select(&available, &pool, weights.as_ref(), limit, &mut rng);
        diagnostics.weighted_selections = selections
            .iter()
            .filter(|s| s.origin == SelectionOrigin::Weighted)
            .count();
        diagnostics.fallback_selections = selections.len() - diagnostics.weighted_selections;

        // Routing
        let ids: Vec<String> = selections.iter().map(|s| s.row.id.clone()).collect();
        let mut states = match stores.routing_states.fetch_states(&ids).await {
            Ok(states) => states,
            Err(e) => {
                warn!("Routing state read failed, treating items as unrouted: {}", e);
                HashMap::new()
            }
        };

        let annotator = request.annotator_id.as_str();

        let mut gated = Vec::with_capacity(selections.len());
        for selection in selections {
            let state = states.remove(&selection.row.id).unwrap_or_default();
            let seen = tracker.has_assigned(&selection.row.id, annotator);
            match gate(&state, annotator, seen) {
                Gate::Skip(reason) => {
                    debug!(item = %selection.row.id, reason = ?reason, "Item gated out");
                }
                Gate::FirstPass => gated.push(Gated { selection, state, second_pass: false }),
                Gate::SecondPassCandidate => gated.push(Gated { selection, state, second_pass: true }),
            }
        }

        // Gold goes in before the ledger so only delivered, leased first
        // passes count toward the fairness ratio
        let gated = self.inject_gold(stores, gated, limit, &mut rng, &mut diagnostics).await;

        let mut ledger = AnnotatorLedger::from_records(&records, routing.lookback(), now, routing.annotator_daily_cap);
        for slot in &gated {
            if let Slot::Item(entry) = slot {
                if !entry.second_pass {
                    ledger.record(annotator, false);
                }
            }
        }

        let router = DoublePassRouter::new(&routing, annotator);
        let mut slots = Vec::with_capacity(gated.len());
        for slot in gated {
            let entry = match slot {
                Slot::Gold(id) => {
                    slots.push(Slot::Gold(id));
                    continue;
                }
                Slot::Item(entry) => entry,
            };
            let Gated { selection, state, second_pass } = entry;
            let mut offer = Offer {
                previous_annotators: state.previous_annotators(),
                row: selection.row,
                cell: selection.cell,
                pass_number: 1,
                double_pass: false,
            };
            if second_pass {
                let health = cell_health(&coverage_index, &offer.cell, &state);
                match router.route(&state, &health, &mut ledger, &mut rng) {
                    RouteDecision::DoublePass { pass_number, probability } => {
                        debug!(item = %offer.row.id, probability, "Second pass issued");
                        offer.pass_number = pass_number;
                        offer.double_pass = true;
                        diagnostics.double_pass_offers += 1;
                    }
                    RouteDecision::Skip(reason) => {
                        debug!(item = %offer.row.id, reason = ?reason, "Second pass withheld");
                        diagnostics.double_pass_skipped += 1;
                        continue;
                    }
                }
            }
            slots.push(Slot::Item(offer));
        }

        // Leases for delivered store items
        let lease_rows = tracker.new_leases(
            slots.iter().filter_map(|slot| match slot {
                Slot::Item(offer) => Some((offer.row.id.as_str(), offer.pass_number)),
                Slot::Gold(_) => None,
            }),
            annotator,
            now,
        );
        if let Err(e) = stores.assignments.insert_assignments(&lease_rows).await {
            warn!(rows = lease_rows.len(), "Lease write failed: {}", e);
            diagnostics.lease_write_failed = true;
        }

        info!(
            annotator = %annotator,
            pool = pool.len(),
            available = diagnostics.available,
            delivered = slots.len(),
            double_pass = diagnostics.double_pass_offers,
            gold = diagnostics.gold_injected,
            "Allocated tasks"
        );

        let items = slots.into_iter().map(|slot| self.manifest_item(slot)).collect();
        self.finish(request, items, diagnostics, request.seed_fallback)
    }

    /// Prefill requirement, search and paging window
    fn filter_pool(&self, rows: Vec<ItemRow>, request: &AllocationRequest, diagnostics: &mut Diagnostics) -> Vec<ItemRow> {
        let prefill = &self.config.items.prefill;
        let needle = request
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut pool = Vec::with_capacity(rows.len());
        for row in rows {
            if request.require_prefill && !has_transcript(&row, prefill) {
                diagnostics.skipped_missing_transcript += 1;
                continue;
            }
            if let Some(needle) = &needle {
                if !row.id.to_lowercase().contains(needle.as_str()) {
                    continue;
                }
            }
            pool.push(row);
        }

        match request.page {
            Some(page) => {
                let size = request.effective_limit();
                let start = page.max(1).saturating_sub(1).saturating_mul(size);
                pool.into_iter().skip(start).take(size).collect()
            }
            None => pool,
        }
    }

    async fn inject_gold(
        &self,
        stores: &Stores,
        entries: Vec<Gated>,
        limit: usize,
        rng: &mut StdRng,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Slot<Gated>> {
        if self.config.gold.rate <= 0.0 || entries.is_empty() {
            return entries.into_iter().map(Slot::Item).collect();
        }

        let gold_ids = match stores.gold.fetch_gold_ids(limit).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Gold fetch failed, skipping injection: {}", e);
                Vec::new()
            }
        };
        let mut injector = GoldInjector::new(self.config.gold.rate, gold_ids);
        injector.exclude(entries.iter().map(|e| e.selection.row.id.as_str()));

        entries
            .into_iter()
            .map(|entry| match injector.draw(rng) {
                Some(gold) => {
                    diagnostics.gold_injected += 1;
                    Slot::Gold(gold)
                }
                None => Slot::Item(entry),
            })
            .collect()
    }

    fn manifest_item(&self, slot: Slot<Offer>) -> ManifestItem {
        match slot {
            Slot::Gold(id) => ManifestItem::gold(&id, self.media.resolve(&id, None)),
            Slot::Item(offer) => {
                let media = self.media.resolve(&offer.row.id, Some(&offer.row));
                let prefill = Prefill::from_row(&offer.row, &self.config.items.prefill);
                ManifestItem {
                    double_pass_target: offer.double_pass,
                    pass_number: offer.pass_number,
                    previous_annotators: offer.previous_annotators,
                    ..ManifestItem::task(&offer.row.id, media, prefill, offer.cell)
                }
            }
        }
    }

    fn finish(
        &self,
        request: &AllocationRequest,
        mut items: Vec<ManifestItem>,
        mut diagnostics: Diagnostics,
        seed_fallback: bool,
    ) -> Manifest {
        if items.is_empty() && seed_fallback {
            items.push(ManifestItem::seed());
            diagnostics.seeded = true;
        }
        Manifest {
            annotator_id: request.annotator_id.clone(),
            stage: request.stage,
            items,
            diagnostics,
        }
    }
}

fn has_transcript(row: &ItemRow, prefill: &PrefillColumns) -> bool {
    [&prefill.transcript_vtt, &prefill.translation_vtt]
        .into_iter()
        .filter_map(|c| c.as_deref())
        .any(|column| row.text(column).is_some())
}

/// Health of the selection cell, else of the cell recorded on the item
fn cell_health(index: &HashMap<String, CoverageCell>, cell: &str, state: &ItemRoutingState) -> CellHealth {
    index
        .get(cell)
        .or_else(|| state.assigned_cell.as_deref().and_then(|c| index.get(c)))
        .map(CellHealth::from)
        .unwrap_or_default()
}
