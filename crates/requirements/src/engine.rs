use foundation::ids::{FileId, RegionId};
use tracing::debug;

use crate::diff::RetainedRequirements;
use crate::records::{
    CURRENT_CHANNEL, DEFAULT_STATS_TYPES, HistogramConfig, HistogramRequirements, Requirement,
    RequirementRecord, RequirementsMap, SpatialConfig, SpatialRequirements, SpectralConfig,
    SpectralRequirements, StatsConfig, StatsRequirements,
};
use crate::widgets::{RegionShape, RequirementContext, WidgetKind, WidgetSet};

/// Turns the live widget set into per-tick requirement changes.
#[derive(Debug, Default)]
pub struct RequirementsEngine {
    spatial: RetainedRequirements<SpatialRequirements>,
    spectral: RetainedRequirements<SpectralRequirements>,
    stats: RetainedRequirements<StatsRequirements>,
    histogram: RetainedRequirements<HistogramRequirements>,
}

impl RequirementsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// One reconciliation tick.
    ///
    /// Records come out grouped by kind (spatial, spectral, stats, histogram);
    /// within a kind clearing records precede updates.
    pub fn reconcile<C: RequirementContext>(
        &mut self,
        widgets: &WidgetSet,
        ctx: &C,
    ) -> Vec<RequirementRecord> {
        let mut out = Vec::new();
        out.extend(emit(self.spatial.diff(spatial_requirements(widgets, ctx))));
        out.extend(emit(self.spectral.diff(spectral_requirements(widgets, ctx))));
        out.extend(emit(self.stats.diff(stats_requirements(widgets, ctx))));
        out.extend(emit(self.histogram.diff(histogram_requirements(widgets, ctx))));
        if !out.is_empty() {
            debug!(records = out.len(), "requirements reconciled");
        }
        out
    }

    /// Forgets everything sent for a closed file. No clears are produced: the
    /// backend drops per-file state when the file closes.
    pub fn forget_file(&mut self, file: FileId) {
        self.spatial.forget_file(file);
        self.spectral.forget_file(file);
        self.stats.forget_file(file);
        self.histogram.forget_file(file);
    }
}

fn emit<R: Requirement>(records: Vec<R>) -> impl Iterator<Item = RequirementRecord> {
    records.into_iter().map(Requirement::into_record)
}

fn entry<R: Requirement>(map: &mut RequirementsMap<R>, file: FileId, region: RegionId) -> &mut R {
    map.entry((file, region))
        .or_insert_with(|| R::empty(file, region))
}

/// Whole image, or an existing region with an interior.
fn is_area_region<C: RequirementContext>(ctx: &C, file: FileId, region: RegionId) -> bool {
    region.is_image() || ctx.region_shape(file, region) == Some(RegionShape::Closed)
}

pub fn cursor_spatial_config<C: RequirementContext>(
    ctx: &C,
    file: FileId,
    coordinate: &str,
) -> Option<SpatialConfig> {
    if ctx.cursor_frozen() {
        return Some(SpatialConfig {
            coordinate: coordinate.to_string(),
            mip: 1,
            start: None,
            end: None,
        });
    }
    let window = ctx.cursor_window(file)?;
    let view = window.view;
    let (lo, hi, extent) = if coordinate.contains('x') {
        (view.x_min, view.x_max, window.width)
    } else {
        (view.y_min, view.y_max, window.height)
    };
    let last = extent.saturating_sub(1) as f64;
    Some(SpatialConfig {
        coordinate: coordinate.to_string(),
        mip: view.mip.clamp(1, window.max_mip.max(1)),
        start: Some(lo.clamp(0.0, last).floor() as u32),
        end: Some(hi.clamp(0.0, last).ceil() as u32),
    })
}

pub fn spatial_requirements<C: RequirementContext>(
    widgets: &WidgetSet,
    ctx: &C,
) -> RequirementsMap<SpatialRequirements> {
    let mut map = RequirementsMap::<SpatialRequirements>::new();
    for (_, widget) in widgets.iter() {
        let WidgetKind::SpatialProfile { coordinate } = &widget.kind else {
            continue;
        };
        let Some(file) = widget.file(ctx.active_file()) else {
            continue;
        };
        if !ctx.has_file(file) || ctx.region_shape(file, RegionId::CURSOR).is_none() {
            continue;
        }
        let Some(config) = cursor_spatial_config(ctx, file, coordinate) else {
            continue;
        };
        let record = entry(&mut map, file, RegionId::CURSOR);
        // First widget per coordinate wins.
        if !record.configs.iter().any(|c| c.coordinate == *coordinate) {
            record.configs.push(config);
        }
    }
    map
}

pub fn spectral_requirements<C: RequirementContext>(
    widgets: &WidgetSet,
    ctx: &C,
) -> RequirementsMap<SpectralRequirements> {
    let mut map = RequirementsMap::<SpectralRequirements>::new();
    for (_, widget) in widgets.iter() {
        let WidgetKind::SpectralProfile {
            region,
            coordinate,
            stats_types,
            include_matched,
        } = &widget.kind
        else {
            continue;
        };
        let Some(file) = widget.file(ctx.active_file()) else {
            continue;
        };
        let files = if *include_matched {
            ctx.matched_files(file)
        } else {
            vec![file]
        };
        for file in files {
            if !ctx.has_file(file) {
                continue;
            }
            if !region.is_image() && ctx.region_shape(file, *region).is_none() {
                continue;
            }
            let record = entry(&mut map, file, *region);
            match record.configs.iter_mut().find(|c| c.coordinate == *coordinate) {
                Some(config) => {
                    config.stats_types.extend(stats_types.iter().copied());
                    config.stats_types.sort();
                    config.stats_types.dedup();
                }
                None => {
                    let mut types = stats_types.clone();
                    types.sort();
                    types.dedup();
                    record.configs.push(SpectralConfig {
                        coordinate: coordinate.clone(),
                        stats_types: types,
                    });
                }
            }
        }
    }
    map
}

pub fn stats_requirements<C: RequirementContext>(
    widgets: &WidgetSet,
    ctx: &C,
) -> RequirementsMap<StatsRequirements> {
    let mut map = RequirementsMap::<StatsRequirements>::new();
    for (_, widget) in widgets.iter() {
        let WidgetKind::Stats { region, coordinate } = &widget.kind else {
            continue;
        };
        let Some(file) = widget.file(ctx.active_file()) else {
            continue;
        };
        if !ctx.has_file(file) || !is_area_region(ctx, file, *region) {
            continue;
        }
        let record = entry(&mut map, file, *region);
        if !record.configs.iter().any(|c| c.coordinate == *coordinate) {
            record.configs.push(StatsConfig {
                coordinate: coordinate.clone(),
                stats_types: DEFAULT_STATS_TYPES.to_vec(),
            });
        }
    }
    map
}

pub fn histogram_requirements<C: RequirementContext>(
    widgets: &WidgetSet,
    ctx: &C,
) -> RequirementsMap<HistogramRequirements> {
    let mut map = RequirementsMap::<HistogramRequirements>::new();
    for (_, widget) in widgets.iter() {
        let WidgetKind::Histogram {
            region,
            coordinate,
            fixed_num_bins,
            num_bins,
            fixed_bounds,
            bounds,
        } = &widget.kind
        else {
            continue;
        };
        let Some(file) = widget.file(ctx.active_file()) else {
            continue;
        };
        if !ctx.has_file(file) || !is_area_region(ctx, file, *region) {
            continue;
        }
        let config = HistogramConfig {
            coordinate: coordinate.clone(),
            channel: CURRENT_CHANNEL,
            fixed_num_bins: *fixed_num_bins,
            num_bins: *num_bins,
            fixed_bounds: *fixed_bounds,
            bounds: *bounds,
        };
        let record = entry(&mut map, file, *region);
        if !record.configs.iter().any(|c| c.matches(&config)) {
            record.configs.push(config);
        }
    }
    map
}
