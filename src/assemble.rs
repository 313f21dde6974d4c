//! Plan → enhance → merge orchestration.
//!
//! Enhancement runs on a pool of scoped worker threads; merging happens on
//! the calling thread, which is the only writer of the output image and
//! applies tiles strictly in plan order. Workers claim tile indices in
//! ascending order and stop at the merge window (`max_pending` tiles past
//! the last merged one), so the number of enhanced tiles held in memory is
//! bounded and the writer is never starved of the tile it needs next.

use std::collections::BTreeMap;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::core::blend::{merge_tile, EnhancedTile};
use crate::core::buffer::{ImageBuffer, Sample};
use crate::core::plan::{Tile, TilePlan};
use crate::core::scale::Scale;
use crate::enhance::{validate_output, EnhanceOperator};
use crate::error::{EnhanceError, TilingError};

/// Lifecycle of one assembly run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssemblyState {
    Planning,
    /// Tile `i` is being merged into the output.
    Processing(usize),
    Complete,
    /// Absorbing failure state; `index` is the failing tile when known.
    Failed { index: Option<usize> },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyStats {
    pub operator: String,
    pub tiles: usize,
    pub cols: u32,
    pub rows: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub channels: u8,
    pub scale: f64,
    pub workers: usize,
    pub max_pending: usize,
    /// Most enhanced tiles held at once while waiting for their turn to merge.
    pub peak_pending: usize,
    /// Enhance time summed over all workers.
    pub enhance_ms: f64,
    pub merge_ms: f64,
    pub total_ms: f64,
}

/// A successfully assembled output.
#[derive(Debug)]
pub struct Assembly<S = u8> {
    pub image: ImageBuffer<S>,
    pub stats: AssemblyStats,
}

type StateHook<'a> = Box<dyn FnMut(AssemblyState) + 'a>;

pub struct TileAssembler<'a, O: ?Sized, S = u8> {
    config: PipelineConfig,
    operator: &'a O,
    state: AssemblyState,
    on_state: Option<StateHook<'a>>,
    _sample: PhantomData<S>,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Extract, enhance and validate one tile. A panicking operator is reported
/// as a failure of that tile.
fn enhance_tile<S: Sample, O: EnhanceOperator<S> + ?Sized>(
    source: &ImageBuffer<S>,
    tile: &Tile,
    scale: Scale,
    operator: &O,
) -> Result<EnhancedTile<S>, TilingError> {
    let index = tile.index;
    let input = source.extract(tile.region).map_err(|e| e.at_tile(index))?;
    let pixels = panic::catch_unwind(AssertUnwindSafe(|| operator.enhance(&input, scale)))
        .unwrap_or_else(|payload| {
            Err(EnhanceError::Other(anyhow::anyhow!(
                "operator panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
        .and_then(|out| validate_output(&input, &out, scale).map(|_| out))
        .map_err(|source| match source {
            // out of memory inside the operator is still an allocation failure
            EnhanceError::Tiling(inner) if matches!(*inner, TilingError::AllocationFailed { .. }) => {
                (*inner).at_tile(index)
            }
            source => TilingError::EnhancementFailed { index, source },
        })?;
    Ok(EnhancedTile {
        index,
        dest: tile.destination(scale),
        left_band: tile.left_band(scale),
        top_band: tile.top_band(scale),
        pixels,
    })
}

/// Gate that keeps workers within `window` tiles of the merge cursor.
struct MergeWindow {
    merged: Mutex<usize>,
    cond: Condvar,
    window: usize,
}

impl MergeWindow {
    fn new(window: usize) -> Self {
        Self {
            merged: Mutex::new(0),
            cond: Condvar::new(),
            window: window.max(1),
        }
    }

    /// Block until tile `index` may be enhanced. Returns false when the run
    /// was cancelled at or before `index`.
    fn enter(&self, index: usize, cancel_after: &AtomicUsize) -> bool {
        let mut merged = self.merged.lock();
        loop {
            if index > cancel_after.load(Ordering::SeqCst) {
                return false;
            }
            if index < *merged + self.window {
                return true;
            }
            self.cond.wait(&mut merged);
        }
    }

    fn advance(&self, merged: usize) {
        *self.merged.lock() = merged;
        self.cond.notify_all();
    }

    /// Wake every waiter so it re-checks the cancellation mark.
    fn cancel(&self, index: usize, cancel_after: &AtomicUsize) {
        cancel_after.fetch_min(index, Ordering::SeqCst);
        let _guard = self.merged.lock();
        self.cond.notify_all();
    }
}

impl<'a, S: Sample, O: EnhanceOperator<S> + ?Sized> TileAssembler<'a, O, S> {
    pub fn new(config: PipelineConfig, operator: &'a O) -> Self {
        Self {
            config,
            operator,
            state: AssemblyState::Planning,
            on_state: None,
            _sample: PhantomData,
        }
    }

    /// Observe every state transition, in order.
    pub fn on_state(mut self, hook: impl FnMut(AssemblyState) + 'a) -> Self {
        self.on_state = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    fn transition(&mut self, next: AssemblyState) {
        self.state = next;
        if let Some(hook) = self.on_state.as_mut() {
            hook(next);
        }
    }

    fn fail(&mut self, err: TilingError) -> TilingError {
        match err.tile_index() {
            Some(index) => warn!(index, error = %err, "tile assembly failed"),
            None => warn!(error = %err, "tile assembly failed"),
        }
        self.transition(AssemblyState::Failed {
            index: err.tile_index(),
        });
        err
    }

    /// Run the pipeline over `source`. The output is returned only when
    /// every planned tile has been merged.
    pub fn run(mut self, source: &ImageBuffer<S>) -> Result<Assembly<S>, TilingError> {
        let started = Instant::now();
        self.transition(AssemblyState::Planning);

        let prepared = self.config.validate().and_then(|_| {
            let plan = TilePlan::new(
                source.width(),
                source.height(),
                self.config.tile_size,
                self.config.overlap,
            )?;
            let (ow, oh) = plan.output_size(self.config.scale);
            let output = ImageBuffer::<S>::new(ow, oh, source.channels())?;
            Ok((plan, output))
        });
        let (plan, mut output) = match prepared {
            Ok(p) => p,
            Err(e) => return Err(self.fail(e)),
        };

        let workers = self.config.resolved_workers().min(plan.len()).max(1);
        let max_pending = self.config.resolved_max_pending();
        let mut stats = AssemblyStats {
            operator: self.operator.name().to_string(),
            tiles: plan.len(),
            cols: plan.cols,
            rows: plan.rows,
            output_width: output.width(),
            output_height: output.height(),
            channels: output.channels(),
            scale: self.config.scale.factor(),
            workers,
            max_pending,
            ..Default::default()
        };
        info!(
            tiles = plan.len(),
            grid = %format!("{}x{}", plan.cols, plan.rows),
            output = %format!("{}x{}", output.width(), output.height()),
            workers,
            operator = %stats.operator,
            "assembling tiles"
        );

        let outcome = if workers == 1 {
            self.run_sequential(source, &plan, &mut output, &mut stats)
        } else {
            self.run_parallel(source, &plan, &mut output, &mut stats, workers, max_pending)
        };
        if let Err(e) = outcome {
            return Err(self.fail(e));
        }

        stats.total_ms = ms(started.elapsed());
        self.transition(AssemblyState::Complete);
        info!(
            total_ms = stats.total_ms,
            enhance_ms = stats.enhance_ms,
            merge_ms = stats.merge_ms,
            "assembly complete"
        );
        Ok(Assembly { image: output, stats })
    }

    fn merge(
        &mut self,
        output: &mut ImageBuffer<S>,
        tile: &EnhancedTile<S>,
        stats: &mut AssemblyStats,
    ) -> Result<(), TilingError> {
        self.transition(AssemblyState::Processing(tile.index));
        let t = Instant::now();
        merge_tile(output, tile)?;
        stats.merge_ms += ms(t.elapsed());
        let done = tile.index + 1;
        let step = (stats.tiles / 10).max(1);
        if done % step == 0 || done == stats.tiles {
            info!("[{}/{}] tiles merged", done, stats.tiles);
        }
        Ok(())
    }

    fn run_sequential(
        &mut self,
        source: &ImageBuffer<S>,
        plan: &TilePlan,
        output: &mut ImageBuffer<S>,
        stats: &mut AssemblyStats,
    ) -> Result<(), TilingError> {
        let scale = self.config.scale;
        for tile in plan {
            let t = Instant::now();
            let enhanced = enhance_tile(source, tile, scale, self.operator)?;
            let elapsed = t.elapsed();
            stats.enhance_ms += ms(elapsed);
            stats.peak_pending = 1;
            debug!(index = tile.index, region = %tile.region, enhance_ms = ms(elapsed), "tile enhanced");
            self.merge(output, &enhanced, stats)?;
        }
        Ok(())
    }

    fn run_parallel(
        &mut self,
        source: &ImageBuffer<S>,
        plan: &TilePlan,
        output: &mut ImageBuffer<S>,
        stats: &mut AssemblyStats,
        workers: usize,
        max_pending: usize,
    ) -> Result<(), TilingError> {
        let scale = self.config.scale;
        let operator = self.operator;
        let tiles = plan.tiles();
        let next = AtomicUsize::new(0);
        let cancel_after = AtomicUsize::new(usize::MAX);
        let enhance_us = AtomicU64::new(0);
        let window = MergeWindow::new(max_pending);
        let (tx, rx) = channel::bounded::<(usize, Result<EnhancedTile<S>, TilingError>)>(max_pending);

        let (next, cancel_after, enhance_us, window) = (&next, &cancel_after, &enhance_us, &window);
        let result = thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= tiles.len() || !window.enter(index, cancel_after) {
                        break;
                    }
                    let t = Instant::now();
                    let result = enhance_tile(source, &tiles[index], scale, operator);
                    let elapsed = t.elapsed();
                    enhance_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                    debug!(index, enhance_ms = ms(elapsed), ok = result.is_ok(), "tile enhanced");
                    if result.is_err() {
                        window.cancel(index, cancel_after);
                    }
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            // single writer: reorder and merge in plan order
            let mut pending: BTreeMap<usize, EnhancedTile<S>> = BTreeMap::new();
            let mut merged = 0usize;
            let mut failure: Option<TilingError> = None;
            for (index, result) in rx.iter() {
                match result {
                    Err(err) => {
                        window.cancel(index, cancel_after);
                        // keep the lowest failing index
                        let lower = failure
                            .as_ref()
                            .and_then(TilingError::tile_index)
                            .map_or(true, |f| index < f);
                        if lower {
                            failure = Some(err);
                        }
                    }
                    Ok(_) if failure.is_some() => {}
                    Ok(tile) => {
                        pending.insert(index, tile);
                        stats.peak_pending = stats.peak_pending.max(pending.len());
                        while let Some(tile) = pending.remove(&merged) {
                            if let Err(err) = self.merge(output, &tile, stats) {
                                window.cancel(merged, cancel_after);
                                failure = Some(err);
                                break;
                            }
                            merged += 1;
                            window.advance(merged);
                        }
                    }
                }
            }
            match failure {
                Some(err) => Err(err),
                None if merged == tiles.len() => Ok(()),
                None => Err(TilingError::invalid(format!(
                    "merged {merged} of {} tiles",
                    tiles.len()
                ))),
            }
        });

        stats.enhance_ms = enhance_us.load(Ordering::Relaxed) as f64 / 1000.0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::NearestOperator;

    fn config(tile_size: u32, overlap: u32, scale: u32, workers: usize) -> PipelineConfig {
        PipelineConfig {
            tile_size,
            overlap,
            scale: Scale::integer(scale),
            workers,
            max_pending: 0,
        }
    }

    fn gradient(w: u32, h: u32) -> ImageBuffer<u8> {
        let mut img = ImageBuffer::<u8>::new(w, h, 3).unwrap();
        for y in 0..h {
            for x in 0..w {
                img.pixel_mut(x, y)
                    .copy_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        img
    }

    /// Returns one pixel too few in width.
    struct ShortOperator;

    impl EnhanceOperator<u8> for ShortOperator {
        fn name(&self) -> &str {
            "short"
        }

        fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
            Ok(ImageBuffer::new(scale.apply(tile.width()) - 1, scale.apply(tile.height()), tile.channels())?)
        }
    }

    /// Fails for every tile index in `failing`.
    struct FailingOperator {
        failing: Vec<usize>,
        calls: AtomicUsize,
        cols: u32,
        tile_step: u32,
    }

    impl EnhanceOperator<u8> for FailingOperator {
        fn name(&self) -> &str {
            "failing"
        }

        fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // recover the tile index from the gradient's first pixel
            let px = tile.pixel(0, 0);
            let index = (px[1] as u32 / self.tile_step * self.cols + px[0] as u32 / self.tile_step) as usize;
            if self.failing.contains(&index) {
                return Err(EnhanceError::Process {
                    status: format!("tile {index} rejected"),
                });
            }
            NearestOperator.enhance(tile, scale)
        }
    }

    /// Panics on the tile whose first pixel is `(x, y)` of the gradient.
    struct PanickingOperator {
        at: (u8, u8),
    }

    impl EnhanceOperator<u8> for PanickingOperator {
        fn name(&self) -> &str {
            "panicking"
        }

        fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
            if tile.pixel(0, 0)[..2] == [self.at.0, self.at.1] {
                panic!("operator bug");
            }
            NearestOperator.enhance(tile, scale)
        }
    }

    /// Requests an output buffer that cannot be allocated for one tile.
    struct HugeOperator {
        at: (u8, u8),
    }

    impl EnhanceOperator<u8> for HugeOperator {
        fn name(&self) -> &str {
            "huge"
        }

        fn enhance(&self, tile: &ImageBuffer<u8>, scale: Scale) -> Result<ImageBuffer<u8>, EnhanceError> {
            if tile.pixel(0, 0)[..2] == [self.at.0, self.at.1] {
                return Ok(ImageBuffer::new(u32::MAX, u32::MAX, 1)?);
            }
            NearestOperator.enhance(tile, scale)
        }
    }

    #[test]
    fn test_single_tile_output_size() {
        let src = gradient(37, 30);
        let out = TileAssembler::new(config(512, 32, 4, 1), &NearestOperator).run(&src).unwrap();
        assert_eq!(out.image.dimensions(), (148, 120));
        assert_eq!(out.stats.tiles, 1);
        let debug = format!("{out:?}");
        assert!(debug.contains("width: 148") && debug.contains("tiles: 1"), "{debug}");
    }

    #[test]
    fn test_nearest_tiling_matches_whole_image() {
        let src = gradient(100, 70);
        let whole = NearestOperator.enhance(&src, Scale::integer(2)).unwrap();
        for workers in [1, 4] {
            let out = TileAssembler::new(config(32, 8, 2, workers), &NearestOperator)
                .run(&src)
                .unwrap();
            // nearest is position-exact, so blending identical content is a no-op
            assert_eq!(out.image, whole, "workers={workers}");
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let src = gradient(90, 61);
        let op = crate::enhance::ResampleOperator::default();
        let seq = TileAssembler::new(config(24, 6, 3, 1), &op).run(&src).unwrap();
        let par = TileAssembler::new(config(24, 6, 3, 3), &op).run(&src).unwrap();
        assert_eq!(seq.image, par.image);
        assert!(par.stats.peak_pending <= par.stats.max_pending);
    }

    #[test]
    fn test_wrong_scale_fails_at_first_tile() {
        let src = gradient(64, 64);
        for workers in [1, 4] {
            let err = TileAssembler::new(config(32, 4, 2, workers), &ShortOperator)
                .run(&src)
                .unwrap_err();
            match err {
                TilingError::EnhancementFailed { index, source } => {
                    assert_eq!(index, 0);
                    assert!(matches!(source, EnhanceError::DimensionMismatch { .. }));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_lowest_failing_index_reported() {
        // 200x200, tile 50, no overlap: 4x4 grid whose first pixels encode (col, row) * 50
        let src = gradient(200, 200);
        for workers in [1, 2, 8] {
            let op = FailingOperator {
                failing: vec![6, 13],
                calls: AtomicUsize::new(0),
                cols: 4,
                tile_step: 50,
            };
            let err = TileAssembler::new(config(50, 0, 2, workers), &op).run(&src).unwrap_err();
            assert_eq!(err.tile_index(), Some(6), "workers={workers}");
            if workers == 1 {
                // tiles after the failure are never enhanced
                assert_eq!(op.calls.load(Ordering::SeqCst), 7);
            }
        }
    }

    #[test]
    fn test_state_transitions() {
        let src = gradient(64, 40);
        let mut seen = Vec::new();
        TileAssembler::new(config(32, 0, 1, 2), &NearestOperator)
            .on_state(|s| seen.push(s))
            .run(&src)
            .unwrap();
        let mut expected = vec![AssemblyState::Planning];
        expected.extend((0..4).map(AssemblyState::Processing));
        expected.push(AssemblyState::Complete);
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_failed_state_carries_index() {
        let src = gradient(64, 64);
        let mut last = None;
        let _ = TileAssembler::new(config(32, 4, 2, 1), &ShortOperator)
            .on_state(|s| last = Some(s))
            .run(&src);
        assert_eq!(last, Some(AssemblyState::Failed { index: Some(0) }));
    }

    #[test]
    fn test_invalid_config_fails_before_processing() {
        let src = gradient(16, 16);
        let mut seen = Vec::new();
        let err = TileAssembler::new(config(8, 8, 2, 1), &NearestOperator)
            .on_state(|s| seen.push(s))
            .run(&src)
            .unwrap_err();
        assert!(matches!(err, TilingError::InvalidDimension { .. }));
        assert_eq!(seen, vec![AssemblyState::Planning, AssemblyState::Failed { index: None }]);
    }

    #[test]
    fn test_flat_input_stays_flat_across_seams() {
        let src = ImageBuffer::<f32>::filled(120, 90, &[0.3, 0.6, 0.9]).unwrap();
        let cfg = PipelineConfig {
            scale: Scale::new(1.5).unwrap(),
            ..config(40, 10, 1, 3)
        };
        let out = TileAssembler::new(cfg, &NearestOperator).run(&src).unwrap();
        assert_eq!(out.image.dimensions(), (180, 135));
        for p in out.image.as_raw().chunks(3) {
            for (a, b) in p.iter().zip([0.3f32, 0.6, 0.9]) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_operator_panic_fails_tile() {
        // 64x64 with tile 8: an 8x8 grid, the panic hits tile 0 or tile 10
        let src = gradient(64, 64);
        for (at, expected) in [((0, 0), 0), ((16, 8), 10)] {
            for workers in [1, 2, 4] {
                let (tx, rx) = std::sync::mpsc::channel();
                let src = src.clone();
                thread::spawn(move || {
                    let mut last = None;
                    let result = TileAssembler::new(config(8, 0, 2, workers), &PanickingOperator { at })
                        .on_state(|s| last = Some(s))
                        .run(&src);
                    let _ = tx.send((result.map(|_| ()), last));
                });
                let (result, last) = rx
                    .recv_timeout(Duration::from_secs(30))
                    .unwrap_or_else(|_| panic!("assembler hung after a panic, workers={workers}"));
                match result.unwrap_err() {
                    TilingError::EnhancementFailed { index, source } => {
                        assert_eq!(index, expected, "workers={workers}");
                        assert!(source.to_string().contains("operator bug"), "{source}");
                    }
                    other => panic!("unexpected error: {other}"),
                }
                assert_eq!(last, Some(AssemblyState::Failed { index: Some(expected) }));
            }
        }
    }

    #[test]
    fn test_allocation_failure_in_operator_reports_tile() {
        // 64x32 with tile 16: a 4x2 grid, (32, 16) is the origin of tile 6
        let src = gradient(64, 32);
        for workers in [1, 3] {
            let err = TileAssembler::new(config(16, 0, 2, workers), &HugeOperator { at: (32, 16) })
                .run(&src)
                .unwrap_err();
            assert!(matches!(err, TilingError::AllocationFailed { .. }), "{err}");
            assert_eq!(err.tile_index(), Some(6), "workers={workers}");
        }
    }
}
