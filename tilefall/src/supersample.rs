//! Stochastic supersampling: anti-aliases output pixels by averaging several sub-pixel samples
//! once the view has refined far enough for the extra lookups to pay off.
//!
//! The sample pattern is deterministic and built once per renderer, so repeated passes over the
//! same view produce identical pixels.

use crate::chain::{ChainSet, FallbackChain};
use crate::color::Color;
use crate::engine::{ColumnStrategy, PassPolicy, ResolutionEngine};

/// Number of row phases and column phases the pattern is tabulated for.
const PHASES: usize = 8;
/// Upper bound on samples per pixel.
const MAX_SAMPLES: usize = 40;

/// A deterministic table of sub-pixel sample offsets.
///
/// Offsets are derived by bit-reversing a monotonically increasing counter: reversal spreads the
/// low counter bits over the top of the word, which is split into a coarse vertical bucket (top
/// three bits) and a fine horizontal fraction (the rest). Each of the 8×8 row/column phase
/// combinations gets its own run of the counter, and output pixels reuse the table cyclically.
pub(crate) struct SamplePattern {
    offsets: Vec<(f64, f64)>,
    samples: usize,
    reciprocal: f64,
}

impl SamplePattern {
    /// Builds the pattern for the given oversampling ratio (tile pixels covered by one display
    /// pixel). More tile detail per display pixel warrants more samples, up to [`MAX_SAMPLES`].
    pub(crate) fn new(tile_pixels_per_display_pixel: f64) -> Self {
        let wanted = (1.61 * tile_pixels_per_display_pixel + 5.0).round();
        let samples = if wanted.is_finite() {
            (wanted as i64).clamp(1, MAX_SAMPLES as i64) as usize
        } else {
            MAX_SAMPLES
        };

        let mut offsets = Vec::with_capacity(PHASES * PHASES * samples);
        for cell in 0..(PHASES * PHASES) as u32 {
            for k in 0..samples as u32 {
                let v = (cell * MAX_SAMPLES as u32 + k).reverse_bits();
                let dy = (v >> 29) as f64 / PHASES as f64;
                let dx = (v & 0x1FFF_FFFF) as f64 / (1u32 << 29) as f64;
                offsets.push((dx, dy));
            }
        }

        Self {
            offsets,
            samples,
            reciprocal: 1.0 / samples as f64,
        }
    }

    /// Samples of one row/column phase combination, as `(dx, dy)` offsets in `[0, 1)`.
    pub(crate) fn cell(&self, row_phase: usize, col_phase: usize) -> &[(f64, f64)] {
        let start = (row_phase % PHASES * PHASES + col_phase % PHASES) * self.samples;
        &self.offsets[start..start + self.samples]
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.samples
    }

    pub(crate) fn reciprocal(&self) -> f64 {
        self.reciprocal
    }
}

/// Column strategy averaging [`SamplePattern`] lookups through the combined fallback chain.
///
/// A pixel is blended only when every sample resolves to non-transparent data; otherwise the
/// pixel falls back to the exact single center-sample lookup through the plain chain, so partial
/// blending with missing data never happens.
pub(crate) struct SupersampleStrategy {
    pattern: SamplePattern,
    combined: FallbackChain,
    plain: FallbackChain,
}

impl SupersampleStrategy {
    pub(crate) fn new(chains: ChainSet, tile_pixels_per_display_pixel: f64) -> Self {
        Self {
            pattern: SamplePattern::new(tile_pixels_per_display_pixel),
            combined: chains.combined(),
            plain: chains.main(),
        }
    }
}

impl ColumnStrategy for SupersampleStrategy {
    fn render_column(&self, engine: &ResolutionEngine, policy: PassPolicy, col: u32) -> bool {
        let target = engine.target();
        let projection = engine.spec().projection();
        let x = target.x_offset() + col as f64;
        let y = target.y_offset();

        let (center_base, center_step) = projection.locate(x, y);

        // One baseline per sample offset of each row phase; all rows of the column reuse them.
        let samples = self.pattern.sample_count();
        let mut baselines = Vec::with_capacity(PHASES * samples);
        let col_phase = col as usize % PHASES;
        for row_phase in 0..PHASES {
            for &(dx, _) in self.pattern.cell(row_phase, col_phase) {
                baselines.push(projection.locate(x + dx, y));
            }
        }

        let mut complete = true;
        for row in 0..target.rows() {
            let row_phase = row as usize % PHASES;

            // Red and blue share one accumulator; their sums stay below 2^16 even at the
            // maximum sample count.
            let mut rb = 0u32;
            let mut green = 0u32;
            let mut usable = true;
            for (k, &(_, dy)) in self.pattern.cell(row_phase, col_phase).iter().enumerate() {
                let (base, step) = baselines[row_phase * samples + k];
                let point = base.offset(step, row as f64 + dy);
                match engine.resolve(point, self.combined, policy, col) {
                    Some(color) if !color.is_transparent() => {
                        rb += (color.r() as u32) << 16 | color.b() as u32;
                        green += color.g() as u32;
                    }
                    _ => {
                        usable = false;
                        break;
                    }
                }
            }

            let resolved = if usable {
                let r = ((rb >> 16) as f64 * self.pattern.reciprocal()).round() as u8;
                let b = ((rb & 0xFFFF) as f64 * self.pattern.reciprocal()).round() as u8;
                let g = (green as f64 * self.pattern.reciprocal()).round() as u8;
                Some(Color::rgba(r, g, b, 255))
            } else {
                let center = center_base.offset(center_step, row as f64);
                engine.resolve(center, self.plain, policy, col)
            };

            match resolved {
                Some(color) => target.put_pixel(col, row, color),
                None => {
                    target.put_pixel(col, row, Color::OUTSIDE);
                    complete = false;
                }
            }
        }

        complete
    }
}
