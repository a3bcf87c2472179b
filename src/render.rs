// src/render.rs
//! Boundary to visualization: a numeric series plus its histogram domain.

use std::io::Write;
use tracing::warn;

use crate::config::{HistogramConfig, OutOfRange, RenderConfig};
use crate::explore::Histogram;

/// Draws a series over `domain`. Rendering is a side effect only.
pub trait HistogramRenderer {
    fn render(&mut self, values: &[f64], domain: (f64, f64), cfg: &RenderConfig);
}

/// Text bar chart written to any `io::Write`.
pub struct TextRenderer<W: Write> {
    out: W,
    bins: usize,
    out_of_range: OutOfRange,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W, bins: usize, out_of_range: OutOfRange) -> Self {
        Self {
            out,
            bins,
            out_of_range,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, h: &Histogram, cfg: &RenderConfig) -> std::io::Result<()> {
        let peak = h.counts.iter().copied().max().unwrap_or(0);
        for (lo, hi, count) in h.bins() {
            if count == 0 && !cfg.show_empty_bins {
                continue;
            }
            // any non-empty bin gets at least one mark
            let len = if peak == 0 {
                0
            } else {
                ((count as u128 * cfg.width as u128).div_ceil(peak as u128)) as usize
            };
            let bar: String = std::iter::repeat(cfg.bar).take(len).collect();
            writeln!(
                self.out,
                "[{:>12.2}, {:>12.2}) {:<width$} {}",
                lo,
                hi,
                bar,
                count,
                width = cfg.width
            )?;
        }
        let fate = match h.out_of_range {
            OutOfRange::Exclude => "excluded",
            OutOfRange::Clamp => "clamped",
        };
        writeln!(
            self.out,
            "below {} / above {} ({}), max {}",
            h.underflow,
            h.overflow,
            fate,
            h.max.map_or_else(|| "-".to_string(), |m| format!("{m:.2}"))
        )?;
        self.out.flush()
    }
}

impl<W: Write> HistogramRenderer for TextRenderer<W> {
    fn render(&mut self, values: &[f64], domain: (f64, f64), cfg: &RenderConfig) {
        let hist_cfg = HistogramConfig {
            bins: self.bins,
            bin_min: domain.0,
            bin_max: domain.1,
            out_of_range: self.out_of_range,
        };
        let h = match Histogram::build(values.iter().copied().map(Some), &hist_cfg) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "cannot render histogram");
                return;
            }
        };
        if let Err(e) = self.draw(&h, cfg) {
            warn!(error = %e, "writing histogram failed");
        }
    }
}
