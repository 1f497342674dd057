// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Band assembler — turns the device layer's ordered sequence of strips
// into one complete page buffer.
//
// The device never announces page boundaries explicitly.  Strips within a
// page arrive in non-decreasing start-row order, so a strip whose start
// row falls below the previous strip's end row means a new page has begun;
// the session state machine uses `starts_new_page` to detect that and
// assembles the finished page before feeding the regressing strip into a
// fresh accumulation.

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::{debug, warn};

use scanwerk_core::types::{AssembledImage, ColorModel, Strip};

/// In-progress page buffer, created lazily from the first strip.
struct PendingPage {
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    bits_per_component: u32,
    bytes_per_row: u32,
    buffer: Vec<u8>,
}

impl PendingPage {
    fn from_strip(strip: &Strip) -> Self {
        let size = strip.height as usize * strip.bytes_per_row as usize;
        debug!(
            width = strip.width,
            height = strip.height,
            bytes = size,
            "allocating page buffer"
        );
        Self {
            width: strip.width,
            height: strip.height,
            bits_per_pixel: strip.bits_per_pixel,
            bits_per_component: strip.bits_per_component,
            bytes_per_row: strip.bytes_per_row,
            buffer: vec![0; size],
        }
    }
}

/// Stateful accumulator reassembling one page at a time from strips.
#[derive(Default)]
pub struct BandAssembler {
    page: Option<PendingPage>,
    /// End row of the most recently received strip, for boundary detection.
    last_end_row: u32,
}

impl BandAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any strips have been received since construction or the
    /// last reset.
    pub fn has_strips(&self) -> bool {
        self.page.is_some()
    }

    /// Whether `strip` belongs to a new page: its start row regresses
    /// below the previous strip's end row while a page is in progress.
    pub fn starts_new_page(&self, strip: &Strip) -> bool {
        self.page.is_some() && strip.start_row < self.last_end_row
    }

    /// Copy one strip into the page buffer at its row offset.
    ///
    /// The first strip after construction or reset sizes the buffer from
    /// its metadata.  The copy is clipped to the smaller of the declared
    /// strip length and the actual payload, which tolerates a short final
    /// strip, and to the buffer end, which tolerates a strip overrunning
    /// the declared height.
    pub fn receive_strip(&mut self, strip: &Strip) {
        let page = self.page.get_or_insert_with(|| PendingPage::from_strip(strip));

        let stride = page.bytes_per_row as usize;
        let offset = strip.start_row as usize * stride;
        let declared = strip.row_count as usize * stride;
        let len = declared.min(strip.data.len());

        if offset >= page.buffer.len() {
            warn!(
                start_row = strip.start_row,
                height = page.height,
                "strip starts past the page buffer, dropping"
            );
            self.last_end_row = strip.end_row();
            return;
        }

        let end = (offset + len).min(page.buffer.len());
        page.buffer[offset..end].copy_from_slice(&strip.data[..end - offset]);
        self.last_end_row = strip.end_row();
    }

    /// Wrap the accumulated buffer into an immutable image, consuming it.
    ///
    /// Returns `None` when no strip has been received yet.  The assembler
    /// is left in its pre-first-strip state, the same as after
    /// [`reset`](BandAssembler::reset).
    pub fn assemble_image(&mut self) -> Option<AssembledImage> {
        let page = self.page.take()?;
        self.last_end_row = 0;
        Some(AssembledImage {
            width: page.width,
            height: page.height,
            bits_per_pixel: page.bits_per_pixel,
            bits_per_component: page.bits_per_component,
            bytes_per_row: page.bytes_per_row,
            color_model: ColorModel::from_bits_per_pixel(page.bits_per_pixel),
            data: page.buffer,
        })
    }

    /// Release the page buffer and return to the pre-first-strip state.
    pub fn reset(&mut self) {
        self.page = None;
        self.last_end_row = 0;
    }
}

// ---------------------------------------------------------------------------
// Raster interop for downstream OCR/PDF collaborators
// ---------------------------------------------------------------------------

/// Conversion of assembled pages into `image` crate rasters.
pub trait IntoDynamicImage {
    /// Convert to a [`DynamicImage`], repacking padded rows.
    ///
    /// Monochrome pages are expanded to 8-bit grayscale (set bits render
    /// black); the ignored trailing channel of 32-bit pages is dropped.
    /// Returns `None` when the buffer does not cover the declared
    /// dimensions.
    fn to_dynamic(&self) -> Option<DynamicImage>;
}

impl IntoDynamicImage for AssembledImage {
    fn to_dynamic(&self) -> Option<DynamicImage> {
        let stride = self.bytes_per_row as usize;
        if self.data.len() < self.height as usize * stride {
            return None;
        }

        match self.color_model {
            ColorModel::Grayscale => {
                let pixels = repack_rows(&self.data, stride, self.width as usize, self.height);
                GrayImage::from_raw(self.width, self.height, pixels)
                    .map(DynamicImage::ImageLuma8)
            }
            ColorModel::Rgb => {
                let pixels =
                    repack_rows(&self.data, stride, self.width as usize * 3, self.height);
                RgbImage::from_raw(self.width, self.height, pixels).map(DynamicImage::ImageRgb8)
            }
            ColorModel::RgbIgnoredAlpha => {
                let padded =
                    repack_rows(&self.data, stride, self.width as usize * 4, self.height);
                let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
                for chunk in padded.chunks_exact(4) {
                    pixels.extend_from_slice(&chunk[..3]);
                }
                RgbImage::from_raw(self.width, self.height, pixels).map(DynamicImage::ImageRgb8)
            }
            ColorModel::Monochrome => {
                let mut pixels =
                    Vec::with_capacity(self.width as usize * self.height as usize);
                for row in 0..self.height as usize {
                    let row_bytes = &self.data[row * stride..(row + 1) * stride];
                    for x in 0..self.width as usize {
                        let byte = row_bytes.get(x / 8).copied().unwrap_or(0);
                        let bit = byte >> (7 - (x % 8)) & 1;
                        pixels.push(if bit == 1 { 0 } else { 255 });
                    }
                }
                GrayImage::from_raw(self.width, self.height, pixels)
                    .map(DynamicImage::ImageLuma8)
            }
        }
    }
}

/// Strip row padding: copy `row_bytes` from each `stride`-sized row.
fn repack_rows(data: &[u8], stride: usize, row_bytes: usize, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        out.extend_from_slice(&data[start..start + row_bytes.min(stride)]);
    }
    out
}
