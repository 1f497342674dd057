// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scanner engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scanner device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitmask of the interfaces a device is reachable over.
///
/// The device layer reports connection classes as a raw bitmask; a single
/// device can be visible on more than one interface at once (e.g. USB and
/// network for a multifunction unit).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMask(pub u8);

impl ConnectionMask {
    /// Locally attached over USB.
    pub const USB: ConnectionMask = ConnectionMask(0b0001);
    /// Reachable over the local network.
    pub const NETWORK: ConnectionMask = ConnectionMask(0b0010);
    /// Shared by another host.
    pub const SHARED: ConnectionMask = ConnectionMask(0b0100);
    /// Short-range wireless (Bluetooth and similar).
    pub const BLUETOOTH: ConnectionMask = ConnectionMask(0b1000);

    pub fn contains(&self, other: ConnectionMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(&self, other: ConnectionMask) -> ConnectionMask {
        ConnectionMask(self.0 | other.0)
    }
}

impl std::fmt::Display for ConnectionMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::USB) {
            names.push("usb");
        }
        if self.contains(Self::NETWORK) {
            names.push("network");
        }
        if self.contains(Self::SHARED) {
            names.push("shared");
        }
        if self.contains(Self::BLUETOOTH) {
            names.push("bluetooth");
        }
        if names.is_empty() {
            names.push("none");
        }
        write!(f, "{}", names.join("+"))
    }
}

/// Class of a device reported by the discovery feed.
///
/// The same feed surfaces cameras and other imaging hardware; only
/// `Scanner` devices are passed through to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Scanner,
    Camera,
    Other,
}

/// A scanner discovered by the device layer.
///
/// Created by a discovery add event and invalidated by the matching remove
/// event — never hold one past its removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub id: DeviceId,
    /// Human-readable display name (e.g. "Epson WF-3520").
    pub name: String,
    /// Interfaces the device is reachable over.
    pub connection: ConnectionMask,
    /// When this device was last seen by discovery.
    pub last_seen: DateTime<Utc>,
}

/// A scanning mechanism on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    /// Flatbed glass.
    Flatbed,
    /// Automatic document feeder.
    DocumentFeeder,
    /// Vendor-specific mechanism (film holder, slide tray, ...).
    Other,
}

/// Pixel encoding requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelEncoding {
    Rgb,
    Gray,
    BlackWhite,
}

/// Requested color mode.
///
/// Each mode implies a fixed pixel encoding and bit depth; the mapping is
/// applied without probing device support — an unsupported combination
/// surfaces as a device-level error at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    Color,
    Grayscale,
    Monochrome,
}

impl ColorMode {
    pub fn pixel_encoding(&self) -> PixelEncoding {
        match self {
            Self::Color => PixelEncoding::Rgb,
            Self::Grayscale => PixelEncoding::Gray,
            Self::Monochrome => PixelEncoding::BlackWhite,
        }
    }

    /// Bits per component implied by the mode.
    pub fn bit_depth(&self) -> u32 {
        match self {
            Self::Color | Self::Grayscale => 8,
            Self::Monochrome => 1,
        }
    }
}

/// Page geometry presets for the scan area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    A4,
    Letter,
    Legal,
    /// Custom size in thousandths of an inch.
    Custom { width_mils: u32, height_mils: u32 },
}

impl PageSize {
    /// Physical dimensions in inches (width, height).
    pub fn dimensions_inches(&self) -> (f64, f64) {
        match self {
            Self::A4 => (8.27, 11.69),
            Self::Letter => (8.5, 11.0),
            Self::Legal => (8.5, 14.0),
            Self::Custom {
                width_mils,
                height_mils,
            } => (*width_mils as f64 / 1000.0, *height_mils as f64 / 1000.0),
        }
    }

    /// Device document-type token for this preset.
    pub fn document_type_token(&self) -> &'static str {
        match self {
            Self::A4 => "iso-a4",
            Self::Letter => "na-letter",
            Self::Legal => "na-legal",
            Self::Custom { .. } => "custom", // custom sizes carry no preset token
        }
    }
}

/// Immutable capture request, supplied once per capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Which scanning mechanism to use.
    pub unit: UnitKind,
    /// Requested resolution in dots per inch.
    pub dpi: u32,
    pub color_mode: ColorMode,
    pub page_size: PageSize,
    /// Capture both sides of each sheet (document feeder only).
    pub duplex: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            unit: UnitKind::Flatbed,
            dpi: 300,
            color_mode: ColorMode::Color,
            page_size: PageSize::A4,
            duplex: false,
        }
    }
}

/// One horizontal slice of a page's raw pixel data, as delivered by the
/// device layer.
///
/// Strips for one page arrive in non-decreasing `start_row` order.  There
/// is no explicit page-boundary event: a strip whose `start_row` falls
/// below the previous strip's end row means the previous page is complete
/// and a new page has begun.
#[derive(Debug, Clone)]
pub struct Strip {
    /// Full width of the page image in pixels.
    pub width: u32,
    /// Full height of the page image in pixels.
    pub height: u32,
    pub bits_per_pixel: u32,
    pub bits_per_component: u32,
    /// Row stride in bytes.
    pub bytes_per_row: u32,
    /// Row index within the page where this slice starts.
    pub start_row: u32,
    /// Number of rows this slice covers.
    pub row_count: u32,
    /// Raw pixel payload. May be shorter than `row_count * bytes_per_row`
    /// for the final strip of a page.
    pub data: Vec<u8>,
}

impl Strip {
    /// Row index one past the last row this strip covers.
    pub fn end_row(&self) -> u32 {
        self.start_row + self.row_count
    }
}

/// Pixel layout of an assembled page, inferred from bits per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    /// 1 bit per pixel, black and white.
    Monochrome,
    /// 8 bits per pixel, single gray channel.
    Grayscale,
    /// 24 bits per pixel, packed RGB.
    Rgb,
    /// 32 bits per pixel, RGB with an ignored trailing channel.
    RgbIgnoredAlpha,
}

impl ColorModel {
    /// Infer the color model from bits per pixel.  Unknown depths fall
    /// back to packed 24-bit RGB rather than failing.
    pub fn from_bits_per_pixel(bpp: u32) -> Self {
        match bpp {
            1 => Self::Monochrome,
            8 => Self::Grayscale,
            24 => Self::Rgb,
            32 => Self::RgbIgnoredAlpha,
            _ => Self::Rgb,
        }
    }
}

/// A complete reassembled page image.
///
/// Created only once every strip for the page has been received; immutable
/// thereafter.  Ownership passes to whoever pulls it from the page stream.
#[derive(Debug, Clone)]
pub struct AssembledImage {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub bits_per_component: u32,
    pub bytes_per_row: u32,
    pub color_model: ColorModel,
    /// Pixel buffer of exactly `height * bytes_per_row` bytes.
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_mask_contains_and_union() {
        let mask = ConnectionMask::USB.union(ConnectionMask::NETWORK);
        assert!(mask.contains(ConnectionMask::USB));
        assert!(mask.contains(ConnectionMask::NETWORK));
        assert!(!mask.contains(ConnectionMask::BLUETOOTH));
        assert_eq!(mask.to_string(), "usb+network");
    }

    #[test]
    fn empty_connection_mask_displays_none() {
        assert_eq!(ConnectionMask::default().to_string(), "none");
    }

    #[test]
    fn color_mode_implies_encoding_and_depth() {
        assert_eq!(ColorMode::Color.pixel_encoding(), PixelEncoding::Rgb);
        assert_eq!(ColorMode::Color.bit_depth(), 8);
        assert_eq!(ColorMode::Grayscale.pixel_encoding(), PixelEncoding::Gray);
        assert_eq!(ColorMode::Grayscale.bit_depth(), 8);
        assert_eq!(ColorMode::Monochrome.pixel_encoding(), PixelEncoding::BlackWhite);
        assert_eq!(ColorMode::Monochrome.bit_depth(), 1);
    }

    #[test]
    fn page_size_dimensions() {
        let (w, h) = PageSize::Letter.dimensions_inches();
        assert_eq!((w, h), (8.5, 11.0));

        let (w, h) = PageSize::Custom {
            width_mils: 4000,
            height_mils: 6000,
        }
        .dimensions_inches();
        assert_eq!((w, h), (4.0, 6.0));
    }

    #[test]
    fn color_model_inference() {
        assert_eq!(ColorModel::from_bits_per_pixel(1), ColorModel::Monochrome);
        assert_eq!(ColorModel::from_bits_per_pixel(8), ColorModel::Grayscale);
        assert_eq!(ColorModel::from_bits_per_pixel(24), ColorModel::Rgb);
        assert_eq!(ColorModel::from_bits_per_pixel(32), ColorModel::RgbIgnoredAlpha);
        // Unknown depths fall back to RGB.
        assert_eq!(ColorModel::from_bits_per_pixel(16), ColorModel::Rgb);
    }

    #[test]
    fn strip_end_row() {
        let strip = Strip {
            width: 100,
            height: 50,
            bits_per_pixel: 8,
            bits_per_component: 8,
            bytes_per_row: 100,
            start_row: 25,
            row_count: 25,
            data: vec![0; 2500],
        };
        assert_eq!(strip.end_row(), 50);
    }
}
