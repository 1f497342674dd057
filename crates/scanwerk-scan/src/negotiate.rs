// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capability negotiation — maps a requested scan configuration onto the
// capabilities a selected capture unit actually reports.
//
// Pure logic, no device traffic: the session state machine applies the
// resulting `NegotiatedSettings` through the backend.  Fallback rules
// always prefer what the unit declares over what was asked for, except for
// color mode, which is applied blindly (an unsupported combination
// surfaces as a device-level error at capture time rather than being
// pre-validated here).

use tracing::debug;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{PixelEncoding, ScanConfig, UnitKind};

use crate::backend::UnitCapabilities;

/// Scan-area rectangle in device units (pixels at the negotiated dpi),
/// always anchored at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanArea {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The settings actually applied to a capture unit after negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedSettings {
    pub dpi: u32,
    pub pixel_encoding: PixelEncoding,
    /// Bits per component.
    pub bit_depth: u32,
    pub scan_area: ScanArea,
    /// Device document-type token, when the unit understands the concept.
    pub document_type: Option<String>,
    /// Duplex on/off, when the unit supports duplex; `None` leaves the
    /// unit's default untouched.
    pub duplex: Option<bool>,
}

/// Reconcile a requested configuration against a unit's reported
/// capabilities.
///
/// Resolution falls back from requested, to first preferred, to first
/// supported.  A unit reporting no resolutions at all has nothing to fall
/// back to and yields `UnsupportedResolution` — never an arbitrary value.
pub fn negotiate(config: &ScanConfig, caps: &UnitCapabilities) -> Result<NegotiatedSettings> {
    let dpi = negotiate_resolution(config.dpi, caps)?;

    // Page geometry in inches, clamped to the unit's physical surface.
    let (page_w, page_h) = config.page_size.dimensions_inches();
    let (surface_w, surface_h) = caps.physical_size_inches;
    let width_in = if surface_w > 0.0 { page_w.min(surface_w) } else { page_w };
    let height_in = if surface_h > 0.0 { page_h.min(surface_h) } else { page_h };

    let scan_area = ScanArea {
        x: 0,
        y: 0,
        width: (width_in * dpi as f64).round() as u32,
        height: (height_in * dpi as f64).round() as u32,
    };

    // Document type is applied only when the unit advertises the token.
    let token = config.page_size.document_type_token();
    let document_type = caps
        .document_type_tokens
        .iter()
        .find(|t| t.as_str() == token)
        .cloned();

    // Duplex only exists on feeders that report support; otherwise the
    // unit's default is silently left in place.
    let duplex = if caps.kind == UnitKind::DocumentFeeder && caps.duplex_supported {
        Some(config.duplex)
    } else {
        None
    };

    let settings = NegotiatedSettings {
        dpi,
        pixel_encoding: config.color_mode.pixel_encoding(),
        bit_depth: config.color_mode.bit_depth(),
        scan_area,
        document_type,
        duplex,
    };

    debug!(
        requested_dpi = config.dpi,
        negotiated_dpi = settings.dpi,
        width = settings.scan_area.width,
        height = settings.scan_area.height,
        "negotiated capture settings"
    );
    Ok(settings)
}

/// Resolution fallback chain: requested → first preferred → first supported.
fn negotiate_resolution(requested: u32, caps: &UnitCapabilities) -> Result<u32> {
    if caps.supported_resolutions.contains(&requested) {
        return Ok(requested);
    }
    if let Some(&preferred) = caps.preferred_resolutions.first() {
        debug!(requested, fallback = preferred, "requested dpi unsupported, using preferred");
        return Ok(preferred);
    }
    if let Some(&supported) = caps.supported_resolutions.first() {
        debug!(requested, fallback = supported, "requested dpi unsupported, using first supported");
        return Ok(supported);
    }
    Err(ScanwerkError::UnsupportedResolution(requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::types::{ColorMode, PageSize};

    fn flatbed_caps() -> UnitCapabilities {
        UnitCapabilities {
            kind: UnitKind::Flatbed,
            supported_resolutions: vec![75, 150, 300, 600],
            preferred_resolutions: vec![300, 600],
            bit_depths: vec![1, 8],
            pixel_encodings: vec![
                PixelEncoding::Rgb,
                PixelEncoding::Gray,
                PixelEncoding::BlackWhite,
            ],
            document_type_tokens: vec!["iso-a4".into(), "na-letter".into()],
            physical_size_inches: (8.5, 11.7),
            duplex_supported: false,
            duplex_enabled: false,
            paper_loaded: false,
        }
    }

    fn feeder_caps() -> UnitCapabilities {
        UnitCapabilities {
            kind: UnitKind::DocumentFeeder,
            duplex_supported: true,
            paper_loaded: true,
            ..flatbed_caps()
        }
    }

    #[test]
    fn requested_resolution_used_when_supported() {
        let config = ScanConfig {
            dpi: 600,
            ..ScanConfig::default()
        };
        let settings = negotiate(&config, &flatbed_caps()).expect("negotiate");
        assert_eq!(settings.dpi, 600);
    }

    #[test]
    fn unsupported_resolution_falls_back_to_preferred() {
        let config = ScanConfig {
            dpi: 1200,
            ..ScanConfig::default()
        };
        let settings = negotiate(&config, &flatbed_caps()).expect("negotiate");
        assert_eq!(settings.dpi, 300); // first preferred
    }

    #[test]
    fn empty_preferred_falls_back_to_first_supported() {
        let mut caps = flatbed_caps();
        caps.preferred_resolutions.clear();
        let config = ScanConfig {
            dpi: 1200,
            ..ScanConfig::default()
        };
        let settings = negotiate(&config, &caps).expect("negotiate");
        assert_eq!(settings.dpi, 75);
    }

    #[test]
    fn no_resolutions_at_all_is_an_error() {
        let mut caps = flatbed_caps();
        caps.preferred_resolutions.clear();
        caps.supported_resolutions.clear();
        let config = ScanConfig::default();
        assert!(matches!(
            negotiate(&config, &caps),
            Err(ScanwerkError::UnsupportedResolution(300))
        ));
    }

    #[test]
    fn scan_area_is_page_inches_times_dpi_at_origin() {
        let config = ScanConfig {
            dpi: 150,
            page_size: PageSize::Letter,
            ..ScanConfig::default()
        };
        let settings = negotiate(&config, &flatbed_caps()).expect("negotiate");
        assert_eq!(settings.scan_area.x, 0);
        assert_eq!(settings.scan_area.y, 0);
        assert_eq!(settings.scan_area.width, 1275); // 8.5in * 150dpi
        assert_eq!(settings.scan_area.height, 1650); // 11in * 150dpi
    }

    #[test]
    fn scan_area_clamps_to_physical_surface() {
        let config = ScanConfig {
            dpi: 150,
            page_size: PageSize::Legal, // 14in tall, surface only 11.7in
            ..ScanConfig::default()
        };
        let settings = negotiate(&config, &flatbed_caps()).expect("negotiate");
        assert_eq!(settings.scan_area.height, 1755); // 11.7in * 150dpi
    }

    #[test]
    fn color_mode_mapped_without_probing() {
        let config = ScanConfig {
            color_mode: ColorMode::Monochrome,
            ..ScanConfig::default()
        };
        // Caps report no 1-bit support set, but the mapping is applied
        // anyway — support issues surface at capture time.
        let mut caps = flatbed_caps();
        caps.bit_depths = vec![8];
        let settings = negotiate(&config, &caps).expect("negotiate");
        assert_eq!(settings.pixel_encoding, PixelEncoding::BlackWhite);
        assert_eq!(settings.bit_depth, 1);
    }

    #[test]
    fn document_type_only_when_advertised() {
        let config = ScanConfig {
            page_size: PageSize::Letter,
            ..ScanConfig::default()
        };
        let settings = negotiate(&config, &flatbed_caps()).expect("negotiate");
        assert_eq!(settings.document_type.as_deref(), Some("na-letter"));

        let mut caps = flatbed_caps();
        caps.document_type_tokens.clear();
        let settings = negotiate(&config, &caps).expect("negotiate");
        assert_eq!(settings.document_type, None);
    }

    #[test]
    fn duplex_applied_only_on_supporting_feeders() {
        let config = ScanConfig {
            unit: UnitKind::DocumentFeeder,
            duplex: true,
            ..ScanConfig::default()
        };

        let settings = negotiate(&config, &feeder_caps()).expect("negotiate");
        assert_eq!(settings.duplex, Some(true));

        // Feeder without duplex support: silently left at the default.
        let mut caps = feeder_caps();
        caps.duplex_supported = false;
        let settings = negotiate(&config, &caps).expect("negotiate");
        assert_eq!(settings.duplex, None);

        // Flatbeds have no duplex concept at all.
        let settings = negotiate(&config, &flatbed_caps()).expect("negotiate");
        assert_eq!(settings.duplex, None);
    }
}
