use serde::{Deserialize, Serialize};

use crate::core::expression::BandExpression;
use crate::core::grid::{WEB_MERCATOR, WGS84};
use crate::core::mosaic::DEFAULT_SEAM_MARGIN;
use crate::core::pool::{BAND_WORKERS, SCENE_WORKERS};
use crate::core::radiometry::FIXED_POINT_SCALE;
use crate::error::{Error, Result};
use crate::types::{Compression, ImageFormat, ResampleKernel};

/// Parameters of a single-scene product (full resolution, overview, point
/// and area queries). Suitable for config files; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductParams {
    /// Explicit band labels for an RGB product, in output order.
    pub bands: Option<Vec<String>>,
    /// Band-math expression, one output band per comma segment.
    pub expression: Option<String>,
    /// Fixed stretch range of expression products.
    pub expression_range: (f64, f64),
    /// Percentiles of valid pixels used to stretch band products.
    pub percentiles: (f64, f64),
    pub format: ImageFormat,
    /// Side in pixels of overview reads.
    pub overview_size: usize,
    /// Cap on either side of area products.
    pub max_size: usize,
    pub bbox_crs: String,
    pub out_crs: String,
    pub band_workers: usize,
    pub fixed_point_scale: f64,
    pub compression: Compression,
    pub kernel: ResampleKernel,
}

impl Default for ProductParams {
    fn default() -> Self {
        Self {
            bands: None,
            expression: None,
            expression_range: (-1.0, 1.0),
            percentiles: (2.0, 98.0),
            format: ImageFormat::Jpeg,
            overview_size: 512,
            max_size: 512,
            bbox_crs: WGS84.to_string(),
            out_crs: WEB_MERCATOR.to_string(),
            band_workers: BAND_WORKERS,
            fixed_point_scale: FIXED_POINT_SCALE,
            compression: Compression::Deflate,
            kernel: ResampleKernel::Bilinear,
        }
    }
}

/// What to compute: a band stack or an expression over bands.
#[derive(Debug, Clone, PartialEq)]
pub enum BandRequest {
    Bands(Vec<String>),
    Expression(BandExpression),
}

impl BandRequest {
    /// Band labels to fetch, deduplicated, in fetch order.
    pub fn labels(&self) -> Vec<String> {
        match self {
            BandRequest::Bands(b) => b.clone(),
            BandRequest::Expression(e) => e.band_labels().to_vec(),
        }
    }

    pub fn output_count(&self) -> usize {
        match self {
            BandRequest::Bands(b) => b.len(),
            BandRequest::Expression(e) => e.output_count(),
        }
    }
}

impl ProductParams {
    pub fn with_bands<S: Into<String>>(mut self, bands: impl IntoIterator<Item = S>) -> Self {
        self.bands = Some(bands.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Check the request before any I/O. An expression wins over a band list,
    /// but a band list, when present, must still name exactly three bands.
    pub fn band_request(&self) -> Result<BandRequest> {
        let bands = self.bands.as_ref().filter(|b| !b.is_empty());
        let expression = self
            .expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());
        if bands.is_none() && expression.is_none() {
            return Err(Error::MissingBandsOrExpression);
        }
        if let Some(b) = bands {
            if b.len() != 3 {
                return Err(Error::RgbBandCount { got: b.len() });
            }
        }
        if self.overview_size == 0 {
            return Err(Error::InvalidArgument {
                arg: "overview_size",
                value: "0".into(),
            });
        }
        match (expression, bands) {
            (Some(e), _) => Ok(BandRequest::Expression(BandExpression::parse(e)?)),
            (None, Some(b)) => Ok(BandRequest::Bands(b.clone())),
            (None, None) => Err(Error::MissingBandsOrExpression),
        }
    }

    /// Check that an expression is present (point and area queries).
    pub fn expression_request(&self) -> Result<BandExpression> {
        match self.expression.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(e) => Ok(BandExpression::parse(e)?),
            None => Err(Error::MissingBandsOrExpression),
        }
    }
}

/// Parameters of a multi-scene mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicParams {
    pub bands: Vec<String>,
    /// Pixels trimmed at both ends of every valid run before merging.
    pub seam_margin: usize,
    pub scene_workers: usize,
    pub out_crs: String,
    pub kernel: ResampleKernel,
    pub compression: Compression,
    /// Display range valid pixels are stretched onto; 0 is kept for nodata.
    pub output_range: (f64, f64),
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            bands: vec!["4".into(), "3".into(), "2".into()],
            seam_margin: DEFAULT_SEAM_MARGIN,
            scene_workers: SCENE_WORKERS,
            out_crs: WEB_MERCATOR.to_string(),
            kernel: ResampleKernel::Bilinear,
            compression: Compression::Jpeg,
            output_range: (1.0, 255.0),
        }
    }
}

impl MosaicParams {
    pub fn validate(&self) -> Result<()> {
        if self.bands.len() != 3 {
            return Err(Error::RgbBandCount {
                got: self.bands.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neither_bands_nor_expression() {
        let err = ProductParams::default().band_request().unwrap_err();
        assert!(matches!(err, Error::MissingBandsOrExpression));
        assert!(err.is_configuration());
        let params = ProductParams::default().with_expression("  ");
        assert!(matches!(params.band_request(), Err(Error::MissingBandsOrExpression)));
    }

    #[test]
    fn rgb_needs_three_bands() {
        let params = ProductParams::default().with_bands(["4", "3"]);
        assert!(matches!(params.band_request(), Err(Error::RgbBandCount { got: 2 })));
        let params = ProductParams::default().with_bands(["4", "3", "2"]);
        assert_eq!(
            params.band_request().unwrap(),
            BandRequest::Bands(vec!["4".into(), "3".into(), "2".into()])
        );
    }

    #[test]
    fn expression_takes_precedence() {
        let params = ProductParams::default()
            .with_bands(["4", "3", "2"])
            .with_expression("(b5-b4)/(b5+b4)");
        let req = params.band_request().unwrap();
        assert_eq!(req.labels(), vec!["5".to_string(), "4".to_string()]);
        assert_eq!(req.output_count(), 1);
    }

    #[test]
    fn bad_expression_is_configuration_error() {
        let params = ProductParams::default().with_expression("b5 +");
        let err = params.band_request().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn defaults_roundtrip_through_json() {
        let params = ProductParams::default();
        let json = serde_json::to_string(&params).unwrap();
        let back: ProductParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
        let partial: MosaicParams = serde_json::from_str(r#"{"seam_margin": 3}"#).unwrap();
        assert_eq!(partial.seam_margin, 3);
        assert_eq!(partial.scene_workers, SCENE_WORKERS);
    }
}
