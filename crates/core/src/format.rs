use std::{fmt, num::NonZeroU32, str::FromStr};

/// Four-character code describing a pixel format.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"RGB3");
/// assert_eq!(fcc.to_string(), "RGB3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// 8:8:8 packed RGB.
    pub const RGB24: FourCc = FourCc::new(*b"RGB3");
    /// 5:6:5 packed RGB, little endian.
    pub const RGB565: FourCc = FourCc::new(*b"RGBP");
    /// Packed YUV 4:2:2, Y0 U Y1 V ordering.
    pub const YUYV: FourCc = FourCc::new(*b"YUYV");

    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding (the numeric pixel-format id).
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Try to convert to a printable string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.as_str() {
            write!(f, "{s}")
        } else {
            write!(f, "0x{:08x}", self.to_u32())
        }
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err("fourcc must be four ASCII bytes".into());
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(FourCc(arr))
    }
}

/// Frame interval expressed as a rational number of seconds per frame.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::Interval;
///
/// let interval = Interval::from_fps(30);
/// assert_eq!(interval.period().as_micros(), 33_333);
/// assert!((interval.fps() - 30.0).abs() < f32::EPSILON);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    /// Numerator of the seconds-per-frame rational.
    pub numerator: NonZeroU32,
    /// Denominator of the seconds-per-frame rational.
    pub denominator: NonZeroU32,
}

impl Interval {
    /// Interval for a whole number of frames per second (clamped to at least 1).
    pub fn from_fps(fps: u32) -> Self {
        Self {
            numerator: NonZeroU32::MIN,
            denominator: NonZeroU32::new(fps).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Frames per second as floating point.
    pub fn fps(&self) -> f32 {
        self.denominator.get() as f32 / self.numerator.get() as f32
    }

    /// Wall-clock period between two frames.
    pub fn period(&self) -> std::time::Duration {
        let nanos =
            self.numerator.get() as u64 * 1_000_000_000 / self.denominator.get() as u64;
        std::time::Duration::from_nanos(nanos)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::from_fps(30)
    }
}

/// Colorspace hint attached to the current format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorSpace {
    /// Standard sRGB.
    Srgb,
    /// SMPTE 170M (BT.601), used for the YUV encodings.
    Smpte170m,
}

/// Field order of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Field {
    /// Let the device choose; resolves to `Interlaced`.
    Any,
    /// Progressive frames.
    None,
    /// Both fields interleaved line by line.
    Interlaced,
}

/// Discrete frame size advertised by a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Immutable description of one supported pixel encoding.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{FORMAT_CATALOG, FourCc, FormatDescriptor};
///
/// let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
/// assert_eq!(rgb.bytes_per_pixel, 3);
/// assert_eq!(FORMAT_CATALOG[0], *rgb);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Human-readable description.
    pub name: &'static str,
    /// Pixel-format id.
    pub code: FourCc,
    pub bytes_per_pixel: u32,
    /// Fixed frame size enumerated for this encoding.
    pub frame_size: FrameSize,
    pub color: ColorSpace,
}

impl FormatDescriptor {
    /// Find the catalog entry for a pixel-format id.
    pub fn lookup(code: FourCc) -> Option<&'static FormatDescriptor> {
        FORMAT_CATALOG.iter().find(|d| d.code == code)
    }
}

/// Default frame size used by every catalog entry and at device open.
pub const DEFAULT_FRAME_SIZE: FrameSize = FrameSize {
    width: 640,
    height: 360,
};

/// Supported encodings; catalog order is enumeration order.
pub static FORMAT_CATALOG: [FormatDescriptor; 3] = [
    FormatDescriptor {
        name: "8:8:8, RGB",
        code: FourCc::RGB24,
        bytes_per_pixel: 3,
        frame_size: DEFAULT_FRAME_SIZE,
        color: ColorSpace::Srgb,
    },
    FormatDescriptor {
        name: "5:6:5, RGB",
        code: FourCc::RGB565,
        bytes_per_pixel: 2,
        frame_size: DEFAULT_FRAME_SIZE,
        color: ColorSpace::Srgb,
    },
    FormatDescriptor {
        name: "16  YUV 4:2:2",
        code: FourCc::YUYV,
        bytes_per_pixel: 2,
        frame_size: DEFAULT_FRAME_SIZE,
        color: ColorSpace::Smpte170m,
    },
];

/// Device-defined bounds applied when validating a format request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FormatLimits {
    pub min_width: u32,
    pub max_width: u32,
    /// Width is rounded to a multiple of this value.
    pub width_align: u32,
    pub min_height: u32,
    pub max_height: u32,
}

impl Default for FormatLimits {
    fn default() -> Self {
        Self {
            min_width: 48,
            max_width: 1920,
            width_align: 2,
            min_height: 32,
            max_height: 1080,
        }
    }
}

impl FormatLimits {
    /// Clamp and align a width/height pair into the supported range.
    ///
    /// # Example
    /// ```rust
    /// use vcam_core::prelude::FormatLimits;
    ///
    /// let limits = FormatLimits::default();
    /// assert_eq!(limits.bound(641, 5000), (642, 1080));
    /// assert_eq!(limits.bound(0, 0), (48, 32));
    /// ```
    pub fn bound(&self, width: u32, height: u32) -> (u32, u32) {
        let align = self.width_align.max(1);
        // Align the bounds themselves so rounding can never escape them.
        let min_w = self.min_width.div_ceil(align) * align;
        let max_w = (self.max_width / align * align).max(min_w);
        let w = width.clamp(min_w, max_w);
        let w = ((w + align / 2) / align * align).clamp(min_w, max_w);
        let h = height.clamp(self.min_height, self.max_height.max(self.min_height));
        (w, h)
    }

    /// Repair zero or inverted bounds and cap the maximum size so one frame
    /// of the deepest catalog format still fits in a `u32` image size.
    ///
    /// # Example
    /// ```rust
    /// use vcam_core::prelude::FormatLimits;
    ///
    /// let limits = FormatLimits {
    ///     max_width: 40_000,
    ///     max_height: 40_000,
    ///     ..FormatLimits::default()
    /// }
    /// .sanitized();
    /// assert_eq!(limits.max_width, 40_000);
    /// assert!(limits.max_height < 40_000);
    /// ```
    pub fn sanitized(self) -> Self {
        let frame_pixels = u32::MAX / max_bytes_per_pixel();
        let min_height = self.min_height.clamp(1, frame_pixels);
        let width_cap = frame_pixels / min_height;
        let min_width = self.min_width.max(1).min(width_cap);
        let max_width = self.max_width.max(min_width).min(width_cap);
        Self {
            min_width,
            max_width,
            width_align: self.width_align.max(1).min(width_cap),
            min_height,
            max_height: self.max_height.max(min_height).min(frame_pixels / max_width),
        }
    }
}

fn max_bytes_per_pixel() -> u32 {
    FORMAT_CATALOG
        .iter()
        .map(|d| d.bytes_per_pixel)
        .max()
        .unwrap_or(1)
        .max(1)
}

/// A candidate format proposed by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FormatRequest {
    pub code: FourCc,
    pub width: u32,
    pub height: u32,
    pub field: Field,
}

impl FormatRequest {
    /// Request a size for a pixel format, letting the device pick the field order.
    pub fn new(code: FourCc, width: u32, height: u32) -> Self {
        Self {
            code,
            width,
            height,
            field: Field::Any,
        }
    }
}

/// The negotiated image format.
///
/// Stride and image size are always derived from width, height and the
/// catalog entry; there is no way to set them independently.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{FormatDescriptor, FourCc, PixFormat};
///
/// let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
/// let fmt = PixFormat::from_descriptor(rgb, 640, 360);
/// assert_eq!(fmt.bytes_per_line(), 1920);
/// assert_eq!(fmt.size_image(), 691_200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PixFormat {
    width: u32,
    height: u32,
    code: FourCc,
    field: Field,
    color: ColorSpace,
    bytes_per_line: u32,
    size_image: u32,
}

impl PixFormat {
    /// Build a format for `descriptor` at the given (already bounded) size.
    ///
    /// Stride and image size saturate at `u32::MAX`; use [`PixFormat::checked`]
    /// for sizes that have not been bounded by sanitized limits.
    pub fn from_descriptor(descriptor: &FormatDescriptor, width: u32, height: u32) -> Self {
        let bytes_per_line = width.saturating_mul(descriptor.bytes_per_pixel);
        Self::with_layout(
            descriptor,
            width,
            height,
            bytes_per_line,
            bytes_per_line.saturating_mul(height),
        )
    }

    /// Like [`PixFormat::from_descriptor`], but `None` when the image size
    /// does not fit in a `u32`.
    ///
    /// # Example
    /// ```rust
    /// use vcam_core::prelude::{FormatDescriptor, FourCc, PixFormat};
    ///
    /// let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
    /// assert!(PixFormat::checked(rgb, 40_000, 40_000).is_none());
    /// assert!(PixFormat::checked(rgb, 1920, 1080).is_some());
    /// ```
    pub fn checked(descriptor: &FormatDescriptor, width: u32, height: u32) -> Option<Self> {
        let bytes_per_line = width.checked_mul(descriptor.bytes_per_pixel)?;
        let size_image = bytes_per_line.checked_mul(height)?;
        Some(Self::with_layout(
            descriptor,
            width,
            height,
            bytes_per_line,
            size_image,
        ))
    }

    fn with_layout(
        descriptor: &FormatDescriptor,
        width: u32,
        height: u32,
        bytes_per_line: u32,
        size_image: u32,
    ) -> Self {
        Self {
            width,
            height,
            code: descriptor.code,
            field: Field::Interlaced,
            color: descriptor.color,
            bytes_per_line,
            size_image,
        }
    }

    pub(crate) fn with_field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn code(&self) -> FourCc {
        self.code
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn color(&self) -> ColorSpace {
        self.color
    }

    /// Stride in bytes.
    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    /// Bytes needed for one frame.
    pub fn size_image(&self) -> u32 {
        self.size_image
    }
}

/// Resolve a requested field order against what the device produces.
pub fn resolve_field(field: Field) -> Option<Field> {
    match field {
        Field::Any | Field::Interlaced => Some(Field::Interlaced),
        Field::None => None,
    }
}

/// Validate a request against the catalog and limits, producing the format
/// the device would use. Returns `None` for unsupported codes or fields, and
/// when the bounded frame would not fit in a `u32` image size.
pub fn negotiate(request: &FormatRequest, limits: &FormatLimits) -> Option<PixFormat> {
    let descriptor = FormatDescriptor::lookup(request.code)?;
    let field = resolve_field(request.field)?;
    let (width, height) = limits.bound(request.width, request.height);
    PixFormat::checked(descriptor, width, height).map(|fmt| fmt.with_field(field))
}

#[cfg(feature = "serde")]
impl serde::Serialize for FourCc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Prefer string encoding so decoding does not rely on `deserialize_any`.
        let encoded = self.as_str().unwrap_or("FFFF");
        serializer.serialize_str(encoded)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for FourCc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FourCcVisitor;

        impl<'de> serde::de::Visitor<'de> for FourCcVisitor {
            type Value = FourCc;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 4-character FourCc string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                FourCc::from_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(FourCcVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_entry_derives_stride_and_size() {
        let limits = FormatLimits::default();
        for entry in FORMAT_CATALOG.iter() {
            let req = FormatRequest::new(entry.code, 320, 240);
            let fmt = negotiate(&req, &limits).expect("supported");
            assert_eq!(fmt.bytes_per_line(), fmt.width() * entry.bytes_per_pixel);
            assert_eq!(fmt.size_image(), fmt.bytes_per_line() * fmt.height());
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        let req = FormatRequest::new(FourCc::new(*b"MJPG"), 640, 360);
        assert!(negotiate(&req, &FormatLimits::default()).is_none());
    }

    #[test]
    fn progressive_field_is_rejected() {
        let mut req = FormatRequest::new(FourCc::RGB24, 640, 360);
        req.field = Field::None;
        assert!(negotiate(&req, &FormatLimits::default()).is_none());
        req.field = Field::Any;
        let fmt = negotiate(&req, &FormatLimits::default()).unwrap();
        assert_eq!(fmt.field(), Field::Interlaced);
    }

    #[test]
    fn width_rounds_to_even_within_bounds() {
        let limits = FormatLimits::default();
        assert_eq!(limits.bound(481, 320), (482, 320));
        assert_eq!(limits.bound(1921, 2000), (1920, 1080));
        assert_eq!(limits.bound(47, 31), (48, 32));
    }

    #[test]
    fn odd_limits_stay_inside_after_alignment() {
        let limits = FormatLimits {
            min_width: 49,
            max_width: 99,
            width_align: 4,
            min_height: 1,
            max_height: 10,
        };
        let (w, _) = limits.bound(1, 1);
        assert_eq!(w, 52);
        let (w, _) = limits.bound(1000, 1);
        assert_eq!(w, 96);
    }

    #[test]
    fn sanitized_limits_keep_every_frame_within_u32() {
        let limits = FormatLimits {
            max_width: 40_000,
            max_height: 40_000,
            ..FormatLimits::default()
        }
        .sanitized();
        for entry in FORMAT_CATALOG.iter() {
            let req = FormatRequest::new(entry.code, u32::MAX, u32::MAX);
            let fmt = negotiate(&req, &limits).expect("bounded frame fits");
            assert_eq!(fmt.width(), 40_000);
            assert_eq!(
                u64::from(fmt.size_image()),
                u64::from(fmt.width()) * u64::from(entry.bytes_per_pixel) * u64::from(fmt.height())
            );
        }
    }

    #[test]
    fn oversized_frame_is_rejected_without_sanitizing() {
        let limits = FormatLimits {
            max_width: 40_000,
            max_height: 40_000,
            ..FormatLimits::default()
        };
        let req = FormatRequest::new(FourCc::RGB24, 40_000, 40_000);
        assert!(negotiate(&req, &limits).is_none());
        let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
        assert_eq!(
            PixFormat::from_descriptor(rgb, 40_000, 40_000).size_image(),
            u32::MAX
        );
    }

    #[test]
    fn sanitized_repairs_degenerate_bounds() {
        let limits = FormatLimits {
            min_width: 0,
            max_width: 0,
            width_align: 0,
            min_height: 0,
            max_height: 0,
        }
        .sanitized();
        assert_eq!(limits.bound(100, 100), (1, 1));
        let limits = FormatLimits {
            max_width: u32::MAX,
            max_height: u32::MAX,
            ..FormatLimits::default()
        }
        .sanitized();
        let req = FormatRequest::new(FourCc::RGB24, u32::MAX, u32::MAX);
        let fmt = negotiate(&req, &limits).expect("bounded frame fits");
        assert!(fmt.height() >= limits.min_height);

        let tall = FormatLimits {
            min_height: u32::MAX,
            ..FormatLimits::default()
        }
        .sanitized();
        assert!(tall.max_width >= tall.min_width && tall.min_width >= 1);
    }

    #[test]
    fn fourcc_numeric_id_roundtrips_through_u32() {
        let id = FourCc::YUYV.to_u32();
        assert_eq!(FourCc::from(id), FourCc::YUYV);
        assert_eq!(id, 0x5659_5559);
    }
}
