//! In-process image checkers.
//!
//! [`PngChecker`] walks every PNG chunk and verifies its CRC.
//! [`ImageHeaderChecker`] reads dimensions and colour information from the
//! headers of PNG, JPEG, GIF and TIFF files without decoding pixels.

use filescope_meta::{MetadataStream, StreamType, UNAV};

use crate::binary::Endian;
use crate::checker::{Checker, CheckerId, CheckerResult, ScrapeContext};
use crate::config::ToolConfig;
use crate::error::CheckerFailure;
use crate::registry::{CapabilityEntry, priority};
use crate::signature;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Header facts shared by every image format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ImageInfo {
    width: u32,
    height: u32,
    bits_per_sample: Option<u16>,
    samples_per_pixel: Option<u16>,
    colorspace: Option<&'static str>,
}

impl ImageInfo {
    fn into_stream(self, mimetype: &str, version: &str) -> MetadataStream {
        let mut stream = MetadataStream::new(0)
            .with_mimetype(mimetype)
            .with_version(version)
            .with_stream_type(StreamType::Image)
            .with_field("width", self.width.to_string())
            .with_field("height", self.height.to_string());
        if let Some(bps) = self.bits_per_sample {
            stream = stream.with_field("bps_value", bps.to_string());
        }
        if let Some(samples) = self.samples_per_pixel {
            stream = stream.with_field("samples_per_pixel", samples.to_string());
        }
        stream.with_field("colorspace", self.colorspace.unwrap_or(UNAV))
    }
}

fn read_image(path: &std::path::Path, limit: u64) -> Result<Vec<u8>, CheckerFailure> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    Ok(signature::read_header(path, limit)?)
}

// ---- PNG ----

#[derive(Debug)]
struct Chunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
}

impl Chunk<'_> {
    fn name(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

/// Split a PNG file into chunks, verifying each CRC.
fn png_chunks(bytes: &[u8]) -> Result<Vec<Chunk<'_>>, String> {
    let Some(mut rest) = bytes.strip_prefix(PNG_SIGNATURE) else {
        return Err("PNG signature missing.".to_owned());
    };
    let mut chunks = Vec::new();
    while !rest.is_empty() {
        let length = Endian::Big
            .u32_at(rest, 0)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| "Truncated chunk header.".to_owned())?;
        let kind: [u8; 4] = rest
            .get(4..8)
            .and_then(|k| k.try_into().ok())
            .ok_or_else(|| "Truncated chunk header.".to_owned())?;
        let name = String::from_utf8_lossy(&kind).into_owned();
        let data_end = length
            .checked_add(8)
            .filter(|end| end.checked_add(4).is_some_and(|total| total <= rest.len()))
            .ok_or_else(|| format!("Chunk '{name}' is truncated."))?;
        let stored = Endian::Big
            .u32_at(rest, data_end)
            .ok_or_else(|| format!("Chunk '{name}' is truncated."))?;
        let computed = crc32fast::hash(&rest[4..data_end]);
        if computed != stored {
            return Err(format!(
                "CRC error in chunk '{name}' (computed {computed:08x}, expected {stored:08x})."
            ));
        }
        chunks.push(Chunk {
            kind,
            data: &rest[8..data_end],
        });
        rest = &rest[data_end + 4..];
    }
    Ok(chunks)
}

fn png_colorspace(color_type: u8) -> (Option<&'static str>, Option<u16>) {
    match color_type {
        0 => (Some("grayscale"), Some(1)),
        2 => (Some("rgb"), Some(3)),
        3 => (Some("palette"), Some(1)),
        4 => (Some("grayscale"), Some(2)),
        6 => (Some("rgb"), Some(4)),
        _ => (None, None),
    }
}

fn png_info(ihdr: &[u8]) -> Option<ImageInfo> {
    let color_type = *ihdr.get(9)?;
    let (colorspace, samples_per_pixel) = png_colorspace(color_type);
    Some(ImageInfo {
        width: Endian::Big.u32_at(ihdr, 0)?,
        height: Endian::Big.u32_at(ihdr, 4)?,
        bits_per_sample: ihdr.get(8).map(|&b| u16::from(b)),
        samples_per_pixel,
        colorspace,
    })
}

/// PNG well-formedness: chunk layout and CRCs.
pub struct PngChecker {
    read_limit: u64,
}

impl PngChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[CapabilityEntry::new("image/png")
        .validation_only()
        .priority(priority::STRUCTURE)];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

impl Checker for PngChecker {
    fn id(&self) -> CheckerId {
        "PngChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        if !ctx.check_wellformed {
            return CheckerResult::skipped(self.id());
        }
        let bytes = match read_image(ctx.path, self.read_limit) {
            Ok(bytes) => bytes,
            Err(failure) => {
                result.fail(&failure);
                return result.finish(true);
            }
        };

        let chunks = match png_chunks(&bytes) {
            Ok(chunks) => chunks,
            Err(reason) => {
                result.error(format!("PNG not well-formed: {reason}"));
                return result.finish(true);
            }
        };
        match chunks.first() {
            Some(first) if &first.kind == b"IHDR" => {}
            Some(first) => result.error(format!(
                "PNG not well-formed: first chunk is '{}', expected 'IHDR'.",
                first.name()
            )),
            None => result.error("PNG not well-formed: no chunks found."),
        }
        if !chunks.iter().any(|c| &c.kind == b"IDAT") {
            result.error("PNG not well-formed: no image data.");
        }
        if chunks.last().is_none_or(|c| &c.kind != b"IEND") {
            result.error("PNG not well-formed: IEND chunk missing or not last.");
        }

        if result.errors.is_empty() {
            result.message(format!("PNG file with {} chunks is well-formed.", chunks.len()));
        }
        let info = chunks
            .first()
            .filter(|c| &c.kind == b"IHDR")
            .and_then(|c| png_info(c.data))
            .unwrap_or_default();
        result.push_stream(info.into_stream("image/png", "1.2"));
        result.finish(true)
    }
}

// ---- JPEG ----

fn jpeg_info(bytes: &[u8]) -> Option<ImageInfo> {
    let mut pos = 2;
    loop {
        if *bytes.get(pos)? != 0xff {
            return None;
        }
        let marker = *bytes.get(pos + 1)?;
        match marker {
            0xff => {
                pos += 1;
                continue;
            }
            0x01 | 0xd0..=0xd8 => {
                pos += 2;
                continue;
            }
            0xd9 | 0xda => return None,
            _ => {}
        }
        let length = usize::from(Endian::Big.u16_at(bytes, pos + 2)?);
        if matches!(marker, 0xc0..=0xcf) && !matches!(marker, 0xc4 | 0xc8 | 0xcc) {
            let segment = bytes.get(pos + 4..pos + 2 + length)?;
            let components = *segment.get(5)?;
            return Some(ImageInfo {
                height: u32::from(Endian::Big.u16_at(segment, 1)?),
                width: u32::from(Endian::Big.u16_at(segment, 3)?),
                bits_per_sample: Some(u16::from(*segment.first()?)),
                samples_per_pixel: Some(u16::from(components)),
                colorspace: match components {
                    1 => Some("grayscale"),
                    3 => Some("ycbcr"),
                    4 => Some("cmyk"),
                    _ => None,
                },
            });
        }
        pos += 2 + length;
    }
}

// ---- GIF ----

fn gif_info(bytes: &[u8]) -> Option<ImageInfo> {
    let packed = *bytes.get(10)?;
    Some(ImageInfo {
        width: u32::from(Endian::Little.u16_at(bytes, 6)?),
        height: u32::from(Endian::Little.u16_at(bytes, 8)?),
        bits_per_sample: Some(u16::from((packed >> 4) & 0x07) + 1),
        samples_per_pixel: Some(1),
        colorspace: Some("palette"),
    })
}

// ---- TIFF ----

const TIFF_WIDTH: u16 = 256;
const TIFF_HEIGHT: u16 = 257;
const TIFF_BITS_PER_SAMPLE: u16 = 258;
const TIFF_PHOTOMETRIC: u16 = 262;
const TIFF_SAMPLES_PER_PIXEL: u16 = 277;
const TIFF_SHORT: u16 = 3;
const TIFF_LONG: u16 = 4;

/// First value of a SHORT or LONG IFD entry.
fn tiff_value(bytes: &[u8], order: Endian, entry: usize) -> Option<u32> {
    let kind = order.u16_at(bytes, entry + 2)?;
    let count = order.u32_at(bytes, entry + 4)?;
    let inline = match kind {
        TIFF_SHORT => count <= 2,
        TIFF_LONG => count <= 1,
        _ => return None,
    };
    let at = if inline {
        entry + 8
    } else {
        usize::try_from(order.u32_at(bytes, entry + 8)?).ok()?
    };
    match kind {
        TIFF_SHORT => order.u16_at(bytes, at).map(u32::from),
        _ => order.u32_at(bytes, at),
    }
}

fn tiff_info(bytes: &[u8]) -> Option<ImageInfo> {
    let order = match bytes.get(0..2)? {
        b"II" => Endian::Little,
        b"MM" => Endian::Big,
        _ => return None,
    };
    let ifd = usize::try_from(order.u32_at(bytes, 4)?).ok()?;
    let entries = usize::from(order.u16_at(bytes, ifd)?);
    let mut info = ImageInfo::default();
    let mut found_width = false;
    for n in 0..entries {
        let entry = ifd + 2 + n * 12;
        let tag = order.u16_at(bytes, entry)?;
        let Some(value) = tiff_value(bytes, order, entry) else {
            continue;
        };
        match tag {
            TIFF_WIDTH => {
                info.width = value;
                found_width = true;
            }
            TIFF_HEIGHT => info.height = value,
            TIFF_BITS_PER_SAMPLE => info.bits_per_sample = u16::try_from(value).ok(),
            TIFF_SAMPLES_PER_PIXEL => info.samples_per_pixel = u16::try_from(value).ok(),
            TIFF_PHOTOMETRIC => {
                info.colorspace = match value {
                    0 | 1 => Some("grayscale"),
                    2 => Some("rgb"),
                    3 => Some("palette"),
                    5 => Some("cmyk"),
                    6 => Some("ycbcr"),
                    _ => None,
                };
            }
            _ => {}
        }
    }
    found_width.then_some(info)
}

/// Image dimensions and colour metadata from file headers.
pub struct ImageHeaderChecker {
    read_limit: u64,
}

impl ImageHeaderChecker {
    const CAPABILITIES: &'static [CapabilityEntry] = &[
        CapabilityEntry::new("image/png"),
        CapabilityEntry::new("image/jpeg"),
        CapabilityEntry::new("image/gif"),
        CapabilityEntry::new("image/tiff"),
    ];

    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            read_limit: config.text_read_limit,
        }
    }
}

impl Checker for ImageHeaderChecker {
    fn id(&self) -> CheckerId {
        "ImageHeaderChecker"
    }

    fn capabilities(&self) -> &'static [CapabilityEntry] {
        Self::CAPABILITIES
    }

    fn scrape(&self, ctx: &ScrapeContext<'_>) -> CheckerResult {
        let mut result = CheckerResult::new(self.id());
        let bytes = match read_image(ctx.path, self.read_limit) {
            Ok(bytes) => bytes,
            Err(failure) => {
                result.fail(&failure);
                return result.finish(ctx.check_wellformed);
            }
        };
        let Some(found) = signature::identify(&bytes) else {
            result.error("Image header not recognized.");
            return result.finish(ctx.check_wellformed);
        };
        let info = match found.mimetype {
            "image/png" => bytes.get(16..).and_then(png_info),
            "image/jpeg" => jpeg_info(&bytes),
            "image/gif" => gif_info(&bytes),
            "image/tiff" => tiff_info(&bytes),
            other => {
                result.error(format!("Image header belongs to '{other}', not an image format."));
                return result.finish(ctx.check_wellformed);
            }
        };
        let Some(info) = info else {
            result.error(format!("Could not read the {} image header.", found.mimetype));
            return result.finish(ctx.check_wellformed);
        };

        result.message("Image header was read successfully.");
        let version = found.version.as_deref().unwrap_or(UNAV);
        result.push_stream(info.into_stream(found.mimetype, version));
        result.finish(ctx.check_wellformed)
    }
}
