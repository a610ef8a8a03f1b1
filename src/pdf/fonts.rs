use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, info, warn};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tokio::sync::OnceCell;

use crate::config::FontConfig;
use crate::error::{Result, TocError};

/// Width measurement used by line wrapping and dot leaders.
pub trait FontMetrics {
    fn width_of_text_at_size(&self, text: &str, size: f32) -> f32;
}

/// One of the built-in Helvetica faces, WinAnsi encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardFont {
    bold: bool,
}

#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

impl StandardFont {
    pub const fn helvetica() -> Self {
        StandardFont { bold: false }
    }

    pub const fn helvetica_bold() -> Self {
        StandardFont { bold: true }
    }

    pub fn base_font(&self) -> &'static str {
        if self.bold {
            "Helvetica-Bold"
        } else {
            "Helvetica"
        }
    }

    /// WinAnsi bytes; characters outside the encoding become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        text.chars().map(win_ansi_byte).collect()
    }

    pub fn covers(&self, c: char) -> bool {
        c == '?' || win_ansi_byte(c) != b'?'
    }

    fn byte_width(&self, byte: u8) -> u16 {
        let table = if self.bold {
            &HELVETICA_BOLD_WIDTHS
        } else {
            &HELVETICA_WIDTHS
        };
        match byte {
            0x20..=0x7E => table[(byte - 0x20) as usize],
            0x85 | 0x97 => 1000,
            0x91 | 0x92 => 222,
            0x93 | 0x94 => 333,
            0x95 => 350,
            _ => 556,
        }
    }
}

impl FontMetrics for StandardFont {
    fn width_of_text_at_size(&self, text: &str, size: f32) -> f32 {
        let units: u32 = self
            .encode(text)
            .into_iter()
            .map(|b| u32::from(self.byte_width(b)))
            .sum();
        units as f32 * size / 1000.0
    }
}

fn win_ansi_byte(c: char) -> u8 {
    match c {
        ' '..='~' => c as u8,
        '\u{00A0}'..='\u{00FF}' => c as u32 as u8,
        '€' => 0x80,
        '…' => 0x85,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        _ => b'?',
    }
}

/// A TrueType face embedded as a Type0 font with Identity-H encoding.
#[derive(Debug, Clone)]
pub struct TrueTypeFont {
    family: String,
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    post_script_name: String,
    ascent: i16,
    descent: i16,
    bbox: [i16; 4],
}

impl TrueTypeFont {
    pub fn from_bytes(family: &str, data: Arc<Vec<u8>>) -> Result<Self> {
        let face = ttf_parser::Face::parse(&data, 0).map_err(|e| {
            TocError::ResourceUnavailable(format!("Font {:?} is not a TrueType face: {}", family, e))
        })?;

        let post_script_name = face
            .names()
            .into_iter()
            .find(|name| name.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
            .and_then(|name| name.to_string())
            .map(|name| {
                name.chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                    .collect::<String>()
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| family.to_string());
        let bbox = face.global_bounding_box();

        Ok(TrueTypeFont {
            family: family.to_string(),
            units_per_em: face.units_per_em().max(1),
            post_script_name,
            ascent: face.ascender(),
            descent: face.descender(),
            bbox: [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max],
            data,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, 0).ok()
    }

    /// Glyph id and advance (font units) for every character, `.notdef` for unmapped ones.
    fn glyphs(&self, text: &str) -> Vec<(u16, u16)> {
        let Some(face) = self.face() else {
            return Vec::new();
        };
        text.chars()
            .map(|c| {
                let gid = face.glyph_index(c).unwrap_or(ttf_parser::GlyphId(0));
                (gid.0, face.glyph_hor_advance(gid).unwrap_or(0))
            })
            .collect()
    }

    pub fn covers(&self, c: char) -> bool {
        self.face().is_some_and(|face| face.glyph_index(c).is_some())
    }

    /// Big-endian glyph ids.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        self.glyphs(text)
            .into_iter()
            .flat_map(|(gid, _)| gid.to_be_bytes())
            .collect()
    }

    fn scaled(&self, units: i32) -> i64 {
        i64::from(units) * 1000 / i64::from(self.units_per_em)
    }

    fn embed(&self, doc: &mut Document, used_text: &str) -> Result<ObjectId> {
        let mut used: BTreeMap<u16, (u16, char)> = BTreeMap::new();
        for (c, (gid, advance)) in used_text.chars().zip(self.glyphs(used_text)) {
            used.entry(gid).or_insert((advance, c));
        }

        let mut font_file = Stream::new(
            dictionary! { "Length1" => self.data.len() as i64 },
            self.data.as_ref().clone(),
        );
        font_file.compress()?;
        let font_file_id = doc.add_object(font_file);

        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(self.post_script_name.clone().into_bytes()),
            "Flags" => 32,
            "FontBBox" => self.bbox.iter().map(|v| Object::Integer(self.scaled(i32::from(*v)))).collect::<Vec<_>>(),
            "ItalicAngle" => 0,
            "Ascent" => self.scaled(i32::from(self.ascent)),
            "Descent" => self.scaled(i32::from(self.descent)),
            "CapHeight" => self.scaled(i32::from(self.ascent)),
            "StemV" => 80,
            "FontFile2" => font_file_id,
        });

        let widths: Vec<Object> = used
            .iter()
            .flat_map(|(gid, (advance, _))| {
                [
                    Object::Integer(i64::from(*gid)),
                    Object::Array(vec![Object::Integer(self.scaled(i32::from(*advance)))]),
                ]
            })
            .collect();

        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => Object::Name(self.post_script_name.clone().into_bytes()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });

        let to_unicode_id = doc.add_object(Stream::new(
            dictionary! {},
            to_unicode_cmap(used.iter().map(|(gid, (_, c))| (*gid, *c))).into_bytes(),
        ));

        Ok(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(self.post_script_name.clone().into_bytes()),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        }))
    }
}

impl FontMetrics for TrueTypeFont {
    fn width_of_text_at_size(&self, text: &str, size: f32) -> f32 {
        let units: u32 = self
            .glyphs(text)
            .into_iter()
            .map(|(_, advance)| u32::from(advance))
            .sum();
        units as f32 * size / f32::from(self.units_per_em)
    }
}

fn to_unicode_cmap(glyphs: impl Iterator<Item = (u16, char)>) -> String {
    let entries: Vec<(u16, char)> = glyphs.collect();
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    // bfchar blocks are limited to 100 entries
    for chunk in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, c) in chunk {
            let mut units = [0u16; 2];
            let hex: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{:04X}", u))
                .collect();
            cmap.push_str(&format!("<{:04X}> <{}>\n", gid, hex));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

/// Font choice for one role, selected by configuration.
#[derive(Debug, Clone)]
pub enum TocFont {
    Standard(StandardFont),
    TrueType(TrueTypeFont),
}

impl TocFont {
    /// Family or base font name, for log messages.
    pub fn name(&self) -> &str {
        match self {
            TocFont::Standard(font) => font.base_font(),
            TocFont::TrueType(font) => font.family(),
        }
    }

    /// String operand for `Tj`.
    pub fn text_object(&self, text: &str) -> Object {
        match self {
            TocFont::Standard(font) => Object::String(font.encode(text), StringFormat::Literal),
            TocFont::TrueType(font) => {
                Object::String(font.encode(text), StringFormat::Hexadecimal)
            }
        }
    }

    pub fn covers(&self, c: char) -> bool {
        match self {
            TocFont::Standard(font) => font.covers(c),
            TocFont::TrueType(font) => font.covers(c),
        }
    }

    /// Add the font dictionary to `doc`; `used_text` is every string drawn with it.
    pub fn embed(&self, doc: &mut Document, used_text: &str) -> Result<ObjectId> {
        match self {
            TocFont::Standard(font) => Ok(doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            })),
            TocFont::TrueType(font) => font.embed(doc, used_text),
        }
    }
}

impl FontMetrics for TocFont {
    fn width_of_text_at_size(&self, text: &str, size: f32) -> f32 {
        match self {
            TocFont::Standard(font) => font.width_of_text_at_size(text, size),
            TocFont::TrueType(font) => font.width_of_text_at_size(text, size),
        }
    }
}

/// Regular and bold faces used for one generation run.
#[derive(Debug, Clone)]
pub struct TocFonts {
    pub regular: TocFont,
    pub bold: TocFont,
}

impl TocFonts {
    pub fn standard() -> Self {
        TocFonts {
            regular: TocFont::Standard(StandardFont::helvetica()),
            bold: TocFont::Standard(StandardFont::helvetica_bold()),
        }
    }

    /// Resolve the configured fonts through the process-wide registry.
    pub async fn load(config: &FontConfig) -> Result<Self> {
        Self::load_with(FontRegistry::global(), config).await
    }

    /// Like [`TocFonts::load`] with an explicit registry. Unless the font is marked
    /// required, load failures fall back to Helvetica.
    pub async fn load_with(registry: &FontRegistry, config: &FontConfig) -> Result<Self> {
        let Some(regular_path) = config.regular.as_ref() else {
            if !config.family.eq_ignore_ascii_case("helvetica") {
                warn!(
                    "No font file configured for family {:?}, falling back to Helvetica",
                    config.family
                );
            }
            return Ok(Self::standard());
        };
        let bold_path = config.bold.as_ref().unwrap_or(regular_path);

        let loaded = registry
            .load(&config.family, regular_path, bold_path)
            .await
            .and_then(|bytes| {
                Ok(TocFonts {
                    regular: TocFont::TrueType(TrueTypeFont::from_bytes(
                        &config.family,
                        bytes.regular.clone(),
                    )?),
                    bold: TocFont::TrueType(TrueTypeFont::from_bytes(
                        &config.family,
                        bytes.bold.clone(),
                    )?),
                })
            });

        match loaded {
            Ok(fonts) => Ok(fonts),
            Err(e) if !config.required => {
                warn!("{}; falling back to Helvetica", e);
                Ok(Self::standard())
            }
            Err(e) => Err(e),
        }
    }
}

/// Raw font files of one family.
#[derive(Debug)]
pub struct FontBytes {
    pub regular: Arc<Vec<u8>>,
    pub bold: Arc<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FontKey {
    family: String,
    regular: PathBuf,
    bold: PathBuf,
}

/// Font files cached by family and file paths.
///
/// Concurrent requests for one font share a single load. Failed loads are not
/// cached, so the next request tries again.
#[derive(Debug, Default)]
pub struct FontRegistry {
    families: Mutex<HashMap<FontKey, Arc<OnceCell<Arc<FontBytes>>>>>,
}

impl FontRegistry {
    pub fn global() -> &'static FontRegistry {
        static REGISTRY: OnceLock<FontRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FontRegistry::default)
    }

    pub async fn load(
        &self,
        family: &str,
        regular: &Path,
        bold: &Path,
    ) -> Result<Arc<FontBytes>> {
        let key = FontKey {
            family: family.to_string(),
            regular: regular.to_path_buf(),
            bold: bold.to_path_buf(),
        };
        let cell = {
            let mut families = self.families.lock().unwrap_or_else(PoisonError::into_inner);
            families.entry(key).or_default().clone()
        };
        if cell.initialized() {
            debug!("Font family {:?} served from cache", family);
        }

        cell.get_or_try_init(|| async {
            info!("Loading font family {:?}", family);
            let regular_bytes = Arc::new(read_font(regular).await?);
            let bold_bytes = if bold == regular {
                regular_bytes.clone()
            } else {
                Arc::new(read_font(bold).await?)
            };
            Ok(Arc::new(FontBytes {
                regular: regular_bytes,
                bold: bold_bytes,
            }))
        })
        .await
        .cloned()
    }
}

async fn read_font(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        TocError::ResourceUnavailable(format!("Failed to read font {}: {}", path.display(), e))
    })
}

/// A TrueType file shipped with most Linux systems, for tests.
#[cfg(test)]
pub(crate) fn system_test_font() -> Option<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
