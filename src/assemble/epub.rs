//! EPUB 3 writer (with toc.ncx for older readers). Consumes the reconciled chapters and
//! writes mimetype, container, OPF, nav, NCX, intro page, chapters, cover, fonts and stylesheets.

use crate::assemble::{
    midpoint_index, read_chapter, reconcile, xml_escape, AssembleError, AssembleOptions, Artifact,
    Assembler, AssemblyInput, ChapterSource,
};
use crate::event::{emit, Event, Reporter, Warning};
use crate::model::BookInfo;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const LANGUAGE: &str = "zh-CN";
const INTRO_LABEL: &str = "简介";

/// Cover image bytes with the extension used inside the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub ext: &'static str,
}

impl CoverImage {
    /// Detect PNG by signature; everything else is stored as JPEG.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let ext = if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            "png"
        } else {
            "jpg"
        };
        Self { data, ext }
    }

    fn file_name(&self) -> String {
        format!("image.{}", self.ext)
    }

    fn media_type(&self) -> &'static str {
        match self.ext {
            "png" => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// Optional font and stylesheet files embedded in the package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub fonts: Vec<PathBuf>,
    pub stylesheets: Vec<PathBuf>,
}

impl Resources {
    /// Classify named resources: names starting with `font` are fonts, `css` stylesheets.
    /// Anything else is reported and skipped.
    pub fn from_named<I>(named: I, reporter: Reporter<'_>) -> Self
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        let mut resources = Self::default();
        for (name, path) in named {
            if name.starts_with("font") {
                resources.fonts.push(path);
            } else if name.starts_with("css") {
                resources.stylesheets.push(path);
            } else {
                emit(
                    reporter,
                    Event::Warning(Warning::UnknownResource { name }),
                );
            }
        }
        resources
    }
}

/// Media type for a font file, with a warning for formats readers may not handle.
pub fn font_media_type(path: &Path) -> (&'static str, Option<Warning>) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("ttf") | Some("otf") => ("application/vnd.ms-opentype", None),
        Some("woff2") => (
            "font/woff2",
            Some(Warning::Woff2Font {
                path: path.to_path_buf(),
            }),
        ),
        _ => (
            "application/octet-stream",
            Some(Warning::UnknownFontType {
                path: path.to_path_buf(),
            }),
        ),
    }
}

/// A resource loaded into memory, with its package path and manifest id.
struct Embedded {
    id: String,
    href: String,
    media_type: &'static str,
    data: Vec<u8>,
}

/// E-book strategy. Cover bytes are fetched by the caller.
#[derive(Debug, Clone, Default)]
pub struct EpubBook {
    pub cover: Option<CoverImage>,
    pub resources: Resources,
}

impl Assembler for EpubBook {
    fn produce(
        &self,
        input: &AssemblyInput<'_>,
        options: &AssembleOptions<'_>,
    ) -> Result<Artifact, AssembleError> {
        if let Some(id) = &options.start {
            emit(
                options.reporter,
                Event::Warning(Warning::StartIgnored {
                    id: id.clone(),
                    output: "EPUB",
                }),
            );
        }
        let chapters = reconcile(input.catalog, input.files)?;
        let midpoint = midpoint_index(chapters.len(), 0);
        let (fonts, styles) = self.load_resources(options.reporter)?;

        let path = options.output_dir.join(format!("{}.epub", input.info.title));
        let file = std::fs::File::create(&path).map_err(|e| AssembleError::Io {
            path: path.clone(),
            source: e,
        })?;
        let mut zip = ZipWriter::new(file);

        let options_stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let options_deflate = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        // Mimetype must be the first entry, stored uncompressed.
        zip.start_file("mimetype", options_stored)?;
        zip.write_all(MIMETYPE)?;

        // Container
        zip.start_file("META-INF/container.xml", options_deflate)?;
        zip.write_all(CONTAINER_XML)?;

        let style_hrefs: Vec<&str> = styles.iter().map(|s| s.href.as_str()).collect();

        write_opf(
            input.info,
            &chapters,
            self.cover.as_ref(),
            &fonts,
            &styles,
            &mut zip,
            options_deflate,
        )?;
        write_nav_xhtml(&chapters, &style_hrefs, &mut zip, options_deflate)?;
        write_ncx(input.info, &chapters, &mut zip, options_deflate)?;
        write_intro_xhtml(
            input.info,
            self.cover.as_ref(),
            &style_hrefs,
            &mut zip,
            options_deflate,
        )?;

        for (i, chapter) in chapters.iter().enumerate() {
            let content = read_chapter(chapter.path)?;
            let mut body = text_to_paragraphs(&content);
            if i == midpoint {
                body.push_str(&options.provenance.as_html());
            }
            let html = chapter_xhtml(&chapter.entry.title, &body, &style_hrefs);
            zip.start_file(
                format!("{}{}", OEBPS_PREFIX, chapter_file(i)),
                options_deflate,
            )?;
            zip.write_all(html.as_bytes())?;
            emit(
                options.reporter,
                Event::Assemble {
                    done: i + 1,
                    total: chapters.len(),
                },
            );
        }

        if let Some(cover) = &self.cover {
            zip.start_file(
                format!("{}{}", OEBPS_PREFIX, cover.file_name()),
                options_deflate,
            )?;
            zip.write_all(&cover.data)?;
        }
        for item in fonts.iter().chain(styles.iter()) {
            zip.start_file(format!("{}{}", OEBPS_PREFIX, item.href), options_deflate)?;
            zip.write_all(&item.data)?;
        }

        zip.finish()?;
        Ok(Artifact::Epub { path })
    }
}

impl EpubBook {
    fn load_resources(
        &self,
        reporter: Reporter<'_>,
    ) -> Result<(Vec<Embedded>, Vec<Embedded>), AssembleError> {
        let mut fonts = Vec::new();
        for (i, path) in self.resources.fonts.iter().enumerate() {
            let (media_type, warning) = font_media_type(path);
            if let Some(w) = warning {
                emit(reporter, Event::Warning(w));
            }
            fonts.push(Embedded {
                id: format!("font{}", i),
                href: format!("fonts/{}", base_name(path)),
                media_type,
                data: read_resource(path)?,
            });
        }
        let mut styles = Vec::new();
        for (i, path) in self.resources.stylesheets.iter().enumerate() {
            styles.push(Embedded {
                id: format!("css{}", i),
                href: format!("styles/{}", base_name(path)),
                media_type: "text/css",
                data: read_resource(path)?,
            });
        }
        Ok((fonts, styles))
    }
}

fn read_resource(path: &Path) -> Result<Vec<u8>, AssembleError> {
    std::fs::read(path).map_err(|e| AssembleError::Resource {
        path: path.to_path_buf(),
        source: e,
    })
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn chapter_file(i: usize) -> String {
    format!("chapter_{}.xhtml", i + 1)
}

/// Plain text to paragraphs: each newline is a paragraph break.
pub fn text_to_paragraphs(text: &str) -> String {
    let mut html = String::new();
    for line in text.split('\n') {
        html.push_str("<p>");
        html.push_str(&xml_escape(line.trim_end_matches('\r')));
        html.push_str("</p>\n");
    }
    html
}

fn stylesheet_links(hrefs: &[&str]) -> String {
    hrefs
        .iter()
        .map(|h| {
            format!(
                "  <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>\n",
                xml_escape(h)
            )
        })
        .collect()
}

fn write_opf(
    info: &BookInfo,
    chapters: &[ChapterSource<'_>],
    cover: Option<&CoverImage>,
    fonts: &[Embedded],
    styles: &[Embedded],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), AssembleError> {
    let book_id = xml_escape(&info.book_id);
    let title = xml_escape(&info.title);
    let creator = xml_escape(&info.author);
    let description = xml_escape(&info.intro);

    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="intro" href="intro.xhtml" media-type="application/xhtml+xml"/>
"#,
    );
    if let Some(c) = cover {
        manifest.push_str(&format!(
            r#"    <item id="cover-img" href="{}" media-type="{}" properties="cover-image"/>
"#,
            c.file_name(),
            c.media_type()
        ));
    }
    for item in fonts.iter().chain(styles.iter()) {
        manifest.push_str(&format!(
            r#"    <item id="{}" href="{}" media-type="{}"/>
"#,
            item.id,
            xml_escape(&item.href),
            item.media_type
        ));
    }
    for (i, _) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            r#"    <item id="chapter-{}" href="{}" media-type="application/xhtml+xml"/>
"#,
            i + 1,
            chapter_file(i)
        ));
    }

    // Spine: nav, intro, then chapters in catalog order.
    let mut spine = String::from(
        r#"    <itemref idref="nav"/>
    <itemref idref="intro"/>
"#,
    );
    for (i, _) in chapters.iter().enumerate() {
        spine.push_str(&format!("    <itemref idref=\"chapter-{}\"/>\n", i + 1));
    }

    let cover_meta = if cover.is_some() {
        "\n    <meta name=\"cover\" content=\"cover-img\"/>"
    } else {
        ""
    };

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">urn:qimao:{book_id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{language}</dc:language>
    <dc:description>{description}</dc:description>
    <meta name="qimao:book-id" content="{book_id}"/>{cover_meta}
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        book_id = book_id,
        title = title,
        creator = creator,
        language = LANGUAGE,
        description = description,
        cover_meta = cover_meta,
        manifest = manifest,
        spine = spine,
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn write_nav_xhtml(
    chapters: &[ChapterSource<'_>],
    styles: &[&str],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), AssembleError> {
    let mut nav_links = format!(
        "      <li><a href=\"intro.xhtml\">{}</a></li>\n",
        INTRO_LABEL
    );
    for (i, ch) in chapters.iter().enumerate() {
        nav_links.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            chapter_file(i),
            xml_escape(&ch.entry.title)
        ));
    }
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>目录</title>
{links}</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>目录</h1>
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
        lang = LANGUAGE,
        links = stylesheet_links(styles),
        items = nav_links
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn write_ncx(
    info: &BookInfo,
    chapters: &[ChapterSource<'_>],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), AssembleError> {
    let mut nav_points = format!(
        r#"    <navPoint id="navpoint-intro" playOrder="1">
      <navLabel><text>{}</text></navLabel>
      <content src="intro.xhtml"/>
    </navPoint>
"#,
        INTRO_LABEL
    );
    for (i, ch) in chapters.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{}" playOrder="{}">
      <navLabel><text>{}</text></navLabel>
      <content src="{}"/>
    </navPoint>
"#,
            i + 1,
            i + 2,
            xml_escape(&ch.entry.title),
            chapter_file(i)
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:qimao:{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&info.book_id),
        xml_escape(&info.title),
        nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

fn write_intro_xhtml(
    info: &BookInfo,
    cover: Option<&CoverImage>,
    styles: &[&str],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), AssembleError> {
    let mut body = String::new();
    if let Some(c) = cover {
        body.push_str(&format!(
            "  <img src=\"{}\" alt=\"Cover Image\"/>\n",
            c.file_name()
        ));
    }
    body.push_str(&format!("  <h1>{}</h1>\n", xml_escape(&info.title)));
    body.push_str(&format!("  <p>{}</p>\n", xml_escape(&info.intro)));
    let html = xhtml_document(INTRO_LABEL, &body, styles);
    zip.start_file(format!("{}intro.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(html.as_bytes())?;
    Ok(())
}

fn chapter_xhtml(title: &str, paragraphs: &str, styles: &[&str]) -> String {
    let body = format!(
        "  <h2 class=\"titlecss\">{}</h2>\n{}",
        xml_escape(title),
        paragraphs
    );
    xhtml_document(title, &body, styles)
}

fn xhtml_document(title: &str, body: &str, styles: &[&str]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
{links}</head>
<body>
{body}</body>
</html>
"#,
        lang = LANGUAGE,
        title = xml_escape(title),
        links = stylesheet_links(styles),
        body = body
    )
}
