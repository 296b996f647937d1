use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::formats::{BookMeta, ChapterResult};
use crate::output::ArtifactWriter;

const PARAGRAPH_INDENT: &str = "\u{3000}\u{3000}";

/// EPUB 3 container with one XHTML document per chapter.
#[derive(Debug, Clone)]
pub struct EpubWriter {
    /// BCP-47 language tag used for EPUB metadata and XHTML documents.
    pub lang: String,
}

impl Default for EpubWriter {
    fn default() -> Self {
        Self {
            lang: "zh-CN".to_owned(),
        }
    }
}

struct ChapterDoc<'a> {
    stem: String,
    title: &'a str,
    content: &'a str,
}

impl ArtifactWriter for EpubWriter {
    fn extension(&self) -> &'static str {
        "epub"
    }

    fn write(&self, path: &Path, book: &BookMeta, chapters: &[ChapterResult]) -> anyhow::Result<()> {
        let lang = self.lang.trim();
        let lang = if lang.is_empty() { "und" } else { lang };

        let docs = chapters
            .iter()
            .enumerate()
            .map(|(idx, chapter)| ChapterDoc {
                stem: format!("chap_{}", idx + 1),
                title: &chapter.title,
                content: &chapter.content,
            })
            .collect::<Vec<_>>();

        let uuid = uuid::Uuid::new_v4();
        let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let out_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("open epub output: {}", path.display()))?;
        let mut zip = zip::ZipWriter::new(out_file);

        // `mimetype` must be the first entry and stored uncompressed.
        let mimetype_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", mimetype_options)
            .context("epub start_file mimetype")?;
        zip.write_all(b"application/epub+zip")
            .context("epub write mimetype")?;

        let deflated = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let entries = [
            ("META-INF/container.xml", render_container_xml()),
            (
                "OEBPS/content.opf",
                render_content_opf(book, lang, uuid, &modified, &docs),
            ),
            ("OEBPS/nav.xhtml", render_nav_xhtml(&book.name, lang, &docs)),
            ("OEBPS/toc.ncx", render_toc_ncx(&book.name, uuid, &docs)),
            ("OEBPS/style.css", default_style_css().to_owned()),
        ];
        for (name, body) in entries {
            zip.start_file(name, deflated)
                .with_context(|| format!("epub start_file {name}"))?;
            zip.write_all(body.as_bytes())
                .with_context(|| format!("epub write {name}"))?;
        }

        for doc in &docs {
            let xhtml = render_chapter_xhtml(doc, lang);
            zip.start_file(format!("OEBPS/{}.xhtml", doc.stem), deflated)
                .with_context(|| format!("epub start_file chapter: {}", doc.stem))?;
            zip.write_all(xhtml.as_bytes())
                .with_context(|| format!("epub write chapter: {}", doc.stem))?;
        }

        zip.finish().context("epub finish zip")?;
        Ok(())
    }
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> &'static str {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.8; }
h1 { font-size: 1.4em; text-align: center; margin: 1.5em 0 1em; }
p { margin: 0.4em 0; }
"#
}

fn render_chapter_xhtml(doc: &ChapterDoc<'_>, lang: &str) -> String {
    let mut body = format!("<h1>{}</h1>\n", xml_escape(doc.title));
    for line in doc.content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        body.push_str("<p>");
        body.push_str(PARAGRAPH_INDENT);
        body.push_str(&xml_escape(line));
        body.push_str("</p>\n");
    }
    wrap_xhtml_document(doc.title, lang, &body)
}

fn render_nav_xhtml(title: &str, lang: &str, docs: &[ChapterDoc<'_>]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for doc in docs {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(&doc.stem),
            xml_escape(doc.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, docs: &[ChapterDoc<'_>]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{uuid}\" />\n"
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("  </head>\n");
    out.push_str(&format!(
        "  <docTitle><text>{}</text></docTitle>\n",
        xml_escape(title)
    ));
    out.push_str("  <navMap>\n");
    for (idx, doc) in docs.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str(&format!(
            "      <navLabel><text>{}</text></navLabel>\n",
            xml_escape(doc.title)
        ));
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(&doc.stem)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    book: &BookMeta,
    lang: &str,
    uuid: uuid::Uuid,
    modified: &str,
    docs: &[ChapterDoc<'_>],
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{uuid}</dc:identifier>\n"
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&book.name)
    ));
    out.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        xml_escape(&book.author)
    ));
    out.push_str(&format!(
        "    <dc:description>{}</dc:description>\n",
        xml_escape(&book.description)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(lang)
    ));
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    for doc in docs {
        out.push_str(&format!(
            "    <item id=\"{stem}\" href=\"{stem}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            stem = xml_escape(&doc.stem)
        ));
    }
    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    out.push_str("    <itemref idref=\"nav\" />\n");
    for doc in docs {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&doc.stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use super::*;

    fn read_entry(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> String {
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn writes_mimetype_first_and_chapters_in_spine_order() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("book.epub");
        let book = BookMeta {
            name: "Tom & Jerry".to_owned(),
            author: "青木".to_owned(),
            description: "desc".to_owned(),
        };
        let chapters = vec![
            ChapterResult {
                title: "第一章".to_owned(),
                content: "清晨。\n\n<港口>".to_owned(),
            },
            ChapterResult {
                title: "第二章".to_owned(),
                content: "\u{3000}\u{3000}已缩进".to_owned(),
            },
        ];

        EpubWriter::default().write(&path, &book, &chapters).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.by_index(0).unwrap().name(), "mimetype");

        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>Tom &amp; Jerry</dc:title>"));
        assert!(opf.contains("<dc:creator>青木</dc:creator>"));
        let first = opf.find("<itemref idref=\"chap_1\"").unwrap();
        let second = opf.find("<itemref idref=\"chap_2\"").unwrap();
        assert!(first < second);

        let chap1 = read_entry(&mut archive, "OEBPS/chap_1.xhtml");
        assert!(chap1.contains("<h1>第一章</h1>"));
        assert!(chap1.contains("<p>\u{3000}\u{3000}清晨。</p>"));
        assert!(chap1.contains("<p>\u{3000}\u{3000}&lt;港口&gt;</p>"));

        let chap2 = read_entry(&mut archive, "OEBPS/chap_2.xhtml");
        assert!(chap2.contains("<p>\u{3000}\u{3000}已缩进</p>"));
    }
}
