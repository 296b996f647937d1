use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use crate::formats::{BookMeta, ChapterResult};

pub mod epub;
pub mod text;

/// Encodes an ordered list of chapters into one artifact file.
pub trait ArtifactWriter: Send + Sync {
    fn extension(&self) -> &'static str;

    /// `chapters` must already be in index order. Existing files are overwritten.
    fn write(&self, path: &Path, book: &BookMeta, chapters: &[ChapterResult]) -> anyhow::Result<()>;
}

pub fn writer_for(format: OutputFormat) -> Box<dyn ArtifactWriter> {
    match format {
        OutputFormat::Txt => Box::new(text::TextWriter),
        OutputFormat::Epub => Box::new(epub::EpubWriter::default()),
    }
}

/// `<save_dir>/<book name>.<ext>`, with the name made safe for file systems.
pub fn artifact_path(save_dir: &Path, book_name: &str, writer: &dyn ArtifactWriter) -> PathBuf {
    save_dir.join(format!("{}.{}", sanitize_file_stem(book_name), writer.extension()))
}

/// `<save_dir>/<book name>.<first>-<last>.<ext>` for a resumed run, so the
/// artifact of the earlier run stays on disk. Chapter numbers are 1-based.
pub fn span_artifact_path(
    save_dir: &Path,
    book_name: &str,
    first: usize,
    last: usize,
    writer: &dyn ArtifactWriter,
) -> PathBuf {
    save_dir.join(format!(
        "{}.{first}-{last}.{}",
        sanitize_file_stem(book_name),
        writer.extension()
    ))
}

fn sanitize_file_stem(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        "book".to_owned()
    } else {
        cleaned.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_uses_format_extension() {
        let writer = writer_for(OutputFormat::Epub);
        let path = artifact_path(Path::new("/tmp/out"), "星海归途", writer.as_ref());
        assert_eq!(path, Path::new("/tmp/out/星海归途.epub"));
    }

    #[test]
    fn span_artifact_path_names_chapter_span() {
        let writer = writer_for(OutputFormat::Txt);
        let path = span_artifact_path(Path::new("/tmp/out"), "a/b", 4, 6, writer.as_ref());
        assert_eq!(path, Path::new("/tmp/out/a_b.4-6.txt"));
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_file_stem("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_file_stem(" .. "), "book");
    }
}
