use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::Context as _;

use crate::formats::{BookMeta, ChapterResult};
use crate::output::ArtifactWriter;

const SEPARATOR_WIDTH: usize = 50;

/// Flat UTF-8 text: a metadata header followed by every chapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextWriter;

impl ArtifactWriter for TextWriter {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn write(&self, path: &Path, book: &BookMeta, chapters: &[ChapterResult]) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("open text output: {}", path.display()))?;
        let mut out = BufWriter::new(file);

        writeln!(out, "书名: {}", book.name)?;
        writeln!(out, "作者: {}", book.author)?;
        writeln!(out, "简介: {}", book.description)?;
        writeln!(out, "\n{}\n", "=".repeat(SEPARATOR_WIDTH))?;

        for chapter in chapters {
            writeln!(out, "{}\n", chapter.title)?;
            for line in chapter.content.lines() {
                writeln!(out, "{}", line.trim())?;
            }
            writeln!(out)?;
        }

        out.flush()
            .with_context(|| format!("flush text output: {}", path.display()))?;
        Ok(())
    }
}
