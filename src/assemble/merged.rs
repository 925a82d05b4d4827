//! Merged text: preamble, then every chapter as `\n\n\n<title>\n\n<content>`.

use crate::assemble::{
    midpoint_index, preamble, read_chapter, reconcile, start_position, AssembleError,
    AssembleOptions, Artifact, Assembler, AssemblyInput,
};
use crate::event::{emit, Event};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes `<output_dir>/<title>.txt`. Honors `options.start`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergedText;

impl Assembler for MergedText {
    fn produce(
        &self,
        input: &AssemblyInput<'_>,
        options: &AssembleOptions<'_>,
    ) -> Result<Artifact, AssembleError> {
        let chapters = reconcile(input.catalog, input.files)?;
        let first = start_position(input.catalog, options.start.as_deref())?;
        let midpoint = midpoint_index(chapters.len(), first);

        let path = options.output_dir.join(format!("{}.txt", input.info.title));
        let file = File::create(&path).map_err(|e| io_err(&path, e))?;
        let mut out = BufWriter::new(file);
        let enc = options.encoding;

        out.write_all(&enc.encode(&preamble(input.info)))
            .map_err(|e| io_err(&path, e))?;

        let total = chapters.len() - first;
        let mut last_chapter_id = String::new();
        for (i, chapter) in chapters.iter().enumerate().skip(first) {
            let content = read_chapter(chapter.path)?;
            let block = format!("\n\n\n{}\n\n{}", chapter.entry.title, content);
            out.write_all(&enc.encode(&block))
                .map_err(|e| io_err(&path, e))?;
            if i == midpoint {
                out.write_all(&enc.encode(&options.provenance.as_text()))
                    .map_err(|e| io_err(&path, e))?;
            }
            last_chapter_id = chapter.entry.id.clone();
            emit(
                options.reporter,
                Event::Assemble {
                    done: i + 1 - first,
                    total,
                },
            );
        }
        out.flush().map_err(|e| io_err(&path, e))?;

        Ok(Artifact::MergedText {
            path,
            last_chapter_id,
        })
    }
}

fn io_err(path: &Path, source: std::io::Error) -> AssembleError {
    AssembleError::Io {
        path: path.to_path_buf(),
        source,
    }
}
