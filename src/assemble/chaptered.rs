//! Chaptered text: `<output_dir>/<title>/` holding the intro file and one file per chapter.

use crate::assemble::{
    midpoint_index, preamble, read_chapter, reconcile, AssembleError, AssembleOptions, Artifact,
    Assembler, AssemblyInput, INTRO_FILE_NAME,
};
use crate::event::{emit, Event, Warning};
use crate::model::sanitize_name;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Never skips chapters: a start id only produces a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapteredText;

impl Assembler for ChapteredText {
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
                    output: "chaptered text",
                }),
            );
        }
        if !options.encoding.is_utf8() {
            emit(
                options.reporter,
                Event::Warning(Warning::SlowEncoding {
                    encoding: options.encoding.name().to_string(),
                }),
            );
        }
        let chapters = reconcile(input.catalog, input.files)?;
        let midpoint = midpoint_index(chapters.len(), 0);
        let enc = options.encoding;

        let dir = options.output_dir.join(&input.info.title);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let intro = dir.join(INTRO_FILE_NAME);
        std::fs::write(&intro, enc.encode(&preamble(input.info))).map_err(|e| io_err(&intro, e))?;

        let mut used: HashSet<String> = HashSet::from([INTRO_FILE_NAME.to_string()]);
        let mut files = Vec::with_capacity(chapters.len());
        for (i, chapter) in chapters.iter().enumerate() {
            let mut content = read_chapter(chapter.path)?;
            if i == midpoint {
                content.push_str(&options.provenance.as_text());
            }
            let name = unique_file_name(&sanitize_name(&chapter.entry.title), &mut used);
            let path = dir.join(name);
            std::fs::write(&path, enc.encode(&content)).map_err(|e| io_err(&path, e))?;
            files.push(path);
            emit(
                options.reporter,
                Event::Assemble {
                    done: i + 1,
                    total: chapters.len(),
                },
            );
        }

        Ok(Artifact::ChapteredText { dir, files })
    }
}

/// `<stem>.txt`, or `<stem> (n).txt` when an earlier chapter already took the name.
fn unique_file_name(stem: &str, used: &mut HashSet<String>) -> String {
    let mut name = format!("{}.txt", stem);
    let mut n = 2;
    while used.contains(&name) {
        name = format!("{} ({}).txt", stem, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

fn io_err(path: &Path, source: std::io::Error) -> AssembleError {
    AssembleError::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::tests::{entry, info, three_chapters, write_files};
    use crate::assemble::{OutputEncoding, Provenance};
    use std::cell::RefCell;

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn writes_intro_and_one_file_per_chapter_even_with_start() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let files = write_files(&work, &[("a", "1st"), ("b", "2nd"), ("c", "3rd")]);
        let catalog = three_chapters();
        let info = info();
        let events = RefCell::new(Vec::new());
        let cb = |e: &Event| events.borrow_mut().push(e.clone());
        let mut opts = AssembleOptions::new(tmp.path());
        opts.start = Some("b".to_string());
        opts.provenance = Provenance::new("PROVENANCE");
        opts.reporter = Some(&cb);
        let input = AssemblyInput {
            info: &info,
            catalog: &catalog,
            files: &files,
        };

        let artifact = ChapteredText.produce(&input, &opts).unwrap();
        let dir = tmp.path().join("测试书");
        assert_eq!(artifact.path(), dir);
        assert_eq!(
            file_names(&dir),
            ["One.txt", "Three.txt", "Two.txt", "简介.txt"]
        );
        assert_eq!(std::fs::read_to_string(dir.join("One.txt")).unwrap(), "1st");
        assert_eq!(
            std::fs::read_to_string(dir.join("Two.txt")).unwrap(),
            format!("2nd{}", Provenance::new("PROVENANCE").as_text())
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("简介.txt")).unwrap(),
            preamble(&info)
        );
        assert!(events.borrow().iter().any(|e| matches!(
            e,
            Event::Warning(Warning::StartIgnored { id, .. }) if id == "b"
        )));
    }

    #[test]
    fn chapter_titles_are_sanitized_and_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let files = write_files(&work, &[("1", "x"), ("2", "y"), ("3", "z")]);
        let catalog = vec![entry("1", 1, "A/B"), entry("2", 2, "A/B"), entry("3", 3, "简介")];
        let info = info();
        let input = AssemblyInput {
            info: &info,
            catalog: &catalog,
            files: &files,
        };
        ChapteredText
            .produce(&input, &AssembleOptions::new(tmp.path()))
            .unwrap();
        assert_eq!(
            file_names(&tmp.path().join("测试书")),
            ["A／B (2).txt", "A／B.txt", "简介 (2).txt", "简介.txt"]
        );
    }

    #[test]
    fn count_mismatch_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let files = write_files(tmp.path(), &[("a", "1st")]);
        let catalog = three_chapters();
        let info = info();
        let input = AssemblyInput {
            info: &info,
            catalog: &catalog,
            files: &files,
        };
        let result = ChapteredText.produce(&input, &AssembleOptions::new(tmp.path()));
        assert!(matches!(result, Err(AssembleError::CountMismatch { .. })));
        assert!(!tmp.path().join("测试书").exists());
        assert!(files[0].exists());
    }

    #[test]
    fn non_utf8_encoding_warns() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let files = write_files(&work, &[("a", "1"), ("b", "2"), ("c", "3")]);
        let catalog = three_chapters();
        let info = info();
        let warned = RefCell::new(false);
        let cb = |e: &Event| {
            if matches!(e, Event::Warning(Warning::SlowEncoding { .. })) {
                *warned.borrow_mut() = true;
            }
        };
        let mut opts = AssembleOptions::new(tmp.path());
        opts.encoding = OutputEncoding::for_label("gb18030").unwrap();
        opts.reporter = Some(&cb);
        let input = AssemblyInput {
            info: &info,
            catalog: &catalog,
            files: &files,
        };
        ChapteredText.produce(&input, &opts).unwrap();
        assert!(*warned.borrow());
    }
}
