//! The merge loop: repeatedly take the least candidate line, emit it under
//! its file's group header, and put that file's next line back into play.

use super::MergeConfig;
use error::{Error, Result};
use heap::{Heap, Slice};
use lines::Lines;
use reader::Reader;
use source::Source;

/// How many byte ranges are staged before a flush is forced.
const STAGED_SLICES: usize = 1024;

static NEWLINE: &'static [u8] = b"\n";

fn push_current_line(sorter: &mut Heap, source: &Source, file: usize) -> Result<()> {
    if sorter.push(Slice::from(source.current_line()), file as i32) {
        Ok(())
    } else {
        Err(Error::SorterFull {
            capacity: sorter.capacity(),
        })
    }
}

/// Merge the files into `config.output`.
///
/// Every file must already be sorted; the output is their k-way merge with
/// a `>>> path` header wherever consecutive lines switch files, each file's
/// own line order left untouched.
pub fn merge(paths: &[String], config: &MergeConfig) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut reader = Reader::open(paths, config)?;
    // double the read size so a compacted unfinished line plus a whole
    // read always fit
    let mut sources: Vec<Source> = paths
        .iter()
        .map(|path| Source::new(path, 2 * config.buffer_size))
        .collect();
    let mut sorter = Heap::with_capacity(sources.len());
    let mut lines = Lines::new(STAGED_SLICES, config.output);

    for file in 0..sources.len() {
        if sources[file].refill(|dest| reader.fill(file, dest))? {
            push_current_line(&mut sorter, &sources[file], file)?;
        }
    }

    let mut last = -1;
    while let Some((line, value)) = sorter.pop() {
        let file = value as usize;
        if value != last {
            // the very first group gets no separating blank line
            let marker: &'static [u8] = if last == -1 { b">>> " } else { b"\n>>> " };
            lines.add(Slice::from(marker))?;
            lines.add(Slice::from(sources[file].path().as_bytes()))?;
            lines.add(Slice::from(NEWLINE))?;
            last = value;
        }

        lines.add(line)?;
        // NOTE(unsafe) just popped; flushed before its buffer is reused
        let complete = unsafe { line.bytes() }.ends_with(b"\n");

        if sources[file].advance() {
            // have more lines in the buffer
            push_current_line(&mut sorter, &sources[file], file)?;
        } else if !complete {
            // The line was cut off at the end of the buffer. Everything
            // staged has to be written before the buffer can be read into
            // again, and the rest of the line goes out chunk by chunk as it
            // arrives; only once the line ends does the file's next line
            // re-enter the sort.
            lines.flush()?;
            let mut is_truncated = true;
            while sources[file].refill(|dest| reader.fill(file, dest))? {
                let chunk = Slice::from(sources[file].current_line());
                lines.add(chunk)?;
                is_truncated = !unsafe { chunk.bytes() }.ends_with(b"\n");
                if !is_truncated {
                    if sources[file].advance() {
                        push_current_line(&mut sorter, &sources[file], file)?;
                    } else {
                        lines.flush()?;
                        if sources[file].refill(|dest| reader.fill(file, dest))? {
                            push_current_line(&mut sorter, &sources[file], file)?;
                        }
                    }
                    break;
                }
                lines.flush()?;
                // consume the written chunk; it has no newline, so this
                // cannot find a line and only resets the offsets
                sources[file].advance();
            }
            if is_truncated {
                // the file ended mid-line
                lines.add(Slice::from(NEWLINE))?;
            }
        } else {
            // need to read more
            lines.flush()?;
            if sources[file].refill(|dest| reader.fill(file, dest))? {
                push_current_line(&mut sorter, &sources[file], file)?;
            }
        }
    }

    lines.flush()
}
