extern crate env_logger;
extern crate logmerge;

use std::env;
use std::process::exit;

const HELP_MESSAGE: &'static str = "\
Usage: logmerge file1 [file2]...

\"Sorts\" the files but prints the file name above each group of lines from a file.
Files are merged by sorting the next unprinted line from each file,
without reordering lines from the same file or keeping everything in RAM.
(Memory usage is linear with the number of files, not with the file sizes.)
";

fn main() {
    env_logger::init();

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprint!("{}", HELP_MESSAGE);
        exit(64);
    }

    let config = logmerge::MergeConfig::default();
    if let Err(error) = logmerge::merge(&paths, &config) {
        eprintln!("{}", error);
        exit(error.exit_code());
    }
}
