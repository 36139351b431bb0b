//! End-to-end merges over real files, with buffer sizes small enough to
//! force plenty of refills and buffer-boundary crossings.

extern crate logmerge;
#[macro_use]
extern crate pretty_assertions;
extern crate rand;

use std::env;
use std::fs;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process;

use logmerge::{merge, Backend, MergeConfig};

struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    fn new(name: &str) -> Scratch {
        let mut dir = env::temp_dir();
        dir.push(format!("logmerge-test-{}-{}", name, process::id()));
        fs::create_dir_all(&dir).unwrap();
        Scratch { dir }
    }

    fn file(&self, name: &str, contents: &[u8]) -> String {
        let path = self.dir.join(name);
        fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.dir).ok();
    }
}

fn run_merge(scratch: &Scratch, paths: &[String], buffer_size: usize, backend: Backend) -> Vec<u8> {
    let out_path = scratch.dir.join("output");
    {
        let out = File::create(&out_path).unwrap();
        let config = MergeConfig {
            buffer_size,
            backend,
            output: out.as_raw_fd(),
        };
        merge(paths, &config).unwrap();
    }
    let merged = fs::read(&out_path).unwrap();
    fs::remove_file(&out_path).unwrap();
    merged
}

/// `(header, body)` pairs in output order. Only valid while no data line
/// contains the marker, which none of the test inputs do.
fn groups(output: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8(output.to_vec()).unwrap();
    assert!(text.starts_with(">>> "), "no leading header in {:?}", text);
    text[4..]
        .split("\n>>> ")
        .map(|group| {
            let name_ends = group.find('\n').expect("header without newline");
            (
                group[..name_ends].to_string(),
                group[name_ends + 1..].to_string(),
            )
        })
        .collect()
}

/// What each source contributed, in file order, which must equal the file.
fn contribution(output: &[u8], path: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (header, body) in groups(output) {
        if header == path {
            bytes.extend_from_slice(body.as_bytes());
        }
    }
    bytes
}

#[test]
fn interleaves_two_files_with_headers() {
    let scratch = Scratch::new("interleave");
    let paths = vec![
        scratch.file("a.txt", b"apple\nbanana\n"),
        scratch.file("b.txt", b"avocado\ncherry\n"),
    ];
    let expected = format!(
        ">>> {}\napple\n\n>>> {}\navocado\n\n>>> {}\nbanana\n\n>>> {}\ncherry\n",
        paths[0], paths[1], paths[0], paths[1]
    );
    let merged = run_merge(&scratch, &paths, 1 << 16, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn equal_lines_follow_argument_order() {
    let scratch = Scratch::new("equal");
    let paths = vec![scratch.file("x", b"a\n"), scratch.file("y", b"a\n")];
    let expected = format!(">>> {}\na\n\n>>> {}\na\n", paths[0], paths[1]);
    let merged = run_merge(&scratch, &paths, 1 << 16, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn a_run_of_lesser_lines_stays_in_one_group() {
    let scratch = Scratch::new("runs");
    let paths = vec![
        scratch.file("a", b"a1\na2\nz\n"),
        scratch.file("b", b"b\n"),
    ];
    let expected = format!(
        ">>> {}\na1\na2\n\n>>> {}\nb\n\n>>> {}\nz\n",
        paths[0], paths[1], paths[0]
    );
    let merged = run_merge(&scratch, &paths, 1 << 16, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn missing_final_newline_is_synthesised() {
    let scratch = Scratch::new("nofinal");
    let paths = vec![scratch.file("f1", b"line\n"), scratch.file("f2", b"zzz")];
    let expected = format!(">>> {}\nline\n\n>>> {}\nzzz\n", paths[0], paths[1]);
    let merged = run_merge(&scratch, &paths, 1 << 16, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn empty_file_gets_no_header() {
    let scratch = Scratch::new("empty");
    let paths = vec![
        scratch.file("a", b"x\n"),
        scratch.file("nothing", b""),
        scratch.file("b", b"y\n"),
    ];
    let expected = format!(">>> {}\nx\n\n>>> {}\ny\n", paths[0], paths[2]);
    let merged = run_merge(&scratch, &paths, 1 << 16, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn files_much_larger_than_the_buffer_lose_no_bytes() {
    let scratch = Scratch::new("bigfiles");
    let mut early = String::new();
    let mut late = String::new();
    for i in 0..40 {
        early.push_str(&format!("aaa {:04}\n", i));
        late.push_str(&format!("bbb {:04}\n", i));
    }
    let paths = vec![
        scratch.file("early", early.as_bytes()),
        scratch.file("late", late.as_bytes()),
    ];
    // every "aaa" line sorts before every "bbb" line, so each file comes
    // out as one group, but an 8-byte buffer forces a refill per line
    let expected = format!(">>> {}\n{}\n>>> {}\n{}", paths[0], early, paths[1], late);
    let merged = run_merge(&scratch, &paths, 8, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn every_transition_gets_a_header() {
    let scratch = Scratch::new("transitions");
    let mut contents = vec![String::new(), String::new(), String::new()];
    for key in 0..30 {
        contents[key % 3].push_str(&format!("{:04} ........................\n", key));
    }
    let paths: Vec<String> = contents
        .iter()
        .enumerate()
        .map(|(i, contents)| scratch.file(&format!("f{}", i), contents.as_bytes()))
        .collect();

    // keys rotate through the files, so every line switches groups
    let mut expected = String::new();
    for key in 0..30 {
        if key != 0 {
            expected.push('\n');
        }
        expected.push_str(&format!(
            ">>> {}\n{:04} ........................\n",
            paths[key % 3], key
        ));
    }
    let merged = run_merge(&scratch, &paths, 16, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn line_longer_than_the_buffer_is_emitted_in_chunks() {
    let scratch = Scratch::new("longline");
    let long = "m".repeat(100);
    let paths = vec![
        scratch.file("spread", format!("{}\n", long).as_bytes()),
        scratch.file("other", b"a\nz\n"),
    ];
    let expected = format!(
        ">>> {}\na\n\n>>> {}\n{}\n\n>>> {}\nz\n",
        paths[1], paths[0], long, paths[1]
    );
    let merged = run_merge(&scratch, &paths, 8, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

#[test]
fn long_final_line_without_newline_gets_exactly_one() {
    let scratch = Scratch::new("longnofinal");
    let long = "q".repeat(75);
    let paths = vec![scratch.file("only", long.as_bytes())];
    let expected = format!(">>> {}\n{}\n", paths[0], long);
    let merged = run_merge(&scratch, &paths, 8, Backend::Blocking);
    assert_eq!(String::from_utf8(merged).unwrap(), expected);
}

fn random_sorted_file(lines: usize) -> Vec<u8> {
    use rand::{thread_rng, Rng};

    let mut rng = thread_rng();
    let mut rows: Vec<String> = (0..lines)
        .map(|_| {
            let length = rng.gen_range(0, 12);
            let word: String = (0..length)
                .map(|_| (rng.gen_range(b'a', b'g')) as char)
                .collect();
            format!("{}\n", word)
        })
        .collect();
    rows.sort();
    rows.concat().into_bytes()
}

#[test]
fn merged_output_is_sorted_and_byte_complete() {
    let scratch = Scratch::new("property");
    let contents: Vec<Vec<u8>> = (0..4).map(|_| random_sorted_file(120)).collect();
    let paths: Vec<String> = contents
        .iter()
        .enumerate()
        .map(|(i, contents)| scratch.file(&format!("r{}", i), contents))
        .collect();
    let merged = run_merge(&scratch, &paths, 16, Backend::Blocking);

    // every file comes back out byte-for-byte, in its own order
    for (path, contents) in paths.iter().zip(&contents) {
        assert_eq!(&contribution(&merged, path), contents, "for {}", path);
    }

    // and the line sequence over all groups never decreases
    let mut previous = String::new();
    for (_, body) in groups(&merged) {
        for line in body.lines() {
            assert!(
                previous.as_str() <= line,
                "{:?} came after {:?}",
                line,
                previous
            );
            previous = line.to_string();
        }
    }
}

#[cfg(target_os = "linux")]
#[test]
fn ring_and_blocking_backends_agree() {
    let scratch = Scratch::new("backends");
    let contents: Vec<Vec<u8>> = (0..3).map(|_| random_sorted_file(80)).collect();
    let mut paths: Vec<String> = contents
        .iter()
        .enumerate()
        .map(|(i, contents)| scratch.file(&format!("s{}", i), contents))
        .collect();
    // one file without a final newline and one empty file for good measure
    paths.push(scratch.file("tail", b"zzz no newline"));
    paths.push(scratch.file("hollow", b""));

    let blocking = run_merge(&scratch, &paths, 32, Backend::Blocking);
    // Backend::Auto uses the io_uring reader when the kernel has it and
    // the identical blocking path when it does not
    let auto = run_merge(&scratch, &paths, 32, Backend::Auto);
    assert_eq!(
        String::from_utf8(blocking).unwrap(),
        String::from_utf8(auto).unwrap()
    );
}
