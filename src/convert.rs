use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use encoding_rs::{CoderResult, UTF_16BE, UTF_16LE};

use crate::encoding::EncodingId;

const READ_CHUNK: usize = 8 * 1024;
const TMP_EXTENSION: &str = "tmp";

/// Per-file result of the work unit. Errors are values here: the caller
/// counts and reports them, and the walk continues.
#[derive(Debug)]
pub enum Outcome {
    /// Already in the target encoding; nothing written.
    Skipped,
    /// Detected code page is on the suppression list; nothing written.
    Suppressed,
    Converted { lines: u64, dry_run: bool },
    IoError(io::Error),
    AccessError(io::Error),
}

pub struct Request<'a> {
    pub path: &'a Path,
    pub len: u64,
    pub detected: Option<EncodingId>,
    /// Read-side encoding for files whose encoding stayed unresolved.
    pub fallback: EncodingId,
    pub target: EncodingId,
}

impl Request<'_> {
    fn source(&self) -> EncodingId {
        self.detected.unwrap_or(self.fallback)
    }
}

/// Runs the per-file decision sequence: skip when already in the target
/// encoding, honor the suppression list, honor test-only mode, otherwise
/// perform the rename → stream-transcode → delete-temp protocol.
///
/// `progress` is called with the completion fraction (clamped to 1.0)
/// after each written line.
pub fn process(
    req: &Request<'_>,
    suppressed: &[u16],
    test_only: bool,
    progress: &mut dyn FnMut(f64),
) -> Outcome {
    if req.detected == Some(req.target) {
        return Outcome::Skipped;
    }
    if let Some(detected) = req.detected {
        if suppressed.contains(&detected.code_page()) {
            return Outcome::Suppressed;
        }
    }
    if test_only {
        return Outcome::Converted {
            lines: 0,
            dry_run: true,
        };
    }
    match convert(req, progress) {
        Ok(lines) => Outcome::Converted {
            lines,
            dry_run: false,
        },
        Err(err) => classify(err),
    }
}

pub fn classify(err: io::Error) -> Outcome {
    if err.kind() == ErrorKind::PermissionDenied {
        Outcome::AccessError(err)
    } else {
        Outcome::IoError(err)
    }
}

fn convert(req: &Request<'_>, progress: &mut dyn FnMut(f64)) -> io::Result<u64> {
    let tmp = tmp_path(req.path)?;
    if tmp.exists() {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("temporary path {} already exists", tmp.display()),
        ));
    }
    fs::rename(req.path, &tmp)?;

    match transcode(&tmp, req, progress) {
        Ok(lines) => {
            fs::remove_file(&tmp)?;
            Ok(lines)
        }
        Err(err) => {
            roll_back(req.path, &tmp);
            Err(err)
        }
    }
}

/// The temp file still holds the original bytes after a mid-stream
/// failure; put it back and discard the partial destination. A failure
/// while rolling back leaves the temp copy in place rather than masking
/// the original error.
fn roll_back(original: &Path, tmp: &Path) {
    let _ = fs::remove_file(original);
    let _ = fs::rename(tmp, original);
}

fn tmp_path(path: &Path) -> io::Result<PathBuf> {
    let tmp = path.with_extension(TMP_EXTENSION);
    if tmp == path {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} is its own temporary path", path.display()),
        ));
    }
    Ok(tmp)
}

/// Streams `src` into a fresh file at the request path, decoding with
/// the detected (or fallback) encoding and encoding with the target.
/// Lines keep their own terminators, so a source without a trailing
/// newline stays that way.
fn transcode(src: &Path, req: &Request<'_>, progress: &mut dyn FnMut(f64)) -> io::Result<u64> {
    let mut reader = File::open(src)?;
    let mut writer = BufWriter::new(File::create(req.path)?);
    write_bom(&mut writer, req.target)?;

    let mut decoder = req.source().encoding().new_decoder_with_bom_removal();
    let mut chunk = [0u8; READ_CHUNK];
    let mut pending = String::new();
    let mut consumed = 0u64;
    let mut lines = 0u64;
    let total = req.len.max(1) as f64;

    loop {
        let n = reader.read(&mut chunk)?;
        let last = n == 0;
        let mut input = &chunk[..n];
        loop {
            let (result, read, _) = decoder.decode_to_string(input, &mut pending, last);
            input = &input[read..];
            consumed += read as u64;
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => pending.reserve(READ_CHUNK),
            }
        }
        lines += drain_lines(&mut writer, &mut pending, req.target, consumed, total, progress)?;
        if last {
            break;
        }
    }

    if !pending.is_empty() {
        // Final line, no terminator in the source.
        encode_segment(&mut writer, &pending, req.target)?;
        lines += 1;
        progress(1.0);
    }
    writer.flush()?;
    Ok(lines)
}

fn drain_lines(
    out: &mut impl Write,
    pending: &mut String,
    target: EncodingId,
    consumed: u64,
    total: f64,
    progress: &mut dyn FnMut(f64),
) -> io::Result<u64> {
    let mut lines = 0u64;
    while let Some(pos) = pending.find('\n') {
        let rest = pending.split_off(pos + 1);
        encode_segment(out, pending, target)?;
        *pending = rest;
        lines += 1;
        progress((consumed as f64 / total).min(1.0));
    }
    Ok(lines)
}

// encoding_rs only encodes into ASCII-compatible encodings, so the
// UTF-16 forms are written by hand.
fn encode_segment(out: &mut impl Write, text: &str, target: EncodingId) -> io::Result<()> {
    let encoding = target.encoding();
    if encoding == UTF_16LE {
        for unit in text.encode_utf16() {
            out.write_all(&unit.to_le_bytes())?;
        }
    } else if encoding == UTF_16BE {
        for unit in text.encode_utf16() {
            out.write_all(&unit.to_be_bytes())?;
        }
    } else {
        let (bytes, _, _) = encoding.encode(text);
        out.write_all(&bytes)?;
    }
    Ok(())
}

/// UTF-16 output leads with a BOM so a later run can re-detect it;
/// UTF-8 output stays BOM-free.
fn write_bom(out: &mut impl Write, target: EncodingId) -> io::Result<()> {
    let encoding = target.encoding();
    if encoding == UTF_16LE {
        out.write_all(&[0xFF, 0xFE])?;
    } else if encoding == UTF_16BE {
        out.write_all(&[0xFE, 0xFF])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use encoding_rs::{UTF_8, UTF_16LE, WINDOWS_1251};
    use tempfile::tempdir;

    use super::*;

    fn id(encoding: &'static encoding_rs::Encoding) -> EncodingId {
        EncodingId::new(encoding)
    }

    fn request<'a>(path: &'a Path, len: u64, detected: Option<EncodingId>) -> Request<'a> {
        Request {
            path,
            len,
            detected,
            fallback: id(WINDOWS_1251),
            target: id(UTF_8),
        }
    }

    fn run(req: &Request<'_>) -> Outcome {
        process(req, &[], false, &mut |_| {})
    }

    #[test]
    fn converts_windows_1251_and_counts_lines() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let (bytes, _, _) = WINDOWS_1251.encode("первая\nвторая\nтретья");
        fs::write(&path, &bytes).expect("write fixture");

        let req = request(&path, bytes.len() as u64, None);
        match run(&req) {
            Outcome::Converted { lines, dry_run } => {
                assert_eq!(lines, 3);
                assert!(!dry_run);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            fs::read_to_string(&path).expect("read back"),
            "первая\nвторая\nтретья"
        );
        assert!(!dir.path().join("a.tmp").exists());
    }

    #[test]
    fn preserves_crlf_and_missing_final_newline() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let (bytes, _, _) = WINDOWS_1251.encode("раз\r\nдва\r\nбез конца");
        fs::write(&path, &bytes).expect("write fixture");

        let req = request(&path, bytes.len() as u64, None);
        assert!(matches!(run(&req), Outcome::Converted { lines: 3, .. }));
        assert_eq!(
            fs::read_to_string(&path).expect("read back"),
            "раз\r\nдва\r\nбез конца"
        );
    }

    #[test]
    fn round_trips_through_utf16() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let original = "alpha\nβήτα\nгамма\n";
        fs::write(&path, original).expect("write fixture");

        let to_utf16 = Request {
            path: &path,
            len: original.len() as u64,
            detected: Some(id(UTF_8)),
            fallback: id(WINDOWS_1251),
            target: id(UTF_16LE),
        };
        assert!(matches!(run(&to_utf16), Outcome::Converted { .. }));

        let intermediate = fs::read(&path).expect("read utf-16");
        assert_eq!(&intermediate[..2], &[0xFF, 0xFE]);

        let back = Request {
            path: &path,
            len: intermediate.len() as u64,
            detected: Some(id(UTF_16LE)),
            fallback: id(WINDOWS_1251),
            target: id(UTF_8),
        };
        assert!(matches!(run(&back), Outcome::Converted { .. }));
        assert_eq!(fs::read(&path).expect("read back"), original.as_bytes());
    }

    #[test]
    fn same_encoding_is_skipped_without_touching_the_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "already utf-8\n").expect("write fixture");

        let req = request(&path, 14, Some(id(UTF_8)));
        assert!(matches!(run(&req), Outcome::Skipped));
        assert_eq!(fs::read(&path).expect("read back"), b"already utf-8\n");
    }

    #[test]
    fn suppressed_code_page_blocks_the_rewrite() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let bytes = [0xFF, 0xFE, 0x61, 0x00, 0x0A, 0x00];
        fs::write(&path, bytes).expect("write fixture");

        let req = request(&path, bytes.len() as u64, Some(id(UTF_16LE)));
        let outcome = process(&req, &[1200], false, &mut |_| {});
        assert!(matches!(outcome, Outcome::Suppressed));
        assert_eq!(fs::read(&path).expect("read back"), bytes);
    }

    #[test]
    fn test_only_never_mutates() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let (bytes, _, _) = WINDOWS_1251.encode("не трогать\n");
        fs::write(&path, &bytes).expect("write fixture");

        let req = request(&path, bytes.len() as u64, None);
        let outcome = process(&req, &[], true, &mut |_| {});
        assert!(matches!(outcome, Outcome::Converted { dry_run: true, .. }));
        assert_eq!(fs::read(&path).expect("read back"), bytes.as_ref());
    }

    #[test]
    fn existing_tmp_path_fails_loudly_and_leaves_the_original() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let (bytes, _, _) = WINDOWS_1251.encode("данные\n");
        fs::write(&path, &bytes).expect("write fixture");
        fs::write(dir.path().join("a.tmp"), b"in the way").expect("write blocker");

        let req = request(&path, bytes.len() as u64, None);
        match run(&req) {
            Outcome::IoError(err) => assert_eq!(err.kind(), ErrorKind::AlreadyExists),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fs::read(&path).expect("read back"), bytes.as_ref());
    }

    #[test]
    fn extensionless_tmp_collision_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("notes.tmp");
        fs::write(&path, b"abc\n").expect("write fixture");

        let req = request(&path, 4, None);
        assert!(matches!(run(&req), Outcome::IoError(_)));
        assert_eq!(fs::read(&path).expect("read back"), b"abc\n");
    }

    #[test]
    fn roll_back_restores_the_original_bytes() {
        let dir = tempdir().expect("tempdir");
        let original = dir.path().join("a.txt");
        let tmp = dir.path().join("a.tmp");
        fs::write(&tmp, b"the original").expect("write tmp");
        fs::write(&original, b"partial").expect("write partial");

        roll_back(&original, &tmp);
        assert_eq!(fs::read(&original).expect("read back"), b"the original");
        assert!(!tmp.exists());
    }

    #[test]
    fn progress_is_clamped_and_reaches_completion() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        let (bytes, _, _) = WINDOWS_1251.encode("один\nдва\nтри\n");
        fs::write(&path, &bytes).expect("write fixture");

        let mut fractions = Vec::new();
        let req = request(&path, bytes.len() as u64, None);
        let outcome = process(&req, &[], false, &mut |f| fractions.push(f));
        assert!(matches!(outcome, Outcome::Converted { lines: 3, .. }));
        assert!(!fractions.is_empty());
        assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(*fractions.last().expect("at least one report"), 1.0);
    }

    #[cfg(unix)]
    #[test]
    fn denied_rename_is_an_access_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).expect("subdir");
        let path = locked.join("a.txt");
        let (bytes, _, _) = WINDOWS_1251.encode("нет доступа\n");
        fs::write(&path, &bytes).expect("write fixture");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("chmod");

        let req = request(&path, bytes.len() as u64, None);
        let outcome = run(&req);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("chmod back");

        assert!(matches!(outcome, Outcome::AccessError(_)));
        assert_eq!(fs::read(&path).expect("read back"), bytes.as_ref());
    }
}
