//! The narrow file services the engine needs: whole-file reads, a
//! truncating write-back for modified data files, and mapping a byte
//! offset in a source buffer to a line number for error reports.

use json::Value;
use std::io::Write;
use std::path::Path;

pub fn load(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
}

/// Serialize a data value back over its file.
pub fn update(path: &Path, data: &Value) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(data.to_string().as_bytes())?;
    file.write_all(b"\n")
}

/// 1-based line number containing the byte offset.
pub fn line_of(src: &str, offset: usize) -> usize {
    let offset = offset.min(src.len());
    1 + src[..offset].bytes().filter(|b| *b == b'\n').count()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_line_of() {
        let src = "one\ntwo\nthree";
        assert_eq!(line_of(src, 0), 1);
        assert_eq!(line_of(src, 4), 2);
        assert_eq!(line_of(src, src.len()), 3);
        assert_eq!(line_of(src, 9999), 3);
    }
}
