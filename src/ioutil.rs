use std::io::{self, Read};

/// Reads exactly `buf.len()` bytes, returning `Ok(false)` if the stream was
/// already at EOF before any bytes were read, or `Ok(true)` once `buf` is
/// full. A short read after some bytes have already landed is a genuine
/// I/O error rather than a clean end of stream — it means a record header
/// or hint entry was cut off mid-write.
pub(crate) fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) if total == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated record",
                ))
            }
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
