use std::io::{Read, Write};

use crate::error::{AdbError, AdbResult};

pub(crate) fn write_fully<W: Write + ?Sized>(w: &mut W, mut buf: &[u8]) -> AdbResult<()> {
    while !buf.is_empty() {
        let n = w.write(buf)?;
        if n == 0 {
            return Err(AdbError::Network(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write returned 0 bytes",
            )));
        }
        buf = &buf[n..];
    }
    Ok(())
}

pub(crate) fn read_exact_checked<R: Read + ?Sized>(
    r: &mut R,
    buf: &mut [u8],
    description: &str,
) -> AdbResult<()> {
    let mut total = 0;
    while total < buf.len() {
        let n = r.read(&mut buf[total..])?;
        if n == 0 {
            return Err(AdbError::incomplete(description, total, buf.len()));
        }
        total += n;
    }
    Ok(())
}
